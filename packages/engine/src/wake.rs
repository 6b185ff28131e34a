//! Cross-thread wake signal for the consumer's event loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// Edge-triggered, coalescing "something is ready" signal.
///
/// The worker calls [`WakeChannel::signal`] after every push; only the transition from
/// idle to armed notifies the consumer, so a burst of pushes costs one wake. The
/// consumer clears the flag with [`WakeChannel::take`] *before* draining, which means a
/// push racing with the drain re-arms the channel instead of being lost.
#[derive(Debug, Default)]
pub struct WakeChannel {
    armed: AtomicBool,
    notify: Notify,
    signals: AtomicU64,
    wakes: AtomicU64,
}

impl WakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark output as ready. Safe to call from any thread.
    pub fn signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        if !self.armed.swap(true, Ordering::AcqRel) {
            self.wakes.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
        }
    }

    /// Clear the armed flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Wait until the channel is armed, then clear it.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.take() {
                return;
            }
            notified.await;
        }
    }

    /// Total number of `signal` calls.
    pub fn signal_count(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    /// Number of signals that actually woke the consumer.
    pub fn wake_count(&self) -> u64 {
        self.wakes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn coalesces_signals_until_taken() {
        let wake = WakeChannel::new();
        wake.signal();
        wake.signal();
        wake.signal();
        assert_eq!(wake.signal_count(), 3);
        assert_eq!(wake.wake_count(), 1);

        assert!(wake.take());
        assert!(!wake.take());

        wake.signal();
        assert_eq!(wake.wake_count(), 2);
    }

    #[tokio::test]
    async fn wait_returns_for_signal_from_another_thread() {
        let wake = Arc::new(WakeChannel::new());
        let remote = wake.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.signal();
        });

        tokio::time::timeout(Duration::from_secs(5), wake.wait())
            .await
            .expect("wake never arrived");
        assert!(!wake.is_armed());
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn wait_observes_signal_sent_before_waiting() {
        let wake = WakeChannel::new();
        wake.signal();
        tokio::time::timeout(Duration::from_secs(1), wake.wait())
            .await
            .expect("pre-armed wake was lost");
    }
}
