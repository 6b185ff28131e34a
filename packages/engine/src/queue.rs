//! Mutex-guarded FIFO queues shared between the consumer and the worker thread.
//!
//! Each queue has its own mutex, held only for a single append, pop or swap. No code
//! path holds two queue locks at once.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use render_core::{JobId, JobState, SubmissionError};

use crate::job::PageJob;
use crate::wake::WakeChannel;

/// Every critical section leaves the queue consistent, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Output queue filled by the worker and drained by the consumer.
#[derive(Debug)]
pub struct OutputQueue<T> {
    items: Mutex<Vec<T>>,
    drained: Condvar,
    wake: Arc<WakeChannel>,
}

impl<T> OutputQueue<T> {
    pub fn new(wake: Arc<WakeChannel>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            drained: Condvar::new(),
            wake,
        }
    }

    /// Append an item, then signal the wake channel.
    pub fn push(&self, item: T) {
        lock(&self.items).push(item);
        self.wake.signal();
    }

    /// Take every queued item in push order. Never blocks on an empty queue.
    pub fn drain_all(&self) -> Vec<T> {
        let drained = std::mem::take(&mut *lock(&self.items));
        if !drained.is_empty() {
            self.drained.notify_all();
        }
        drained
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block while at least `limit` items are queued, until a drain makes room or
    /// `released` reports true.
    pub(crate) fn wait_below(&self, limit: usize, released: impl Fn() -> bool) {
        let mut items = lock(&self.items);
        while items.len() >= limit && !released() {
            items = self
                .drained
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wake every producer parked in `wait_below` so it re-checks its release condition.
    pub(crate) fn release_waiters(&self) {
        let _items = lock(&self.items);
        self.drained.notify_all();
    }
}

/// A submitted job waiting for the worker.
pub(crate) struct PendingJob {
    pub id: JobId,
    pub tag: Option<String>,
    pub job: Box<dyn PageJob>,
    pub cancelled: bool,
    pub cancel_reason: Option<String>,
}

impl PendingJob {
    pub fn new(id: JobId, tag: Option<String>, job: Box<dyn PageJob>) -> Self {
        Self {
            id,
            tag,
            job,
            cancelled: false,
            cancel_reason: None,
        }
    }
}

/// What the worker should do with the next queued entry.
pub(crate) enum Dequeued {
    /// Execute the job.
    Run(PendingJob),
    /// Report the job as cancelled without executing it.
    Skip(PendingJob, Option<String>),
}

struct SubmissionState {
    jobs: VecDeque<PendingJob>,
    running: Option<JobId>,
    closing: bool,
}

/// Submission queue: the consumer pushes, the worker blocks on `next`.
///
/// The job handed to the worker stays recorded as running until `finish`, so a job is
/// always either queued, running or finished under a single lock.
pub(crate) struct SubmissionQueue {
    state: Mutex<SubmissionState>,
    available: Condvar,
    cancel_on_close: bool,
}

impl SubmissionQueue {
    /// `cancel_on_close` turns jobs dequeued after `close` into `Skip` entries.
    pub fn new(cancel_on_close: bool) -> Self {
        Self {
            state: Mutex::new(SubmissionState {
                jobs: VecDeque::new(),
                running: None,
                closing: false,
            }),
            available: Condvar::new(),
            cancel_on_close,
        }
    }

    pub fn push(&self, entry: PendingJob) -> Result<(), SubmissionError> {
        {
            let mut state = lock(&self.state);
            if state.closing {
                return Err(SubmissionError::SessionClosed);
            }
            state.jobs.push_back(entry);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Block until a job is available. Returns `None` once the queue is closed and empty.
    pub fn next(&self) -> Option<Dequeued> {
        let mut state = lock(&self.state);
        loop {
            if let Some(mut entry) = state.jobs.pop_front() {
                if entry.cancelled {
                    let reason = entry.cancel_reason.take();
                    return Some(Dequeued::Skip(entry, reason));
                }
                if state.closing && self.cancel_on_close {
                    return Some(Dequeued::Skip(entry, Some("session shut down".to_string())));
                }
                state.running = Some(entry.id);
                return Some(Dequeued::Run(entry));
            }
            if state.closing {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Clear the running marker once the worker is done with `id`.
    pub fn finish(&self, id: JobId) {
        let mut state = lock(&self.state);
        if state.running == Some(id) {
            state.running = None;
        }
    }

    /// `Pending`, `Running` or `Cancelled` (marked but not yet dequeued); `None` when the
    /// queue no longer knows the job.
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        let state = lock(&self.state);
        if state.running == Some(id) {
            return Some(JobState::Running);
        }
        state.jobs.iter().find(|p| p.id == id).map(|p| {
            if p.cancelled {
                JobState::Cancelled
            } else {
                JobState::Pending
            }
        })
    }

    /// Mark a still-queued job so the worker skips it. Returns false if the job is not
    /// waiting in the queue.
    pub fn cancel(&self, id: JobId, reason: Option<String>) -> bool {
        let mut state = lock(&self.state);
        match state.jobs.iter_mut().find(|p| p.id == id && !p.cancelled) {
            Some(pending) => {
                pending.cancelled = true;
                pending.cancel_reason = reason;
                true
            }
            None => false,
        }
    }

    /// Stop accepting jobs and wake the worker if it is waiting.
    pub fn close(&self) {
        lock(&self.state).closing = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        lock(&self.state).jobs.len()
    }
}
