#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use engine::{Chunk, DocumentSession, SessionHandler};
use render_core::{CompletionRecord, JobId};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Everything the consumer saw, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Chunk(JobId, Vec<u8>),
    Completed(CompletionRecord),
}

/// Handler that records dispatch order and checks that no completion arrives before
/// all of its job's chunks.
#[derive(Debug, Default)]
pub struct Recorder {
    pub observed: Vec<Observed>,
    pub chunks_per_job: HashMap<JobId, u64>,
    pub early_completions: Vec<JobId>,
}

impl Recorder {
    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.observed
            .iter()
            .filter_map(|o| match o {
                Observed::Completed(record) => Some(record.clone()),
                Observed::Chunk(..) => None,
            })
            .collect()
    }

    pub fn chunks_for(&self, job_id: JobId) -> Vec<Vec<u8>> {
        self.observed
            .iter()
            .filter_map(|o| match o {
                Observed::Chunk(id, data) if *id == job_id => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first observation matching `pred`.
    pub fn position(&self, pred: impl Fn(&Observed) -> bool) -> Option<usize> {
        self.observed.iter().position(pred)
    }
}

impl SessionHandler for Recorder {
    fn on_chunk(&mut self, chunk: Chunk) {
        *self.chunks_per_job.entry(chunk.job_id).or_default() += 1;
        self.observed
            .push(Observed::Chunk(chunk.job_id, chunk.payload.to_vec()));
    }

    fn on_completion(&mut self, record: CompletionRecord) {
        let seen = self.chunks_per_job.get(&record.job_id).copied().unwrap_or(0);
        if seen != record.chunks {
            self.early_completions.push(record.job_id);
        }
        self.observed.push(Observed::Completed(record));
    }
}

/// Drain `session` into `recorder` until `expected` completions have been observed.
pub async fn collect(session: &mut DocumentSession, recorder: &mut Recorder, expected: usize) {
    let deadline = Instant::now() + TIMEOUT;
    while recorder.completions().len() < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, session.next_batch()).await {
            Ok(Some(batch)) => batch.dispatch(recorder),
            Ok(None) => break,
            Err(_) => panic!(
                "timed out with {} of {} completions",
                recorder.completions().len(),
                expected
            ),
        }
    }
}

/// Poll `cond` until it holds or the timeout expires.
pub fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}
