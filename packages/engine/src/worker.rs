//! Background worker thread executing a session's jobs one at a time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use render_core::{CompletionRecord, CompletionStatus, ExecutionError, JobId, LifecycleError};
use tracing::{debug, info, warn};

use crate::job::ChunkSink;
use crate::queue::{Dequeued, PendingJob, lock};
use crate::session::SessionShared;

/// What the worker thread is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a job.
    #[default]
    Idle,
    /// Inside a job's `execute`.
    Executing(JobId),
    /// Shutdown observed; finishing `executing`, then whatever is still queued.
    ShuttingDown { executing: Option<JobId> },
    /// The thread has exited its loop.
    Stopped,
}

impl WorkerState {
    /// The job currently inside `execute`, if any.
    pub fn executing(&self) -> Option<JobId> {
        match self {
            WorkerState::Executing(id) | WorkerState::ShuttingDown { executing: Some(id) } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

/// Owned handle to the worker thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker thread for a session.
    pub fn spawn(shared: Arc<SessionShared>) -> Result<Self, LifecycleError> {
        let name = format!(
            "{}-{}",
            shared.config.worker_name_prefix, shared.session_id
        );
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = shared.config.worker_stack_size {
            builder = builder.stack_size(size);
        }

        let join = builder
            .spawn(move || worker_loop(shared))
            .map_err(|e| LifecycleError::WorkerSpawn(e.to_string()))?;

        Ok(Self { join: Some(join) })
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) -> Result<(), LifecycleError> {
        match self.join.take() {
            Some(join) => join.join().map_err(|_| LifecycleError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

fn worker_loop(shared: Arc<SessionShared>) {
    info!(session_id = %shared.session_id, "render worker started");

    while let Some(next) = shared.submissions.next() {
        let record = match next {
            Dequeued::Skip(entry, reason) => {
                debug!(session_id = %shared.session_id, job_id = %entry.id, "skipping cancelled job");
                CompletionRecord::new(entry.id, entry.tag, CompletionStatus::Cancelled { reason })
            }
            Dequeued::Run(entry) => {
                let id = entry.id;
                set_state(&shared, Some(id));
                let record = execute_job(&shared, entry);
                shared.submissions.finish(id);
                set_state(&shared, None);
                record
            }
        };

        shared.completions.push(record);
    }

    set_state(&shared, None);
    info!(session_id = %shared.session_id, "render worker stopped");
    *lock(&shared.worker_state) = WorkerState::Stopped;
    // Lets a waiting consumer notice the exit.
    shared.wake.signal();
}

/// Publish the worker's state. `closing` is read under the state lock, pairing with
/// `request_shutdown`.
fn set_state(shared: &SessionShared, executing: Option<JobId>) {
    let mut state = lock(&shared.worker_state);
    *state = match (shared.closing.load(Ordering::Acquire), executing) {
        (true, executing) => WorkerState::ShuttingDown { executing },
        (false, Some(id)) => WorkerState::Executing(id),
        (false, None) => WorkerState::Idle,
    };
}

fn execute_job(shared: &SessionShared, pending: PendingJob) -> CompletionRecord {
    let PendingJob { id, tag, job, .. } = pending;
    let kind = job.kind().to_string();
    debug!(session_id = %shared.session_id, job_id = %id, kind = %kind, "executing job");

    let started = Instant::now();
    let mut sink = ChunkSink::new(
        id,
        &shared.chunks,
        shared.config.chunk_high_water,
        &shared.closing,
    );
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.execute(&mut sink)));
    let duration_ms = started.elapsed().as_millis() as u64;

    let status = match outcome {
        Ok(Ok(output)) => {
            debug!(
                job_id = %id,
                kind = %kind,
                chunks = sink.emitted(),
                bytes = sink.bytes_emitted(),
                duration_ms,
                "job completed"
            );
            CompletionStatus::Ok { output }
        }
        Ok(Err(error)) => {
            warn!(job_id = %id, kind = %kind, error = %error, "job failed");
            CompletionStatus::Error {
                reason: error.to_string(),
            }
        }
        Err(payload) => {
            let error = ExecutionError::Panicked(panic_message(payload.as_ref()));
            warn!(job_id = %id, kind = %kind, error = %error, "job panicked");
            CompletionStatus::Error {
                reason: error.to_string(),
            }
        }
    };

    CompletionRecord::new(id, tag, status)
        .with_chunks(sink.emitted())
        .with_duration_ms(duration_ms)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Flag the session as closing and unblock anything the worker may be parked on.
pub(crate) fn request_shutdown(shared: &SessionShared) {
    shared.closing.store(true, Ordering::Release);
    {
        let mut state = lock(&shared.worker_state);
        if let WorkerState::Idle | WorkerState::Executing(_) = *state {
            let executing = state.executing();
            *state = WorkerState::ShuttingDown { executing };
        }
    }
    shared.submissions.close();
    shared.chunks.release_waiters();
}
