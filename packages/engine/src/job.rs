//! Job trait, chunk sink and the chunk type delivered to the consumer.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use render_core::{ExecutionError, JobId, JobOutput};

use crate::queue::OutputQueue;

/// A fragment of a job's output, delivered before the job completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The job that produced this chunk. Attribution only.
    pub job_id: JobId,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(job_id: JobId, payload: impl Into<Bytes>) -> Self {
        Self {
            job_id,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

/// Trait for work executed on a session's worker thread.
///
/// `execute` consumes the job, so each job runs at most once. It is only ever called on
/// the worker thread and never concurrently with another job of the same session.
pub trait PageJob: Send + 'static {
    /// Short name used in logs.
    fn kind(&self) -> &str {
        "job"
    }

    /// Run the job, emitting intermediate output through `sink`.
    fn execute(self: Box<Self>, sink: &mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError>;
}

/// Handle a running job uses to emit chunks.
///
/// Every `emit*` call has queued its chunk by the time it returns, so the caller may
/// reuse its buffer immediately.
pub struct ChunkSink<'a> {
    job_id: JobId,
    queue: &'a OutputQueue<Chunk>,
    high_water: Option<usize>,
    released: &'a AtomicBool,
    emitted: u64,
    bytes: u64,
}

impl<'a> ChunkSink<'a> {
    pub(crate) fn new(
        job_id: JobId,
        queue: &'a OutputQueue<Chunk>,
        high_water: Option<usize>,
        released: &'a AtomicBool,
    ) -> Self {
        Self {
            job_id,
            queue,
            high_water,
            released,
            emitted: 0,
            bytes: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Copy `data` into a new chunk.
    pub fn emit(&mut self, data: &[u8]) {
        self.emit_bytes(Bytes::copy_from_slice(data));
    }

    /// Hand an owned buffer over to the chunk queue.
    pub fn emit_bytes(&mut self, payload: impl Into<Bytes>) {
        if let Some(limit) = self.high_water {
            let released = self.released;
            self.queue
                .wait_below(limit, || released.load(Ordering::Acquire));
        }

        let payload = payload.into();
        self.bytes += payload.len() as u64;
        self.emitted += 1;
        tracing::trace!(job_id = %self.job_id, bytes = payload.len(), "chunk emitted");
        self.queue.push(Chunk {
            job_id: self.job_id,
            payload,
        });
    }

    /// Chunks emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Payload bytes emitted so far.
    pub fn bytes_emitted(&self) -> u64 {
        self.bytes
    }
}

/// A simple closure-based job.
pub struct FnJob<F>
where
    F: FnOnce(&mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError> + Send + 'static,
{
    kind: String,
    run: F,
}

impl<F> FnJob<F>
where
    F: FnOnce(&mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError> + Send + 'static,
{
    /// Create a new closure-based job.
    pub fn new(kind: impl Into<String>, run: F) -> Self {
        Self {
            kind: kind.into(),
            run,
        }
    }
}

impl<F> PageJob for FnJob<F>
where
    F: FnOnce(&mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError> + Send + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    fn execute(self: Box<Self>, sink: &mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError> {
        (self.run)(sink)
    }
}
