//! Error taxonomy shared by the engine and its callers.

use thiserror::Error;

use crate::JobId;

/// Errors reported synchronously when submitting a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

/// Job-level failures. These never leave the worker thread as an unwind; they are
/// turned into completion records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Page {page} out of range (document has {length} pages)")]
    PageOutOfRange { page: u32, length: u32 },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Document not loaded")]
    NotLoaded,

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Misuse of the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Session already shut down")]
    AlreadyShutDown,

    #[error("Session is shut down")]
    SessionShutDown,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    #[error("Worker thread panicked")]
    WorkerPanicked,
}

/// Errors from cancelling a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    /// The job already left the submission queue; it will run to completion.
    #[error("Job {0} is no longer pending")]
    NotPending(JobId),

    #[error("Session is shut down")]
    SessionShutDown,
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Umbrella error for callers that don't care about the layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Actor error: {0}")]
    Actor(String),
}
