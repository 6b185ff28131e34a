//! Message and event types for the session actor.

use ractor::RpcReplyPort;
use render_core::{
    CancelError, CompletionRecord, DocumentMetadata, JobId, JobState, LifecycleError, PageRequest,
    SessionId, SessionState, SessionStats, SubmissionError,
};

use crate::job::{Chunk, PageJob};
use crate::worker::WorkerState;

/// Messages for the SessionActor.
pub enum SessionMessage {
    /// Submit an arbitrary job.
    Submit {
        job: Box<dyn PageJob>,
        tag: Option<String>,
        reply: RpcReplyPort<Result<JobId, SubmissionError>>,
    },

    /// Submit a page render.
    SubmitPage {
        request: PageRequest,
        reply: RpcReplyPort<Result<JobId, SubmissionError>>,
    },

    /// Cancel a job that is still queued.
    Cancel {
        job_id: JobId,
        reason: Option<String>,
        reply: RpcReplyPort<Result<(), CancelError>>,
    },

    /// The wake channel fired; drain and publish.
    Wake,

    /// Get the document metadata, if loaded.
    GetMetadata {
        reply: RpcReplyPort<Option<DocumentMetadata>>,
    },

    /// Get session statistics.
    GetStats { reply: RpcReplyPort<SessionStats> },

    /// Get where a job currently is.
    GetJobState {
        job_id: JobId,
        reply: RpcReplyPort<Option<JobState>>,
    },

    /// Get session and worker state.
    GetState {
        reply: RpcReplyPort<(SessionState, WorkerState)>,
    },

    /// Shut the session down, drain remaining output and stop the actor.
    Shutdown {
        reply: RpcReplyPort<Result<(), LifecycleError>>,
    },
}

impl std::fmt::Debug for SessionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMessage::Submit { job, tag, .. } => f
                .debug_struct("Submit")
                .field("kind", &job.kind())
                .field("tag", tag)
                .finish(),
            SessionMessage::SubmitPage { request, .. } => {
                f.debug_struct("SubmitPage").field("request", request).finish()
            }
            SessionMessage::Cancel { job_id, .. } => {
                f.debug_struct("Cancel").field("job_id", job_id).finish()
            }
            SessionMessage::Wake => f.write_str("Wake"),
            SessionMessage::GetMetadata { .. } => f.write_str("GetMetadata"),
            SessionMessage::GetJobState { job_id, .. } => {
                f.debug_struct("GetJobState").field("job_id", job_id).finish()
            }
            SessionMessage::GetStats { .. } => f.write_str("GetStats"),
            SessionMessage::GetState { .. } => f.write_str("GetState"),
            SessionMessage::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

/// Events published by the session actor after each drain.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A chunk of output for a job.
    Chunk(Chunk),
    /// A job reached a terminal state.
    Completed(CompletionRecord),
    /// The session shut down and all output has been delivered.
    Closed {
        session_id: SessionId,
        stats: SessionStats,
    },
}

impl SessionEvent {
    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SessionEvent::Chunk(chunk) => Some(chunk.job_id),
            SessionEvent::Completed(record) => Some(record.job_id),
            SessionEvent::Closed { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            SessionEvent::Chunk(chunk) => {
                format!("Chunk of {} bytes for job {}", chunk.len(), chunk.job_id)
            }
            SessionEvent::Completed(record) => record.description(),
            SessionEvent::Closed { session_id, stats } => format!(
                "Session {} closed after {} jobs",
                session_id,
                stats.finished()
            ),
        }
    }
}
