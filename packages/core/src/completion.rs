//! Completion records delivered once per finished job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobOutput, JobState};

/// Terminal status of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The job ran to completion.
    Ok { output: JobOutput },
    /// The job failed; `reason` is a diagnostic string.
    Error { reason: String },
    /// The job was cancelled before it started.
    Cancelled { reason: Option<String> },
}

impl CompletionStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CompletionStatus::Ok { .. })
    }

    pub fn state(&self) -> JobState {
        match self {
            CompletionStatus::Ok { .. } => JobState::Completed,
            CompletionStatus::Error { .. } => JobState::Failed,
            CompletionStatus::Cancelled { .. } => JobState::Cancelled,
        }
    }

    pub fn output(&self) -> Option<&JobOutput> {
        match self {
            CompletionStatus::Ok { output } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CompletionStatus::Error { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Record pushed to the completion queue when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub job_id: JobId,
    /// Caller-supplied identifier from the submission, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub status: CompletionStatus,
    /// Number of chunks the job emitted before finishing.
    pub chunks: u64,
    /// Wall time spent inside `execute`, zero for cancelled jobs.
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn new(job_id: JobId, tag: Option<String>, status: CompletionStatus) -> Self {
        Self {
            job_id,
            tag,
            status,
            chunks: 0,
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn with_chunks(mut self, chunks: u64) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    /// Get a short description of this record for logging.
    pub fn description(&self) -> String {
        match &self.status {
            CompletionStatus::Ok { .. } => {
                format!("Job {} completed in {}ms", self.job_id, self.duration_ms)
            }
            CompletionStatus::Error { reason } => {
                format!("Job {} failed: {}", self.job_id, reason)
            }
            CompletionStatus::Cancelled { reason } => {
                let reason = reason.as_deref().unwrap_or("no reason");
                format!("Job {} cancelled: {}", self.job_id, reason)
            }
        }
    }
}
