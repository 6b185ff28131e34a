//! Session domain types: identity, lifecycle, configuration and statistics.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{CompletionRecord, CompletionStatus, ConfigError};

/// Unique identifier for a document session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Create a new unique session ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a session ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting jobs.
    #[default]
    Open,
    /// Shutdown requested; the worker is finishing queued work.
    Closing,
    /// The worker has exited. Remaining output may still be drained.
    Closed,
}

impl SessionState {
    pub fn is_accepting_jobs(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Open => write!(f, "open"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Configuration for session behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix for the worker thread name; the session id is appended.
    pub worker_name_prefix: String,
    /// Pause chunk emission while this many chunks are waiting to be drained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_high_water: Option<usize>,
    /// Cancel jobs still queued at shutdown instead of running them.
    pub cancel_pending_on_shutdown: bool,
    /// Stack size for the worker thread in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_stack_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker_name_prefix: "render-worker".to_string(),
            chunk_high_water: None,
            cancel_pending_on_shutdown: false,
            worker_stack_size: None,
        }
    }
}

impl SessionConfig {
    pub fn with_chunk_high_water(mut self, limit: usize) -> Self {
        self.chunk_high_water = Some(limit);
        self
    }

    pub fn with_cancel_pending_on_shutdown(mut self, cancel: bool) -> Self {
        self.cancel_pending_on_shutdown = cancel;
        self
    }

    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `RENDER_WORKER_PREFIX`: worker thread name prefix
    /// - `RENDER_CHUNK_HIGH_WATER`: chunk backlog that pauses the worker (`0` disables)
    /// - `RENDER_CANCEL_ON_SHUTDOWN`: `true`/`false`
    /// - `RENDER_WORKER_STACK`: worker stack size in bytes
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(prefix) = var("RENDER_WORKER_PREFIX") {
            cfg.worker_name_prefix = prefix;
        }
        if let Some(raw) = var("RENDER_CHUNK_HIGH_WATER") {
            let limit = parse_number("RENDER_CHUNK_HIGH_WATER", &raw)?;
            cfg.chunk_high_water = (limit > 0).then_some(limit);
        }
        if let Some(raw) = var("RENDER_CANCEL_ON_SHUTDOWN") {
            cfg.cancel_pending_on_shutdown = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "RENDER_CANCEL_ON_SHUTDOWN={other} (expected true|false)"
                    )));
                }
            };
        }
        if let Some(raw) = var("RENDER_WORKER_STACK") {
            cfg.worker_stack_size = Some(parse_number("RENDER_WORKER_STACK", &raw)?);
        }

        Ok(cfg)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.parse::<usize>()
        .map_err(|e| ConfigError::Invalid(format!("{key}={raw}: {e}")))
}

/// Counters maintained by the consumer while draining.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Chunks handed to the consumer.
    pub chunks: u64,
    /// Payload bytes handed to the consumer.
    pub bytes: u64,
    /// Drain cycles that returned at least one item.
    pub wake_cycles: u64,
}

impl SessionStats {
    /// Jobs submitted but not yet observed as finished.
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.cancelled)
    }

    /// Jobs observed in a terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Success rate of executed jobs as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.completed + self.failed;
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }

    /// Account for one drained completion record.
    pub fn record_completion(&mut self, record: &CompletionRecord) {
        match record.status {
            CompletionStatus::Ok { .. } => self.completed += 1,
            CompletionStatus::Error { .. } => self.failed += 1,
            CompletionStatus::Cancelled { .. } => self.cancelled += 1,
        }
    }
}
