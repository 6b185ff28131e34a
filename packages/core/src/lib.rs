//! Core domain types for the page rendering engine.
//!
//! This crate contains shared types used across all packages:
//! - Job identity, state and page render requests
//! - Completion records delivered to the consumer
//! - The document metadata property bag
//! - Session configuration, statistics and the error taxonomy

mod completion;
mod error;
mod job;
mod metadata;
mod session;

pub use completion::{CompletionRecord, CompletionStatus};
pub use error::{
    CancelError, ConfigError, EngineError, ExecutionError, LifecycleError, SubmissionError,
};
pub use job::{JobId, JobOutput, JobState, PageDimensions, PageRequest, Rotation};
pub use metadata::{DocumentMetadata, PageLayout, PageMode, Permissions};
pub use session::{SessionConfig, SessionId, SessionState, SessionStats};
