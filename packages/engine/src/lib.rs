//! Background rendering engine.
//!
//! This crate provides the concurrency substrate for rendering document pages off the
//! consumer's thread: a submission queue, one worker thread per session, chunk and
//! completion queues, and a wake channel that tells the consumer when to drain.
//!
//! # Architecture
//!
//! - `DocumentSession` - Owns the queues and the worker; lives on the consumer
//! - `WakeChannel` - Edge-triggered signal from the worker to the consumer
//! - `PageJob` - Work executed on the worker, streaming chunks through a `ChunkSink`
//! - `SessionActor` - Optional ractor actor acting as the consumer context
//!
//! # Usage
//!
//! ```ignore
//! use engine::{DocumentSession, PassthroughRenderer};
//! use render_core::{PageRequest, SessionConfig};
//!
//! let renderer = Arc::new(PassthroughRenderer::new(4));
//! let mut session = DocumentSession::open(bytes, renderer, SessionConfig::default())?;
//! let job = session.submit_page(PageRequest::new(0))?;
//!
//! while let Some(batch) = session.next_batch().await {
//!     batch.dispatch(&mut handler);
//! }
//! ```

mod document;
mod job;
mod messages;
mod queue;
mod session;
mod session_actor;
mod wake;
mod worker;

pub use document::{Document, PageRenderer, PassthroughRenderer};
pub use job::{Chunk, ChunkSink, FnJob, PageJob};
pub use messages::{SessionEvent, SessionMessage};
pub use queue::OutputQueue;
pub use session::{DocumentSession, SessionHandler, WakeBatch};
pub use session_actor::{SessionActor, SessionActorArgs, SessionHandle, spawn_session_actor};
pub use wake::WakeChannel;
pub use worker::WorkerState;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};

/// Helper macro for creating jobs from closures.
#[macro_export]
macro_rules! page_job {
    ($kind:expr, |$sink:ident| $body:expr) => {
        $crate::FnJob::new($kind, move |$sink: &mut $crate::ChunkSink<'_>| $body)
    };
}
