//! Render every page of a file through a session actor and log what comes back.
//!
//! ```text
//! render-demo <path> [pages]
//! ```
//!
//! The page count falls back to `RENDER_DEMO_PAGES`, then to 1. Session settings come
//! from the `RENDER_*` environment variables and the log filter from `RUST_LOG`.

use std::collections::HashSet;
use std::sync::Arc;

use engine::{DocumentSession, PassthroughRenderer, SessionEvent, spawn_session_actor};
use futures_util::StreamExt;
use render_core::{JobOutput, PageRequest, SessionConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn page_count(arg: Option<String>) -> Result<u32, Box<dyn std::error::Error>> {
    let raw = arg.or_else(|| std::env::var("RENDER_DEMO_PAGES").ok());
    match raw {
        Some(raw) => Ok(raw.trim().parse()?),
        None => Ok(1),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: render-demo <path> [pages]")?;
    let pages = page_count(args.next())?;

    let config = SessionConfig::from_env()?;
    let source = tokio::fs::read(&path).await?;
    info!(path = %path, bytes = source.len(), pages, "opening document");

    let renderer = Arc::new(PassthroughRenderer::new(pages));
    let session = DocumentSession::open(source, renderer, config)?;
    let load_job = session.load_job();
    let (handle, join) = spawn_session_actor(session).await?;
    let mut events = Box::pin(handle.events());

    let mut outstanding = HashSet::new();
    outstanding.extend(load_job);
    for page in 0..pages {
        outstanding.insert(handle.submit_page(PageRequest::new(page)).await?);
    }

    while !outstanding.is_empty() {
        let Some(event) = events.next().await else {
            warn!("event stream ended early");
            break;
        };
        match &event {
            SessionEvent::Chunk(_) => tracing::debug!("{}", event.description()),
            SessionEvent::Completed(record) => {
                outstanding.remove(&record.job_id);
                match record.status.output() {
                    Some(JobOutput::Page {
                        page_index,
                        dimensions,
                    }) => info!(
                        page = page_index,
                        width = dimensions.width,
                        height = dimensions.height,
                        chunks = record.chunks,
                        duration_ms = record.duration_ms,
                        "page rendered"
                    ),
                    Some(_) => info!("{}", record.description()),
                    None => error!("{}", record.description()),
                }
            }
            SessionEvent::Closed { .. } => break,
        }
    }

    handle.shutdown().await?;
    while let Some(event) = events.next().await {
        if let SessionEvent::Closed { stats, .. } = event {
            info!(
                completed = stats.completed,
                failed = stats.failed,
                cancelled = stats.cancelled,
                chunks = stats.chunks,
                bytes = stats.bytes,
                wake_cycles = stats.wake_cycles,
                "session closed"
            );
        }
    }
    join.await?;

    Ok(())
}
