//! Session actor: a single-threaded consumer context that owns a `DocumentSession`.
//!
//! A bridge task waits on the session's wake channel and forwards a `Wake` message;
//! the actor drains on its own task and publishes the results to every subscriber.

use std::sync::{Arc, Mutex};

use futures_util::Stream;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use render_core::{
    DocumentMetadata, EngineError, JobId, JobState, LifecycleError, PageRequest, SessionId,
    SessionState, SessionStats,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::job::PageJob;
use crate::messages::{SessionEvent, SessionMessage};
use crate::queue::lock;
use crate::session::{DocumentSession, WakeBatch};
use crate::worker::WorkerState;

/// Fan-out of session events over one unbounded channel per subscriber.
///
/// Nothing is dropped: a slow subscriber's channel grows, and events published while
/// nobody is subscribed are held for the next subscriber.
#[derive(Default)]
struct EventHub {
    inner: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    backlog: Vec<SessionEvent>,
    closed: bool,
}

impl EventHub {
    fn publish(&self, event: SessionEvent) {
        let mut hub = lock(&self.inner);
        hub.subscribers.retain(|tx| !tx.is_closed());
        if hub.subscribers.is_empty() {
            hub.backlog.push(event);
            return;
        }
        for tx in &hub.subscribers {
            let _ = tx.send(event.clone());
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = lock(&self.inner);
        let hub = &mut *guard;
        for event in hub.backlog.drain(..) {
            let _ = tx.send(event);
        }
        // After `close` the sender is dropped here, so the receiver ends after the backlog.
        if !hub.closed {
            hub.subscribers.push(tx);
        }
        rx
    }

    /// Drop every sender so subscriber streams end once drained.
    fn close(&self) {
        let mut hub = lock(&self.inner);
        hub.closed = true;
        hub.subscribers.clear();
    }
}

/// State for the session actor.
pub struct SessionActorState {
    session: DocumentSession,
    events: Arc<EventHub>,
    bridge: Option<JoinHandle<()>>,
}

impl SessionActorState {
    /// Publish a drained batch, chunks first.
    fn publish(&self, batch: WakeBatch) {
        for chunk in batch.chunks {
            self.events.publish(SessionEvent::Chunk(chunk));
        }
        for record in batch.completions {
            tracing::debug!("{}", record.description());
            self.events.publish(SessionEvent::Completed(record));
        }
    }

    /// Shut the session down, publish everything it still holds, then `Closed`.
    async fn close(&mut self) -> Result<(), LifecycleError> {
        let result = self.session.shutdown_async().await;

        let batch = self.session.on_wake();
        if !batch.is_empty() {
            self.publish(batch);
        }
        self.events.publish(SessionEvent::Closed {
            session_id: self.session.id(),
            stats: self.session.stats().clone(),
        });
        self.events.close();

        result
    }
}

/// Session actor arguments.
pub struct SessionActorArgs {
    session: DocumentSession,
    events: Arc<EventHub>,
}

impl SessionActorArgs {
    pub fn new(session: DocumentSession) -> Self {
        Self {
            session,
            events: Arc::new(EventHub::default()),
        }
    }
}

/// Actor that drives one document session.
pub struct SessionActor;

impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting session actor: {}", args.session.id());

        let wake = args.session.wake_channel();
        let actor = myself.clone();
        let bridge = tokio::spawn(async move {
            loop {
                wake.wait().await;
                if actor.send_message(SessionMessage::Wake).is_err() {
                    break;
                }
            }
        });

        Ok(SessionActorState {
            session: args.session,
            events: args.events,
            bridge: Some(bridge),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::Submit { job, tag, reply } => {
                let _ = reply.send(state.session.submit_boxed(job, tag));
            }

            SessionMessage::SubmitPage { request, reply } => {
                let _ = reply.send(state.session.submit_page(request));
            }

            SessionMessage::Cancel {
                job_id,
                reason,
                reply,
            } => {
                let _ = reply.send(state.session.cancel(job_id, reason));
            }

            SessionMessage::Wake => {
                let batch = state.session.on_wake();
                if !batch.is_empty() {
                    state.publish(batch);
                }
            }

            SessionMessage::GetMetadata { reply } => {
                let _ = reply.send(state.session.metadata().cloned());
            }

            SessionMessage::GetJobState { job_id, reply } => {
                let _ = reply.send(state.session.job_state(job_id));
            }

            SessionMessage::GetStats { reply } => {
                let _ = reply.send(state.session.stats().clone());
            }

            SessionMessage::GetState { reply } => {
                let _ = reply.send((state.session.state(), state.session.worker_state()));
            }

            SessionMessage::Shutdown { reply } => {
                tracing::info!("Shutting down session actor: {}", state.session.id());
                let result = state.close().await;
                let _ = reply.send(result);
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(bridge) = state.bridge.take() {
            bridge.abort();
        }
        if state.session.state() != SessionState::Closed {
            tracing::info!("Session actor stopped, closing session: {}", state.session.id());
            state.close().await?;
        }
        Ok(())
    }
}

/// Cloneable client for a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    actor: ActorRef<SessionMessage>,
    events: Arc<EventHub>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn actor(&self) -> &ActorRef<SessionMessage> {
        &self.actor
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> SessionMessage,
    ) -> Result<T, EngineError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(build(tx.into()))
            .map_err(|e| EngineError::Actor(format!("Failed to send message: {}", e)))?;
        rx.await
            .map_err(|_| EngineError::Actor("Failed to receive response".to_string()))
    }

    /// Submit a job.
    pub async fn submit<J: PageJob>(&self, job: J) -> Result<JobId, EngineError> {
        self.submit_tagged(job, None).await
    }

    /// Submit a job with a tag echoed on its completion record.
    pub async fn submit_tagged<J: PageJob>(
        &self,
        job: J,
        tag: Option<String>,
    ) -> Result<JobId, EngineError> {
        let job: Box<dyn PageJob> = Box::new(job);
        Ok(self
            .call(|reply| SessionMessage::Submit { job, tag, reply })
            .await??)
    }

    /// Submit a page render.
    pub async fn submit_page(&self, request: PageRequest) -> Result<JobId, EngineError> {
        Ok(self
            .call(|reply| SessionMessage::SubmitPage { request, reply })
            .await??)
    }

    /// Cancel a queued job.
    pub async fn cancel(&self, job_id: JobId, reason: Option<String>) -> Result<(), EngineError> {
        Ok(self
            .call(|reply| SessionMessage::Cancel {
                job_id,
                reason,
                reply,
            })
            .await??)
    }

    pub async fn metadata(&self) -> Result<Option<DocumentMetadata>, EngineError> {
        self.call(|reply| SessionMessage::GetMetadata { reply }).await
    }

    /// See [`DocumentSession::job_state`].
    pub async fn job_state(&self, job_id: JobId) -> Result<Option<JobState>, EngineError> {
        self.call(|reply| SessionMessage::GetJobState { job_id, reply })
            .await
    }

    pub async fn stats(&self) -> Result<SessionStats, EngineError> {
        self.call(|reply| SessionMessage::GetStats { reply }).await
    }

    pub async fn state(&self) -> Result<(SessionState, WorkerState), EngineError> {
        self.call(|reply| SessionMessage::GetState { reply }).await
    }

    /// Shut the session down. Remaining output is published before `Closed`.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(self.call(|reply| SessionMessage::Shutdown { reply }).await??)
    }

    /// Subscribe to session events.
    ///
    /// The first subscriber also receives everything published while nobody was
    /// subscribed. The channel closes after `Closed`.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Session events as a stream, ending after `Closed`.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        let rx = self.subscribe();
        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }
}

/// Start a session actor for an opened session.
pub async fn spawn_session_actor(
    session: DocumentSession,
) -> Result<(SessionHandle, JoinHandle<()>), ractor::SpawnErr> {
    let session_id = session.id();
    let args = SessionActorArgs::new(session);
    let events = args.events.clone();

    let (actor, handle) =
        Actor::spawn(Some(format!("session-{}", session_id)), SessionActor, args).await?;

    Ok((
        SessionHandle {
            session_id,
            actor,
            events,
        },
        handle,
    ))
}
