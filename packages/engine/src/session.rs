//! Document session: owns the queues, the wake channel and the worker thread.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use render_core::{
    CancelError, CompletionRecord, DocumentMetadata, JobId, JobOutput, JobState, LifecycleError,
    PageRequest, SessionConfig, SessionId, SessionState, SessionStats, SubmissionError,
};
use tracing::{debug, info};

use crate::document::{Document, LoadDocumentJob, PageRenderer, RenderPageJob};
use crate::job::{Chunk, PageJob};
use crate::queue::{OutputQueue, PendingJob, SubmissionQueue, lock};
use crate::wake::WakeChannel;
use crate::worker::{WorkerHandle, WorkerState, request_shutdown};

/// State shared with the worker thread. The session owns it; the worker only borrows
/// it through an `Arc` and is joined before the session lets go.
pub(crate) struct SessionShared {
    pub session_id: SessionId,
    pub config: SessionConfig,
    pub submissions: SubmissionQueue,
    pub chunks: OutputQueue<Chunk>,
    pub completions: OutputQueue<CompletionRecord>,
    pub wake: Arc<WakeChannel>,
    pub worker_state: Mutex<WorkerState>,
    pub closing: AtomicBool,
}

impl SessionShared {
    fn new(config: SessionConfig) -> Self {
        let wake = Arc::new(WakeChannel::new());
        Self {
            session_id: SessionId::new(),
            submissions: SubmissionQueue::new(config.cancel_pending_on_shutdown),
            config,
            chunks: OutputQueue::new(wake.clone()),
            completions: OutputQueue::new(wake.clone()),
            wake,
            worker_state: Mutex::new(WorkerState::Idle),
            closing: AtomicBool::new(false),
        }
    }
}

/// Everything one drain cycle observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WakeBatch {
    pub chunks: Vec<Chunk>,
    pub completions: Vec<CompletionRecord>,
}

impl WakeBatch {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.completions.is_empty()
    }

    /// Number of chunks and completion records.
    pub fn len(&self) -> usize {
        self.chunks.len() + self.completions.len()
    }

    /// Chunks produced by one job, in emission order.
    pub fn chunks_for(&self, job_id: JobId) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.job_id == job_id)
    }

    /// Hand every chunk, then every completion, to `handler`.
    pub fn dispatch<H: SessionHandler + ?Sized>(self, handler: &mut H) {
        for chunk in self.chunks {
            handler.on_chunk(chunk);
        }
        for record in self.completions {
            handler.on_completion(record);
        }
    }
}

/// Consumer-side callbacks, invoked outside every queue lock.
pub trait SessionHandler {
    fn on_chunk(&mut self, chunk: Chunk);

    fn on_completion(&mut self, record: CompletionRecord);
}

/// A session for one document, driven from a single consumer context.
///
/// Submission, cancellation and draining all happen on the consumer; jobs run on a
/// dedicated worker thread owned by the session.
pub struct DocumentSession {
    shared: Arc<SessionShared>,
    document: Arc<Document>,
    renderer: Option<Arc<dyn PageRenderer>>,
    worker: Option<WorkerHandle>,
    state: SessionState,
    stats: SessionStats,
    load_job: Option<JobId>,
}

impl DocumentSession {
    /// Start a session without a document, for running arbitrary jobs.
    pub fn new(config: SessionConfig) -> Result<Self, LifecycleError> {
        Self::start(Document::default(), None, config)
    }

    /// Open a document: the worker loads it before running any page job.
    pub fn open(
        source: impl Into<Bytes>,
        renderer: Arc<dyn PageRenderer>,
        config: SessionConfig,
    ) -> Result<Self, LifecycleError> {
        let mut session = Self::start(Document::new(source), Some(renderer.clone()), config)?;
        let load = LoadDocumentJob {
            document: session.document.clone(),
            renderer,
        };
        let id = session
            .submit_tagged(load, Some("load".to_string()))
            .map_err(|_| LifecycleError::SessionShutDown)?;
        session.load_job = Some(id);
        Ok(session)
    }

    /// Open a document whose metadata is already known; no load job is queued.
    pub fn open_loaded(
        source: impl Into<Bytes>,
        metadata: DocumentMetadata,
        renderer: Arc<dyn PageRenderer>,
        config: SessionConfig,
    ) -> Result<Self, LifecycleError> {
        Self::start(Document::with_metadata(source, metadata), Some(renderer), config)
    }

    fn start(
        document: Document,
        renderer: Option<Arc<dyn PageRenderer>>,
        config: SessionConfig,
    ) -> Result<Self, LifecycleError> {
        let shared = Arc::new(SessionShared::new(config));
        let worker = WorkerHandle::spawn(shared.clone())?;
        info!(session_id = %shared.session_id, "session opened");

        Ok(Self {
            shared,
            document: Arc::new(document),
            renderer,
            worker: Some(worker),
            state: SessionState::Open,
            stats: SessionStats::default(),
            load_job: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.shared.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Document metadata, once the load job has run.
    pub fn metadata(&self) -> Option<&DocumentMetadata> {
        self.document.metadata()
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// The job queued by [`DocumentSession::open`] to load the document.
    pub fn load_job(&self) -> Option<JobId> {
        self.load_job
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn worker_state(&self) -> WorkerState {
        *lock(&self.shared.worker_state)
    }

    /// Where a job is, as far as the session can tell without draining.
    ///
    /// `Pending` while queued, `Cancelled` once cancelled but not yet skipped by the
    /// worker, `Running` inside `execute`. Returns `None` for finished or unknown jobs;
    /// their outcome is in the completion record.
    pub fn job_state(&self, job_id: JobId) -> Option<JobState> {
        self.shared.submissions.job_state(job_id)
    }

    /// Jobs still waiting in the submission queue, cancelled ones included.
    pub fn pending_jobs(&self) -> usize {
        self.shared.submissions.len()
    }

    /// The channel signalled whenever output becomes drainable.
    pub fn wake_channel(&self) -> Arc<WakeChannel> {
        self.shared.wake.clone()
    }

    /// Queue a job for the worker.
    pub fn submit<J: PageJob>(&mut self, job: J) -> Result<JobId, SubmissionError> {
        self.submit_boxed(Box::new(job), None)
    }

    /// Queue a job with a caller-chosen tag echoed on its completion record.
    pub fn submit_tagged<J: PageJob>(
        &mut self,
        job: J,
        tag: Option<String>,
    ) -> Result<JobId, SubmissionError> {
        self.submit_boxed(Box::new(job), tag)
    }

    pub fn submit_boxed(
        &mut self,
        job: Box<dyn PageJob>,
        tag: Option<String>,
    ) -> Result<JobId, SubmissionError> {
        if !self.state.is_accepting_jobs() {
            return Err(SubmissionError::SessionClosed);
        }

        let id = JobId::new();
        let kind = job.kind().to_string();
        self.shared
            .submissions
            .push(PendingJob::new(id, tag, job))?;
        self.stats.submitted += 1;
        debug!(session_id = %self.shared.session_id, job_id = %id, kind = %kind, "job submitted");
        Ok(id)
    }

    /// Queue a page render using the session's renderer.
    pub fn submit_page(&mut self, request: PageRequest) -> Result<JobId, SubmissionError> {
        let renderer = self
            .renderer
            .clone()
            .ok_or_else(|| SubmissionError::InvalidJob("session has no renderer".to_string()))?;
        request.validate().map_err(SubmissionError::InvalidJob)?;
        if let Some(metadata) = self.document.metadata()
            && !metadata.contains_page(request.page_index)
        {
            return Err(SubmissionError::InvalidJob(format!(
                "page {} out of range (document has {} pages)",
                request.page_index,
                metadata.length()
            )));
        }

        let tag = request.tag.clone();
        let job = RenderPageJob {
            document: self.document.clone(),
            renderer,
            request,
        };
        self.submit_boxed(Box::new(job), tag)
    }

    /// Cancel a job that has not been picked up by the worker yet. The job still gets a
    /// `Cancelled` completion record; its `execute` never runs.
    pub fn cancel(&mut self, job_id: JobId, reason: Option<String>) -> Result<(), CancelError> {
        if !self.state.is_accepting_jobs() {
            return Err(CancelError::SessionShutDown);
        }
        if self.shared.submissions.cancel(job_id, reason) {
            debug!(session_id = %self.shared.session_id, job_id = %job_id, "job cancelled");
            Ok(())
        } else {
            Err(CancelError::NotPending(job_id))
        }
    }

    /// Drain both output queues.
    ///
    /// Completions are drained before chunks: a job's chunks are pushed before its
    /// completion record, so any record in this batch has all its chunks in this batch
    /// or an earlier one.
    pub fn on_wake(&mut self) -> WakeBatch {
        self.shared.wake.take();
        let completions = self.shared.completions.drain_all();
        let chunks = self.shared.chunks.drain_all();

        let batch = WakeBatch {
            chunks,
            completions,
        };
        if batch.is_empty() {
            return batch;
        }

        self.stats.wake_cycles += 1;
        self.stats.chunks += batch.chunks.len() as u64;
        self.stats.bytes += batch.chunks.iter().map(|c| c.len() as u64).sum::<u64>();
        for record in &batch.completions {
            self.stats.record_completion(record);
            if let Some(JobOutput::Loaded { metadata }) = record.status.output() {
                info!(
                    session_id = %self.shared.session_id,
                    pages = metadata.length(),
                    "document ready"
                );
            }
        }
        batch
    }

    /// Drain and dispatch to `handler`. Returns the number of items dispatched.
    pub fn pump<H: SessionHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let batch = self.on_wake();
        let count = batch.len();
        batch.dispatch(handler);
        count
    }

    /// Wait for the next non-empty batch.
    ///
    /// Returns `None` once the worker has exited and all output has been drained.
    pub async fn next_batch(&mut self) -> Option<WakeBatch> {
        loop {
            // Everything the worker pushed is drainable once it reports `Stopped`.
            let finished =
                self.state == SessionState::Closed || self.worker_state() == WorkerState::Stopped;
            let batch = self.on_wake();
            if !batch.is_empty() {
                return Some(batch);
            }
            if finished {
                return None;
            }

            let wake = self.shared.wake.clone();
            wake.wait().await;
        }
    }

    /// Stop accepting jobs and tell the worker to finish up, without waiting for it.
    ///
    /// Queued jobs still run (or are cancelled, per config) and their output stays
    /// drainable. Follow with [`DocumentSession::shutdown`] to join the worker.
    pub fn close(&mut self) -> Result<(), LifecycleError> {
        if self.state != SessionState::Open {
            return Err(LifecycleError::AlreadyShutDown);
        }
        self.state = SessionState::Closing;
        info!(
            session_id = %self.shared.session_id,
            pending = self.shared.submissions.len(),
            "session shutting down"
        );
        request_shutdown(&self.shared);
        Ok(())
    }

    fn begin_shutdown(&mut self) -> Result<Option<WorkerHandle>, LifecycleError> {
        match self.state {
            SessionState::Closed => return Err(LifecycleError::AlreadyShutDown),
            SessionState::Open => self.close()?,
            SessionState::Closing => {}
        }
        Ok(self.worker.take())
    }

    fn finish_shutdown(&mut self, joined: Result<(), LifecycleError>) -> Result<(), LifecycleError> {
        self.state = SessionState::Closed;
        info!(session_id = %self.shared.session_id, "session closed");
        joined
    }

    /// Stop accepting jobs, let the worker finish what is queued and join it. Also
    /// completes a [`DocumentSession::close`].
    ///
    /// Blocks the calling thread until the worker exits. Output produced before the
    /// worker stopped stays drainable through [`DocumentSession::on_wake`].
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        let worker = self.begin_shutdown()?;
        let joined = worker.map_or(Ok(()), WorkerHandle::join);
        self.finish_shutdown(joined)
    }

    /// [`DocumentSession::shutdown`] for async consumers; joins on a blocking task.
    pub async fn shutdown_async(&mut self) -> Result<(), LifecycleError> {
        let worker = self.begin_shutdown()?;
        let joined = match worker {
            Some(worker) => tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|_| LifecycleError::WorkerPanicked)
                .and_then(|joined| joined),
            None => Ok(()),
        };
        self.finish_shutdown(joined)
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            request_shutdown(&self.shared);
            let _ = worker.join();
        }
    }
}
