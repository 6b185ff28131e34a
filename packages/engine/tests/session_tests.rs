mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{Observed, Recorder, collect, init_tracing, wait_for};
use engine::{DocumentSession, PassthroughRenderer, WorkerState, page_job};
use render_core::{
    CancelError, CompletionStatus, ExecutionError, JobOutput, JobState, LifecycleError,
    PageDimensions, PageRequest, Rotation, SessionConfig, SessionState, SubmissionError,
};

fn session() -> DocumentSession {
    init_tracing();
    DocumentSession::new(SessionConfig::default()).expect("session should start")
}

#[tokio::test]
async fn test_chunks_then_failure_scenario() {
    let mut session = session();

    let first = session
        .submit(page_job!("first", |_sink| Ok(JobOutput::custom("first"))))
        .unwrap();
    let second = session
        .submit(page_job!("second", |sink| {
            sink.emit(b"a");
            sink.emit(b"b");
            Err(ExecutionError::Other("boom".to_string()))
        }))
        .unwrap();
    let third = session
        .submit(page_job!("third", |_sink| Ok(JobOutput::custom("third"))))
        .unwrap();

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 3).await;

    let completions = recorder.completions();
    let ids: Vec<_> = completions.iter().map(|r| r.job_id).collect();
    assert_eq!(ids, vec![first, second, third]);
    assert_eq!(completions[0].state(), JobState::Completed);
    assert_eq!(completions[1].state(), JobState::Failed);
    assert_eq!(completions[1].status.error(), Some("boom"));
    assert_eq!(completions[1].chunks, 2);
    assert_eq!(completions[2].state(), JobState::Completed);

    assert_eq!(
        recorder.chunks_for(second),
        vec![b"a".to_vec(), b"b".to_vec()]
    );
    assert!(recorder.chunks_for(first).is_empty());
    assert!(recorder.chunks_for(third).is_empty());

    let last_chunk = recorder
        .observed
        .iter()
        .rposition(|o| matches!(o, Observed::Chunk(id, _) if *id == second))
        .unwrap();
    let completion = recorder
        .position(|o| matches!(o, Observed::Completed(r) if r.job_id == second))
        .unwrap();
    assert!(last_chunk < completion);
    assert!(recorder.early_completions.is_empty());

    assert_eq!(session.stats().completed, 2);
    assert_eq!(session.stats().failed, 1);
    assert_eq!(session.stats().chunks, 2);
}

#[tokio::test]
async fn test_completions_follow_submission_order() {
    let mut session = session();

    let mut submitted = Vec::new();
    for i in 0..50u32 {
        let id = session
            .submit(page_job!("count", |sink| {
                for n in 0..(i % 4) {
                    sink.emit(&n.to_le_bytes());
                }
                Ok(JobOutput::custom(format!("job {i}")))
            }))
            .unwrap();
        submitted.push(id);
    }

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, submitted.len()).await;

    let completed: Vec<_> = recorder.completions().iter().map(|r| r.job_id).collect();
    assert_eq!(completed, submitted);
    assert!(recorder.early_completions.is_empty());

    for (i, id) in submitted.iter().enumerate() {
        let expected: Vec<Vec<u8>> = (0..(i as u32 % 4))
            .map(|n| n.to_le_bytes().to_vec())
            .collect();
        assert_eq!(recorder.chunks_for(*id), expected);
    }
}

#[tokio::test]
async fn test_drain_after_completion_is_empty() {
    let mut session = session();
    session
        .submit(page_job!("one", |sink| {
            sink.emit(b"x");
            Ok(JobOutput::custom("one"))
        }))
        .unwrap();

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 1).await;

    assert!(session.on_wake().is_empty());
    assert!(session.on_wake().is_empty());
    assert_eq!(session.pump(&mut recorder), 0);
    assert_eq!(recorder.observed.len(), 2);
}

#[test]
fn test_burst_of_chunks_coalesces_into_one_wake() {
    let mut session = session();
    let wake = session.wake_channel();

    session
        .submit(page_job!("burst", |sink| {
            for i in 0..100u8 {
                sink.emit(&[i]);
            }
            Ok(JobOutput::custom("burst"))
        }))
        .unwrap();

    wait_for(|| wake.signal_count() == 101);
    assert_eq!(wake.wake_count(), 1);
    assert!(wake.is_armed());

    let batch = session.on_wake();
    assert_eq!(batch.chunks.len(), 100);
    assert_eq!(batch.completions.len(), 1);
    assert!(!wake.is_armed());
    assert_eq!(session.stats().wake_cycles, 1);
}

#[test]
fn test_shutdown_is_terminal() {
    let mut session = session();
    let id = session
        .submit(page_job!("last", |sink| {
            sink.emit(b"tail");
            Ok(JobOutput::custom("last"))
        }))
        .unwrap();

    session.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.worker_state(), WorkerState::Stopped);

    // Work queued before shutdown still ran and is drainable.
    let batch = session.on_wake();
    assert_eq!(batch.completions.len(), 1);
    assert_eq!(batch.completions[0].job_id, id);
    assert_eq!(batch.chunks_for(id).count(), 1);

    let rejected = session.submit(page_job!("late", |_sink| Ok(JobOutput::custom("late"))));
    assert_eq!(rejected.unwrap_err(), SubmissionError::SessionClosed);
    assert_eq!(session.shutdown(), Err(LifecycleError::AlreadyShutDown));
    assert_eq!(session.cancel(id, None), Err(CancelError::SessionShutDown));
    assert!(session.on_wake().is_empty());
}

#[tokio::test]
async fn test_next_batch_ends_after_shutdown() {
    let mut session = session();
    session
        .submit(page_job!("one", |_sink| Ok(JobOutput::custom("one"))))
        .unwrap();
    session.shutdown_async().await.unwrap();

    let batch = session.next_batch().await.expect("queued output is still delivered");
    assert_eq!(batch.completions.len(), 1);
    assert!(session.next_batch().await.is_none());
}

#[tokio::test]
async fn test_ten_thousand_jobs() {
    let mut session = session();
    let mut recorder = Recorder::default();

    let mut submitted = Vec::with_capacity(10_000);
    for i in 0..10_000u32 {
        let id = session
            .submit(page_job!("stress", |sink| {
                if i % 10 == 0 {
                    sink.emit(&i.to_be_bytes());
                }
                Ok(JobOutput::custom("ok"))
            }))
            .unwrap();
        submitted.push(id);

        if i % 1_000 == 0 {
            session.pump(&mut recorder);
        }
    }

    collect(&mut session, &mut recorder, submitted.len()).await;

    let completions = recorder.completions();
    assert_eq!(completions.len(), 10_000);
    let unique: HashSet<_> = completions.iter().map(|r| r.job_id).collect();
    assert_eq!(unique.len(), 10_000);
    let completed: Vec<_> = completions.iter().map(|r| r.job_id).collect();
    assert_eq!(completed, submitted);
    assert!(recorder.early_completions.is_empty());
    assert_eq!(session.stats().completed, 10_000);
    assert_eq!(session.stats().chunks, 1_000);
    assert_eq!(session.stats().outstanding(), 0);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let mut session = session();
    let (release, gate) = mpsc::channel::<()>();
    let ran = Arc::new(AtomicBool::new(false));

    let blocker = session
        .submit(page_job!("gate", |_sink| {
            let _ = gate.recv();
            Ok(JobOutput::custom("gate"))
        }))
        .unwrap();
    let flag = ran.clone();
    let victim = session
        .submit(page_job!("victim", |sink| {
            flag.store(true, Ordering::SeqCst);
            sink.emit(b"never");
            Ok(JobOutput::custom("victim"))
        }))
        .unwrap();

    wait_for(|| session.worker_state() == WorkerState::Executing(blocker));
    assert_eq!(
        session.cancel(blocker, None),
        Err(CancelError::NotPending(blocker))
    );
    session
        .cancel(victim, Some("no longer visible".to_string()))
        .unwrap();
    assert_eq!(
        session.cancel(victim, None),
        Err(CancelError::NotPending(victim))
    );
    release.send(()).unwrap();

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 2).await;

    let completions = recorder.completions();
    assert_eq!(completions[0].job_id, blocker);
    assert_eq!(completions[1].job_id, victim);
    assert_eq!(
        completions[1].status,
        CompletionStatus::Cancelled {
            reason: Some("no longer visible".to_string())
        }
    );
    assert!(recorder.chunks_for(victim).is_empty());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(session.stats().cancelled, 1);
}

#[tokio::test]
async fn test_panicking_job_is_reported_as_failure() {
    let mut session = session();

    let bad = session
        .submit(page_job!("bad", |sink| {
            sink.emit(b"partial");
            panic!("decoder exploded");
        }))
        .unwrap();
    let good = session
        .submit(page_job!("good", |_sink| Ok(JobOutput::custom("fine"))))
        .unwrap();

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 2).await;

    let completions = recorder.completions();
    assert_eq!(completions[0].job_id, bad);
    assert_eq!(completions[0].state(), JobState::Failed);
    assert!(
        completions[0]
            .status
            .error()
            .is_some_and(|e| e.contains("decoder exploded"))
    );
    assert_eq!(recorder.chunks_for(bad), vec![b"partial".to_vec()]);
    assert_eq!(completions[1].job_id, good);
    assert!(completions[1].status.is_ok());
    assert_eq!(session.worker_state(), WorkerState::Idle);
}

#[tokio::test]
async fn test_open_loads_then_renders_pages() {
    init_tracing();
    let source: Vec<u8> = (0u8..10).collect();
    let renderer = Arc::new(PassthroughRenderer::new(3).with_chunk_size(3));
    let mut session = DocumentSession::open(source.clone(), renderer, SessionConfig::default())
        .expect("session should open");
    let load = session.load_job().expect("open queues a load job");

    let page = session
        .submit_page(
            PageRequest::new(0)
                .with_scale(2.0)
                .with_rotation(Rotation::Quarter)
                .with_tag("thumb"),
        )
        .unwrap();
    let last = session.submit_page(PageRequest::new(2)).unwrap();
    let missing = session.submit_page(PageRequest::new(5)).unwrap();

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 4).await;
    let completions = recorder.completions();

    assert_eq!(completions[0].job_id, load);
    assert_eq!(completions[0].tag.as_deref(), Some("load"));
    match completions[0].status.output() {
        Some(JobOutput::Loaded { metadata }) => {
            assert_eq!(metadata.length(), 3);
            assert_eq!(metadata.format(), Some("raw"));
        }
        other => panic!("unexpected load output: {other:?}"),
    }
    let metadata = session.metadata().expect("metadata available after load");
    assert_eq!(metadata.length(), 3);

    assert_eq!(completions[1].job_id, page);
    assert_eq!(completions[1].tag.as_deref(), Some("thumb"));
    assert_eq!(
        completions[1].status.output().and_then(JobOutput::dimensions),
        Some(PageDimensions::new(1584, 1224))
    );
    assert_eq!(
        recorder.chunks_for(page),
        vec![vec![0, 1, 2], vec![3]]
    );

    assert_eq!(completions[2].job_id, last);
    assert_eq!(recorder.chunks_for(last), vec![vec![8, 9]]);

    assert_eq!(completions[3].job_id, missing);
    assert_eq!(
        completions[3].status.error(),
        Some("Page 5 out of range (document has 3 pages)")
    );

    // Once metadata is known, out-of-range pages are rejected up front.
    assert!(matches!(
        session.submit_page(PageRequest::new(3)),
        Err(SubmissionError::InvalidJob(_))
    ));
}

#[tokio::test]
async fn test_failed_load_fails_page_jobs() {
    init_tracing();
    let renderer = Arc::new(PassthroughRenderer::new(2));
    let mut session =
        DocumentSession::open(Vec::<u8>::new(), renderer, SessionConfig::default()).unwrap();
    let page = session.submit_page(PageRequest::new(0)).unwrap();

    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 2).await;
    let completions = recorder.completions();

    assert_eq!(completions[0].state(), JobState::Failed);
    assert_eq!(completions[0].status.error(), Some("Decode error: empty document"));
    assert_eq!(completions[1].job_id, page);
    assert_eq!(completions[1].status.error(), Some("Document not loaded"));
    assert!(session.metadata().is_none());
}

#[test]
fn test_submit_page_validation() {
    init_tracing();
    let mut plain = DocumentSession::new(SessionConfig::default()).unwrap();
    assert!(matches!(
        plain.submit_page(PageRequest::new(0)),
        Err(SubmissionError::InvalidJob(_))
    ));

    let mut metadata = render_core::DocumentMetadata::new(4);
    metadata.set_title("Report");
    let renderer = Arc::new(PassthroughRenderer::new(4));
    let mut session =
        DocumentSession::open_loaded(vec![1u8; 16], metadata, renderer, SessionConfig::default())
            .unwrap();
    assert!(session.load_job().is_none());
    assert_eq!(session.metadata().and_then(|m| m.title()), Some("Report"));

    assert!(matches!(
        session.submit_page(PageRequest::new(0).with_scale(0.0)),
        Err(SubmissionError::InvalidJob(_))
    ));
    assert!(matches!(
        session.submit_page(PageRequest::new(0).with_scale(f64::NAN)),
        Err(SubmissionError::InvalidJob(_))
    ));
    assert!(matches!(
        session.submit_page(PageRequest::new(4)),
        Err(SubmissionError::InvalidJob(_))
    ));
    assert!(session.submit_page(PageRequest::new(3)).is_ok());
    assert_eq!(session.stats().submitted, 1);
}

#[test]
fn test_high_water_pauses_emission() {
    init_tracing();
    let mut session =
        DocumentSession::new(SessionConfig::default().with_chunk_high_water(2)).unwrap();
    let id = session
        .submit(page_job!("flood", |sink| {
            for i in 0..10u8 {
                sink.emit(&[i]);
            }
            Ok(JobOutput::custom("flood"))
        }))
        .unwrap();

    wait_for(|| session.worker_state() == WorkerState::Executing(id));
    thread::sleep(Duration::from_millis(100));

    let first = session.on_wake();
    assert_eq!(first.chunks.len(), 2);
    assert!(first.completions.is_empty());

    let mut recorder = Recorder::default();
    first.dispatch(&mut recorder);
    wait_for(|| {
        session.pump(&mut recorder);
        !recorder.completions().is_empty()
    });

    let expected: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
    assert_eq!(recorder.chunks_for(id), expected);
    assert!(recorder.early_completions.is_empty());
}

#[test]
fn test_shutdown_releases_backpressured_worker() {
    init_tracing();
    let mut session =
        DocumentSession::new(SessionConfig::default().with_chunk_high_water(1)).unwrap();
    let id = session
        .submit(page_job!("stuck", |sink| {
            for i in 0..5u8 {
                sink.emit(&[i]);
            }
            Ok(JobOutput::custom("stuck"))
        }))
        .unwrap();

    wait_for(|| session.worker_state() == WorkerState::Executing(id));
    session.shutdown().unwrap();

    let batch = session.on_wake();
    assert_eq!(batch.chunks_for(id).count(), 5);
    assert_eq!(batch.completions.len(), 1);
    assert!(batch.completions[0].status.is_ok());
}

#[test]
fn test_shutdown_can_cancel_queued_jobs() {
    init_tracing();
    let mut session = DocumentSession::new(
        SessionConfig::default().with_cancel_pending_on_shutdown(true),
    )
    .unwrap();
    let (release, gate) = mpsc::channel::<()>();

    let running = session
        .submit(page_job!("gate", |_sink| {
            let _ = gate.recv();
            Ok(JobOutput::custom("gate"))
        }))
        .unwrap();
    let queued: Vec<_> = (0..2)
        .map(|_| {
            session
                .submit(page_job!("queued", |_sink| Ok(JobOutput::custom("queued"))))
                .unwrap()
        })
        .collect();

    wait_for(|| session.worker_state() == WorkerState::Executing(running));
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let _ = release.send(());
    });
    session.shutdown().unwrap();
    releaser.join().unwrap();

    let batch = session.on_wake();
    let states: Vec<_> = batch
        .completions
        .iter()
        .map(|r| (r.job_id, r.state()))
        .collect();
    assert_eq!(
        states,
        vec![
            (running, JobState::Completed),
            (queued[0], JobState::Cancelled),
            (queued[1], JobState::Cancelled),
        ]
    );
    assert_eq!(
        batch.completions[1].status,
        CompletionStatus::Cancelled {
            reason: Some("session shut down".to_string())
        }
    );
}

#[test]
fn test_worker_thread_uses_configured_name() {
    init_tracing();
    let mut session = DocumentSession::new(
        SessionConfig::default().with_worker_name_prefix("pdf-worker"),
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    session
        .submit(page_job!("name", |_sink| {
            let _ = tx.send(thread::current().name().map(str::to_string));
            Ok(JobOutput::custom("name"))
        }))
        .unwrap();

    let name = rx
        .recv_timeout(common::TIMEOUT)
        .unwrap()
        .expect("worker thread is named");
    assert_eq!(name, format!("pdf-worker-{}", session.id()));
}

#[test]
fn test_drop_joins_worker() {
    init_tracing();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    {
        let mut session = DocumentSession::new(SessionConfig::default()).unwrap();
        session
            .submit(page_job!("slow", |_sink| {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
                Ok(JobOutput::custom("slow"))
            }))
            .unwrap();
    }
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_close_reports_shutting_down_until_joined() {
    let mut session = session();
    let (release, gate) = mpsc::channel::<()>();

    let running = session
        .submit(page_job!("gate", |_sink| {
            let _ = gate.recv();
            Ok(JobOutput::custom("gate"))
        }))
        .unwrap();
    let queued = session
        .submit(page_job!("queued", |_sink| Ok(JobOutput::custom("queued"))))
        .unwrap();
    wait_for(|| session.worker_state() == WorkerState::Executing(running));

    session.close().unwrap();
    assert_eq!(session.state(), SessionState::Closing);
    assert_eq!(
        session.worker_state(),
        WorkerState::ShuttingDown {
            executing: Some(running)
        }
    );
    assert_eq!(session.worker_state().executing(), Some(running));
    assert_eq!(session.job_state(queued), Some(JobState::Pending));
    assert_eq!(
        session
            .submit(page_job!("late", |_sink| Ok(JobOutput::custom("late"))))
            .unwrap_err(),
        SubmissionError::SessionClosed
    );
    assert_eq!(session.close(), Err(LifecycleError::AlreadyShutDown));

    release.send(()).unwrap();
    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 2).await;
    assert!(session.next_batch().await.is_none());
    assert_eq!(session.worker_state(), WorkerState::Stopped);

    let states: Vec<_> = recorder
        .completions()
        .iter()
        .map(|r| (r.job_id, r.state()))
        .collect();
    assert_eq!(
        states,
        vec![(running, JobState::Completed), (queued, JobState::Completed)]
    );

    session.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.shutdown(), Err(LifecycleError::AlreadyShutDown));
}

#[tokio::test]
async fn test_job_state_follows_each_job() {
    let mut session = session();
    let (release, gate) = mpsc::channel::<()>();

    let running = session
        .submit(page_job!("gate", |_sink| {
            let _ = gate.recv();
            Ok(JobOutput::custom("gate"))
        }))
        .unwrap();
    let waiting = session
        .submit(page_job!("waiting", |_sink| Ok(JobOutput::custom("waiting"))))
        .unwrap();
    let dropped = session
        .submit(page_job!("dropped", |_sink| Ok(JobOutput::custom("dropped"))))
        .unwrap();
    wait_for(|| session.worker_state() == WorkerState::Executing(running));

    assert_eq!(session.job_state(running), Some(JobState::Running));
    assert_eq!(session.job_state(waiting), Some(JobState::Pending));
    session.cancel(dropped, None).unwrap();
    assert_eq!(session.job_state(dropped), Some(JobState::Cancelled));
    assert_eq!(session.job_state(render_core::JobId::new()), None);

    release.send(()).unwrap();
    let mut recorder = Recorder::default();
    collect(&mut session, &mut recorder, 3).await;

    for id in [running, waiting, dropped] {
        assert_eq!(session.job_state(id), None);
    }
    let states: Vec<_> = recorder.completions().iter().map(|r| r.state()).collect();
    assert_eq!(
        states,
        vec![JobState::Completed, JobState::Completed, JobState::Cancelled]
    );
}
