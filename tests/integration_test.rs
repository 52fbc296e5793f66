use async_trait::async_trait;
use mockito::Matcher;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use textspeak::backends::{BackendError, SpeechBackend};
use textspeak::fetcher::SpeechFetcher;
use textspeak::service::SubmitError;
use textspeak::silence::SilenceProvider;
use textspeak::worker::{Request, RequestState, RequestWorker, SegmentOptions, SpeechEvent};
use textspeak::{Notification, RequestId, Settings, SpeechService};
use tempfile::tempdir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;

mockall::mock! {
    pub Backend {}
    #[async_trait]
    impl SpeechBackend for Backend {
        fn id(&self) -> &'static str;
        async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, BackendError>;
    }
}

fn unavailable(text: &str) -> BackendError {
    BackendError::EmptyBody {
        url: format!("http://tts.invalid/translate_tts?q={}", text),
    }
}

/// Backend answering every text with its own bytes, failing on `bad`.
fn echo_backend(bad: &'static str) -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_id().return_const("mock");
    backend.expect_synthesize().returning(move |text, _| {
        if text == bad {
            Err(unavailable(text))
        } else {
            Ok(text.as_bytes().to_vec())
        }
    });
    backend
}

fn spawn_worker(
    backend: MockBackend,
    max_len: usize,
) -> (RequestWorker, UnboundedReceiver<SpeechEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fetcher = SpeechFetcher::new(Arc::new(backend), SilenceProvider::new(b"_".to_vec()), 3);
    let options = SegmentOptions {
        max_len,
        silence_marker: "\n".into(),
    };
    (RequestWorker::spawn(fetcher, options, tx), rx)
}

async fn drain(worker: RequestWorker, mut rx: UnboundedReceiver<SpeechEvent>) -> Vec<SpeechEvent> {
    worker.shutdown().await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn settings(tts_url: &str, work_dir: &Path) -> Settings {
    Settings {
        tts_url: format!("{}/translate_tts", tts_url),
        work_dir: work_dir.to_string_lossy().into_owned(),
        silence_unit: "Xw==".into(), // "_"
        ..Settings::default()
    }
}

/// Collects notifications for `id` until it completes or fails.
async fn until_done(rx: &mut UnboundedReceiver<Notification>, id: RequestId) -> Vec<Notification> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        while let Some(n) = rx.recv().await {
            let done = matches!(
                &n,
                Notification::Completed { request_id, .. } | Notification::Failed { request_id, .. }
                    if *request_id == id
            );
            seen.push(n);
            if done {
                break;
            }
        }
        seen
    })
    .await
    .expect("request did not finish in time")
}

#[tokio::test]
async fn failure_stops_remaining_chunks() {
    let mut backend = MockBackend::new();
    backend.expect_id().return_const("mock");
    // two successes, then three attempts at "three."
    backend
        .expect_synthesize()
        .times(5)
        .returning(|text, _| {
            if text == "three." {
                Err(unavailable(text))
            } else {
                Ok(text.as_bytes().to_vec())
            }
        });

    let (worker, rx) = spawn_worker(backend, 10);
    let id = worker
        .submit(Request::new("one. two. three. four. five.", "en", false))
        .unwrap();
    let events = drain(worker, rx).await;

    assert_eq!(events.len(), 3);
    for (i, expected) in [b"one.".as_slice(), b"two.".as_slice()].iter().enumerate() {
        match &events[i] {
            SpeechEvent::Chunk {
                request_id,
                chunk_index,
                chunk_count,
                audio,
                ..
            } => {
                assert_eq!(*request_id, id);
                assert_eq!(*chunk_index, i);
                assert_eq!(*chunk_count, 5);
                assert_eq!(audio.as_slice(), *expected);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    match &events[2] {
        SpeechEvent::Failed {
            request_id,
            chunk_index,
            message,
            ..
        } => {
            assert_eq!(*request_id, id);
            assert_eq!(*chunk_index, 2);
            assert!(message.contains("after 3 attempts"), "{message}");
            assert!(message.contains("tts.invalid"), "{message}");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn silence_chunks_are_rendered_locally() {
    let mut backend = MockBackend::new();
    backend.expect_id().return_const("mock");
    backend
        .expect_synthesize()
        .times(2)
        .returning(|text, _| Ok(text.as_bytes().to_vec()));

    let (worker, rx) = spawn_worker(backend, 100);
    worker.submit(Request::new("A\n\nB", "en", false)).unwrap();
    let events = drain(worker, rx).await;

    let audio: Vec<(usize, bool, Vec<u8>)> = events
        .into_iter()
        .map(|e| match e {
            SpeechEvent::Chunk {
                chunk_index,
                silence,
                audio,
                ..
            } => (chunk_index, silence, audio),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        audio,
        vec![
            (0, false, b"A".to_vec()),
            (1, true, b"____".to_vec()),
            (2, false, b"B".to_vec()),
        ]
    );
}

#[tokio::test]
async fn requests_run_in_order_and_fail_alone() {
    let (worker, rx) = spawn_worker(echo_backend("bad"), 100);
    let first = worker.submit(Request::new("bad", "en", false)).unwrap();
    let second = worker.submit(Request::new("good", "en", false)).unwrap();
    let events = drain(worker, rx).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], SpeechEvent::Failed { request_id, .. } if *request_id == first));
    assert!(matches!(&events[1], SpeechEvent::Chunk { request_id, .. } if *request_id == second));
}

#[tokio::test]
async fn worker_tracks_request_state() {
    let (worker, mut rx) = spawn_worker(echo_backend("bad"), 100);
    let ok = worker.submit(Request::new("fine words", "en", false)).unwrap();
    let failing = worker.submit(Request::new("bad", "en", false)).unwrap();
    let empty = worker.submit(Request::new("   ", "en", false)).unwrap();
    assert_eq!(worker.state(ok), Some(RequestState::Queued));

    // both real requests report exactly one event
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.state(empty) != Some(RequestState::Completed) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker stalled");

    assert_eq!(worker.state(ok), Some(RequestState::Completed));
    assert_eq!(worker.state(failing), Some(RequestState::Failed));
    worker.shutdown().await;
    assert!(rx.recv().await.is_none(), "empty request must not emit events");
}

/// Holds every synthesis until the test hands out permits.
struct GatedBackend {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl SpeechBackend for GatedBackend {
    fn id(&self) -> &'static str {
        "gated"
    }

    async fn synthesize(&self, text: &str, _language: &str) -> Result<Vec<u8>, BackendError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| unavailable(text))?
            .forget();
        Ok(text.as_bytes().to_vec())
    }
}

#[tokio::test]
async fn forgotten_requests_leave_no_state() {
    let gate = Arc::new(Semaphore::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let fetcher = SpeechFetcher::new(
        Arc::new(GatedBackend { gate: gate.clone() }),
        SilenceProvider::new(b"_".to_vec()),
        3,
    );
    let options = SegmentOptions {
        max_len: 100,
        silence_marker: "\n".into(),
    };
    let worker = RequestWorker::spawn(fetcher, options, tx);

    let running = worker.submit(Request::new("in flight", "en", false)).unwrap();
    let queued = worker.submit(Request::new("still queued", "en", false)).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.state(running) != Some(RequestState::Fetching) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("worker never started");

    worker.forget(running);
    worker.forget(queued);
    gate.add_permits(10);

    // the in-flight chunk still arrives
    let event = rx.recv().await.unwrap();
    assert_eq!(event.request_id(), running);
    assert_eq!(worker.state(running), None);
    assert_eq!(worker.state(queued), None);
    worker.shutdown().await;
    assert!(rx.recv().await.is_none(), "forgotten queued request was processed");
}

#[tokio::test]
async fn service_speaks_merges_and_saves() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/translate_tts")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("tl".into(), "en".into()),
            Matcher::UrlEncoded("q".into(), "Hello, world. Goodbye!".into()),
        ]))
        .with_body("MP3")
        .expect(1)
        .create_async()
        .await;
    let dir = tempdir().unwrap();
    let (service, mut rx) = SpeechService::new(&settings(&server.url(), dir.path())).unwrap();

    let id = service.submit("  Hello, world. Goodbye!  ", "en", false).unwrap();
    let seen = until_done(&mut rx, id).await;

    assert_eq!(seen.len(), 3);
    assert_eq!(
        seen[0],
        Notification::Progress {
            request_id: id,
            received: 1,
            total: 1
        }
    );
    assert!(matches!(
        &seen[1],
        Notification::ChunkReady { chunk_index: 0, audio, .. } if audio == b"MP3"
    ));
    let artifact = match &seen[2] {
        Notification::Completed { artifact, .. } => artifact.clone(),
        other => panic!("unexpected notification {other:?}"),
    };
    // "!" earns the long pause of four units
    assert_eq!(std::fs::read(&artifact).unwrap(), b"MP3____");
    assert_eq!(service.state(id), Some(RequestState::Completed));

    let dest = dir.path().join("saved.mp3");
    assert_eq!(service.save(id, &dest).unwrap(), 7);
    assert_eq!(std::fs::read(&dest).unwrap(), b"MP3____");

    mock.assert_async().await;
    assert_eq!(service.cleanup(), 1);
    assert!(!artifact.exists());
    assert!(dest.exists());
}

#[tokio::test]
async fn service_reuses_identical_text() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/translate_tts")
        .match_query(Matcher::UrlEncoded("tl".into(), "en".into()))
        .with_body("MP3")
        .expect(1)
        .create_async()
        .await;
    let dir = tempdir().unwrap();
    let (service, mut rx) = SpeechService::new(&settings(&server.url(), dir.path())).unwrap();

    let first = service.submit("Same words", "en", false).unwrap();
    let again = service.submit("Same words ", "en", false).unwrap();
    assert_eq!(first, again);
    until_done(&mut rx, first).await;

    assert_eq!(service.submit("Same words", "en", true).unwrap(), first);
    let other = service.submit("Same words", "de", false).unwrap();
    assert_ne!(other, first);
    until_done(&mut rx, other).await;
    mock.assert_async().await;
    service.cleanup();
}

#[tokio::test]
async fn service_rejects_bad_input() {
    let dir = tempdir().unwrap();
    let (service, _rx) = SpeechService::with_backend(
        &settings("http://unused", dir.path()),
        Arc::new(echo_backend("")),
    )
    .unwrap();

    assert!(matches!(
        service.submit(" \n\t ", "en", false),
        Err(SubmitError::EmptyText)
    ));
    assert!(matches!(
        service.submit("hello", "xx", false),
        Err(SubmitError::UnknownLanguage(code)) if code == "xx"
    ));
    assert!(service.submit("hello", "EN", false).is_ok());
    assert!(service
        .save(Request::new("x", "en", false).id, &dir.path().join("x"))
        .is_err());
}

#[tokio::test]
async fn all_at_once_skips_chunk_playback() {
    let dir = tempdir().unwrap();
    let settings = Settings {
        max_len: 10,
        ..settings("http://unused", dir.path())
    };
    let (service, mut rx) =
        SpeechService::with_backend(&settings, Arc::new(echo_backend(""))).unwrap();

    let id = service.submit("first, second", "en", true).unwrap();
    let seen = until_done(&mut rx, id).await;

    assert!(!seen.iter().any(|n| matches!(n, Notification::ChunkReady { .. })));
    assert_eq!(
        seen[..2],
        [
            Notification::Progress {
                request_id: id,
                received: 1,
                total: 2
            },
            Notification::Progress {
                request_id: id,
                received: 2,
                total: 2
            },
        ]
    );
    let artifact = service.artifact(id).unwrap();
    assert_eq!(std::fs::read(artifact).unwrap(), b"first,__second");
    service.cleanup();
}

#[tokio::test]
async fn ignored_requests_still_complete() {
    let dir = tempdir().unwrap();
    let (service, mut rx) = SpeechService::with_backend(
        &settings("http://unused", dir.path()),
        Arc::new(echo_backend("")),
    )
    .unwrap();

    let hidden = service.submit("first text", "en", false).unwrap();
    service.ignore(hidden);
    let shown = service.submit("second text", "en", false).unwrap();
    let seen = until_done(&mut rx, shown).await;

    assert!(seen.iter().all(|n| !matches!(
        n,
        Notification::Progress { request_id, .. }
            | Notification::ChunkReady { request_id, .. }
            | Notification::Completed { request_id, .. }
            if *request_id == hidden
    )));
    assert!(service.artifact(hidden).is_some());
    assert_eq!(service.cleanup(), 2);
}

#[tokio::test]
async fn failed_request_is_replaced_on_resubmit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut backend = MockBackend::new();
    backend.expect_id().return_const("mock");
    backend.expect_synthesize().returning(move |text, _| {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            Err(unavailable(text))
        } else {
            Ok(b"ok".to_vec())
        }
    });
    let dir = tempdir().unwrap();
    let (service, mut rx) =
        SpeechService::with_backend(&settings("http://unused", dir.path()), Arc::new(backend))
            .unwrap();

    let first = service.submit("flaky", "en", false).unwrap();
    let seen = until_done(&mut rx, first).await;
    assert!(matches!(seen.last(), Some(Notification::Failed { .. })));
    assert_eq!(service.state(first), Some(RequestState::Failed));

    let second = service.submit("flaky", "en", false).unwrap();
    assert_ne!(first, second);
    assert_eq!(service.state(first), None);
    let seen = until_done(&mut rx, second).await;
    assert!(matches!(seen.last(), Some(Notification::Completed { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    service.cleanup();
}

#[tokio::test]
async fn storage_failure_is_replaced_on_resubmit() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let (service, mut rx) = SpeechService::with_backend(
        &settings("http://unused", &blocker.join("sub")),
        Arc::new(echo_backend("")),
    )
    .unwrap();

    let first = service.submit("hello there", "en", false).unwrap();
    let seen = until_done(&mut rx, first).await;
    match seen.last() {
        Some(Notification::Failed { message, .. }) => {
            assert!(message.contains("I/O error"), "{message}")
        }
        other => panic!("unexpected notification {other:?}"),
    }
    assert_eq!(service.state(first), Some(RequestState::Failed));
    assert!(service.chunk_audio(first, 0).is_none());
    assert!(service.artifact(first).is_none());

    std::fs::remove_file(&blocker).unwrap();
    let second = service.submit("hello there", "en", false).unwrap();
    assert_ne!(second, first);
    let seen = until_done(&mut rx, second).await;
    assert!(matches!(seen.last(), Some(Notification::Completed { .. })));
    assert!(service.artifact(second).is_some());
    assert_eq!(service.cleanup(), 1);
}
