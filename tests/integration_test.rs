//! Integration tests for the record/playback cycle

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::{oneshot, watch};

use tapedeck::config::SessionConfig;
use tapedeck::storage::{DirectoryStore, MemoryStore};
use tapedeck::transport::{Transport, TransportError, TransportFuture, TransportResponse};
use tapedeck::{
    Cassette, Filter, FilterRule, InteractionRecord, MatchPolicy, RecordMode, RequestRecord,
    ResponseRecord, Session, SessionOptions, TapedeckError,
};

/// Transport that answers every call with a canned text body and counts calls
///
/// The response carries the request headers it saw, so tests can tell what
/// reached the network.
#[derive(Default)]
struct CountingTransport {
    calls: AtomicUsize,
}

impl CountingTransport {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn execute<'a>(&'a self, request: &'a RequestRecord) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = ResponseRecord::new(request.url.clone(), 200)
                .with_header("Content-Type", "text/plain");
            for (name, value) in request.headers.iter() {
                response.headers.insert(format!("x-echo-{name}"), value);
            }
            TransportResponse::ok(response, Some(Bytes::from_static(b"live body")))
        })
    }
}

/// Transport that holds every call until released
struct GatedTransport {
    entered: AtomicUsize,
    release: watch::Sender<bool>,
}

impl GatedTransport {
    fn new() -> Self {
        let (release, _) = watch::channel(false);
        Self {
            entered: AtomicUsize::new(0),
            release,
        }
    }
}

impl Transport for GatedTransport {
    fn execute<'a>(&'a self, request: &'a RequestRecord) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut gate = self.release.subscribe();
            self.entered.fetch_add(1, Ordering::SeqCst);
            let _ = gate.wait_for(|open| *open).await;
            TransportResponse::ok(ResponseRecord::new(request.url.clone(), 201), None)
        })
    }
}

/// Transport returning a fixed outcome
struct FixedTransport(TransportResponse);

impl Transport for FixedTransport {
    fn execute<'a>(&'a self, _request: &'a RequestRecord) -> TransportFuture<'a> {
        let outcome = self.0.clone();
        Box::pin(async move { outcome })
    }
}

fn interaction(request: RequestRecord, status: u16, body: &'static str) -> InteractionRecord {
    let url = request.url.clone();
    InteractionRecord::new(
        request,
        ResponseRecord::new(url, status).with_header("Content-Type", "text/plain"),
        Some(Bytes::from_static(body.as_bytes())),
    )
}

fn seeded_store(name: &str, interactions: Vec<InteractionRecord>) -> Arc<MemoryStore> {
    let data = Cassette::new(name, interactions).to_vec().unwrap();
    Arc::new(MemoryStore::new().with_cassette(name, data))
}

fn stored(store: &MemoryStore, name: &str) -> Cassette {
    Cassette::from_slice(&store.get(name).expect("cassette was not persisted")).unwrap()
}

#[tokio::test]
async fn test_playback_scenario_without_transport() {
    let json = r#"{
        "name": "scenario",
        "interactions": [
            {
                "request": { "method": "GET", "url": "http://example.com", "headers": {} },
                "response": {
                    "url": "http://example.com",
                    "status": 200,
                    "headers": { "Content-Type": "text/plain" },
                    "body": "hello",
                    "body_format": "plain_text"
                },
                "recorded_at": 1700000000
            }
        ]
    }"#;
    let store = Arc::new(MemoryStore::new().with_cassette("scenario", json));
    let transport = Arc::new(CountingTransport::default());
    let session = Session::new(SessionOptions::new("scenario"), store.clone(), transport.clone()).unwrap();

    let outcome = session.send(RequestRecord::get("http://example.com")).await.unwrap();

    assert_eq!(outcome.body.as_deref(), Some(b"hello".as_slice()));
    assert_eq!(outcome.response.unwrap().status, 200);
    assert!(outcome.error.is_none());
    assert_eq!(transport.calls(), 0);
    // nothing new to persist
    assert_eq!(store.persist_count(), 0);
}

#[tokio::test]
async fn test_mode_none_faults_before_transport() {
    let transport = Arc::new(CountingTransport::default());

    // no cassette at all
    let session = Session::new(
        SessionOptions::new("missing").mode(RecordMode::None),
        Arc::new(MemoryStore::new()),
        transport.clone(),
    )
    .unwrap();
    let result = session.send(RequestRecord::get("http://example.com")).await;
    assert!(matches!(result, Err(TapedeckError::NoRecording { .. })));

    // a cassette with no interactions
    let session = Session::new(
        SessionOptions::new("empty").mode(RecordMode::None),
        seeded_store("empty", vec![]),
        transport.clone(),
    )
    .unwrap();
    let result = session.send(RequestRecord::get("http://example.com")).await;
    assert!(result.unwrap_err().is_configuration_fault());

    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_body_mismatch_with_once_is_request_not_found() {
    let recorded = RequestRecord::new("POST", "http://example.com/items")
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"a":1}"#);
    let store = seeded_store("bodies", vec![interaction(recorded, 201, "created")]);
    let transport = Arc::new(CountingTransport::default());
    let session = Session::new(SessionOptions::new("bodies"), store, transport.clone()).unwrap();

    let request = RequestRecord::new("POST", "http://example.com/items")
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"a":2}"#);
    let result = session.send(request).await;

    assert!(matches!(
        result,
        Err(TapedeckError::RequestNotFound { ref method, ref url })
            if method == "POST" && url == "http://example.com/items"
    ));
    assert_eq!(transport.calls(), 0);

    // key order does not matter for JSON bodies
    let request = RequestRecord::new("POST", "http://example.com/items")
        .with_header("Content-Type", "application/json")
        .with_body(r#"{ "a": 1 }"#);
    let outcome = session.send(request).await.unwrap();
    assert_eq!(outcome.response.unwrap().status, 201);
}

#[tokio::test]
async fn test_redaction_scenario() {
    let filter = Filter::new().header("Authorization", FilterRule::Replace("REDACTED".to_string()));
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(CountingTransport::default());
    let session = Session::new(
        SessionOptions::new("redacted").filter(filter),
        store.clone(),
        transport.clone(),
    )
    .unwrap();

    let request = RequestRecord::get("http://example.com/me").with_header("Authorization", "secret");
    let outcome = session.send(request).await.unwrap();

    // the live call saw the real header
    let response = outcome.response.unwrap();
    assert_eq!(response.headers.get("x-echo-authorization"), Some("secret"));
    assert_eq!(outcome.body.as_deref(), Some(b"live body".as_slice()));

    // the persisted request did not
    let cassette = stored(&store, "redacted");
    assert_eq!(cassette.len(), 1);
    assert_eq!(
        cassette.interactions[0].request.headers.get("Authorization"),
        Some("REDACTED")
    );

    let file = String::from_utf8(store.get("redacted").unwrap()).unwrap();
    assert!(!file.contains("\"Authorization\": \"secret\""));
}

#[tokio::test]
async fn test_record_mode_table() {
    let hit = || RequestRecord::get("http://example.com/known");
    let miss = || RequestRecord::get("http://example.com/unknown");

    #[derive(Debug, PartialEq)]
    enum Expected {
        Playback,
        Record,
        NoRecording,
        NotFound,
    }

    let cases = [
        (true, true, RecordMode::None, Expected::Playback),
        (true, true, RecordMode::Once, Expected::Playback),
        (true, true, RecordMode::NewEpisodes, Expected::Playback),
        (true, true, RecordMode::All, Expected::Record),
        (false, false, RecordMode::None, Expected::NoRecording),
        (true, false, RecordMode::None, Expected::NotFound),
        (true, false, RecordMode::Once, Expected::NotFound),
        (true, false, RecordMode::NewEpisodes, Expected::Record),
        (false, false, RecordMode::Once, Expected::Record),
        (false, false, RecordMode::NewEpisodes, Expected::Record),
        (false, false, RecordMode::All, Expected::Record),
    ];

    for (present, matching, mode, expected) in cases {
        let store = if present {
            seeded_store("table", vec![interaction(hit(), 200, "recorded")])
        } else {
            Arc::new(MemoryStore::new())
        };
        let transport = Arc::new(CountingTransport::default());
        let session = Session::new(SessionOptions::new("table").mode(mode), store.clone(), transport.clone())
            .unwrap();

        let request = if matching { hit() } else { miss() };
        let result = session.send(request).await;

        let actual = match result {
            Ok(outcome) if transport.calls() == 0 => {
                assert_eq!(outcome.body.as_deref(), Some(b"recorded".as_slice()));
                Expected::Playback
            }
            Ok(outcome) => {
                assert_eq!(outcome.body.as_deref(), Some(b"live body".as_slice()));
                assert_eq!(store.persist_count(), 1);
                Expected::Record
            }
            Err(TapedeckError::NoRecording { .. }) => Expected::NoRecording,
            Err(TapedeckError::RequestNotFound { .. }) => Expected::NotFound,
            Err(e) => panic!("unexpected error for {mode:?}: {e}"),
        };

        assert_eq!(
            actual, expected,
            "present={present} matching={matching} mode={mode:?}"
        );
    }
}

#[tokio::test]
async fn test_recording_disabled_forbids_transport() {
    let transport = Arc::new(CountingTransport::default());
    let session = Session::new(
        SessionOptions::new("disabled")
            .mode(RecordMode::NewEpisodes)
            .recording_enabled(false),
        seeded_store("disabled", vec![interaction(RequestRecord::get("http://example.com/a"), 200, "a")]),
        transport.clone(),
    )
    .unwrap();

    let outcome = session.send(RequestRecord::get("http://example.com/a")).await.unwrap();
    assert_eq!(outcome.body.as_deref(), Some(b"a".as_slice()));

    let result = session.send(RequestRecord::get("http://example.com/b")).await;
    assert!(matches!(result, Err(TapedeckError::RecordingDisabled)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_concurrency_barrier() {
    const CALLS: usize = 8;

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(GatedTransport::new());
    let session = Session::new(SessionOptions::new("batch"), store.clone(), transport.clone()).unwrap();

    session.begin_recording().await;

    let mut handles = Vec::new();
    for i in 0..CALLS {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session
                .send(RequestRecord::get(format!("http://example.com/item/{i}")))
                .await
        }));
    }

    // every call is parked inside the transport
    while transport.entered.load(Ordering::SeqCst) < CALLS {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let counter = Arc::clone(&fired);
    session
        .end_recording(move |summary| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(summary);
        })
        .await;

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(store.get("batch").is_none());

    transport.release.send_replace(true);

    let summary = rx.await.unwrap();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.response.unwrap().status, 201);
    }

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(summary.recorded, CALLS);
    assert!(summary.persisted);
    assert_eq!(store.persist_count(), 1);

    let cassette = stored(&store, "batch");
    assert_eq!(cassette.len(), CALLS);
    let mut urls: Vec<_> = cassette.interactions.iter().map(|i| i.request.url.clone()).collect();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), CALLS);
}

#[tokio::test]
async fn test_new_episodes_appends_and_replays() {
    let store = seeded_store(
        "episodes",
        vec![interaction(RequestRecord::get("http://example.com/old"), 200, "old")],
    );
    let transport = Arc::new(CountingTransport::default());
    let session = Session::new(
        SessionOptions::new("episodes").mode(RecordMode::NewEpisodes),
        store.clone(),
        transport.clone(),
    )
    .unwrap();

    session.send(RequestRecord::get("http://example.com/old")).await.unwrap();
    session.send(RequestRecord::get("http://example.com/new")).await.unwrap();
    assert_eq!(transport.calls(), 1);

    // the fresh recording is served from the in-memory cassette now
    session.send(RequestRecord::get("http://example.com/new")).await.unwrap();
    assert_eq!(transport.calls(), 1);

    let cassette = stored(&store, "episodes");
    let urls: Vec<_> = cassette.interactions.iter().map(|i| i.request.url.as_str()).collect();
    assert_eq!(urls, ["http://example.com/old", "http://example.com/new"]);
}

#[tokio::test]
async fn test_once_without_fixture_records_every_sequential_call() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(CountingTransport::default());
    let session = Session::new(SessionOptions::new("first_run"), store.clone(), transport.clone()).unwrap();

    // each call is its own implicit batch and persists on completion
    session.send(RequestRecord::get("http://example.com/a")).await.unwrap();
    session.send(RequestRecord::get("http://example.com/b")).await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(store.persist_count(), 2);

    let cassette = stored(&store, "first_run");
    let urls: Vec<_> = cassette.interactions.iter().map(|i| i.request.url.as_str()).collect();
    assert_eq!(urls, ["http://example.com/a", "http://example.com/b"]);

    // repeats are still answered from what was just recorded
    session.send(RequestRecord::get("http://example.com/a")).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_ignored_parameters_and_tie_break_through_session() {
    let store = seeded_store(
        "matching",
        vec![
            interaction(
                RequestRecord::get("http://example.com/page?format=json").with_header("Cookie", "a"),
                200,
                "for a",
            ),
            interaction(
                RequestRecord::get("http://example.com/page?format=json").with_header("Cookie", "b"),
                200,
                "for b",
            ),
        ],
    );
    let policy = MatchPolicy::new().check_header("Cookie").ignore_parameter("apiKey");
    let session = Session::new(
        SessionOptions::new("matching").policy(policy),
        store,
        Arc::new(CountingTransport::default()),
    )
    .unwrap();

    let request = RequestRecord::get("http://example.com/page?apiKey=123&format=json").with_header("cookie", "b");
    let outcome = session.send(request).await.unwrap();
    assert_eq!(outcome.body.as_deref(), Some(b"for b".as_slice()));
}

#[tokio::test]
async fn test_transport_error_is_delivered_not_recorded() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(FixedTransport(TransportResponse::failed(TransportError::new(
        "connection reset",
    ))));
    let session = Session::new(SessionOptions::new("errors"), store.clone(), transport).unwrap();

    let outcome = session.send(RequestRecord::get("http://example.com")).await.unwrap();
    assert_eq!(outcome.error.unwrap().message, "connection reset");
    assert!(outcome.response.is_none());
    assert!(store.get("errors").is_none());
}

#[tokio::test]
async fn test_missing_response_is_a_fault() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(FixedTransport(TransportResponse::default()));
    let session = Session::new(SessionOptions::new("empty_transport"), store.clone(), transport).unwrap();

    let delivered = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&delivered);
    let result = session
        .dispatch(RequestRecord::get("http://example.com"), move |_| {
            *flag.lock().unwrap() = true;
        })
        .await;

    assert!(matches!(result, Err(TapedeckError::MissingResponse)));
    assert!(!*delivered.lock().unwrap());
    assert!(store.get("empty_transport").is_none());
}

#[tokio::test]
async fn test_discarded_response_reaches_caller_only() {
    let filter = Filter::new().response_hook(|response, body| {
        if response.status >= 500 {
            None
        } else {
            Some((response, body))
        }
    });
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(FixedTransport(TransportResponse::ok(
        ResponseRecord::new("http://example.com", 503),
        Some(Bytes::from_static(b"try later")),
    )));
    let session = Session::new(
        SessionOptions::new("discarded").filter(filter),
        store.clone(),
        transport,
    )
    .unwrap();

    let outcome = session.send(RequestRecord::get("http://example.com")).await.unwrap();
    assert_eq!(outcome.response.unwrap().status, 503);
    assert_eq!(outcome.body.as_deref(), Some(b"try later".as_slice()));
    assert!(store.get("discarded").is_none());
}

#[tokio::test]
async fn test_directory_round_trip_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tapedeck.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            cassette_name = "github_user"
            cassette_dir = "{}"

            [redaction]
            query_parameters = ["token"]
            "#,
            temp_dir.path().join("cassettes").display()
        ),
    )
    .unwrap();

    let config = SessionConfig::from_file(&config_path).unwrap();
    let transport = Arc::new(CountingTransport::default());

    // Phase 1: record
    {
        let session = Session::from_config(&config, transport.clone()).unwrap();
        let outcome = session
            .send(RequestRecord::get("http://example.com/user?token=abc"))
            .await
            .unwrap();
        assert_eq!(outcome.body.as_deref(), Some(b"live body".as_slice()));
    }

    let file = DirectoryStore::new(temp_dir.path().join("cassettes")).cassette_path("github_user");
    let contents = std::fs::read_to_string(&file).unwrap();
    assert!(contents.ends_with("}\n"));
    let recorded = Cassette::from_slice(contents.as_bytes()).unwrap();
    assert_eq!(
        recorded.interactions[0].request.url,
        "http://example.com/user?token=Redacted"
    );

    // Phase 2: replay without the network
    let mut replay_config = config.clone();
    replay_config.mode = RecordMode::None;
    let session = Session::from_config(&replay_config, transport.clone()).unwrap();
    let outcome = session
        .send(RequestRecord::get("http://example.com/user?token=xyz"))
        .await
        .unwrap();

    assert_eq!(outcome.body.as_deref(), Some(b"live body".as_slice()));
    assert_eq!(transport.calls(), 1);
}
