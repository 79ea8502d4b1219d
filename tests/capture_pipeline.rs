//! End-to-end capture tests
//!
//! Drive the capture engine with an in-memory store and a fake site that
//! answers paginated list requests.

use async_trait::async_trait;
use note_harvest::{
    capture::{CaptureEngine, CaptureOutcome, EngineEvent, ObservedRequest, SessionOutcome},
    config::{CaptureConfig, ReplayPolicy},
    platform::{
        CollectingNotifier, ExecutorError, MemoryStore, Notification, PageExecutor, PageRequest,
        PageResponse,
    },
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Paginated list API: total comes from the body's `total` hint, default 25
struct ListSite {
    latency: Duration,
    fail_page: Option<u64>,
    bodies: Mutex<Vec<Value>>,
}

impl ListSite {
    fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            fail_page: None,
            bodies: Mutex::new(Vec::new()),
        }
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().clone()
    }
}

#[async_trait]
impl PageExecutor for ListSite {
    async fn execute(&self, request: &PageRequest) -> Result<PageResponse, ExecutorError> {
        let body = request.body.clone().unwrap_or(Value::Null);
        self.bodies.lock().push(body.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let page = body["page_num"].as_u64().unwrap_or(1);
        if self.fail_page == Some(page) {
            return Ok(PageResponse {
                status: 429,
                body: "slow down".into(),
                headers: Default::default(),
            });
        }
        let total = body["total"].as_u64().unwrap_or(25);
        Ok(PageResponse {
            status: 200,
            body: json!({"data": {"total": total, "page": page}}).to_string(),
            headers: Default::default(),
        })
    }
}

fn capture_config(max_captures: usize) -> CaptureConfig {
    CaptureConfig {
        url_patterns: vec!["/api/list".into()],
        request_types: vec!["xhr".into()],
        http_methods: vec!["POST".into()],
        max_captures,
        ..Default::default()
    }
}

struct Harness {
    engine: CaptureEngine,
    site: Arc<ListSite>,
    notifier: Arc<CollectingNotifier>,
}

fn harness(site: ListSite, max_captures: usize) -> Harness {
    let site = Arc::new(site);
    let notifier = Arc::new(CollectingNotifier::new());
    let engine = CaptureEngine::start(
        Arc::new(MemoryStore::new()),
        site.clone(),
        notifier.clone(),
        ReplayPolicy::immediate(),
        capture_config(max_captures),
    )
    .unwrap();
    engine.toggle_capture(true).unwrap();
    Harness {
        engine,
        site,
        notifier,
    }
}

fn list_request(body: Value) -> ObservedRequest {
    ObservedRequest::new("https://ad.test/api/list", "POST", "xmlhttprequest").with_json_body(&body)
}

fn started(outcome: CaptureOutcome) -> u64 {
    match outcome {
        CaptureOutcome::Started(id) => id,
        other => panic!("expected a new session, got {:?}", other),
    }
}

#[tokio::test]
async fn replays_every_page_with_only_the_page_field_changed() {
    let h = harness(ListSite::new(), 100);
    let original = json!({"page_num": 1, "list_type": 1, "date": "2024-05-01", "hot_words": ["mini"]});
    started(h.engine.handle_request(list_request(original.clone())).await.unwrap());

    let outcome = h.engine.wait_for_session().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { pages: 3, .. }));

    // probe, then pages 1..=3
    let bodies = h.site.bodies();
    let pages: Vec<u64> = bodies.iter().map(|b| b["page_num"].as_u64().unwrap()).collect();
    assert_eq!(pages, vec![1, 1, 2, 3]);
    for (body, page) in bodies.iter().zip(pages) {
        let mut expected = original.clone();
        expected["page_num"] = json!(page);
        assert_eq!(*body, expected);
    }

    let buffered = h.engine.responses().unwrap();
    assert_eq!(
        buffered.iter().map(|p| (p.page, p.total_pages)).collect::<Vec<_>>(),
        vec![(1, 3), (2, 3), (3, 3)]
    );
    assert!(buffered
        .iter()
        .all(|p| p.group_id.as_deref() == Some("1_2024-05-01")));
}

#[tokio::test]
async fn only_the_last_of_three_quick_requests_completes() {
    let h = harness(ListSite::new(), 3);

    let first = started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 1, "total": 50})))
            .await
            .unwrap(),
    );
    let second = started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 2, "total": 50})))
            .await
            .unwrap(),
    );
    let third = started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 3, "total": 50})))
            .await
            .unwrap(),
    );
    assert!(first < second && second < third);

    let outcome = h.engine.wait_for_session().await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            session_id: third,
            pages: 5
        }
    );

    let buffered = h.engine.responses().unwrap();
    assert_eq!(buffered.len(), 3);
    assert!(buffered.iter().all(|p| p.session_id == Some(third)));
    assert_eq!(
        buffered.iter().map(|p| p.page).collect::<Vec<_>>(),
        vec![3, 4, 5]
    );

    let notices = h.notifier.notifications();
    assert_eq!(
        notices
            .iter()
            .filter(|n| **n == Notification::NewCaptureStarted)
            .count(),
        2
    );
    assert!(!notices
        .iter()
        .any(|n| matches!(n, Notification::CaptureFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn superseded_session_writes_nothing_after_its_successor_starts() {
    let site = ListSite {
        latency: Duration::from_millis(100),
        ..ListSite::new()
    };
    let h = harness(site, 100);
    let mut events = h.engine.subscribe();

    let a = started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 1, "total": 50})))
            .await
            .unwrap(),
    );
    loop {
        match events.recv().await.unwrap() {
            EngineEvent::PageCaptured { session_id, page: 2, .. } if session_id == a => break,
            _ => {}
        }
    }

    let b = started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 2, "total": 30})))
            .await
            .unwrap(),
    );
    let outcome = h.engine.wait_for_session().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { pages: 3, .. }));

    let owners: Vec<u64> = h
        .engine
        .responses()
        .unwrap()
        .iter()
        .filter_map(|p| p.session_id)
        .collect();
    let first_b = owners.iter().position(|id| *id == b).unwrap();
    assert!(owners[..first_b].iter().all(|id| *id == a));
    assert!(owners[first_b..].iter().all(|id| *id == b));
    assert_eq!(owners.iter().filter(|id| **id == b).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn duplicate_trigger_within_window_is_ignored() {
    let h = harness(ListSite::new(), 100);
    let body = json!({"page_num": 1, "list_type": 1});

    started(h.engine.handle_request(list_request(body.clone())).await.unwrap());
    h.engine.wait_for_session().await.unwrap();

    assert_eq!(
        h.engine.handle_request(list_request(body.clone())).await.unwrap(),
        CaptureOutcome::Duplicate
    );
    // Same query on another page is still the same fingerprint
    let mut page_two = body.clone();
    page_two["page_num"] = json!(2);
    assert_eq!(
        h.engine.handle_request(list_request(page_two)).await.unwrap(),
        CaptureOutcome::NotFirstPage
    );

    tokio::time::advance(ReplayPolicy::default().dedup_ttl() + Duration::from_millis(1)).await;
    started(h.engine.handle_request(list_request(body)).await.unwrap());
}

#[tokio::test]
async fn re_enabling_capture_forgets_fingerprints() {
    let h = harness(ListSite::new(), 100);
    let body = json!({"page_num": 1});

    started(h.engine.handle_request(list_request(body.clone())).await.unwrap());
    h.engine.wait_for_session().await.unwrap();

    h.engine.toggle_capture(false).unwrap();
    h.engine.toggle_capture(true).unwrap();
    started(h.engine.handle_request(list_request(body)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn disabling_capture_cancels_the_running_session() {
    let site = ListSite {
        latency: Duration::from_millis(100),
        ..ListSite::new()
    };
    let h = harness(site, 100);
    let id = started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "total": 100})))
            .await
            .unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(250)).await;

    h.engine.toggle_capture(false).unwrap();
    let outcome = h.engine.wait_for_session().await.unwrap();
    assert_eq!(outcome, SessionOutcome::Cancelled { session_id: id });
    assert!(!h.engine.is_capturing());
    assert!(h.engine.responses().unwrap().len() < 10);
    assert_eq!(
        h.engine.handle_request(list_request(json!({"page_num": 1}))).await.unwrap(),
        CaptureOutcome::NotCapturing
    );
}

#[tokio::test]
async fn failed_page_keeps_saved_pages_and_allows_a_new_session() {
    let site = ListSite {
        fail_page: Some(3),
        ..ListSite::new()
    };
    let h = harness(site, 100);
    started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 1})))
            .await
            .unwrap(),
    );
    let outcome = h.engine.wait_for_session().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Failed { .. }));
    assert_eq!(h.engine.responses().unwrap().len(), 2);
    assert!(h
        .notifier
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::CaptureFailed { message } if message.contains("429"))));

    started(
        h.engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 2})))
            .await
            .unwrap(),
    );
}

#[tokio::test]
async fn control_messages_drive_the_engine() {
    use note_harvest::capture::{ControlMessage, ControlResponse};

    let h = harness(ListSite::new(), 100);
    let reply = h
        .engine
        .handle_message(ControlMessage::ToggleCapture { value: false })
        .await;
    assert_eq!(reply, ControlResponse::ok());
    assert!(!h.engine.is_capturing());

    let reply = h.engine.handle_message(ControlMessage::GetProgress).await;
    assert_eq!(
        reply,
        ControlResponse::Progress {
            message: String::new()
        }
    );

    let reply = h
        .engine
        .handle_message(ControlMessage::ProcessAndExport {
            responses: None,
            need_process: false,
        })
        .await;
    assert!(matches!(reply, ControlResponse::Ack { success: false, .. }));

    let reply = h.engine.handle_message(ControlMessage::GetConfig).await;
    assert_eq!(reply, ControlResponse::Config(capture_config(100)));

    let reply = h.engine.handle_message(ControlMessage::GetResponses).await;
    assert_eq!(reply, ControlResponse::Responses(vec![]));
}

#[tokio::test]
async fn file_backed_buffer_survives_a_reopen() {
    use note_harvest::platform::{JsonFileStore, KeyValueStore, RESPONSES_KEY};

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let engine = CaptureEngine::start(
        Arc::new(JsonFileStore::open(&path).unwrap()),
        Arc::new(ListSite::new()),
        Arc::new(CollectingNotifier::new()),
        ReplayPolicy::immediate(),
        capture_config(100),
    )
    .unwrap();
    engine.toggle_capture(true).unwrap();

    started(
        engine
            .handle_request(list_request(json!({"page_num": 1, "list_type": 1})))
            .await
            .unwrap(),
    );
    let outcome = engine.wait_for_session().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { pages: 3, .. }));

    let reopened = JsonFileStore::open(&path).unwrap();
    let stored = reopened.get(RESPONSES_KEY).unwrap().unwrap();
    let pages: Vec<u64> = stored
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["page"].as_u64().unwrap())
        .collect();
    assert_eq!(pages, vec![1, 2, 3]);
}
