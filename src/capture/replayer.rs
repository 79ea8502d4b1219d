//! Pagination replay
//!
//! Given a decoded first-page request, the replayer asks the site for the
//! first page to learn the total, then yields pages `1..=total_pages` one at a
//! time. Each page re-sends the original body with only the pagination field
//! changed. The sequence is lazy: nothing is fetched until `next_page` is
//! awaited, and the session ticket is checked before every wait and fetch.
//!
//! The paced post-save delay for page `n` is taken at the start of the call
//! that fetches page `n + 1`, so it always follows the caller's save.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::CaptureError;
use super::session::SessionTicket;
use super::types::{CapturedPage, FirstPageRequest, SessionId};
use crate::config::ReplayPolicy;
use crate::platform::{PageExecutor, PageRequest};
use crate::util::now_millis;

/// Starts replays of captured first pages
#[derive(Clone)]
pub struct PaginationReplayer {
    executor: Arc<dyn PageExecutor>,
    policy: ReplayPolicy,
}

impl PaginationReplayer {
    pub fn new(executor: Arc<dyn PageExecutor>, policy: ReplayPolicy) -> Self {
        Self { executor, policy }
    }

    pub fn policy(&self) -> &ReplayPolicy {
        &self.policy
    }

    /// Fetch the first page to size the replay
    pub async fn replay(
        &self,
        request: FirstPageRequest,
        ticket: SessionTicket,
    ) -> Result<Replay, CaptureError> {
        if !ticket.is_live() {
            return Err(CaptureError::Superseded(ticket.id()));
        }

        let probe_body = with_page(&request.body, &self.policy.pagination_field, 1);
        let probe = PageRequest::new(&request.url, &request.method, Some(probe_body));
        let response = tokio::select! {
            biased;
            _ = ticket.cancelled() => return Err(CaptureError::Superseded(ticket.id())),
            res = self.executor.fetch_json(&probe) => res.map_err(CaptureError::FirstPage)?,
        };

        let total = read_total(&response, &self.policy.total_pointer)?;
        let page_size = request
            .body
            .get(&self.policy.page_size_field)
            .and_then(as_count)
            .filter(|n| *n > 0)
            .unwrap_or(self.policy.default_page_size)
            .max(1);
        let total_pages = total.div_ceil(page_size);
        let group_id = group_id(&request.body, &self.policy.group_fields);

        info!(
            session = ticket.id(),
            total,
            page_size,
            total_pages,
            "Replaying {}",
            request.url
        );

        Ok(Replay {
            executor: Arc::clone(&self.executor),
            policy: self.policy.clone(),
            request,
            ticket,
            total_pages,
            next: 1,
            group_id,
            done: false,
        })
    }
}

/// Lazy, non-restartable page sequence of one session
pub struct Replay {
    executor: Arc<dyn PageExecutor>,
    policy: ReplayPolicy,
    request: FirstPageRequest,
    ticket: SessionTicket,
    total_pages: u64,
    next: u64,
    group_id: Option<String>,
    done: bool,
}

impl Replay {
    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn session_id(&self) -> SessionId {
        self.ticket.id()
    }

    /// Next page in order, or `None` once all pages were yielded.
    ///
    /// After an error the sequence is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<CapturedPage, CaptureError>> {
        if self.done || self.next > self.total_pages {
            return None;
        }
        let page = self.next;
        let result = self.fetch(page).await;
        match result {
            Ok(_) => self.next += 1,
            Err(_) => self.done = true,
        }
        Some(result)
    }

    async fn fetch(&self, page: u64) -> Result<CapturedPage, CaptureError> {
        if page > 1 {
            self.wait(self.policy.post_save_delay(page - 1)).await?;
        }
        self.ensure_live()?;
        self.wait(self.policy.pre_fetch_delay()).await?;
        self.ensure_live()?;

        let body = with_page(&self.request.body, &self.policy.pagination_field, page);
        let request_body = body.to_string();
        let request = PageRequest::new(&self.request.url, &self.request.method, Some(body));

        let response = tokio::select! {
            biased;
            _ = self.ticket.cancelled() => return Err(CaptureError::Superseded(self.ticket.id())),
            res = self.executor.execute(&request) => {
                res.map_err(|source| CaptureError::PageFetch { page, source })?
            }
        };
        if !response.is_success() {
            return Err(CaptureError::PageStatus {
                page,
                status: response.status,
            });
        }

        debug!(
            session = self.ticket.id(),
            page,
            total_pages = self.total_pages,
            "page fetched"
        );

        Ok(CapturedPage {
            url: self.request.url.clone(),
            method: self.request.method.clone(),
            request_type: self.request.request_type.clone(),
            page,
            total_pages: self.total_pages,
            request_body,
            response_body: response.body,
            status_code: response.status,
            headers: response.headers,
            timestamp: now_millis(),
            group_id: self.group_id.clone(),
            session_id: Some(self.ticket.id()),
        })
    }

    fn ensure_live(&self) -> Result<(), CaptureError> {
        if self.ticket.is_live() {
            Ok(())
        } else {
            Err(CaptureError::Superseded(self.ticket.id()))
        }
    }

    async fn wait(&self, duration: Duration) -> Result<(), CaptureError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.ticket.cancelled() => Err(CaptureError::Superseded(self.ticket.id())),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Copy of `body` with only the pagination field set to `page`
fn with_page(body: &Map<String, Value>, field: &str, page: u64) -> Value {
    let mut body = body.clone();
    body.insert(field.to_string(), Value::from(page));
    Value::Object(body)
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_total(response: &Value, pointer: &str) -> Result<u64, CaptureError> {
    response
        .pointer(pointer)
        .and_then(as_count)
        .ok_or_else(|| CaptureError::MissingTotal {
            pointer: pointer.to_string(),
        })
}

/// `<field1>_<field2>...` from the original body, if every field is present
fn group_id(body: &Map<String, Value>, fields: &[String]) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    let parts: Option<Vec<String>> = fields
        .iter()
        .map(|f| match body.get(f)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect();
    parts.map(|p| p.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ExecutorError, PageResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct FakeSite {
        total: u64,
        fail_page: Option<u64>,
        requested: Mutex<Vec<Value>>,
    }

    impl FakeSite {
        fn new(total: u64) -> Self {
            Self {
                total,
                fail_page: None,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn pages(&self) -> Vec<u64> {
            self.requested
                .lock()
                .iter()
                .filter_map(|b| b["page_num"].as_u64())
                .collect()
        }
    }

    #[async_trait]
    impl PageExecutor for FakeSite {
        async fn execute(&self, request: &PageRequest) -> Result<PageResponse, ExecutorError> {
            let body = request.body.clone().unwrap_or(Value::Null);
            let page = body["page_num"].as_u64().unwrap_or(1);
            self.requested.lock().push(body);
            if self.fail_page == Some(page) {
                return Ok(PageResponse {
                    status: 500,
                    ..Default::default()
                });
            }
            Ok(PageResponse {
                status: 200,
                body: json!({"data": {"total": self.total, "page": page}}).to_string(),
                headers: Default::default(),
            })
        }
    }

    fn request(body: Value) -> FirstPageRequest {
        FirstPageRequest {
            url: "https://a.test/api/list".into(),
            method: "POST".into(),
            request_type: "xhr".into(),
            body: body.as_object().cloned().unwrap(),
        }
    }

    fn ticket() -> SessionTicket {
        SessionTicket::new(7, CancellationToken::new())
    }

    #[tokio::test]
    async fn yields_every_page_in_order() {
        let site = Arc::new(FakeSite::new(25));
        let replayer = PaginationReplayer::new(site.clone(), ReplayPolicy::immediate());
        let body = json!({"page_num": 1, "page_size": 10, "list_type": 1, "date": "2024-05-01"});
        let mut replay = replayer.replay(request(body), ticket()).await.unwrap();
        assert_eq!(replay.total_pages(), 3);

        let mut pages = Vec::new();
        while let Some(page) = replay.next_page().await {
            let page = page.unwrap();
            assert_eq!(page.total_pages, 3);
            assert_eq!(page.group_id.as_deref(), Some("1_2024-05-01"));
            assert_eq!(page.request_json().unwrap()["list_type"], 1);
            pages.push(page.page);
        }
        assert_eq!(pages, vec![1, 2, 3]);
        // probe + three pages
        assert_eq!(site.pages(), vec![1, 1, 2, 3]);
    }

    #[tokio::test]
    async fn page_size_defaults_when_missing() {
        let site = Arc::new(FakeSite::new(21));
        let replayer = PaginationReplayer::new(site, ReplayPolicy::immediate());
        let replay = replayer.replay(request(json!({})), ticket()).await.unwrap();
        assert_eq!(replay.total_pages(), 3);
    }

    #[tokio::test]
    async fn missing_total_fails_the_replay() {
        struct NoTotal;
        #[async_trait]
        impl PageExecutor for NoTotal {
            async fn execute(&self, _: &PageRequest) -> Result<PageResponse, ExecutorError> {
                Ok(PageResponse {
                    status: 200,
                    body: r#"{"data":{}}"#.into(),
                    headers: Default::default(),
                })
            }
        }
        let replayer = PaginationReplayer::new(Arc::new(NoTotal), ReplayPolicy::immediate());
        let err = replayer
            .replay(request(json!({"page_num": 1})), ticket())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::MissingTotal { .. }));
    }

    #[tokio::test]
    async fn non_success_page_ends_the_sequence() {
        let site = Arc::new(FakeSite {
            fail_page: Some(2),
            ..FakeSite::new(30)
        });
        let replayer = PaginationReplayer::new(site, ReplayPolicy::immediate());
        let mut replay = replayer
            .replay(request(json!({"page_num": 1})), ticket())
            .await
            .unwrap();

        assert!(replay.next_page().await.unwrap().is_ok());
        let err = replay.next_page().await.unwrap().unwrap_err();
        assert!(matches!(err, CaptureError::PageStatus { page: 2, status: 500 }));
        assert!(replay.next_page().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_ticket_stops_before_fetching() {
        let site = Arc::new(FakeSite::new(30));
        let replayer = PaginationReplayer::new(site.clone(), ReplayPolicy::immediate());
        let ticket = ticket();
        let mut replay = replayer
            .replay(request(json!({"page_num": 1})), ticket.clone())
            .await
            .unwrap();
        assert!(replay.next_page().await.unwrap().is_ok());

        ticket.token().cancel();
        let err = replay.next_page().await.unwrap().unwrap_err();
        assert!(err.is_superseded());
        assert_eq!(site.pages(), vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pacing_delay() {
        let site = Arc::new(FakeSite::new(30));
        let policy = ReplayPolicy {
            post_save_jitter_ms: 0,
            ..ReplayPolicy::default()
        };
        let replayer = PaginationReplayer::new(site.clone(), policy);
        let ticket = ticket();
        let mut replay = replayer
            .replay(request(json!({"page_num": 1})), ticket.clone())
            .await
            .unwrap();
        assert!(replay.next_page().await.unwrap().is_ok());

        let canceller = ticket.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.token().cancel();
        });
        let err = replay.next_page().await.unwrap().unwrap_err();
        assert!(err.is_superseded());
        assert_eq!(site.pages(), vec![1, 1]);
    }

    #[test]
    fn group_id_requires_every_field() {
        let fields = vec!["list_type".to_string(), "date".to_string()];
        let full = json!({"list_type": 2, "date": "2024-05-01"});
        let partial = json!({"list_type": 2});
        assert_eq!(
            group_id(full.as_object().unwrap(), &fields).as_deref(),
            Some("2_2024-05-01")
        );
        assert_eq!(group_id(partial.as_object().unwrap(), &fields), None);
    }
}
