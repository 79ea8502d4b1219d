//! Capture engine
//!
//! Owns the process-wide capture state: the persisted config and on/off flag,
//! the dedup registry, the session manager and the response buffer. Observed
//! requests enter through `handle_request`; UI surfaces talk to it through
//! `handle_message`.
//!
//! ```text
//!  ObservedRequest ─▶ classifier ─▶ codec ─▶ first page? ─▶ dedup
//!                                                             │
//!                          supersede running session ◀────────┘
//!                          (cancel, await stop ≤ grace)
//!                                     │
//!                          spawn replay task ─▶ pages ─▶ commit gate ─▶ buffer
//! ```
//!
//! Every buffer append holds the commit lock and first checks that the
//! writing session is still current, so a superseded session can never
//! write after its successor's first write. The write itself runs on the
//! blocking pool.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::accumulator::ResultAccumulator;
use super::classifier::RequestClassifier;
use super::codec::decode_body;
use super::dedup::{fingerprint, is_first_page, DedupRegistry};
use super::error::CaptureError;
use super::events::{emit, EngineEvent};
use super::messages::{ControlMessage, ControlResponse};
use super::replayer::PaginationReplayer;
use super::session::{SessionManager, SessionState, SessionTicket};
use super::types::{CapturedPage, FirstPageRequest, ObservedRequest, SessionId};
use crate::config::{CaptureConfig, ReplayPolicy};
use crate::enrichment::{BatchPlan, ProgressSink};
use crate::export::{ExportError, ExportSummary, Exporter};
use crate::platform::{
    KeyValueStore, KeyValueStoreExt, Notification, Notifier, PageExecutor, CAPTURE_CONFIG_KEY,
    IS_CAPTURING_KEY,
};
use crate::util::truncate_str;

const EVENT_CAPACITY: usize = 256;

/// What happened to one observed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    NotCapturing,
    Mismatch,
    Undecodable,
    /// A later page of a query; those are produced by replay, not observed
    NotFirstPage,
    Duplicate,
    Started(SessionId),
}

/// How a replay task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { session_id: SessionId, pages: u64 },
    Superseded { session_id: SessionId },
    Cancelled { session_id: SessionId },
    Failed { session_id: SessionId, error: String },
}

struct RunningSession {
    id: SessionId,
    handle: JoinHandle<SessionOutcome>,
}

struct EngineInner {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    replayer: PaginationReplayer,
    config: RwLock<CaptureConfig>,
    classifier: RwLock<RequestClassifier>,
    capturing: AtomicBool,
    dedup: Mutex<DedupRegistry>,
    sessions: Mutex<SessionManager>,
    running: tokio::sync::Mutex<Option<RunningSession>>,
    commit: tokio::sync::Mutex<()>,
    accumulator: ResultAccumulator,
    events: broadcast::Sender<EngineEvent>,
    progress: Mutex<String>,
    exporter: RwLock<Option<Arc<Exporter>>>,
    export_cancel: Mutex<Option<CancellationToken>>,
}

/// Cheaply cloneable handle to the engine
#[derive(Clone)]
pub struct CaptureEngine {
    inner: Arc<EngineInner>,
}

impl CaptureEngine {
    /// Load persisted state and build the engine.
    ///
    /// `seed` is stored as the capture config when storage holds none yet.
    pub fn start(
        store: Arc<dyn KeyValueStore>,
        executor: Arc<dyn PageExecutor>,
        notifier: Arc<dyn Notifier>,
        policy: ReplayPolicy,
        seed: CaptureConfig,
    ) -> Result<Self, CaptureError> {
        let config = match store.get_as::<CaptureConfig>(CAPTURE_CONFIG_KEY)? {
            Some(config) => config.normalized(),
            None => {
                let config = seed.normalized();
                store.set_as(CAPTURE_CONFIG_KEY, &config)?;
                info!("Seeded capture config");
                config
            }
        };
        let capturing = store.get_as::<bool>(IS_CAPTURING_KEY)?.unwrap_or(false);
        let classifier = RequestClassifier::new(&config);
        info!(
            capturing,
            patterns = classifier.pattern_count(),
            max_captures = config.max_captures,
            "Capture engine started"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = EngineInner {
            accumulator: ResultAccumulator::new(Arc::clone(&store)),
            dedup: Mutex::new(DedupRegistry::new(policy.dedup_ttl())),
            replayer: PaginationReplayer::new(executor, policy),
            store,
            notifier,
            config: RwLock::new(config),
            classifier: RwLock::new(classifier),
            capturing: AtomicBool::new(capturing),
            sessions: Mutex::new(SessionManager::new()),
            running: tokio::sync::Mutex::new(None),
            commit: tokio::sync::Mutex::new(()),
            events,
            progress: Mutex::new(String::new()),
            exporter: RwLock::new(None),
            export_cancel: Mutex::new(None),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Enable `ProcessAndExport`
    pub fn set_exporter(&self, exporter: Exporter) {
        *self.inner.exporter.write() = Some(Arc::new(exporter));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.capturing.load(Ordering::SeqCst)
    }

    /// Live capture config
    pub fn config(&self) -> CaptureConfig {
        self.inner.config.read().clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.sessions.lock().state().clone()
    }

    pub fn progress(&self) -> String {
        self.inner.progress.lock().clone()
    }

    pub fn responses(&self) -> Result<Vec<CapturedPage>, CaptureError> {
        Ok(self.inner.accumulator.responses()?)
    }

    pub fn clear_responses(&self) -> Result<(), CaptureError> {
        Ok(self.inner.accumulator.clear()?)
    }

    /// Run one observed request through classification, decoding and dedup,
    /// starting a replay session when it qualifies
    pub async fn handle_request(&self, request: ObservedRequest) -> Result<CaptureOutcome, CaptureError> {
        if !self.is_capturing() {
            return Ok(CaptureOutcome::NotCapturing);
        }
        if !self.inner.classifier.read().should_capture(&request) {
            trace!(url = %request.url, "request does not qualify");
            return Ok(CaptureOutcome::Mismatch);
        }

        let body = match decode_body(request.body.as_deref().unwrap_or_default()) {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %request.url, "Dropping request: {}", e);
                return Ok(CaptureOutcome::Undecodable);
            }
        };

        let policy = self.inner.replayer.policy();
        if !is_first_page(&body, &policy.pagination_field) {
            debug!(url = %request.url, "ignoring non-first page");
            return Ok(CaptureOutcome::NotFirstPage);
        }

        let fp = fingerprint(&request.url, &request.method, &body, &policy.pagination_field);
        {
            let mut dedup = self.inner.dedup.lock();
            if dedup.seen(&fp) {
                debug!(url = %request.url, fingerprint = %fp, "duplicate capture trigger");
                return Ok(CaptureOutcome::Duplicate);
            }
            dedup.remember(fp.clone());
        }

        let first_page = FirstPageRequest {
            url: request.url,
            method: request.method.to_uppercase(),
            request_type: request.request_type,
            body,
        };
        let id = self.start_session(first_page, fp).await?;
        Ok(CaptureOutcome::Started(id))
    }

    async fn start_session(
        &self,
        request: FirstPageRequest,
        fingerprint: String,
    ) -> Result<SessionId, CaptureError> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;

        let superseded = inner.sessions.lock().supersede_active();
        if let Some(old_id) = superseded {
            info!(session = old_id, "Superseding running capture");
            if let Some(mut old) = running.take() {
                let grace = inner.replayer.policy().supersede_grace();
                match tokio::time::timeout(grace, &mut old.handle).await {
                    Ok(Ok(outcome)) => debug!(session = old.id, ?outcome, "previous session stopped"),
                    Ok(Err(e)) => warn!(session = old.id, "Previous session task failed: {}", e),
                    Err(_) => warn!(
                        session = old.id,
                        "Previous session did not stop within {:?}", grace
                    ),
                }
            }
        }

        let ticket = inner.sessions.lock().begin(fingerprint)?;
        let session_id = ticket.id();

        if let Some(old_id) = superseded {
            inner.notifier.notify(Notification::NewCaptureStarted);
            emit(
                &inner.events,
                EngineEvent::NewCaptureStarted {
                    superseded_id: old_id,
                    session_id,
                },
            );
        }
        emit(
            &inner.events,
            EngineEvent::SessionStarted {
                session_id,
                url: request.url.clone(),
            },
        );
        info!(session = session_id, url = %request.url, "Capture session started");

        let handle = tokio::spawn(run_session(Arc::clone(inner), request, ticket));
        *running = Some(RunningSession {
            id: session_id,
            handle,
        });
        Ok(session_id)
    }

    /// Wait for the current replay task, if any, to finish
    pub async fn wait_for_session(&self) -> Option<SessionOutcome> {
        let running = self.inner.running.lock().await.take()?;
        match running.handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(session = running.id, "Session task failed: {}", e);
                None
            }
        }
    }

    /// Switch capturing on or off and persist the flag.
    ///
    /// Enabling forgets recent fingerprints; disabling cancels the running session.
    pub fn toggle_capture(&self, enabled: bool) -> Result<(), CaptureError> {
        self.inner.store.set_as(IS_CAPTURING_KEY, &enabled)?;
        self.inner.capturing.store(enabled, Ordering::SeqCst);
        if enabled {
            self.inner.dedup.lock().clear();
            info!("Capture enabled");
        } else {
            let cancelled = self.inner.sessions.lock().cancel_active();
            match cancelled {
                Some(id) => info!(session = id, "Capture disabled, running session cancelled"),
                None => info!("Capture disabled"),
            }
        }
        Ok(())
    }

    /// Persist a capture config; the running engine keeps its current one
    /// until `reload_config`
    pub fn save_config(&self, config: CaptureConfig) -> Result<CaptureConfig, CaptureError> {
        let config = config.normalized();
        self.inner.store.set_as(CAPTURE_CONFIG_KEY, &config)?;
        info!(patterns = config.url_patterns.len(), "Capture config saved");
        Ok(config)
    }

    /// Stored capture config, falling back to the live one
    pub fn stored_config(&self) -> Result<CaptureConfig, CaptureError> {
        Ok(self
            .inner
            .store
            .get_as::<CaptureConfig>(CAPTURE_CONFIG_KEY)?
            .unwrap_or_else(|| self.config()))
    }

    /// Re-read the stored capture config and rebuild the classifier
    pub fn reload_config(&self) -> Result<CaptureConfig, CaptureError> {
        let config = self.stored_config()?.normalized();
        *self.inner.classifier.write() = RequestClassifier::new(&config);
        *self.inner.config.write() = config.clone();
        info!("Capture config reloaded");
        Ok(config)
    }

    /// Build and deliver the workbook from `pages`, or from the stored buffer.
    ///
    /// Batch size and delay come from the live capture config at call time.
    /// The export slot is released even if the returned future is dropped.
    pub async fn process_and_export(
        &self,
        pages: Option<Vec<CapturedPage>>,
        need_process: bool,
    ) -> Result<ExportSummary, ExportError> {
        let exporter = self
            .inner
            .exporter
            .read()
            .clone()
            .ok_or(ExportError::Unavailable)?;
        let (cancel, _slot) = ExportSlot::claim(&self.inner.export_cancel)?;
        let plan = BatchPlan::from(&*self.inner.config.read());

        let pages = match pages {
            Some(pages) => pages,
            None => self.inner.accumulator.responses()?,
        };
        let progress = EngineProgress { inner: &self.inner };
        let summary = exporter
            .process_and_export(&pages, need_process, plan, &cancel, &progress)
            .await?;

        *self.inner.progress.lock() = format!("Exported {}", summary.file_name);
        Ok(summary)
    }

    /// Abandon a running export at the next batch boundary
    pub fn cancel_export(&self) -> bool {
        match self.inner.export_cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Single entry point for UI control messages
    pub async fn handle_message(&self, message: ControlMessage) -> ControlResponse {
        debug!(?message, "control message");
        match message {
            ControlMessage::ToggleCapture { value } => ack(self.toggle_capture(value)),
            ControlMessage::GetProgress => ControlResponse::Progress {
                message: self.progress(),
            },
            ControlMessage::ProcessAndExport {
                responses,
                need_process,
            } => match self.process_and_export(responses, need_process).await {
                Ok(summary) => ControlResponse::Exported(summary),
                Err(e) => {
                    error!("Export failed: {}", e);
                    ControlResponse::failed(e)
                }
            },
            ControlMessage::CancelExport => {
                if self.cancel_export() {
                    ControlResponse::ok()
                } else {
                    ControlResponse::failed("no export running")
                }
            }
            ControlMessage::SaveConfig { config } => ack(self.save_config(config)),
            ControlMessage::ReloadConfig => ack(self.reload_config()),
            ControlMessage::GetConfig => match self.stored_config() {
                Ok(config) => ControlResponse::Config(config),
                Err(e) => ControlResponse::failed(e),
            },
            ControlMessage::GetResponses => match self.responses() {
                Ok(pages) => ControlResponse::Responses(pages),
                Err(e) => ControlResponse::failed(e),
            },
            ControlMessage::ClearResponses => ack(self.clear_responses()),
        }
    }
}

fn ack<T>(result: Result<T, CaptureError>) -> ControlResponse {
    match result {
        Ok(_) => ControlResponse::ok(),
        Err(e) => {
            warn!("Control message failed: {}", e);
            ControlResponse::failed(e)
        }
    }
}

async fn run_session(
    inner: Arc<EngineInner>,
    request: FirstPageRequest,
    ticket: SessionTicket,
) -> SessionOutcome {
    let session_id = ticket.id();
    let url = request.url.clone();

    match replay_pages(&inner, request, &ticket).await {
        Ok(pages) => {
            let completed = inner.sessions.lock().complete(session_id);
            if completed.is_err() {
                return stopped(&inner, session_id);
            }
            info!(session = session_id, pages, "Capture session completed");
            let preview = truncate_str(&url, inner.replayer.policy().url_preview_len);
            inner
                .notifier
                .notify(Notification::CaptureSucceeded { url_preview: preview });
            emit(
                &inner.events,
                EngineEvent::SessionCompleted { session_id, pages },
            );
            SessionOutcome::Completed { session_id, pages }
        }
        Err(e) if e.is_superseded() || !ticket.is_live() => stopped(&inner, session_id),
        Err(e) => {
            let message = e.to_string();
            error!(session = session_id, "Capture of {} failed: {}", url, message);
            let recorded = inner.sessions.lock().fail(session_id, message.clone());
            if let Err(err) = recorded {
                debug!(session = session_id, "failure of a stale session: {}", err);
                return stopped(&inner, session_id);
            }
            let preview = truncate_str(&url, inner.replayer.policy().url_preview_len);
            inner.notifier.notify(Notification::CaptureFailed {
                message: format!("{}: {}", preview, message),
            });
            emit(
                &inner.events,
                EngineEvent::SessionFailed {
                    session_id,
                    error: message.clone(),
                },
            );
            SessionOutcome::Failed {
                session_id,
                error: message,
            }
        }
    }
}

/// Outcome of a session stopped from outside: cancelled by the toggle or superseded
fn stopped(inner: &EngineInner, session_id: SessionId) -> SessionOutcome {
    let cancelled = matches!(
        inner.sessions.lock().state(),
        SessionState::Cancelled { session_id: id } if *id == session_id
    );
    if cancelled {
        info!(session = session_id, "Capture session cancelled");
        emit(&inner.events, EngineEvent::SessionCancelled { session_id });
        SessionOutcome::Cancelled { session_id }
    } else {
        info!(session = session_id, "Capture session superseded");
        SessionOutcome::Superseded { session_id }
    }
}

async fn replay_pages(
    inner: &EngineInner,
    request: FirstPageRequest,
    ticket: &SessionTicket,
) -> Result<u64, CaptureError> {
    let session_id = ticket.id();
    let mut replay = inner.replayer.replay(request, ticket.clone()).await?;
    let total_pages = replay.total_pages();
    let mut saved = 0;

    while let Some(page) = replay.next_page().await {
        let page = page?;
        let page_number = page.page;
        let max_captures = inner.config.read().max_captures;
        {
            // Held until the write lands; a successor's first write queues behind it
            let _commit = inner.commit.lock().await;
            if !inner.sessions.lock().is_current(session_id) {
                return Err(CaptureError::Superseded(session_id));
            }
            let accumulator = inner.accumulator.clone();
            tokio::task::spawn_blocking(move || accumulator.append(&page, max_captures))
                .await??;
        }
        saved += 1;
        emit(
            &inner.events,
            EngineEvent::PageCaptured {
                session_id,
                page: page_number,
                total_pages,
            },
        );
    }

    Ok(saved)
}

/// Claim on the single export slot, released on drop
struct ExportSlot<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl<'a> ExportSlot<'a> {
    fn claim(
        slot: &'a Mutex<Option<CancellationToken>>,
    ) -> Result<(CancellationToken, Self), ExportError> {
        let mut current = slot.lock();
        if current.is_some() {
            return Err(ExportError::Busy);
        }
        let token = CancellationToken::new();
        *current = Some(token.clone());
        Ok((token, Self { slot }))
    }
}

impl Drop for ExportSlot<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Routes enrichment progress to the progress message, events and notifier
struct EngineProgress<'a> {
    inner: &'a EngineInner,
}

impl ProgressSink for EngineProgress<'_> {
    fn progress(&self, batch: usize, total_batches: usize, message: &str) {
        *self.inner.progress.lock() = message.to_string();
        emit(
            &self.inner.events,
            EngineEvent::EnrichmentProgress {
                batch,
                total_batches,
                message: message.to_string(),
            },
        );
    }

    fn aborted(&self, url: &str, message: &str) {
        *self.inner.progress.lock() = message.to_string();
        self.inner.notifier.notify(Notification::EnrichmentAborted {
            url: url.to_string(),
            message: message.to_string(),
        });
        emit(
            &self.inner.events,
            EngineEvent::EnrichmentAborted {
                url: url.to_string(),
                message: message.to_string(),
            },
        );
    }
}
