//! Capture engine events
//!
//! Broadcast to any number of subscribers; a send with nobody listening is
//! not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::types::SessionId;

/// Events emitted while capturing and enriching.
///
/// Serialized as internally-tagged JSON (`"type": "variant_name"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A first-page request started a new replay session.
    SessionStarted { session_id: SessionId, url: String },

    /// A new session replaced one that was still running.
    NewCaptureStarted {
        superseded_id: SessionId,
        session_id: SessionId,
    },

    /// A page was committed to the response buffer.
    PageCaptured {
        session_id: SessionId,
        page: u64,
        total_pages: u64,
    },

    SessionCompleted { session_id: SessionId, pages: u64 },

    SessionFailed { session_id: SessionId, error: String },

    /// Session stopped by capture being switched off.
    SessionCancelled { session_id: SessionId },

    EnrichmentProgress {
        batch: usize,
        total_batches: usize,
        message: String,
    },

    EnrichmentAborted { url: String, message: String },
}

impl EngineEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            EngineEvent::SessionStarted { .. } => "session_started",
            EngineEvent::NewCaptureStarted { .. } => "new_capture_started",
            EngineEvent::PageCaptured { .. } => "page_captured",
            EngineEvent::SessionCompleted { .. } => "session_completed",
            EngineEvent::SessionFailed { .. } => "session_failed",
            EngineEvent::SessionCancelled { .. } => "session_cancelled",
            EngineEvent::EnrichmentProgress { .. } => "enrichment_progress",
            EngineEvent::EnrichmentAborted { .. } => "enrichment_aborted",
        }
    }
}

pub(crate) fn emit(tx: &broadcast::Sender<EngineEvent>, event: EngineEvent) {
    let event_name = event.event_name();
    match tx.send(event) {
        Ok(n) => debug!("emit {}: {} subscriber(s)", event_name, n),
        Err(_) => debug!("emit {}: no subscribers", event_name),
    }
}
