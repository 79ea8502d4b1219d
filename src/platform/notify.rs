//! User-visible notifications

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Notification shown to the user by the host platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Every page of a capture was replayed and saved
    CaptureSucceeded { url_preview: String },
    /// A capture session failed; already saved pages are kept
    CaptureFailed { message: String },
    /// A newer request superseded the running capture
    NewCaptureStarted,
    /// Enrichment stopped because detail extraction is broken
    EnrichmentAborted { url: String, message: String },
}

/// Capability to surface notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::CaptureSucceeded { url_preview } => {
                info!("Captured all pages: {}", url_preview)
            }
            Notification::CaptureFailed { message } => error!("Capture failed: {}", message),
            Notification::NewCaptureStarted => info!("A new capture superseded the running one"),
            Notification::EnrichmentAborted { url, message } => {
                warn!("Enrichment aborted at {}: {}", url, message)
            }
        }
    }
}

/// Notifier that keeps every notification in memory
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}
