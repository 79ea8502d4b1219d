use thiserror::Error;

use super::session::SessionError;
use super::types::SessionId;
use crate::platform::{ExecutorError, StoreError};

/// Errors raised while capturing a paginated query
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("First page request failed: {0}")]
    FirstPage(#[source] ExecutorError),

    #[error("First page response has no total at '{pointer}'")]
    MissingTotal { pointer: String },

    #[error("Page {page} request failed: {source}")]
    PageFetch {
        page: u64,
        #[source]
        source: ExecutorError,
    },

    #[error("Page {page} returned status {status}")]
    PageStatus { page: u64, status: u16 },

    #[error("Session {0} is no longer current")]
    Superseded(SessionId),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Buffer write task failed: {0}")]
    WriteTask(#[from] tokio::task::JoinError),
}

impl CaptureError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, CaptureError::Superseded(_))
    }
}
