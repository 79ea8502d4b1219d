//! Relevance classification capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What is being classified; selects the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A note's description and tags
    Note,
    /// All comments of a note, flattened
    Comment,
}

/// Structured classifier verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_relevant: bool,
    /// In `[0, 1]`
    pub score: f64,
    pub reason: String,
}

impl Verdict {
    pub fn new(is_relevant: bool, score: f64, reason: impl Into<String>) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            is_relevant,
            score,
            reason: reason.into(),
        }
    }

    /// Verdict recorded when classification could not be performed
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self::new(false, 0.0, reason)
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unusable classifier response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// External content classifier
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    async fn classify(
        &self,
        kind: ContentKind,
        text: &str,
        tags: &str,
    ) -> Result<Verdict, ClassifierError>;
}
