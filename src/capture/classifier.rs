//! Request classification
//!
//! Decides whether an observed request is a capture candidate. URL patterns
//! are compiled once per configuration; an invalid pattern is logged and
//! never matches. An empty pattern, type or method list matches everything.

use regex::Regex;
use tracing::{trace, warn};

use super::types::ObservedRequest;
use crate::config::CaptureConfig;

/// Map a platform resource type onto the vocabulary used in `requestTypes`
pub fn map_request_type(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "xmlhttprequest" => "xhr".to_string(),
        "main_frame" | "sub_frame" => "document".to_string(),
        other => other.to_string(),
    }
}

/// Precompiled request filter
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    patterns: Vec<Regex>,
    match_any_url: bool,
    request_types: Vec<String>,
    http_methods: Vec<String>,
}

impl RequestClassifier {
    pub fn new(config: &CaptureConfig) -> Self {
        let patterns = config
            .url_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid URL pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            patterns,
            match_any_url: config.url_patterns.is_empty(),
            request_types: config
                .request_types
                .iter()
                .map(|t| map_request_type(t.trim()))
                .collect(),
            http_methods: config
                .http_methods
                .iter()
                .map(|m| m.trim().to_uppercase())
                .collect(),
        }
    }

    /// True iff the URL matches a pattern and both type and method are allowed
    pub fn should_capture(&self, request: &ObservedRequest) -> bool {
        if !self.url_allowed(&request.url) {
            trace!(url = %request.url, "no URL pattern matched");
            return false;
        }
        let request_type = map_request_type(&request.request_type);
        if !self.request_types.is_empty() && !self.request_types.contains(&request_type) {
            trace!(url = %request.url, request_type = %request_type, "request type not captured");
            return false;
        }
        if !self.http_methods.is_empty()
            && !self
                .http_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&request.method))
        {
            trace!(url = %request.url, method = %request.method, "method not captured");
            return false;
        }
        true
    }

    fn url_allowed(&self, url: &str) -> bool {
        self.match_any_url || self.patterns.iter().any(|re| re.is_match(url))
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
