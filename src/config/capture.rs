//! Capture and replay configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default endpoint whose first-page requests trigger a capture
pub const DEFAULT_URL_PATTERN: &str = "https://ad.xiaohongshu.com/api/edith/ugc_heat/note_list";

/// Capture configuration persisted under the `captureConfig` storage key.
///
/// Empty pattern, type and method lists mean "match all" for that dimension.
/// Field names follow the camelCase layout the options surface writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// URL regular expressions, OR-matched
    pub url_patterns: Vec<String>,
    /// Normalized request-type tokens ("xhr", "document", ...)
    pub request_types: Vec<String>,
    /// HTTP methods (upper case)
    pub http_methods: Vec<String>,
    /// Rolling response buffer capacity
    pub max_captures: usize,
    /// Records fetched concurrently per enrichment batch
    #[serde(rename = "noteDetailBatchSize")]
    pub enrichment_batch_size: usize,
    /// Pause between enrichment batches (milliseconds)
    #[serde(rename = "noteDetailBatchDelay")]
    pub enrichment_batch_delay_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            url_patterns: vec![DEFAULT_URL_PATTERN.to_string()],
            request_types: vec!["xhr".to_string()],
            http_methods: vec!["POST".to_string()],
            max_captures: 100,
            enrichment_batch_size: 5,
            enrichment_batch_delay_ms: 2000,
        }
    }
}

impl CaptureConfig {
    /// Normalize user-entered values: trim patterns, lower-case types,
    /// upper-case methods, drop blanks.
    pub fn normalized(mut self) -> Self {
        self.url_patterns = self
            .url_patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self.request_types = self
            .request_types
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.http_methods = self
            .http_methods
            .into_iter()
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// Batch size used by enrichment, never below one
    pub fn effective_batch_size(&self) -> usize {
        self.enrichment_batch_size.max(1)
    }
}

/// Replay pacing and pagination field policy.
///
/// Delay magnitudes are tunable; none of them is a correctness invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayPolicy {
    /// Body field carrying the 1-indexed page number
    pub pagination_field: String,
    /// Body field carrying the page size
    pub page_size_field: String,
    /// JSON pointer to the total record count in the first-page response
    pub total_pointer: String,
    /// Page size assumed when the request body carries none
    pub default_page_size: u64,
    /// Lower bound of the random delay before each page fetch (ms)
    pub pre_fetch_jitter_min_ms: u64,
    /// Upper bound of the random delay before each page fetch (ms)
    pub pre_fetch_jitter_max_ms: u64,
    /// Fixed part of the delay after a page is saved (ms)
    pub post_save_base_ms: u64,
    /// Per-page increment of the post-save delay (ms)
    pub post_save_per_page_ms: u64,
    /// Ceiling of the per-page increment (ms)
    pub post_save_page_cap_ms: u64,
    /// Upper bound of the random part of the post-save delay (ms)
    pub post_save_jitter_ms: u64,
    /// How long a superseding start waits for the old loop to acknowledge (ms)
    pub supersede_grace_ms: u64,
    /// Lifetime of a dedup fingerprint (ms)
    pub dedup_ttl_ms: u64,
    /// Length of the URL preview in success notifications
    pub url_preview_len: usize,
    /// Body fields joined with `_` to form a page's group id
    pub group_fields: Vec<String>,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            pagination_field: "page_num".to_string(),
            page_size_field: "page_size".to_string(),
            total_pointer: "/data/total".to_string(),
            default_page_size: 10,
            pre_fetch_jitter_min_ms: 500,
            pre_fetch_jitter_max_ms: 1500,
            post_save_base_ms: 2000,
            post_save_per_page_ms: 500,
            post_save_page_cap_ms: 3000,
            post_save_jitter_ms: 1000,
            supersede_grace_ms: 1000,
            dedup_ttl_ms: 5000,
            url_preview_len: 50,
            group_fields: vec!["list_type".to_string(), "date".to_string()],
        }
    }
}

impl ReplayPolicy {
    /// Policy with every pacing delay set to zero
    pub fn immediate() -> Self {
        Self {
            pre_fetch_jitter_min_ms: 0,
            pre_fetch_jitter_max_ms: 0,
            post_save_base_ms: 0,
            post_save_per_page_ms: 0,
            post_save_page_cap_ms: 0,
            post_save_jitter_ms: 0,
            ..Self::default()
        }
    }

    /// Random delay applied before a page fetch
    pub fn pre_fetch_delay(&self) -> Duration {
        crate::util::jitter(self.pre_fetch_jitter_min_ms, self.pre_fetch_jitter_max_ms)
    }

    /// Composite delay applied after page `page` has been saved:
    /// base + min(page * per_page, cap) + jitter
    pub fn post_save_delay(&self, page: u64) -> Duration {
        let stepped = page
            .saturating_mul(self.post_save_per_page_ms)
            .min(self.post_save_page_cap_ms);
        let fixed = Duration::from_millis(self.post_save_base_ms.saturating_add(stepped));
        fixed + crate::util::jitter(0, self.post_save_jitter_ms)
    }

    pub fn supersede_grace(&self) -> Duration {
        Duration::from_millis(self.supersede_grace_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_reads_partial_storage_value() {
        let cfg: CaptureConfig =
            serde_json::from_str(r#"{"urlPatterns":["/api/list"],"maxCaptures":3}"#).unwrap();
        assert_eq!(cfg.url_patterns, vec!["/api/list"]);
        assert_eq!(cfg.max_captures, 3);
        assert_eq!(cfg.http_methods, vec!["POST"]);
        assert_eq!(cfg.enrichment_batch_size, 5);
    }

    #[test]
    fn capture_config_uses_storage_field_names() {
        let value = serde_json::to_value(CaptureConfig::default()).unwrap();
        assert!(value.get("urlPatterns").is_some());
        assert!(value.get("noteDetailBatchSize").is_some());
        assert!(value.get("noteDetailBatchDelay").is_some());
    }

    #[test]
    fn normalized_cleans_user_input() {
        let cfg = CaptureConfig {
            url_patterns: vec!["  /api  ".into(), "".into()],
            request_types: vec!["XHR".into()],
            http_methods: vec!["post".into(), " ".into()],
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.url_patterns, vec!["/api"]);
        assert_eq!(cfg.request_types, vec!["xhr"]);
        assert_eq!(cfg.http_methods, vec!["POST"]);
    }

    #[test]
    fn post_save_delay_grows_then_caps() {
        let policy = ReplayPolicy {
            post_save_jitter_ms: 0,
            ..ReplayPolicy::default()
        };
        assert_eq!(policy.post_save_delay(1), Duration::from_millis(2500));
        assert_eq!(policy.post_save_delay(4), Duration::from_millis(4000));
        assert_eq!(policy.post_save_delay(40), Duration::from_millis(5000));
    }

    #[test]
    fn immediate_policy_has_no_delays() {
        let policy = ReplayPolicy::immediate();
        assert_eq!(policy.pre_fetch_delay(), Duration::ZERO);
        assert_eq!(policy.post_save_delay(7), Duration::ZERO);
    }
}
