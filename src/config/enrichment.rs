//! Enrichment and relevance classifier configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secondary enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Base URL of a note's canonical page; the note id is appended
    pub note_url_base: String,
    /// Project attribution lookup endpoint
    pub project_lookup_url: String,
    /// Days back from today covered by the project lookup
    pub project_window_days: i64,
    /// Host serving the comment APIs
    pub comment_api_base: String,
    /// Bucket (list type) that wins when a note appears in several
    pub primary_bucket: i64,
    /// Display names per bucket
    pub bucket_names: BTreeMap<String, String>,
    /// Titles containing any of these are never valid
    pub exclusion_keywords: Vec<String>,
    /// Text the site renders in place of a deleted note
    pub removed_marker: String,
    /// Lower bound of the random delay before a detail fetch (ms)
    pub detail_jitter_min_ms: u64,
    /// Upper bound of the random delay before a detail fetch (ms)
    pub detail_jitter_max_ms: u64,
    /// Collect and classify comments for relevant, unattributed notes
    pub analyze_comments: bool,
    /// Delay between comment pages (ms)
    pub comment_page_delay_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        let mut bucket_names = BTreeMap::new();
        bucket_names.insert("1".to_string(), "Heat ranking".to_string());
        bucket_names.insert("2".to_string(), "Dark horse ranking".to_string());
        Self {
            note_url_base: "https://www.xiaohongshu.com/explore/".to_string(),
            project_lookup_url: "https://ad.xiaohongshu.com/api/leona/ugc_heat/report/list"
                .to_string(),
            project_window_days: 7,
            comment_api_base: "https://edith.xiaohongshu.com".to_string(),
            primary_bucket: 1,
            bucket_names,
            exclusion_keywords: vec!["二手".to_string(), "五菱".to_string()],
            removed_marker: "你访问的页面不见了".to_string(),
            detail_jitter_min_ms: 1000,
            detail_jitter_max_ms: 3000,
            analyze_comments: false,
            comment_page_delay_ms: 1000,
        }
    }
}

impl EnrichmentConfig {
    /// Display name of a bucket, "Unknown" when unmapped
    pub fn bucket_name(&self, bucket: i64) -> String {
        self.bucket_names
            .get(&bucket.to_string())
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Whether a title hits the exclusion keyword list
    pub fn is_excluded_title(&self, title: &str) -> bool {
        self.exclusion_keywords
            .iter()
            .any(|k| !k.is_empty() && title.contains(k.as_str()))
    }

    /// Same configuration with all pacing delays removed
    pub fn without_delays(mut self) -> Self {
        self.detail_jitter_min_ms = 0;
        self.detail_jitter_max_ms = 0;
        self.comment_page_delay_ms = 0;
        self
    }
}

/// OpenAI-compatible chat completion endpoint used for relevance scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Enable the HTTP classifier (disabled means every verdict is the fallback)
    pub enabled: bool,
    /// Chat completions endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// API key (falls back to the NOTE_HARVEST_API_KEY env var)
    pub api_key: Option<String>,
    /// What relevance is judged against
    pub subject: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.siliconflow.cn/v1/chat/completions".to_string(),
            model: "Qwen/QwQ-32B".to_string(),
            api_key: None,
            subject: "BMW MINI (models, trims, ownership experience, maintenance, modifications)"
                .to_string(),
            timeout_secs: 60,
            max_tokens: 1024,
            temperature: 0.3,
            top_p: 0.7,
        }
    }
}
