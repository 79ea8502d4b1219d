//! Storage, authenticated session, and export configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Browser-like user agent relayed on page-context requests
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Persistent key/value state location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding `captureConfig`, `isCapturing` and `responses`
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("note-harvest-state.json"),
        }
    }
}

/// The host page's session as relayed by the HTTP page executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Raw `Cookie` header copied from the logged-in browser
    pub cookie: Option<String>,
    /// User agent string
    pub user_agent: String,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Request timeout (seconds)
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "accept".to_string(),
            "application/json, text/plain, */*".to_string(),
        );
        headers.insert(
            "accept-language".to_string(),
            "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        );
        Self {
            cookie: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers,
            request_timeout_secs: 30,
        }
    }
}

/// Workbook output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory the workbook sink writes into
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}
