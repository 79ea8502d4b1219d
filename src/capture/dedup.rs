//! Request deduplication
//!
//! A fingerprint identifies a request ignoring its pagination field, so every
//! page of one logical query shares it. Fingerprints expire after a TTL.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::util::fast_hash;

/// Fingerprint of a request with the pagination field removed.
///
/// `serde_json::Map` keeps keys sorted, so key order in the original body
/// does not change the fingerprint.
pub fn fingerprint(
    url: &str,
    method: &str,
    body: &Map<String, Value>,
    pagination_field: &str,
) -> String {
    let mut rest = body.clone();
    rest.remove(pagination_field);
    let key = format!("{}_{}_{}", url, method.to_uppercase(), Value::Object(rest));
    format!("{:016x}", fast_hash(&key))
}

/// A body is a first page when it has no pagination field or the field equals 1
pub fn is_first_page(body: &Map<String, Value>, pagination_field: &str) -> bool {
    match body.get(pagination_field) {
        None => true,
        Some(v) => v.as_i64() == Some(1) || v.as_f64() == Some(1.0),
    }
}

/// Time-bounded set of recently started fingerprints
#[derive(Debug)]
pub struct DedupRegistry {
    entries: HashMap<String, Instant>,
    default_ttl: Duration,
}

impl DedupRegistry {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
        }
    }

    /// True if the fingerprint was remembered and has not expired yet
    pub fn seen(&mut self, fingerprint: &str) -> bool {
        match self.entries.get(fingerprint) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                self.entries.remove(fingerprint);
                false
            }
            None => false,
        }
    }

    pub fn remember(&mut self, fingerprint: impl Into<String>) {
        let ttl = self.default_ttl;
        self.remember_for(fingerprint, ttl);
    }

    pub fn remember_for(&mut self, fingerprint: impl Into<String>, ttl: Duration) {
        self.purge_expired();
        self.entries.insert(fingerprint.into(), Instant::now() + ttl);
    }

    pub fn forget(&mut self, fingerprint: &str) {
        self.entries.remove(fingerprint);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, expiry| *expiry > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn pages_of_one_query_share_a_fingerprint() {
        let p1 = body(json!({"page_num": 1, "list_type": 1, "date": "2024-05-01"}));
        let p2 = body(json!({"date": "2024-05-01", "page_num": 2, "list_type": 1}));
        let other = body(json!({"page_num": 1, "list_type": 2, "date": "2024-05-01"}));

        let a = fingerprint("https://a.test/api", "POST", &p1, "page_num");
        assert_eq!(a, fingerprint("https://a.test/api", "post", &p2, "page_num"));
        assert_ne!(a, fingerprint("https://a.test/api", "POST", &other, "page_num"));
    }

    #[test]
    fn first_page_detection() {
        assert!(is_first_page(&body(json!({"list_type": 1})), "page_num"));
        assert!(is_first_page(&body(json!({"page_num": 1})), "page_num"));
        assert!(!is_first_page(&body(json!({"page_num": 2})), "page_num"));
        assert!(!is_first_page(&body(json!({"page_num": "1"})), "page_num"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let mut registry = DedupRegistry::new(Duration::from_secs(5));
        registry.remember("fp");
        assert!(registry.seen("fp"));

        tokio::time::advance(Duration::from_millis(4_900)).await;
        assert!(registry.seen("fp"));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!registry.seen("fp"));
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_and_forget() {
        let mut registry = DedupRegistry::new(Duration::from_secs(5));
        registry.remember("a");
        registry.remember("b");
        registry.forget("a");
        assert!(!registry.seen("a"));
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(!registry.seen("b"));
    }
}
