//! Rolling response buffer
//!
//! Captured pages are appended to the `responses` key in storage. The buffer
//! keeps the most recent `max_captures` entries, evicting the oldest first.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::CapturedPage;
use crate::platform::{KeyValueStore, StoreError, RESPONSES_KEY};

#[derive(Clone)]
pub struct ResultAccumulator {
    store: Arc<dyn KeyValueStore>,
}

impl ResultAccumulator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Append one page, trimming the buffer to `max_captures`.
    ///
    /// Returns the buffer length after the append.
    pub fn append(&self, page: &CapturedPage, max_captures: usize) -> Result<usize, StoreError> {
        let entry = serde_json::to_value(page).map_err(|source| StoreError::Serde {
            key: RESPONSES_KEY.to_string(),
            source,
        })?;
        let max = max_captures.max(1);
        let mut len = 0;

        self.store.update(RESPONSES_KEY, &mut |prev| {
            let mut entries = match prev {
                Some(Value::Array(entries)) => entries,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    warn!("Response buffer was not a list, starting a new one");
                    Vec::new()
                }
            };
            entries.push(entry.clone());
            if entries.len() > max {
                let evicted = entries.len() - max;
                entries.drain(..evicted);
                debug!(evicted, "response buffer trimmed");
            }
            len = entries.len();
            Ok(Value::Array(entries))
        })?;

        Ok(len)
    }

    /// All buffered pages, oldest first; unreadable entries are skipped
    pub fn responses(&self) -> Result<Vec<CapturedPage>, StoreError> {
        let entries = match self.store.get(RESPONSES_KEY)? {
            Some(Value::Array(entries)) => entries,
            _ => return Ok(Vec::new()),
        };
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!("Skipping unreadable buffered response: {}", e);
                    None
                }
            })
            .collect())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.set(RESPONSES_KEY, Value::Array(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryStore;
    use serde_json::json;

    fn page(n: u64) -> CapturedPage {
        CapturedPage {
            url: "https://a.test/api".into(),
            method: "POST".into(),
            request_type: "xhr".into(),
            page: n,
            total_pages: 10,
            request_body: "{}".into(),
            response_body: "{}".into(),
            status_code: 200,
            headers: Default::default(),
            timestamp: n as i64,
            group_id: None,
            session_id: Some(1),
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let acc = ResultAccumulator::new(Arc::new(MemoryStore::new()));
        for n in 1..=5 {
            acc.append(&page(n), 3).unwrap();
        }
        let pages: Vec<u64> = acc.responses().unwrap().iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![3, 4, 5]);
    }

    #[test]
    fn append_reports_length() {
        let acc = ResultAccumulator::new(Arc::new(MemoryStore::new()));
        assert_eq!(acc.append(&page(1), 10).unwrap(), 1);
        assert_eq!(acc.append(&page(2), 10).unwrap(), 2);
        acc.clear().unwrap();
        assert!(acc.responses().unwrap().is_empty());
    }

    #[test]
    fn tolerates_corrupt_buffer() {
        let store = Arc::new(MemoryStore::new());
        store.set(RESPONSES_KEY, json!({"not": "a list"})).unwrap();
        let acc = ResultAccumulator::new(store.clone());
        assert!(acc.responses().unwrap().is_empty());
        acc.append(&page(1), 10).unwrap();

        store
            .update(RESPONSES_KEY, &mut |prev| {
                let mut entries = prev.and_then(|v| v.as_array().cloned()).unwrap_or_default();
                entries.push(json!("garbage"));
                Ok(Value::Array(entries))
            })
            .unwrap();
        assert_eq!(acc.responses().unwrap().len(), 1);
    }
}
