//! Capture data types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Monotonic capture session identifier
pub type SessionId = u64;

/// A network request observed in the page, before classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRequest {
    pub url: String,
    pub method: String,
    /// Platform resource type, e.g. `xmlhttprequest` or `xhr`
    #[serde(rename = "type", alias = "requestType")]
    pub request_type: String,
    /// Raw request body bytes, if the request carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

impl ObservedRequest {
    pub fn new(
        url: impl Into<String>,
        method: impl Into<String>,
        request_type: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            request_type: request_type.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json_body(self, body: &Value) -> Self {
        self.with_body(body.to_string())
    }
}

/// First page of a paginated API call, decoded and accepted for replay
#[derive(Debug, Clone, PartialEq)]
pub struct FirstPageRequest {
    pub url: String,
    pub method: String,
    pub request_type: String,
    pub body: Map<String, Value>,
}

/// One replayed page, as stored in the response buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPage {
    pub url: String,
    pub method: String,
    #[serde(rename = "type", alias = "requestType")]
    pub request_type: String,
    pub page: u64,
    pub total_pages: u64,
    /// Serialized JSON body sent for this page
    pub request_body: String,
    /// Raw response text
    pub response_body: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl CapturedPage {
    /// Request body parsed back into JSON
    pub fn request_json(&self) -> Option<Value> {
        serde_json::from_str(&self.request_body).ok()
    }

    /// Response body parsed as JSON
    pub fn response_json(&self) -> Option<Value> {
        serde_json::from_str(&self.response_body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn captured_page_uses_buffer_field_names() {
        let page = CapturedPage {
            url: "https://example.com/api".into(),
            method: "POST".into(),
            request_type: "xhr".into(),
            page: 2,
            total_pages: 3,
            request_body: r#"{"page_num":2}"#.into(),
            response_body: r#"{"data":{}}"#.into(),
            status_code: 200,
            headers: BTreeMap::new(),
            timestamp: 1,
            group_id: Some("1_2024-05-01".into()),
            session_id: None,
        };
        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["type"], "xhr");
        assert_eq!(value["totalPages"], 3);
        assert_eq!(value["groupId"], "1_2024-05-01");
        assert!(value.get("sessionId").is_none());
        assert_eq!(page.request_json(), Some(json!({"page_num": 2})));
    }

    #[test]
    fn observed_request_reads_platform_shape() {
        let req: ObservedRequest = serde_json::from_value(json!({
            "url": "https://example.com/api",
            "method": "POST",
            "type": "xmlhttprequest"
        }))
        .unwrap();
        assert_eq!(req.request_type, "xmlhttprequest");
        assert!(req.body.is_none());
    }
}
