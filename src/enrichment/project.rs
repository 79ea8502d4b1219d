//! Project attribution lookup
//!
//! Asks the ad platform's report list which promotion projects a note was
//! attached to within a recent window. Any failure is reported as "none".

use chrono::{DateTime, Duration, TimeZone};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::platform::{PageExecutor, PageRequest};

/// Attribution recorded when no project was found
pub const NO_PROJECT: &str = "none";

pub fn has_project(name: &str) -> bool {
    !name.is_empty() && name != NO_PROJECT
}

/// `(begin, end)` epoch milliseconds: `days` back at 00:00:00.000 up to
/// today 23:59:59.999, in `now`'s time zone
pub fn lookup_window<Tz: TimeZone>(now: &DateTime<Tz>, days: i64) -> Option<(i64, i64)> {
    let today = now.date_naive();
    let end = today.and_hms_milli_opt(23, 59, 59, 999)?;
    let start = today
        .checked_sub_signed(Duration::days(days))?
        .and_hms_opt(0, 0, 0)?;
    let tz = now.timezone();
    Some((
        tz.from_local_datetime(&start).earliest()?.timestamp_millis(),
        tz.from_local_datetime(&end).latest()?.timestamp_millis(),
    ))
}

/// Project names joined with "、", if the response lists any
pub fn project_names(response: &Value) -> Option<String> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    let list = response
        .pointer("/data/data/list")
        .or_else(|| response.pointer("/data/list"))
        .and_then(Value::as_array)?;
    let names: Vec<&str> = list
        .iter()
        .filter_map(|item| item.pointer("/projectInfo/projectName").and_then(Value::as_str))
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("、"))
    }
}

#[derive(Clone)]
pub struct ProjectLookup {
    executor: Arc<dyn PageExecutor>,
    url: String,
    window_days: i64,
}

impl ProjectLookup {
    pub fn new(executor: Arc<dyn PageExecutor>, url: impl Into<String>, window_days: i64) -> Self {
        Self {
            executor,
            url: url.into(),
            window_days,
        }
    }

    pub fn request_body(&self, note_id: &str) -> Value {
        let (begin, end) = lookup_window(&chrono::Local::now(), self.window_days).unwrap_or((0, 0));
        json!({
            "noteId": note_id,
            "pageNum": 1,
            "pageSize": 10,
            "projectCreateTimeBegin": begin,
            "projectCreateTimeEnd": end,
            "projectId": "",
            "projectName": "",
            "reportType": "PROJECT",
        })
    }

    /// Attributed project names, or `NO_PROJECT`
    pub async fn project_name(&self, note_id: &str) -> String {
        let request = PageRequest::post_json(&self.url, self.request_body(note_id));
        match self.executor.fetch_json(&request).await {
            Ok(response) => {
                let name = project_names(&response).unwrap_or_else(|| NO_PROJECT.to_string());
                debug!(note_id, project = %name, "project lookup finished");
                name
            }
            Err(e) => {
                warn!("Project lookup for note {} failed: {}", note_id, e);
                NO_PROJECT.to_string()
            }
        }
    }
}
