//! Note entries parsed from captured list pages

use chrono::{Local, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::capture::CapturedPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Image,
    Video,
}

impl NoteKind {
    pub fn label(&self) -> &'static str {
        match self {
            NoteKind::Image => "image",
            NoteKind::Video => "video",
        }
    }
}

/// One entry of `data.note_list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEntry {
    pub note_id: String,
    pub title: String,
    pub xsec_token: String,
    pub kind: NoteKind,
    pub author_name: String,
    pub fans: String,
    /// Epoch milliseconds
    pub created_at: Option<i64>,
    pub status: String,
    pub heat: String,
    pub interactions: String,
    pub comments: String,
}

impl NoteEntry {
    /// Parse one list entry; entries without a note id are rejected
    pub fn from_value(value: &Value) -> Option<Self> {
        let info = value.get("note_info")?;
        let note_id = info.get("note_id")?.as_str()?.to_string();
        let author = value.get("author_info");

        Some(Self {
            note_id,
            title: text(info.get("note_title")),
            xsec_token: text(info.get("xsec_token")),
            kind: if info.get("note_type").and_then(Value::as_i64) == Some(1) {
                NoteKind::Image
            } else {
                NoteKind::Video
            },
            author_name: text(author.and_then(|a| a.get("author_name"))),
            fans: text(author.and_then(|a| a.get("fans_count"))),
            created_at: value.get("note_create_time").and_then(Value::as_i64),
            status: match value.get("note_status") {
                Some(v) if v.as_i64() == Some(1) => "public".to_string(),
                other => text(other),
            },
            heat: metric(value.get("heat_value")),
            interactions: metric(value.get("interact")),
            comments: metric(value.get("comment")),
        })
    }

    /// Canonical detail page URL under `base`
    pub fn canonical_url(&self, base: &str) -> String {
        format!(
            "{}{}?xsec_token={}&xsec_source=pc_ad",
            base, self.note_id, self.xsec_token
        )
    }

    pub fn comment_count(&self) -> u64 {
        self.comments.trim().parse().unwrap_or(0)
    }

    /// Creation time as local `YYYY-MM-DD HH:MM:SS`
    pub fn created_display(&self) -> String {
        self.created_at
            .and_then(|ms| Local.timestamp_millis_opt(ms).single())
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Counters default to "0" when absent, empty or zero
fn metric(value: Option<&Value>) -> String {
    let s = text(value);
    if s.is_empty() || s == "0" {
        "0".to_string()
    } else {
        s
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A note as seen in one captured page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteOccurrence {
    pub note: NoteEntry,
    /// Ranking list (`list_type`) the page belonged to
    pub bucket: i64,
    pub hot_words: Vec<String>,
    pub keywords: Vec<String>,
    /// Position of the source page in the response buffer
    pub response_index: usize,
    /// First time this note appears within its bucket
    pub is_first: bool,
}

/// Every note occurrence across the buffer, with per-note bucket membership
#[derive(Debug, Clone, Default)]
pub struct NoteIndex {
    pub occurrences: Vec<NoteOccurrence>,
    buckets: HashMap<String, BTreeSet<i64>>,
}

impl NoteIndex {
    /// Parse all pages; unreadable pages and entries are skipped
    pub fn from_pages(pages: &[CapturedPage]) -> Self {
        let mut index = NoteIndex::default();
        let mut seen: HashSet<(String, i64)> = HashSet::new();

        for (response_index, page) in pages.iter().enumerate() {
            let (Some(response), Some(request)) = (page.response_json(), page.request_json())
            else {
                warn!(page = page.page, "Skipping captured page that is not JSON");
                continue;
            };
            let bucket = match request.get("list_type") {
                Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
                Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
                _ => 0,
            };
            let hot_words = strings(request.get("hot_words"));
            let keywords = strings(request.get("keywords"));

            let Some(entries) = response.pointer("/data/note_list").and_then(Value::as_array)
            else {
                debug!(page = page.page, "captured page has no note list");
                continue;
            };

            for entry in entries {
                let Some(note) = NoteEntry::from_value(entry) else {
                    debug!("skipping note entry without id");
                    continue;
                };
                let is_first = seen.insert((note.note_id.clone(), bucket));
                index
                    .buckets
                    .entry(note.note_id.clone())
                    .or_default()
                    .insert(bucket);
                index.occurrences.push(NoteOccurrence {
                    note,
                    bucket,
                    hot_words: hot_words.clone(),
                    keywords: keywords.clone(),
                    response_index,
                    is_first,
                });
            }
        }

        index
    }

    /// Number of distinct buckets a note appeared in
    pub fn bucket_count(&self, note_id: &str) -> usize {
        self.buckets.get(note_id).map_or(0, BTreeSet::len)
    }

    pub fn is_multi_bucket(&self, note_id: &str) -> bool {
        self.bucket_count(note_id) > 1
    }

    /// Ids of notes seen in more than one bucket, sorted
    pub fn multi_bucket_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .buckets
            .iter()
            .filter(|(_, b)| b.len() > 1)
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Stable sort of occurrences by note id
    pub fn sort_by_note_id(&mut self) {
        self.occurrences
            .sort_by(|a, b| a.note.note_id.cmp(&b.note.note_id));
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}
