//! Comment collection and summary
//!
//! Top-level comments are paged by cursor. Replies embedded in each comment
//! are taken as-is; further reply pages need signed requests and are only
//! fetched when a `Signer` is available.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::platform::{
    trace_id, ClassifierError, ContentKind, ExecutorError, PageExecutor, PageRequest,
    RelevanceClassifier, Signer, Verdict,
};
use crate::util::pause;

/// Upper bound on pages fetched per cursor chain
const MAX_PAGES: usize = 100;

const IMAGE_FORMATS: &str = "jpg,webp,avif";

/// Flattened comment thread classified as a whole
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentSummary {
    pub count: usize,
    pub text: String,
    pub relevance: Verdict,
}

pub struct CommentCollector {
    executor: Arc<dyn PageExecutor>,
    signer: Option<Arc<dyn Signer>>,
    api_base: String,
    page_delay: Duration,
}

impl CommentCollector {
    pub fn new(
        executor: Arc<dyn PageExecutor>,
        api_base: impl Into<String>,
        page_delay: Duration,
    ) -> Self {
        Self {
            executor,
            signer: None,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            page_delay,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// All comment lines of a note, "nick: text" for comments and
    /// "nick -> target: text" for replies
    pub async fn collect(&self, note_id: &str, xsec_token: &str) -> Result<Vec<String>, ExecutorError> {
        let mut lines = Vec::new();
        let mut cursor = String::new();

        for _ in 0..MAX_PAGES {
            let url = format!(
                "{}/api/sns/web/v2/comment/page?note_id={}&cursor={}&top_comment_id=&image_formats={}&xsec_token={}",
                self.api_base, note_id, cursor, IMAGE_FORMATS, xsec_token
            );
            let response = self.executor.fetch_json(&PageRequest::get(url)).await?;
            let Some(data) = response.get("data") else {
                warn!(note_id, "comment page without data, stopping");
                break;
            };

            for comment in data.get("comments").and_then(Value::as_array).into_iter().flatten() {
                if let Some(line) = comment_line(comment) {
                    lines.push(line);
                }
                for reply in comment
                    .get("sub_comments")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    lines.extend(reply_line(reply));
                }
                if comment.get("sub_comment_has_more").and_then(Value::as_bool) == Some(true) {
                    self.collect_replies(note_id, xsec_token, comment, &mut lines).await;
                }
            }

            let next = data.get("cursor").and_then(Value::as_str).unwrap_or_default();
            let has_more = data.get("has_more").and_then(Value::as_bool) == Some(true);
            if !has_more || next.is_empty() || next == cursor {
                break;
            }
            cursor = next.to_string();
            pause(self.page_delay).await;
        }

        debug!(note_id, comments = lines.len(), "comments collected");
        Ok(lines)
    }

    async fn collect_replies(
        &self,
        note_id: &str,
        xsec_token: &str,
        comment: &Value,
        lines: &mut Vec<String>,
    ) {
        let Some(signer) = &self.signer else {
            debug!(note_id, "no signer, skipping extra reply pages");
            return;
        };
        let Some(root_id) = comment.get("id").and_then(Value::as_str) else {
            return;
        };
        let mut cursor = comment
            .get("sub_comment_cursor")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        for _ in 0..MAX_PAGES {
            let path = format!(
                "/api/sns/web/v2/comment/sub/page?note_id={}&root_comment_id={}&num=10&cursor={}&image_formats={}&top_comment_id=&xsec_token={}",
                note_id, root_id, cursor, IMAGE_FORMATS, xsec_token
            );
            let signed = match signer.sign(&path) {
                Ok(signed) => signed,
                Err(e) => {
                    warn!("Reply page for comment {} not signed: {}", root_id, e);
                    return;
                }
            };
            let request = PageRequest::get(format!("{}{}", self.api_base, path))
                .with_header("x-s", signed.xs)
                .with_header("x-t", signed.xt)
                .with_header("x-b3-traceid", trace_id());

            let data = match self.executor.fetch_json(&request).await {
                Ok(mut response) => match response.get_mut("data") {
                    Some(data) => data.take(),
                    None => break,
                },
                Err(e) => {
                    warn!("Reply page for comment {} failed: {}", root_id, e);
                    break;
                }
            };
            for reply in data.get("comments").and_then(Value::as_array).into_iter().flatten() {
                lines.extend(reply_line(reply));
            }

            let next = data.get("cursor").and_then(Value::as_str).unwrap_or_default();
            let has_more = data.get("has_more").and_then(Value::as_bool) == Some(true);
            if !has_more || next.is_empty() || next == cursor {
                break;
            }
            cursor = next.to_string();
            pause(self.page_delay).await;
        }
    }
}

fn nickname(value: &Value) -> Option<&str> {
    value.pointer("/user_info/nickname").and_then(Value::as_str)
}

fn comment_line(comment: &Value) -> Option<String> {
    let nick = nickname(comment)?;
    let content = comment.get("content").and_then(Value::as_str).unwrap_or_default();
    Some(format!("{}: {}", nick, content))
}

fn reply_line(reply: &Value) -> Option<String> {
    let nick = nickname(reply)?;
    let target = reply.get("target_comment").and_then(nickname)?;
    let content = reply.get("content").and_then(Value::as_str).unwrap_or_default();
    Some(format!("{} -> {}: {}", nick, target, content))
}

/// Classify the flattened thread as one text
pub async fn summarize(lines: &[String], classifier: &dyn RelevanceClassifier) -> CommentSummary {
    let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    let relevance = match classifier.classify(ContentKind::Comment, &text, "").await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!("Comment classification failed: {}", e);
            fallback_for(&e)
        }
    };
    CommentSummary {
        count: lines.len(),
        text,
        relevance,
    }
}

pub(crate) fn fallback_for(error: &ClassifierError) -> Verdict {
    match error {
        ClassifierError::Malformed(_) => Verdict::fallback("unparseable classifier reply"),
        _ => Verdict::fallback("classification failed"),
    }
}
