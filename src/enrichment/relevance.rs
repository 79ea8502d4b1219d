//! Chat-completions relevance classifier
//!
//! Works with any OpenAI-compatible `/chat/completions` endpoint. The model is
//! asked for a bare JSON verdict; fenced or truncated replies are repaired
//! before parsing.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::platform::{ClassifierError, ContentKind, RelevanceClassifier, Verdict};
use crate::util::truncate_str;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "NOTE_HARVEST_API_KEY";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    n: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(rename = "isRelevant", default)]
    is_relevant: bool,
    #[serde(rename = "relevanceScore", default)]
    relevance_score: Option<f64>,
    #[serde(default)]
    reason: String,
}

pub struct ChatCompletionsClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

impl ChatCompletionsClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        info!(
            "Initializing relevance classifier: endpoint={}, model={}",
            config.endpoint, config.model
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        match &api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| ClassifierError::Config(format!("Invalid API key format: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!("No API key provided for {}", config.endpoint),
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn prompt(&self, kind: ContentKind, text: &str, tags: &str) -> String {
        let subject = &self.config.subject;
        match kind {
            ContentKind::Note => format!(
                "Decide whether the content is related to {subject}.\n\
                 Reply with JSON only, in exactly this shape, reason under 50 words:\n\
                 {{\"isRelevant\":boolean,\"relevanceScore\":number between 0 and 1,\"reason\":\"why\"}}\n\n\
                 Tags: {tags}\n\
                 Description: {text}"
            ),
            ContentKind::Comment => format!(
                "Decide whether these comments show the note is a good placement for {subject} advertising. Consider:\n\
                 1. how much the commenters know about and care for the cars\n\
                 2. how positive and knowledgeable the comments are\n\
                 3. the reach and influence of the discussion\n\
                 4. whether it can drive brand exposure\n\n\
                 Reply with JSON only, in exactly this shape, reason under 50 words:\n\
                 {{\"isRelevant\":boolean,\"relevanceScore\":number between 0 and 1,\"reason\":\"why\"}}\n\n\
                 Comments: {text}"
            ),
        }
    }
}

#[async_trait]
impl RelevanceClassifier for ChatCompletionsClassifier {
    async fn classify(
        &self,
        kind: ContentKind,
        text: &str,
        tags: &str,
    ) -> Result<Verdict, ClassifierError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: self.prompt(kind, text, tags),
            }],
            stream: false,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            n: 1,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                message: truncate_str(&message, 200),
            });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Malformed("no choices in response".to_string()))?;
        debug!(?kind, reply = %truncate_str(&content, 120), "classifier replied");

        parse_verdict(&content)
    }
}

/// Parse a model reply into a verdict, repairing common damage first
pub fn parse_verdict(content: &str) -> Result<Verdict, ClassifierError> {
    let repaired = repair_reply(content);
    let raw: RawVerdict = serde_json::from_str(&repaired)
        .map_err(|e| ClassifierError::Malformed(format!("{}: {}", e, truncate_str(content, 120))))?;
    Ok(Verdict::new(
        raw.is_relevant,
        raw.relevance_score.unwrap_or(0.0),
        raw.reason,
    ))
}

/// Strip code fences and leading chatter, and cut trailing text after the
/// last complete object
fn repair_reply(content: &str) -> String {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```json").or_else(|| text.strip_prefix("```")) {
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    if !text.starts_with('{') {
        if let Some(start) = text.find('{') {
            text = &text[start..];
        }
    }
    if !text.ends_with('}') {
        if let Some(end) = text.rfind('}') {
            let candidate = &text[..=end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                text = candidate;
            }
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_reply() {
        let v = parse_verdict(r#"{"isRelevant":true,"relevanceScore":0.8,"reason":"car review"}"#)
            .unwrap();
        assert!(v.is_relevant);
        assert_eq!(v.score, 0.8);
        assert_eq!(v.reason, "car review");
    }

    #[test]
    fn strips_fences_and_trailing_text() {
        let reply = "```json\n{\"isRelevant\":false,\"relevanceScore\":0.1,\"reason\":\"food\"}\n```";
        assert_eq!(parse_verdict(reply).unwrap().reason, "food");

        let reply = "{\"isRelevant\":true,\"relevanceScore\":0.6,\"reason\":\"ok\"} hope this helps";
        assert_eq!(parse_verdict(reply).unwrap().score, 0.6);
    }

    #[test]
    fn skips_leading_chatter() {
        let reply = "Thinking done.\n{\"isRelevant\":true,\"relevanceScore\":2,\"reason\":\"x\"}";
        let v = parse_verdict(reply).unwrap();
        assert_eq!(v.score, 1.0);
    }

    #[test]
    fn unusable_reply_is_malformed() {
        assert!(matches!(
            parse_verdict("I cannot answer that"),
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[test]
    fn prompts_mention_subject_and_content() {
        let classifier = ChatCompletionsClassifier::new(&ClassifierConfig {
            api_key: Some("test".into()),
            ..Default::default()
        })
        .unwrap();
        let prompt = classifier.prompt(ContentKind::Note, "desc text", "#tag");
        assert!(prompt.contains("BMW MINI"));
        assert!(prompt.contains("desc text"));
        assert!(prompt.contains("#tag"));
        let prompt = classifier.prompt(ContentKind::Comment, "alice: nice", "");
        assert!(prompt.contains("alice: nice"));
    }
}
