//! Detail page extraction

use scraper::{Html, Selector};
use thiserror::Error;

/// Result of scanning one detail page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailOutcome {
    Extracted { description: String, tags: String },
    /// The site reports the note no longer exists
    Removed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// Neither the content marker nor the removed-page marker is present
    #[error("description marker not found in detail markup")]
    MarkerMissing,
}

pub struct DetailExtractor {
    removed_marker: String,
    desc: Selector,
    desc_spans: Selector,
    tags: Selector,
}

impl DetailExtractor {
    pub fn new(removed_marker: impl Into<String>) -> Self {
        Self {
            removed_marker: removed_marker.into(),
            desc: selector("#detail-desc .note-text"),
            desc_spans: selector("span:not([class])"),
            tags: selector("a#hash-tag"),
        }
    }

    pub fn extract(&self, html: &str) -> Result<DetailOutcome, ExtractError> {
        if !self.removed_marker.is_empty() && html.contains(&self.removed_marker) {
            return Ok(DetailOutcome::Removed);
        }

        let document = Html::parse_document(html);
        let mut blocks = document.select(&self.desc).peekable();
        if blocks.peek().is_none() {
            return Err(ExtractError::MarkerMissing);
        }

        let mut description = String::new();
        for block in blocks {
            for span in block.select(&self.desc_spans) {
                description.extend(span.text().flat_map(|t| t.chars()).filter(|c| !c.is_whitespace()));
            }
        }

        let tags: Vec<String> = document
            .select(&self.tags)
            .map(|a| a.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(DetailOutcome::Extracted {
            description,
            tags: tags.join("、"),
        })
    }
}

fn selector(css: &'static str) -> Selector {
    // Literal selectors above are known-valid.
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css}: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOVED: &str = "你访问的页面不见了";

    #[test]
    fn extracts_description_and_tags() {
        let html = r##"<html><body>
            <div id="detail-desc" class="desc">
              <span class="note-text">
                <span>今天 提车</span><span>MINI Cooper</span>
                <a id="hash-tag" class="tag">#MINI</a>
                <a id="hash-tag" class="tag">#提车日记</a>
              </span>
            </div></body></html>"##;
        let outcome = DetailExtractor::new(REMOVED).extract(html).unwrap();
        assert_eq!(
            outcome,
            DetailOutcome::Extracted {
                description: "今天提车MINICooper".into(),
                tags: "#MINI、#提车日记".into(),
            }
        );
    }

    #[test]
    fn removed_page_is_not_an_error() {
        let html = format!("<html><body><p>{}</p></body></html>", REMOVED);
        assert_eq!(
            DetailExtractor::new(REMOVED).extract(&html),
            Ok(DetailOutcome::Removed)
        );
    }

    #[test]
    fn missing_marker_is_reported() {
        let html = "<html><body><div id='app'>login required</div></body></html>";
        assert_eq!(
            DetailExtractor::new(REMOVED).extract(html),
            Err(ExtractError::MarkerMissing)
        );
    }
}
