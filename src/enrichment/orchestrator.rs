//! Secondary enrichment run
//!
//! ```text
//!   NoteIndex ──▶ selection ──▶ valid occurrences ──▶ batches
//!                    │                                  │
//!            project lookups for                for each batch (sequential):
//!            multi-bucket notes                   join_all(enrich_one)
//!                                                 inter-batch delay
//! ```
//!
//! Items of one batch run concurrently; batches run one after another. A
//! detail page missing its content marker aborts the whole run and the
//! records produced so far are kept.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::comments::{fallback_for, summarize, CommentCollector, CommentSummary};
use super::extract::{DetailExtractor, DetailOutcome, ExtractError};
use super::notes::{NoteEntry, NoteIndex, NoteOccurrence};
use super::project::{has_project, ProjectLookup, NO_PROJECT};
use super::selection::{disposition, needs_project, Disposition};
use crate::config::{CaptureConfig, EnrichmentConfig};
use crate::platform::{ContentKind, PageExecutor, PageRequest, RelevanceClassifier, Signer, Verdict};
use crate::util::{jitter, pause};

const DETAIL_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error(
        "Could not read the note detail page {url}; make sure it opens in the browser and loads completely"
    )]
    FatalAbort { url: String },

    #[error("Enrichment run was cancelled")]
    Cancelled,
}

/// One valid note after enrichment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub note: NoteEntry,
    pub note_url: String,
    pub bucket: i64,
    pub hot_words: Vec<String>,
    pub keywords: Vec<String>,
    pub description: String,
    pub tags: String,
    pub relevance: Option<Verdict>,
    pub project_name: String,
    pub comment_summary: Option<CommentSummary>,
}

impl EnrichedRecord {
    /// Relevance score, 0 when unclassified
    pub fn score(&self) -> f64 {
        self.relevance.as_ref().map_or(0.0, |v| v.score)
    }

    pub fn is_relevant(&self) -> bool {
        self.relevance.as_ref().is_some_and(|v| v.is_relevant)
    }

    /// Irrelevant or already attributed to a project
    pub fn is_flagged(&self) -> bool {
        !self.is_relevant() || has_project(&self.project_name)
    }
}

/// Outcome of a run, complete or not
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    /// Sorted by score, highest first
    pub records: Vec<EnrichedRecord>,
    /// Disposition of every occurrence, index-aligned with `NoteIndex::occurrences`
    pub dispositions: Vec<Disposition>,
    pub batches_done: usize,
    pub total_batches: usize,
    pub aborted: Option<EnrichmentError>,
}

impl EnrichmentReport {
    pub fn valid_count(&self) -> usize {
        self.dispositions
            .iter()
            .filter(|d| **d == Disposition::Valid)
            .count()
    }
}

/// Batch size and inter-batch delay of one run.
///
/// Taken from the live capture config when a run starts, so a reloaded
/// `noteDetailBatchSize` / `noteDetailBatchDelay` applies to the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub size: usize,
    pub delay: Duration,
}

impl From<&CaptureConfig> for BatchPlan {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            size: config.effective_batch_size(),
            delay: Duration::from_millis(config.enrichment_batch_delay_ms),
        }
    }
}

/// Receiver of advisory progress
pub trait ProgressSink: Send + Sync {
    fn progress(&self, batch: usize, total_batches: usize, message: &str);

    fn aborted(&self, url: &str, message: &str);
}

/// Progress sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn progress(&self, batch: usize, total_batches: usize, message: &str) {
        info!(batch, total_batches, "{}", message);
    }

    fn aborted(&self, url: &str, message: &str) {
        error!(url, "{}", message);
    }
}

pub struct EnrichmentOrchestrator {
    executor: Arc<dyn PageExecutor>,
    classifier: Option<Arc<dyn RelevanceClassifier>>,
    config: EnrichmentConfig,
    extractor: DetailExtractor,
    projects: ProjectLookup,
    comments: CommentCollector,
}

impl EnrichmentOrchestrator {
    pub fn new(executor: Arc<dyn PageExecutor>, config: EnrichmentConfig) -> Self {
        let projects = ProjectLookup::new(
            Arc::clone(&executor),
            &config.project_lookup_url,
            config.project_window_days,
        );
        let comments = CommentCollector::new(
            Arc::clone(&executor),
            &config.comment_api_base,
            Duration::from_millis(config.comment_page_delay_ms),
        );
        Self {
            extractor: DetailExtractor::new(&config.removed_marker),
            executor,
            classifier: None,
            config,
            projects,
            comments,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RelevanceClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.comments = self.comments.with_signer(signer);
        self
    }

    pub fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    /// Select valid occurrences and enrich them batch by batch
    pub async fn enrich(
        &self,
        index: &NoteIndex,
        plan: BatchPlan,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();

        // Project attribution decides selection for multi-bucket notes
        let mut projects: HashMap<String, String> = HashMap::new();
        for occ in &index.occurrences {
            let id = &occ.note.note_id;
            if needs_project(occ, index.bucket_count(id), &self.config) && !projects.contains_key(id) {
                let name = self.projects.project_name(id).await;
                projects.insert(id.clone(), name);
            }
        }

        report.dispositions = index
            .occurrences
            .iter()
            .map(|occ| {
                let id = &occ.note.note_id;
                disposition(
                    occ,
                    index.bucket_count(id),
                    projects.get(id).map(String::as_str),
                    &self.config,
                )
            })
            .collect();

        let valid: Vec<&NoteOccurrence> = index
            .occurrences
            .iter()
            .zip(&report.dispositions)
            .filter(|(_, d)| **d == Disposition::Valid)
            .map(|(occ, _)| occ)
            .collect();

        let batch_size = plan.size.max(1);
        report.total_batches = valid.len().div_ceil(batch_size);
        info!(
            valid = valid.len(),
            batch_size,
            batches = report.total_batches,
            "Starting enrichment"
        );

        for (i, batch) in valid.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                report.aborted = Some(EnrichmentError::Cancelled);
                break;
            }
            let number = i + 1;
            progress.progress(
                number,
                report.total_batches,
                &format!(
                    "Processing batch {}/{} ({} notes)",
                    number,
                    report.total_batches,
                    batch.len()
                ),
            );

            let results = join_all(
                batch
                    .iter()
                    .map(|occ| self.enrich_one(occ, projects.get(&occ.note.note_id).cloned())),
            )
            .await;

            let mut fatal = None;
            for result in results {
                match result {
                    Ok(record) => report.records.push(record),
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = fatal {
                if let EnrichmentError::FatalAbort { url } = &e {
                    error!("Enrichment aborted at {}", url);
                    progress.aborted(url, &e.to_string());
                }
                report.aborted = Some(e);
                break;
            }
            report.batches_done = number;

            if number < report.total_batches && !plan.delay.is_zero() {
                debug!(delay_ms = plan.delay.as_millis() as u64, "waiting before next batch");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.aborted = Some(EnrichmentError::Cancelled);
                        break;
                    }
                    _ = tokio::time::sleep(plan.delay) => {}
                }
            }
        }

        report
            .records
            .sort_by(|a, b| b.score().total_cmp(&a.score()));
        report
    }

    async fn enrich_one(
        &self,
        occ: &NoteOccurrence,
        project: Option<String>,
    ) -> Result<EnrichedRecord, EnrichmentError> {
        let note = &occ.note;
        let project_name = match project {
            Some(name) => name,
            None => self.projects.project_name(&note.note_id).await,
        };
        let note_url = note.canonical_url(&self.config.note_url_base);

        pause(jitter(
            self.config.detail_jitter_min_ms,
            self.config.detail_jitter_max_ms,
        ))
        .await;

        let mut record = EnrichedRecord {
            note: note.clone(),
            note_url: note_url.clone(),
            bucket: occ.bucket,
            hot_words: occ.hot_words.clone(),
            keywords: occ.keywords.clone(),
            description: String::new(),
            tags: String::new(),
            relevance: None,
            project_name,
            comment_summary: None,
        };

        let request = PageRequest::get(&note_url).with_header("accept", DETAIL_ACCEPT);
        let html = match self.executor.execute(&request).await {
            Ok(response) if response.is_success() => response.body,
            Ok(response) => {
                warn!("Detail page {} returned status {}", note_url, response.status);
                return Ok(record);
            }
            Err(e) => {
                warn!("Detail page {} failed: {}", note_url, e);
                return Ok(record);
            }
        };

        match self.extractor.extract(&html) {
            Ok(DetailOutcome::Removed) => {
                debug!(url = %note_url, "note removed");
                record.relevance = Some(Verdict::fallback("page removed"));
            }
            Err(ExtractError::MarkerMissing) => {
                return Err(EnrichmentError::FatalAbort { url: note_url });
            }
            Ok(DetailOutcome::Extracted { description, tags }) => {
                record.description = description;
                record.tags = tags;
                if let Some(classifier) = &self.classifier {
                    if !record.description.is_empty() || !record.tags.is_empty() {
                        let verdict = classifier
                            .classify(ContentKind::Note, &record.description, &record.tags)
                            .await
                            .unwrap_or_else(|e| {
                                warn!("Classifying note {} failed: {}", note.note_id, e);
                                fallback_for(&e)
                            });
                        record.relevance = Some(verdict);
                    }
                }
            }
        }

        if self.wants_comments(&record) {
            if let Some(classifier) = &self.classifier {
                match self.comments.collect(&note.note_id, &note.xsec_token).await {
                    Ok(lines) if !lines.is_empty() => {
                        record.comment_summary = Some(summarize(&lines, classifier.as_ref()).await);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Collecting comments of {} failed: {}", note.note_id, e),
                }
            }
        }

        Ok(record)
    }

    fn wants_comments(&self, record: &EnrichedRecord) -> bool {
        self.config.analyze_comments
            && record.is_relevant()
            && record.project_name == NO_PROJECT
            && record.note.comment_count() > 0
    }
}
