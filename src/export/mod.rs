//! Workbook export
//!
//! Turns the captured buffer into a two-sheet workbook, optionally running
//! secondary enrichment first, and hands it to a `WorkbookSink`.

pub mod workbook;

pub use workbook::{
    build_workbook, Column, Row, RowStyle, Sheet, Workbook, COLUMNS, MULTI_BUCKET_PALETTE,
    NOTES_SHEET, VALID_SHEET,
};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::capture::CapturedPage;
use crate::enrichment::{BatchPlan, EnrichmentOrchestrator, NoteIndex, ProgressSink};
use crate::platform::{StoreError, WorkbookSink};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Export already running")]
    Busy,

    #[error("No exporter configured")]
    Unavailable,
}

/// `note_list_<YYYY-MM-DD>.xlsx`
pub fn file_name(date: NaiveDate) -> String {
    format!("note_list_{}.xlsx", date.format("%Y-%m-%d"))
}

/// What an export produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    /// Logical workbook name, `note_list_<YYYY-MM-DD>.xlsx`
    pub file_name: String,
    /// Where the sink actually put it; a sink may store another format
    /// under a different extension (`JsonWorkbookSink` writes `.json`)
    pub location: String,
    /// Note occurrences listed on the Notes sheet
    pub notes: usize,
    /// Records on the Valid sheet, absent without enrichment
    pub valid_records: Option<usize>,
    /// Set when enrichment stopped early; partial results were still exported
    pub aborted: Option<String>,
}

pub struct Exporter {
    orchestrator: EnrichmentOrchestrator,
    sink: Arc<dyn WorkbookSink>,
}

impl Exporter {
    pub fn new(orchestrator: EnrichmentOrchestrator, sink: Arc<dyn WorkbookSink>) -> Self {
        Self { orchestrator, sink }
    }

    pub async fn process_and_export(
        &self,
        pages: &[CapturedPage],
        need_process: bool,
        plan: BatchPlan,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ExportSummary, ExportError> {
        let index = NoteIndex::from_pages(pages);
        info!(
            pages = pages.len(),
            notes = index.len(),
            need_process,
            "Exporting captured notes"
        );

        let report = if need_process {
            Some(self.orchestrator.enrich(&index, plan, cancel, progress).await)
        } else {
            None
        };

        let workbook = build_workbook(&index, report.as_ref(), self.orchestrator.config());
        let file_name = file_name(Local::now().date_naive());
        let location = self.sink.deliver(&file_name, &workbook)?;

        Ok(ExportSummary {
            file_name,
            location,
            notes: index.len(),
            valid_records: report.as_ref().map(|r| r.records.len()),
            aborted: report.and_then(|r| r.aborted).map(|e| e.to_string()),
        })
    }
}
