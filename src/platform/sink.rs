//! Workbook delivery
//!
//! The browser build hands the workbook to the download manager; here the
//! sink decides where a finished workbook ends up.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::export::{ExportError, Workbook};

/// Destination for finished workbooks
pub trait WorkbookSink: Send + Sync {
    /// Deliver `workbook` under `file_name`, returning where it went
    fn deliver(&self, file_name: &str, workbook: &Workbook) -> Result<String, ExportError>;
}

/// Writes workbooks as pretty JSON next to the requested name
#[derive(Debug, Clone)]
pub struct JsonWorkbookSink {
    dir: PathBuf,
}

impl JsonWorkbookSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl WorkbookSink for JsonWorkbookSink {
    fn deliver(&self, file_name: &str, workbook: &Workbook) -> Result<String, ExportError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ExportError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(file_name).with_extension("json");
        let json = serde_json::to_vec_pretty(workbook)?;
        std::fs::write(&path, json).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;

        info!("Workbook written to {}", path.display());
        Ok(path.display().to_string())
    }
}
