//! Host platform capabilities
//!
//! The pipeline consumes the host only through these interfaces:
//! - `PageExecutor`: authenticated network I/O "as the page"
//! - `KeyValueStore`: persistent local state (`captureConfig`, `isCapturing`, `responses`)
//! - `Notifier`: user-visible notifications
//! - `RelevanceClassifier`: external content classification
//! - `Signer`: signature headers for protected endpoints
//! - `WorkbookSink`: delivery of the exported workbook

pub mod executor;
pub mod notify;
pub mod relevance;
pub mod signer;
pub mod sink;
pub mod store;

pub use executor::{ExecutorError, HttpPageExecutor, PageExecutor, PageRequest, PageResponse};
pub use notify::{CollectingNotifier, LogNotifier, Notification, Notifier};
pub use relevance::{ClassifierError, ContentKind, RelevanceClassifier, Verdict};
pub use signer::{trace_id, SignError, SignedHeaders, Signer};
pub use sink::{JsonWorkbookSink, WorkbookSink};
pub use store::{
    JsonFileStore, KeyValueStore, KeyValueStoreExt, MemoryStore, StoreError, CAPTURE_CONFIG_KEY,
    IS_CAPTURING_KEY, RESPONSES_KEY,
};
