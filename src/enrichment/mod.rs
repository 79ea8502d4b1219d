//! Secondary enrichment
//!
//! On-demand pass over the captured buffer:
//! - `notes`: parse note entries out of captured list pages
//! - `selection`: decide which occurrence of a note is valid
//! - `project`: project attribution lookup
//! - `extract`: description and tags from the note detail page
//! - `relevance`: chat-completions relevance classifier
//! - `comments`: optional comment thread summary
//! - `orchestrator`: batched run with fail-fast abort

pub mod comments;
pub mod extract;
pub mod notes;
pub mod orchestrator;
pub mod project;
pub mod relevance;
pub mod selection;

pub use comments::{CommentCollector, CommentSummary};
pub use extract::{DetailExtractor, DetailOutcome, ExtractError};
pub use notes::{NoteEntry, NoteIndex, NoteKind, NoteOccurrence};
pub use orchestrator::{
    BatchPlan, EnrichedRecord, EnrichmentError, EnrichmentOrchestrator, EnrichmentReport, LogProgress,
    ProgressSink,
};
pub use project::{has_project, lookup_window, ProjectLookup, NO_PROJECT};
pub use relevance::{parse_verdict, ChatCompletionsClassifier, API_KEY_ENV};
pub use selection::{disposition, Disposition};
