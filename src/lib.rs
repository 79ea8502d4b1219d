//! note_harvest: capture, replay, enrich and export ranking-list notes
//!
//! - Watches observed API requests and replays every page of a qualifying
//!   paginated query through an authenticated page executor
//! - One capture session at a time; a newer query supersedes the running one
//! - Bounded rolling buffer of captured pages in key/value storage
//! - On-demand enrichment: project attribution, detail page scraping,
//!   relevance classification, comment summaries
//! - Two-sheet workbook export

pub mod capture;
pub mod config;
pub mod enrichment;
pub mod export;
pub mod logging;
pub mod platform;
pub mod util;

pub use capture::{CaptureEngine, CapturedPage, ControlMessage, ControlResponse, ObservedRequest};
pub use config::Config;
