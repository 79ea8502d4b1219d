//! Capture and pagination replay
//!
//! An observed first-page request is classified, decoded and deduplicated,
//! then replayed page by page through the page executor. At most one replay
//! session is active; a newer qualifying request supersedes the running one.
//!
//! - `classifier`: which observed requests qualify
//! - `codec`: request body decoding and repair
//! - `dedup`: fingerprints and the time-bounded registry
//! - `session`: session state machine and cancellation tickets
//! - `replayer`: lazy page sequence of one session
//! - `accumulator`: rolling response buffer in storage
//! - `engine`: wires the above together and answers control messages

pub mod accumulator;
pub mod classifier;
pub mod codec;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod events;
pub mod messages;
pub mod replayer;
pub mod session;
pub mod types;

pub use accumulator::ResultAccumulator;
pub use classifier::{map_request_type, RequestClassifier};
pub use codec::{decode_body, repair_mojibake, DecodeError};
pub use dedup::{fingerprint, is_first_page, DedupRegistry};
pub use engine::{CaptureEngine, CaptureOutcome, SessionOutcome};
pub use error::CaptureError;
pub use events::EngineEvent;
pub use messages::{ControlMessage, ControlResponse};
pub use replayer::{PaginationReplayer, Replay};
pub use session::{SessionError, SessionEvent, SessionManager, SessionState, SessionTicket};
pub use types::{CapturedPage, FirstPageRequest, ObservedRequest, SessionId};
