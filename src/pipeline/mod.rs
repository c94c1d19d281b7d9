//! Dedup-and-filter pipeline.
//!
//! Every pass flows through:
//! 1. `DedupStore::max_seen_id()`: derive the resume point
//! 2. `MessageSource::fetch_since()`: channel-specific I/O
//! 3. `PipelineController::process_candidate()`: dedup, record, translate
//! 4. `PatternFilter::evaluate()`: two case-insensitive patterns, ANDed
//! 5. `Notifier::notify()`: only for messages matching both patterns

pub mod controller;
pub mod filter;
pub mod types;

pub use controller::{CandidateOutcome, PipelineController};
pub use filter::{FilterOutcome, PatternFilter};
pub use types::{CandidateMessage, PassReport, PassStatus, PassSummary};
