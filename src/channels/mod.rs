//! Message feeds the pipeline polls.

pub mod source;
pub mod telegram;

pub use source::{CandidateStream, MessageSource, stream_of};
pub use telegram::TelegramSource;
