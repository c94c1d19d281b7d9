//! The message feed abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::SourceError;
use crate::pipeline::types::CandidateMessage;

/// Finite, non-restartable sequence of candidates, oldest first.
pub type CandidateStream =
    Pin<Box<dyn Stream<Item = Result<CandidateMessage, SourceError>> + Send>>;

/// A feed that can be polled for messages newer than a watermark.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Messages with `id > min_id` and `timestamp >= since`, ascending by id.
    ///
    /// An empty stream is a successful fetch.
    async fn fetch_since(
        &self,
        min_id: i64,
        since: DateTime<Utc>,
    ) -> Result<CandidateStream, SourceError>;
}

/// Wrap already-fetched candidates as a [`CandidateStream`].
pub fn stream_of(candidates: Vec<CandidateMessage>) -> CandidateStream {
    Box::pin(futures::stream::iter(candidates.into_iter().map(Ok)))
}
