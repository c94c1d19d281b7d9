//! Pipeline controller: one dedup-and-filter pass over the feed.
//!
//! **Core invariant: a message id is recorded before it is translated.**
//! A crash after recording loses that message rather than notifying for it
//! twice on the next run.
//!
//! Flow per pass:
//! 1. Resume lookup → `max_seen_id()` (0 when the store is empty)
//! 2. Fetch → candidates above the resume point, not older than the look-back
//! 3. Per candidate, ascending by id: dedup check → record → translate →
//!    filter → notify
//!
//! Any error aborts the rest of the pass. Nothing is retried here; the next
//! scheduled pass resumes from whatever was recorded.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use tracing::{debug, error, info, warn};

use crate::channels::MessageSource;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::notify::Notifier;
use crate::pipeline::filter::{FilterOutcome, PatternFilter};
use crate::pipeline::types::{CandidateMessage, PassReport, PassSummary};
use crate::store::DedupStore;
use crate::translate::Translator;

/// What happened to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Already recorded by an earlier pass.
    Duplicate,
    /// Recorded and translated; the filter rejected it.
    Filtered(FilterOutcome),
    /// Recorded, matched both patterns, notification published.
    Notified,
}

/// Orchestrates one pass. Dependencies are injected once at startup and
/// held for the process lifetime.
pub struct PipelineController {
    store: Arc<dyn DedupStore>,
    source: Arc<dyn MessageSource>,
    translator: Arc<dyn Translator>,
    notifier: Arc<dyn Notifier>,
    filter: PatternFilter,
    config: PipelineConfig,
}

impl PipelineController {
    pub fn new(
        store: Arc<dyn DedupStore>,
        source: Arc<dyn MessageSource>,
        translator: Arc<dyn Translator>,
        notifier: Arc<dyn Notifier>,
        filter: PatternFilter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            source,
            translator,
            notifier,
            filter,
            config,
        }
    }

    /// Run a pass as of now.
    pub async fn run_pass(&self) -> PassReport {
        self.run_pass_at(Utc::now()).await
    }

    /// Run a pass with an explicit clock, reporting instead of returning errors.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> PassReport {
        match self.try_run_pass_at(now).await {
            Ok(summary) => {
                info!(
                    resume_from = summary.resume_from,
                    fetched = summary.fetched,
                    skipped = summary.skipped,
                    recorded = summary.recorded,
                    notified = summary.notified,
                    "Pass complete"
                );
                PassReport::success(summary, now)
            }
            Err(e) => {
                error!(error = %e, "Pass failed");
                PassReport::failure(e.to_string(), now)
            }
        }
    }

    /// The fallible pass. Stops at the first error.
    pub async fn try_run_pass_at(&self, now: DateTime<Utc>) -> Result<PassSummary, PipelineError> {
        // RESUME_LOOKUP
        let resume_from = self
            .store
            .max_seen_id()
            .await
            .map_err(PipelineError::ResumeLookup)?
            .unwrap_or(0);

        // FETCH
        let since = TimeDelta::from_std(self.config.lookback)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or(PipelineError::Lookback(self.config.lookback))?;
        debug!(resume_from, since = %since, source = self.source.name(), "Fetching candidates");
        let mut candidates: Vec<CandidateMessage> = self
            .source
            .fetch_since(resume_from, since)
            .await?
            .try_collect()
            .await?;

        // The resume point is "highest id recorded", so a higher id must
        // never be recorded while a lower one is still pending.
        candidates.sort_by_key(|c| c.id);

        let mut summary = PassSummary {
            resume_from,
            fetched: candidates.len(),
            ..PassSummary::default()
        };

        if candidates.is_empty() {
            debug!("No new messages");
            return Ok(summary);
        }

        for candidate in &candidates {
            match self.process_candidate(candidate).await? {
                CandidateOutcome::Duplicate => summary.skipped += 1,
                CandidateOutcome::Filtered(_) => {
                    summary.recorded += 1;
                    summary.last_id = Some(candidate.id);
                }
                CandidateOutcome::Notified => {
                    summary.recorded += 1;
                    summary.notified += 1;
                    summary.last_id = Some(candidate.id);
                }
            }
        }

        Ok(summary)
    }

    /// DEDUP_CHECK → RECORD → TRANSLATE → FILTER → NOTIFY for one message.
    pub async fn process_candidate(
        &self,
        candidate: &CandidateMessage,
    ) -> Result<CandidateOutcome, PipelineError> {
        let message_id = candidate.id;

        if self
            .store
            .has_seen(message_id)
            .await
            .map_err(|source| PipelineError::DedupCheck { message_id, source })?
        {
            debug!(message_id, "Already processed, skipping");
            return Ok(CandidateOutcome::Duplicate);
        }

        self.store
            .record(message_id)
            .await
            .map_err(|source| PipelineError::Record { message_id, source })?;

        let translated = self
            .translator
            .translate(
                &candidate.text,
                &self.config.source_lang,
                &self.config.target_lang,
            )
            .await
            .map_err(|source| {
                warn!(
                    message_id,
                    "Translation failed after recording; message will not be retried"
                );
                PipelineError::Translate { message_id, source }
            })?;
        info!(message_id, translated = %translated, "Translated message");

        let outcome = self.filter.evaluate(&translated);
        if outcome != FilterOutcome::Matched {
            debug!(message_id, outcome = outcome.label(), "Message filtered out");
            return Ok(CandidateOutcome::Filtered(outcome));
        }

        self.notifier
            .notify(&self.config.subject, &translated)
            .await
            .map_err(|source| PipelineError::Notify { message_id, source })?;
        info!(message_id, subject = %self.config.subject, "Notification sent");

        Ok(CandidateOutcome::Notified)
    }
}
