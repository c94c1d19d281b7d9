//! Shared types for the dedup-and-filter pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Candidate message ───────────────────────────────────────────────

/// A message fetched from the feed, consumed once by a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMessage {
    /// Feed-assigned id, increasing in feed order.
    pub id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl CandidateMessage {
    pub fn new(id: i64, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            text: text.into(),
            timestamp,
        }
    }
}

// ── Pass results ────────────────────────────────────────────────────

/// Counters for a pass that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Resume point used for the fetch (0 on an empty store).
    pub resume_from: i64,
    /// Candidates returned by the feed.
    pub fetched: usize,
    /// Candidates already recorded (overlapping fetch windows).
    pub skipped: usize,
    /// Ids newly written to the dedup store.
    pub recorded: usize,
    /// Notifications published.
    pub notified: usize,
    /// Highest id recorded during this pass, if any.
    pub last_id: Option<i64>,
}

impl PassSummary {
    fn describe(&self) -> String {
        format!(
            "resume_from={} fetched={} skipped={} recorded={} notified={}",
            self.resume_from, self.fetched, self.skipped, self.recorded, self.notified
        )
    }
}

/// Outcome of a pass as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Success,
    Failure,
    /// Another holder owns the pass lease; nothing was done.
    Skipped,
}

impl PassStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

/// `{status, detail}` result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub status: PassStatus,
    pub detail: String,
    /// Counters when the pass completed; `None` on failure or skip.
    pub summary: Option<PassSummary>,
    pub started_at: DateTime<Utc>,
}

impl PassReport {
    pub fn success(summary: PassSummary, started_at: DateTime<Utc>) -> Self {
        Self {
            status: PassStatus::Success,
            detail: summary.describe(),
            summary: Some(summary),
            started_at,
        }
    }

    pub fn failure(detail: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            status: PassStatus::Failure,
            detail: detail.into(),
            summary: None,
            started_at,
        }
    }

    pub fn skipped(detail: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            status: PassStatus::Skipped,
            detail: detail.into(),
            summary: None,
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_detail_lists_counters() {
        let summary = PassSummary {
            resume_from: 100,
            fetched: 3,
            skipped: 1,
            recorded: 2,
            notified: 1,
            last_id: Some(103),
        };
        let report = PassReport::success(summary.clone(), Utc::now());
        assert_eq!(report.status, PassStatus::Success);
        assert_eq!(
            report.detail,
            "resume_from=100 fetched=3 skipped=1 recorded=2 notified=1"
        );
        assert_eq!(report.summary, Some(summary));
    }

    #[test]
    fn failure_has_no_summary() {
        let report = PassReport::failure("Fetch failed: boom", Utc::now());
        assert!(report.status.is_failure());
        assert!(report.summary.is_none());
        assert_eq!(report.detail, "Fetch failed: boom");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&PassStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
        assert_eq!(PassStatus::Failure.label(), "failure");
    }
}
