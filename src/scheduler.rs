//! Pass scheduling.
//!
//! `PassRunner` wraps a controller with a store-backed lease keyed by
//! channel id, so overlapping invocations (a slow pass still running when
//! the next tick fires, or two processes pointed at the same database)
//! never process the same channel concurrently.
//!
//! `spawn_schedule` drives the runner from a cron expression. A failed pass
//! is logged and the loop keeps going; the next tick is the retry.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ConfigError, PipelineError};
use crate::pipeline::{PassReport, PassStatus, PipelineController};
use crate::store::LeaseStore;

/// Runs passes for one channel under a lease.
pub struct PassRunner {
    controller: Arc<PipelineController>,
    leases: Arc<dyn LeaseStore>,
    channel_id: String,
    holder: String,
    lease_ttl: Duration,
}

impl PassRunner {
    pub fn new(
        controller: Arc<PipelineController>,
        leases: Arc<dyn LeaseStore>,
        channel_id: impl Into<String>,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            controller,
            leases,
            channel_id: channel_id.into(),
            holder: Uuid::new_v4().to_string(),
            lease_ttl,
        }
    }

    /// Lease holder id of this process.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Run one pass if the lease is free.
    pub async fn run_once(&self) -> PassReport {
        let started = Utc::now();

        match self
            .leases
            .try_acquire_lease(&self.channel_id, &self.holder, self.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(channel = %self.channel_id, "Another pass holds the lease, skipping");
                return PassReport::skipped("lease held by another pass", started);
            }
            Err(e) => {
                let e = PipelineError::Lease(e);
                error!(error = %e, "Could not acquire pass lease");
                return PassReport::failure(e.to_string(), started);
            }
        }

        let report = self.controller.run_pass_at(started).await;

        // An unreleased lease expires after its TTL
        if let Err(e) = self.leases.release_lease(&self.channel_id, &self.holder).await {
            warn!(error = %e, channel = %self.channel_id, "Failed to release pass lease");
        }

        report
    }
}

fn parse_schedule(schedule: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidSchedule {
        schedule: schedule.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a cron expression and compute the next fire time from now.
pub fn next_fire(schedule: &str) -> Result<Option<DateTime<Utc>>, ConfigError> {
    Ok(parse_schedule(schedule)?.upcoming(Utc).next())
}

/// Spawn a task that runs a pass at every fire time of `schedule`.
pub fn spawn_schedule(
    runner: Arc<PassRunner>,
    schedule: &str,
) -> Result<JoinHandle<()>, ConfigError> {
    let parsed = parse_schedule(schedule)?;
    let expression = schedule.to_string();

    Ok(tokio::spawn(async move {
        info!(schedule = %expression, "Scheduler started");

        loop {
            let Some(next) = parsed.upcoming(Utc).next() else {
                info!(schedule = %expression, "Schedule has no upcoming fire times, stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Next pass scheduled");
            tokio::time::sleep(wait).await;

            let report = runner.run_once().await;
            match report.status {
                PassStatus::Success | PassStatus::Skipped => {
                    debug!(
                        status = report.status.label(),
                        detail = %report.detail,
                        "Scheduled pass finished"
                    );
                }
                PassStatus::Failure => {
                    warn!(
                        detail = %report.detail,
                        "Scheduled pass failed, will retry on next tick"
                    );
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{CandidateStream, MessageSource, stream_of};
    use crate::config::PipelineConfig;
    use crate::error::{NotifyError, SourceError, StoreError, TranslationError};
    use crate::notify::Notifier;
    use crate::pipeline::PatternFilter;
    use crate::store::{LibSqlStore, SubscriptionState};
    use crate::translate::Translator;

    struct EmptySource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MessageSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }

        async fn fetch_since(
            &self,
            _min_id: i64,
            _since: DateTime<Utc>,
        ) -> Result<CandidateStream, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(stream_of(Vec::new()))
        }
    }

    struct EchoTranslator;

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate(
            &self,
            text: &str,
            _: &str,
            _: &str,
        ) -> Result<String, TranslationError> {
            Ok(text.to_string())
        }
    }

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify(&self, _: &str, _: &str) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn ensure_subscribed(&self, _: &str) -> Result<SubscriptionState, NotifyError> {
            Ok(SubscriptionState::Created)
        }
    }

    struct BrokenLeases;

    #[async_trait]
    impl LeaseStore for BrokenLeases {
        async fn try_acquire_lease(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Connection("database is locked".into()))
        }

        async fn release_lease(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn setup() -> (Arc<LibSqlStore>, Arc<EmptySource>, Arc<PipelineController>) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let source = Arc::new(EmptySource {
            fetches: AtomicUsize::new(0),
        });
        let controller = Arc::new(PipelineController::new(
            store.clone(),
            source.clone(),
            Arc::new(EchoTranslator),
            Arc::new(NoopNotifier),
            PatternFilter::new("a", "b").unwrap(),
            PipelineConfig::default(),
        ));
        (store, source, controller)
    }

    #[tokio::test]
    async fn run_once_takes_and_releases_lease() {
        let (store, source, controller) = setup().await;
        let runner = PassRunner::new(controller, store.clone(), "@chan", Duration::from_secs(60));

        let report = runner.run_once().await;

        assert_eq!(report.status, PassStatus::Success);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        // Released: another holder can take it now
        assert!(
            store
                .try_acquire_lease("@chan", "other", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn run_once_skips_when_lease_held() {
        let (store, source, controller) = setup().await;
        store
            .try_acquire_lease("@chan", "other-process", Duration::from_secs(60))
            .await
            .unwrap();
        let runner = PassRunner::new(controller, store.clone(), "@chan", Duration::from_secs(60));

        let report = runner.run_once().await;

        assert_eq!(report.status, PassStatus::Skipped);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lease_error_is_a_failure() {
        let (_store, source, controller) = setup().await;
        let runner = PassRunner::new(
            controller,
            Arc::new(BrokenLeases),
            "@chan",
            Duration::from_secs(60),
        );

        let report = runner.run_once().await;

        assert_eq!(report.status, PassStatus::Failure);
        assert!(report.detail.starts_with("Lease error"));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn holders_are_unique() {
        let (store, _source, controller) = setup().await;
        let a = PassRunner::new(
            controller.clone(),
            store.clone(),
            "@chan",
            Duration::from_secs(60),
        );
        let b = PassRunner::new(controller, store, "@chan", Duration::from_secs(60));
        assert_ne!(a.holder(), b.holder());
    }

    #[test]
    fn next_fire_valid() {
        let next = next_fire("* * * * * *").unwrap();
        assert!(next.is_some());
    }

    #[test]
    fn next_fire_invalid() {
        let result = next_fire("not a cron");
        assert!(matches!(result, Err(ConfigError::InvalidSchedule { .. })));
    }

    #[tokio::test]
    async fn schedule_runs_passes() {
        let (store, source, controller) = setup().await;
        let runner = Arc::new(PassRunner::new(controller, store, "@chan", Duration::from_secs(60)));

        let handle = spawn_schedule(runner, "* * * * * *").unwrap();
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while source.fetches.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        handle.abort();

        assert!(waited.is_ok(), "no pass ran within 5s");
    }

    #[tokio::test]
    async fn spawn_schedule_rejects_bad_expression() {
        let (store, _source, controller) = setup().await;
        let runner = Arc::new(PassRunner::new(controller, store, "@chan", Duration::from_secs(60)));
        assert!(spawn_schedule(runner, "whenever").is_err());
    }
}
