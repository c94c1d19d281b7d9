//! Persistence traits.
//!
//! `DedupStore` is what the pipeline controller depends on. Leases and
//! topic subscriptions live in the same database but behind their own
//! traits so test doubles only implement what they exercise.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Append-only log of processed message ids.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// True iff `message_id` has been recorded. An empty store is `Ok(false)`.
    async fn has_seen(&self, message_id: i64) -> Result<bool, StoreError>;

    /// Durably record `message_id`. Recording the same id twice is a no-op.
    async fn record(&self, message_id: i64) -> Result<(), StoreError>;

    /// Largest recorded id, or `None` when nothing has been recorded yet.
    async fn max_seen_id(&self) -> Result<Option<i64>, StoreError>;

    /// Number of recorded ids.
    async fn count(&self) -> Result<u64, StoreError>;
}

/// Time-bounded mutual exclusion for passes over one channel.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease for `channel_id` if it is free, expired, or already
    /// held by `holder`. Returns whether `holder` now owns it.
    async fn try_acquire_lease(
        &self,
        channel_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Drop the lease if `holder` owns it.
    async fn release_lease(&self, channel_id: &str, holder: &str) -> Result<(), StoreError>;
}

/// Whether `ensure_subscription` had to create anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    AlreadySubscribed,
}

/// A delivery endpoint attached to a notification topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    pub topic: String,
    pub protocol: String,
    pub endpoint: String,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

/// Subscriber lists for notification topics.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Idempotently attach `endpoint` to `topic`.
    async fn ensure_subscription(
        &self,
        topic: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<SubscriptionState, StoreError>;

    /// All subscriptions of `topic`, oldest first.
    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<TopicSubscription>, StoreError>;
}
