//! libSQL backend: implements the dedup, lease and subscription stores.
//!
//! Supports local file and in-memory databases. Every write is a
//! single-row upsert; nothing here needs a multi-statement transaction.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{
    DedupStore, LeaseStore, SubscriptionState, SubscriptionStore, TopicSubscription,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        info!(path = %path.display(), "Dedup store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create tables if missing. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-value query and hand back the raw value of the first row.
    async fn query_scalar(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| StoreError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get_value(0)
                .map(Some)
                .map_err(|e| StoreError::Query(format!("{op} row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamps so stored values compare correctly as text.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_subscription(row: &libsql::Row) -> Result<TopicSubscription, libsql::Error> {
    let confirmed: i64 = row.get(3)?;
    let created_str: String = row.get(4)?;
    Ok(TopicSubscription {
        topic: row.get(0)?,
        protocol: row.get(1)?,
        endpoint: row.get(2)?,
        confirmed: confirmed != 0,
        created_at: parse_datetime(&created_str),
    })
}

// ── Dedup store ─────────────────────────────────────────────────────

#[async_trait]
impl DedupStore for LibSqlStore {
    async fn has_seen(&self, message_id: i64) -> Result<bool, StoreError> {
        let found = self
            .query_scalar(
                "has_seen",
                "SELECT 1 FROM processed_messages
                 WHERE message_id_str = ?1 AND message_id = ?2 LIMIT 1",
                params![message_id.to_string(), message_id],
            )
            .await?;
        Ok(found.is_some())
    }

    async fn record(&self, message_id: i64) -> Result<(), StoreError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO processed_messages (message_id_str, message_id, recorded_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (message_id_str, message_id) DO NOTHING",
                params![
                    message_id.to_string(),
                    message_id,
                    format_timestamp(Utc::now())
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("record: {e}")))?;

        if inserted == 0 {
            debug!(message_id, "Message already recorded, insert ignored");
        } else {
            debug!(message_id, "Message recorded");
        }
        Ok(())
    }

    async fn max_seen_id(&self) -> Result<Option<i64>, StoreError> {
        // Served by idx_processed_messages_id. MAX over an empty table is NULL.
        let value = self
            .query_scalar(
                "max_seen_id",
                "SELECT MAX(message_id) FROM processed_messages",
                (),
            )
            .await?;

        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(id)) => Ok(Some(id)),
            Some(other) => Err(StoreError::Query(format!(
                "max_seen_id: unexpected value {other:?}"
            ))),
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let value = self
            .query_scalar("count", "SELECT COUNT(*) FROM processed_messages", ())
            .await?;
        match value {
            Some(Value::Integer(n)) => Ok(n.max(0) as u64),
            _ => Ok(0),
        }
    }
}

// ── Leases ──────────────────────────────────────────────────────────

#[async_trait]
impl LeaseStore for LibSqlStore {
    async fn try_acquire_lease(
        &self,
        channel_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let expires_at = now + TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(1));

        let changed = self
            .conn()
            .execute(
                "INSERT INTO pass_leases (channel_id, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (channel_id) DO UPDATE
                    SET holder = excluded.holder, expires_at = excluded.expires_at
                    WHERE pass_leases.expires_at <= ?4 OR pass_leases.holder = excluded.holder",
                params![
                    channel_id,
                    holder,
                    format_timestamp(expires_at),
                    format_timestamp(now)
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("try_acquire_lease: {e}")))?;

        let acquired = changed > 0;
        debug!(channel_id, holder, acquired, "Lease acquisition attempted");
        Ok(acquired)
    }

    async fn release_lease(&self, channel_id: &str, holder: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "DELETE FROM pass_leases WHERE channel_id = ?1 AND holder = ?2",
                params![channel_id, holder],
            )
            .await
            .map_err(|e| StoreError::Query(format!("release_lease: {e}")))?;
        debug!(channel_id, holder, "Lease released");
        Ok(())
    }
}

// ── Topic subscriptions ─────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for LibSqlStore {
    async fn ensure_subscription(
        &self,
        topic: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<SubscriptionState, StoreError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO topic_subscriptions (topic, protocol, endpoint, confirmed, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (topic, protocol, endpoint) DO NOTHING",
                params![topic, protocol, endpoint, format_timestamp(Utc::now())],
            )
            .await
            .map_err(|e| StoreError::Query(format!("ensure_subscription: {e}")))?;

        Ok(if inserted > 0 {
            SubscriptionState::Created
        } else {
            SubscriptionState::AlreadySubscribed
        })
    }

    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<TopicSubscription>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT topic, protocol, endpoint, confirmed, created_at
                 FROM topic_subscriptions WHERE topic = ?1
                 ORDER BY created_at ASC, endpoint ASC",
                params![topic],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_subscriptions: {e}")))?;

        let mut subscriptions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_subscriptions: {e}")))?
        {
            subscriptions.push(
                row_to_subscription(&row)
                    .map_err(|e| StoreError::Query(format!("list_subscriptions row parse: {e}")))?,
            );
        }
        Ok(subscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn empty_store_has_no_max_and_sees_nothing() {
        let store = test_store().await;
        assert_eq!(store.max_seen_id().await.unwrap(), None);
        assert!(!store.has_seen(1).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_then_has_seen() {
        let store = test_store().await;
        store.record(101).await.unwrap();

        assert!(store.has_seen(101).await.unwrap());
        assert!(!store.has_seen(102).await.unwrap());
    }

    #[tokio::test]
    async fn max_seen_id_is_true_maximum() {
        let store = test_store().await;
        for id in [7, 3, 42, 15, 9] {
            store.record(id).await.unwrap();
        }
        assert_eq!(store.max_seen_id().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn duplicate_record_is_a_noop() {
        let store = test_store().await;
        store.record(5).await.unwrap();
        store.record(5).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.max_seen_id().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn both_key_columns_hold_the_same_id() {
        let store = test_store().await;
        store.record(123456789).await.unwrap();

        let mut rows = store
            .conn()
            .query(
                "SELECT message_id_str, message_id FROM processed_messages",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "123456789");
        assert_eq!(row.get::<i64>(1).unwrap(), 123456789);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("watch.db");

        {
            let store = LibSqlStore::new_local(&db_path).await.unwrap();
            store.record(11).await.unwrap();
            store.record(12).await.unwrap();
        }
        assert!(db_path.exists());

        let reopened = LibSqlStore::new_local(&db_path).await.unwrap();
        assert!(reopened.has_seen(11).await.unwrap());
        assert_eq!(reopened.max_seen_id().await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = test_store().await;
        let ttl = Duration::from_secs(600);

        assert!(store.try_acquire_lease("@chan", "a", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("@chan", "b", ttl).await.unwrap());
        // Re-entrant for the same holder
        assert!(store.try_acquire_lease("@chan", "a", ttl).await.unwrap());

        store.release_lease("@chan", "a").await.unwrap();
        assert!(store.try_acquire_lease("@chan", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let store = test_store().await;
        assert!(
            store
                .try_acquire_lease("@chan", "a", Duration::ZERO)
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(
            store
                .try_acquire_lease("@chan", "b", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn release_by_non_holder_keeps_lease() {
        let store = test_store().await;
        let ttl = Duration::from_secs(600);
        store.try_acquire_lease("@chan", "a", ttl).await.unwrap();
        store.release_lease("@chan", "b").await.unwrap();
        assert!(!store.try_acquire_lease("@chan", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn leases_are_per_channel() {
        let store = test_store().await;
        let ttl = Duration::from_secs(600);
        assert!(store.try_acquire_lease("@one", "a", ttl).await.unwrap());
        assert!(store.try_acquire_lease("@two", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_subscription_is_idempotent() {
        let store = test_store().await;
        let first = store
            .ensure_subscription("alerts", "email", "me@example.com")
            .await
            .unwrap();
        let second = store
            .ensure_subscription("alerts", "email", "me@example.com")
            .await
            .unwrap();

        assert_eq!(first, SubscriptionState::Created);
        assert_eq!(second, SubscriptionState::AlreadySubscribed);

        let subs = store.list_subscriptions("alerts").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].endpoint, "me@example.com");
        assert_eq!(subs[0].protocol, "email");
        assert!(subs[0].confirmed);
    }

    #[tokio::test]
    async fn subscriptions_are_scoped_to_topic() {
        let store = test_store().await;
        store
            .ensure_subscription("alerts", "email", "a@example.com")
            .await
            .unwrap();
        store
            .ensure_subscription("other", "email", "b@example.com")
            .await
            .unwrap();

        let subs = store.list_subscriptions("alerts").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert!(store.list_subscriptions("missing").await.unwrap().is_empty());
    }

    #[test]
    fn timestamps_compare_lexicographically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + TimeDelta::milliseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(parse_datetime(&format_timestamp(earlier)), earlier);
    }
}
