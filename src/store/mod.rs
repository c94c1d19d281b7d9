//! Persistence layer: libSQL-backed dedup log, pass leases and topic subscriptions.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{
    DedupStore, LeaseStore, SubscriptionState, SubscriptionStore, TopicSubscription,
};
