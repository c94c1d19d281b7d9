//! Error types for channel-watch.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid pattern for {key}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid cron schedule '{schedule}': {reason}")]
    InvalidSchedule { schedule: String, reason: String },
}

/// Durable-state errors (dedup store, leases, subscriptions).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Message feed errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Feed {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("Feed {name} rejected credentials: {reason}")]
    Unauthorized { name: String, reason: String },

    #[error("Invalid response from feed {name}: {reason}")]
    InvalidResponse { name: String, reason: String },
}

/// Translation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("Translation request to {provider} failed: {reason}")]
    Request { provider: String, reason: String },

    #[error("Translation quota exhausted on {provider}")]
    Quota { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Delivery via {transport} failed: {reason}")]
    Transport { transport: String, reason: String },

    #[error("Topic {topic} has no confirmed subscribers")]
    NoSubscribers { topic: String },

    #[error("Subscription store error: {0}")]
    Store(#[from] StoreError),
}

/// A failed pipeline pass, tagged with the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Resume lookup failed: {0}")]
    ResumeLookup(#[source] StoreError),

    #[error("Look-back window of {0:?} is out of range")]
    Lookback(std::time::Duration),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("Dedup check failed for message {message_id}: {source}")]
    DedupCheck {
        message_id: i64,
        #[source]
        source: StoreError,
    },

    #[error("Recording message {message_id} failed: {source}")]
    Record {
        message_id: i64,
        #[source]
        source: StoreError,
    },

    #[error("Translating message {message_id} failed: {source}")]
    Translate {
        message_id: i64,
        #[source]
        source: TranslationError,
    },

    #[error("Notifying for message {message_id} failed: {source}")]
    Notify {
        message_id: i64,
        #[source]
        source: NotifyError,
    },

    #[error("Lease error: {0}")]
    Lease(#[source] StoreError),
}
