//! Startup side effects: make sure the recipient is subscribed to the topic.
//!
//! The dedup tables are created when the store is opened, so by the time
//! this runs the schema already exists.

use tracing::info;

use crate::error::NotifyError;
use crate::notify::Notifier;
use crate::store::SubscriptionState;

/// Idempotently subscribe `recipient`. Existing subscriptions are left alone.
pub async fn ensure_recipient(
    notifier: &dyn Notifier,
    recipient: &str,
) -> Result<SubscriptionState, NotifyError> {
    let state = notifier.ensure_subscribed(recipient).await?;
    match state {
        SubscriptionState::Created => info!(recipient, "Subscribed recipient to topic"),
        SubscriptionState::AlreadySubscribed => {
            info!(recipient, "Recipient already subscribed, skipping")
        }
    }
    Ok(state)
}
