//! Notification gateway: publish to a topic, fan out to its subscribers.
//!
//! A topic is a named subscriber list kept in the store. Publishing sends
//! one email per confirmed subscriber through the configured SMTP relay.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::store::{SubscriptionState, SubscriptionStore};

/// Protocol tag stored with email subscriptions.
pub const EMAIL_PROTOCOL: &str = "email";

/// Publish-to-topic delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` under `subject` to the topic. No dedup of its own.
    async fn notify(&self, subject: &str, message: &str) -> Result<(), NotifyError>;

    /// Idempotently subscribe `endpoint` to the topic.
    async fn ensure_subscribed(&self, endpoint: &str) -> Result<SubscriptionState, NotifyError>;
}

/// Sends a single email. Implemented over SMTP in production.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Blocking SMTP mailer built on lettre.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.from_address)?;

        let mut builder = SmtpTransport::relay(&config.host)
            .map_err(|e| NotifyError::Transport {
                transport: "smtp".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::Transport {
                transport: "smtp".into(),
                reason: format!("Failed to build email: {e}"),
            })?;

        self.transport
            .send(&email)
            .map_err(|e| NotifyError::Transport {
                transport: "smtp".into(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        info!("Email sent to {to}");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e| NotifyError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

// ── Topic notifier ──────────────────────────────────────────────────

/// Topic whose subscribers receive notifications by email.
pub struct EmailTopicNotifier {
    topic: String,
    subscriptions: Arc<dyn SubscriptionStore>,
    mailer: Arc<dyn Mailer>,
}

impl EmailTopicNotifier {
    pub fn new(
        topic: impl Into<String>,
        subscriptions: Arc<dyn SubscriptionStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscriptions,
            mailer,
        }
    }
}

#[async_trait]
impl Notifier for EmailTopicNotifier {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), NotifyError> {
        let recipients: Vec<String> = self
            .subscriptions
            .list_subscriptions(&self.topic)
            .await?
            .into_iter()
            .filter(|s| s.confirmed && s.protocol == EMAIL_PROTOCOL)
            .map(|s| s.endpoint)
            .collect();

        if recipients.is_empty() {
            return Err(NotifyError::NoSubscribers {
                topic: self.topic.clone(),
            });
        }

        for to in recipients {
            let mailer = Arc::clone(&self.mailer);
            let subject = subject.to_string();
            let body = message.to_string();
            // lettre's SmtpTransport blocks
            tokio::task::spawn_blocking(move || mailer.send(&to, &subject, &body))
                .await
                .map_err(|e| NotifyError::Transport {
                    transport: "smtp".into(),
                    reason: format!("send task failed: {e}"),
                })??;
        }

        debug!(topic = %self.topic, "Notification published");
        Ok(())
    }

    async fn ensure_subscribed(&self, endpoint: &str) -> Result<SubscriptionState, NotifyError> {
        parse_mailbox(endpoint)?;
        let state = self
            .subscriptions
            .ensure_subscription(&self.topic, EMAIL_PROTOCOL, endpoint)
            .await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::store::LibSqlStore;

    /// Records every email instead of sending it.
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.into(), subject.into(), body.into()));
            Ok(())
        }
    }

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Transport {
                transport: "smtp".into(),
                reason: "connection refused".into(),
            })
        }
    }

    async fn notifier_with(mailer: Arc<dyn Mailer>) -> EmailTopicNotifier {
        let store: Arc<dyn SubscriptionStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        EmailTopicNotifier::new("city-alerts", store, mailer)
    }

    #[tokio::test]
    async fn publishes_to_every_subscriber() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier_with(mailer.clone()).await;
        notifier.ensure_subscribed("a@example.com").await.unwrap();
        notifier.ensure_subscribed("b@example.com").await.unwrap();

        notifier.notify("Alert", "flood near Elm St").await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, s, b)| s == "Alert" && b == "flood near Elm St"));
    }

    #[tokio::test]
    async fn no_subscribers_is_an_error() {
        let notifier = notifier_with(Arc::new(RecordingMailer::default())).await;
        let err = notifier.notify("Alert", "body").await.unwrap_err();
        assert!(matches!(err, NotifyError::NoSubscribers { ref topic } if topic == "city-alerts"));
    }

    #[tokio::test]
    async fn ensure_subscribed_is_idempotent() {
        let notifier = notifier_with(Arc::new(RecordingMailer::default())).await;
        assert_eq!(
            notifier.ensure_subscribed("me@example.com").await.unwrap(),
            SubscriptionState::Created
        );
        assert_eq!(
            notifier.ensure_subscribed("me@example.com").await.unwrap(),
            SubscriptionState::AlreadySubscribed
        );
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let notifier = notifier_with(Arc::new(RecordingMailer::default())).await;
        let err = notifier.ensure_subscribed("not an address").await.unwrap_err();
        assert!(matches!(err, NotifyError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn delivery_failure_propagates() {
        let notifier = notifier_with(Arc::new(FailingMailer)).await;
        notifier.ensure_subscribed("me@example.com").await.unwrap();
        let err = notifier.notify("Alert", "body").await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport { .. }));
    }
}
