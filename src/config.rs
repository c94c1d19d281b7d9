//! Configuration types.
//!
//! Everything is read once at startup by [`WatchConfig::from_env`] and then
//! passed around as an immutable value. Nothing reads the environment after
//! the composition root in `main.rs` has built its dependencies.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::filter::PatternFilter;

/// Default Telegram Bot API endpoint.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default LibreTranslate-compatible endpoint.
pub const DEFAULT_TRANSLATE_URL: &str = "https://libretranslate.com";

/// Default schedule: top of every hour (sec min hour dom month dow).
pub const DEFAULT_SCHEDULE: &str = "0 0 * * * *";

/// Upper bound on `CHANNEL_WATCH_LOOKBACK_HOURS` (one year).
pub const MAX_LOOKBACK_HOURS: u64 = 24 * 365;

/// Message feed settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub bot_token: SecretString,
    /// Numeric chat id (`-100...`) or public `@username` of the channel.
    pub channel_id: String,
    pub api_url: String,
}

/// The two patterns of the notification filter.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub pattern: String,
    pub sub_pattern: String,
}

/// Translation provider settings.
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub source_lang: String,
    pub target_lang: String,
    pub base_url: String,
    pub api_key: Option<SecretString>,
}

/// SMTP relay used to deliver topic notifications.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// Notification topic and delivery settings.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub subject: String,
    pub topic: String,
    /// Address subscribed to the topic during bootstrap.
    pub recipient: String,
    pub smtp: SmtpConfig,
}

/// Process-level settings: storage, scheduling, logging.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub schedule: String,
    /// Oldest message timestamp considered on a pass, relative to now.
    pub lookback: Duration,
    pub lease_ttl: Duration,
    pub http_timeout: Duration,
    pub log_dir: Option<PathBuf>,
}

/// Settings the pipeline controller needs for a pass.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_lang: String,
    pub target_lang: String,
    pub subject: String,
    pub lookback: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_lang: "auto".to_string(),
            target_lang: "en".to_string(),
            subject: "Channel alert".to_string(),
            lookback: Duration::from_secs(24 * 3600), // 1 day
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub feed: FeedConfig,
    pub filter: FilterConfig,
    pub translation: TranslationConfig,
    pub notification: NotificationConfig,
    pub runtime: RuntimeConfig,
}

impl WatchConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (used by tests).
    ///
    /// Both filter patterns are compiled here so a bad pattern fails startup
    /// instead of the first pass.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let optional = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let feed = FeedConfig {
            bot_token: SecretString::from(required("TELEGRAM_BOT_TOKEN")?),
            channel_id: required("CHANNEL_ID")?,
            api_url: optional("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
        };

        let filter = FilterConfig {
            pattern: required("PATTERN")?,
            sub_pattern: required("SUB_PATTERN")?,
        };

        let translation = TranslationConfig {
            source_lang: required("SRC_LNG")?,
            target_lang: required("TRG_LNG")?,
            base_url: optional("TRANSLATE_URL")
                .unwrap_or_else(|| DEFAULT_TRANSLATE_URL.to_string()),
            api_key: optional("TRANSLATE_API_KEY").map(SecretString::from),
        };

        let smtp_username = optional("SMTP_USERNAME").unwrap_or_default();
        let smtp = SmtpConfig {
            host: required("SMTP_HOST")?,
            port: parse_or("SMTP_PORT", optional("SMTP_PORT"), 587)?,
            password: SecretString::from(optional("SMTP_PASSWORD").unwrap_or_default()),
            from_address: optional("SMTP_FROM").unwrap_or_else(|| smtp_username.clone()),
            username: smtp_username,
        };

        let notification = NotificationConfig {
            subject: required("NOTIF_SUB")?,
            topic: required("TOPIC_ARN")?,
            recipient: required("EMAIL")?,
            smtp,
        };

        let lookback = lookback_window(parse_or(
            "CHANNEL_WATCH_LOOKBACK_HOURS",
            optional("CHANNEL_WATCH_LOOKBACK_HOURS"),
            24,
        )?)?;
        let lease_secs: u64 =
            parse_or("CHANNEL_WATCH_LEASE_SECS", optional("CHANNEL_WATCH_LEASE_SECS"), 900)?;
        let http_timeout_secs: u64 = parse_or(
            "CHANNEL_WATCH_HTTP_TIMEOUT_SECS",
            optional("CHANNEL_WATCH_HTTP_TIMEOUT_SECS"),
            30,
        )?;

        let runtime = RuntimeConfig {
            db_path: optional("CHANNEL_WATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/channel-watch.db")),
            schedule: optional("CHANNEL_WATCH_SCHEDULE")
                .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            lookback,
            lease_ttl: Duration::from_secs(lease_secs),
            http_timeout: Duration::from_secs(http_timeout_secs),
            log_dir: optional("CHANNEL_WATCH_LOG_DIR").map(PathBuf::from),
        };

        let config = Self {
            feed,
            filter,
            translation,
            notification,
            runtime,
        };
        config.pattern_filter()?;
        crate::scheduler::next_fire(&config.runtime.schedule)?;
        Ok(config)
    }

    /// Compile the two configured patterns.
    pub fn pattern_filter(&self) -> Result<PatternFilter, ConfigError> {
        PatternFilter::new(&self.filter.pattern, &self.filter.sub_pattern)
    }

    /// The slice of settings handed to the pipeline controller.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            source_lang: self.translation.source_lang.clone(),
            target_lang: self.translation.target_lang.clone(),
            subject: self.notification.subject.clone(),
            lookback: self.runtime.lookback,
        }
    }
}

fn lookback_window(hours: u64) -> Result<Duration, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "CHANNEL_WATCH_LOOKBACK_HOURS".to_string(),
        message,
    };
    if hours == 0 || hours > MAX_LOOKBACK_HOURS {
        return Err(invalid(format!("{hours} is outside 1..={MAX_LOOKBACK_HOURS} hours")));
    }
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(format!("{hours} hours overflows")))
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{value}': {e}"),
        }),
        None => Ok(default),
    }
}
