//! Telegram channel feed: reads channel posts from the Bot API.
//!
//! The bot must be a member (admin) of the channel so that posts are
//! delivered to it as `channel_post` updates. Telegram keeps unconfirmed
//! updates for 24 hours, which lines up with the default look-back window.
//!
//! Updates are only confirmed (by advancing `offset`) once every update on
//! a page is either for another chat or at/below the dedup watermark, so a
//! failed pass never drops posts it has not recorded yet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::channels::source::{CandidateStream, MessageSource, stream_of};
use crate::config::FeedConfig;
use crate::error::SourceError;
use crate::pipeline::types::CandidateMessage;

/// Maximum updates returned by one `getUpdates` call.
const UPDATES_PAGE_LIMIT: usize = 100;

/// Upper bound on pages read in one fetch.
const MAX_PAGES: usize = 50;

const SOURCE_NAME: &str = "telegram";

// ── Bot API payloads ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    error_code: Option<u16>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    channel_post: Option<ChannelPost>,
}

#[derive(Debug, Deserialize)]
struct ChannelPost {
    message_id: i64,
    chat: Chat,
    date: i64,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    username: Option<String>,
}

// ── Source ──────────────────────────────────────────────────────────

/// Telegram feed for a single channel.
pub struct TelegramSource {
    bot_token: SecretString,
    channel_id: String,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramSource {
    pub fn new(config: &FeedConfig, client: reqwest::Client) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            channel_id: config.channel_id.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_url,
            self.bot_token.expose_secret()
        )
    }

    /// Whether a post belongs to the configured channel.
    ///
    /// `@username` ids compare case-insensitively; anything else is
    /// compared against the numeric chat id.
    fn is_watched_chat(&self, chat: &Chat) -> bool {
        match self.channel_id.strip_prefix('@') {
            Some(username) => chat
                .username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(username)),
            None => chat.id.to_string() == self.channel_id,
        }
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, SourceError> {
        let mut body = serde_json::json!({
            "timeout": 0,
            "limit": UPDATES_PAGE_LIMIT,
            "allowed_updates": ["channel_post"],
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::Value::from(offset);
        }

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable {
                name: SOURCE_NAME.into(),
                // The request URL carries the bot token
                reason: e.without_url().to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Unauthorized {
                name: SOURCE_NAME.into(),
                reason: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable {
                name: SOURCE_NAME.into(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let data: ApiResponse = resp.json().await.map_err(|e| SourceError::InvalidResponse {
            name: SOURCE_NAME.into(),
            reason: e.without_url().to_string(),
        })?;

        if !data.ok {
            let reason = data
                .description
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(match data.error_code {
                Some(401 | 403) => SourceError::Unauthorized {
                    name: SOURCE_NAME.into(),
                    reason,
                },
                _ => SourceError::Unavailable {
                    name: SOURCE_NAME.into(),
                    reason,
                },
            });
        }

        Ok(data.result)
    }
}

#[async_trait]
impl MessageSource for TelegramSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_since(
        &self,
        min_id: i64,
        since: DateTime<Utc>,
    ) -> Result<CandidateStream, SourceError> {
        let mut candidates: Vec<CandidateMessage> = Vec::new();
        let mut offset: Option<i64> = None;

        for _ in 0..MAX_PAGES {
            let updates = self.get_updates(offset).await?;
            let page_len = updates.len();
            let Some(last_update_id) = updates.last().map(|u| u.update_id) else {
                break;
            };

            let mut page_confirmable = true;
            for update in updates {
                let Some(post) = update.channel_post else {
                    continue;
                };
                if !self.is_watched_chat(&post.chat) || post.message_id <= min_id {
                    continue;
                }

                let timestamp = DateTime::from_timestamp(post.date, 0).ok_or_else(|| {
                    SourceError::InvalidResponse {
                        name: SOURCE_NAME.into(),
                        reason: format!("post {} has invalid date {}", post.message_id, post.date),
                    }
                })?;
                if timestamp < since {
                    continue;
                }

                // Posts without text are never recorded, so they must not
                // pin the page either
                let Some(text) = post.text.or(post.caption) else {
                    debug!(message_id = post.message_id, "Skipping post without text");
                    continue;
                };
                page_confirmable = false;
                candidates.push(CandidateMessage::new(post.message_id, text, timestamp));
            }

            if !page_confirmable || page_len < UPDATES_PAGE_LIMIT {
                break;
            }
            offset = Some(last_update_id + 1);
        }

        candidates.sort_by_key(|c| c.id);
        candidates.dedup_by_key(|c| c.id);

        info!(
            channel = %self.channel_id,
            min_id,
            since = %since,
            count = candidates.len(),
            "Fetched channel posts"
        );
        Ok(stream_of(candidates))
    }
}
