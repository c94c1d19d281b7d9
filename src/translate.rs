//! Translation gateway.
//!
//! `HttpTranslator` speaks the LibreTranslate JSON API:
//! `POST {base_url}/translate` with `{q, source, target, format}` and reads
//! `translatedText` from the response. Self-hosted LibreTranslate and most
//! compatible proxies accept the same shape.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TranslationConfig;
use crate::error::TranslationError;

const PROVIDER_NAME: &str = "libretranslate";

/// Machine translation provider.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang`. No retries.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    error: Option<String>,
}

/// LibreTranslate-compatible HTTP translator.
pub struct HttpTranslator {
    base_url: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpTranslator {
    pub fn new(config: &TranslationConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        }
    }

    fn request_failed(reason: impl Into<String>) -> TranslationError {
        TranslationError::Request {
            provider: PROVIDER_NAME.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        if source_lang.eq_ignore_ascii_case(target_lang) || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let request = TranslateRequest {
            q: text,
            source: source_lang,
            target: target_lang,
            format: "text",
            api_key: self.api_key.as_ref().map(|k| k.expose_secret()),
        };

        let resp = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TranslationError::Quota {
                provider: PROVIDER_NAME.into(),
            });
        }

        let body: TranslateResponse = if status.is_success() {
            resp.json()
                .await
                .map_err(|e| TranslationError::InvalidResponse {
                    provider: PROVIDER_NAME.into(),
                    reason: e.to_string(),
                })?
        } else {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<TranslateResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(text);
            return Err(Self::request_failed(format!("HTTP {status}: {detail}")));
        };

        match (body.translated_text, body.error) {
            (Some(translated), _) => {
                debug!(
                    source_lang,
                    target_lang,
                    chars = translated.chars().count(),
                    "Translated text"
                );
                Ok(translated)
            }
            (None, Some(error)) => Err(Self::request_failed(error)),
            (None, None) => Err(TranslationError::InvalidResponse {
                provider: PROVIDER_NAME.into(),
                reason: "missing translatedText".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> HttpTranslator {
        HttpTranslator::new(
            &TranslationConfig {
                source_lang: "uk".into(),
                target_lang: "en".into(),
                // Nothing listens here; tests below must not reach the network.
                base_url: "http://127.0.0.1:9/".into(),
                api_key: None,
            },
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn same_language_is_passthrough() {
        let out = translator().translate("Hello", "en", "EN").await.unwrap();
        assert_eq!(out, "Hello");
    }

    #[tokio::test]
    async fn blank_text_is_passthrough() {
        let out = translator().translate("  ", "uk", "en").await.unwrap();
        assert_eq!(out, "  ");
    }

    #[tokio::test]
    async fn unreachable_provider_is_request_error() {
        let err = translator().translate("Привіт", "uk", "en").await.unwrap_err();
        assert!(matches!(err, TranslationError::Request { .. }));
    }

    #[test]
    fn request_omits_missing_api_key() {
        let req = TranslateRequest {
            q: "text",
            source: "uk",
            target: "en",
            format: "text",
            api_key: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("api_key").is_none());
        assert_eq!(json["format"], "text");
    }

    #[test]
    fn parses_response() {
        let parsed: TranslateResponse =
            serde_json::from_str(r#"{"translatedText": "Flood warning"}"#).unwrap();
        assert_eq!(parsed.translated_text.as_deref(), Some("Flood warning"));
    }
}
