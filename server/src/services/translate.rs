//! Translation backend client.
//!
//! DESIGN
//! ======
//! Translation is an external collaborator reached over HTTP, hidden
//! behind the [`Translate`] trait so the ws route and tests never touch
//! the wire shape. Configuration comes from the environment and is
//! non-fatal: without it the server still relays captions, and every
//! translation request degrades to a soft per-request failure.

use async_trait::async_trait;
use serde::Deserialize;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("missing required env var {var}")]
    MissingConfig { var: String },
    #[error("failed to build http client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("translation backend returned error: {0}")]
    Backend(String),
}

// =============================================================================
// TRAIT
// =============================================================================

/// Seam between the relay and the external translation service.
#[async_trait]
pub trait Translate: Send + Sync {
    /// Translate `text` from `source_language` into `target_language`.
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslateError>;
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl TranslateConfig {
    /// Build typed translation config from environment variables.
    ///
    /// Required:
    /// - `TRANSLATE_BASE_URL`
    ///
    /// Optional:
    /// - `TRANSLATE_API_KEY`
    /// - `TRANSLATE_REQUEST_TIMEOUT_SECS`: default 15
    /// - `TRANSLATE_CONNECT_TIMEOUT_SECS`: default 5
    pub fn from_env() -> Result<Self, TranslateError> {
        let base_url = std::env::var("TRANSLATE_BASE_URL")
            .map_err(|_| TranslateError::MissingConfig { var: "TRANSLATE_BASE_URL".into() })?
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            base_url,
            api_key: std::env::var("TRANSLATE_API_KEY").ok(),
            request_timeout_secs: env_parse_u64(
                "TRANSLATE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            ),
            connect_timeout_secs: env_parse_u64(
                "TRANSLATE_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            ),
        })
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    error: Option<String>,
}

/// HTTP implementation speaking the LibreTranslate-compatible API.
pub struct HttpTranslator {
    client: reqwest::Client,
    config: TranslateConfig,
}

impl HttpTranslator {
    /// Build a translator from environment configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError::MissingConfig`] when `TRANSLATE_BASE_URL`
    /// is unset and [`TranslateError::ClientBuild`] if reqwest rejects the
    /// timeout configuration.
    pub fn from_env() -> Result<Self, TranslateError> {
        let config = TranslateConfig::from_env()?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(TranslateError::ClientBuild)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Translate for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslateError> {
        let mut body = serde_json::json!({
            "q": text,
            "source": bare_language(source_language),
            "target": target_language,
            "format": "text",
        });
        if let Some(key) = &self.config.api_key {
            body["api_key"] = serde_json::json!(key);
        }

        let response: TranslateResponse = self
            .client
            .post(format!("{}/translate", self.config.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (response.translated_text, response.error) {
            (Some(text), _) => Ok(text),
            (None, Some(error)) => Err(TranslateError::Backend(error)),
            (None, None) => Err(TranslateError::Backend("empty response".into())),
        }
    }
}

/// Strip a locale suffix for the translator API: STT tags fragments with
/// locale codes ("en-US") while the translator wants bare codes ("en").
fn bare_language(code: &str) -> &str {
    code.split('-').next().unwrap_or(code)
}

#[cfg(test)]
#[path = "translate_test.rs"]
mod tests;
