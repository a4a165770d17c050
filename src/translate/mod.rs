//! Title translation providers.
//!
//! The active provider is chosen from the `translation_provider` setting:
//! `deepl` with a configured API key selects [`DeepLTranslator`], anything
//! else falls back to the keyless [`GoogleFreeTranslator`].

mod deepl;
mod google;

use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use deepl::DeepLTranslator;
pub use google::GoogleFreeTranslator;

/// Per-request ceiling for translation calls.
const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Translation request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Translation service returned status {0}")]
    HttpStatus(u16),
    #[error("Translation request timed out")]
    Timeout,
    #[error("Unexpected translation response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, TranslateError>;
}

/// Pick a translator for the given provider setting.
pub fn from_settings(
    provider: Option<&str>,
    deepl_api_key: Option<&str>,
    client: reqwest::Client,
) -> Arc<dyn Translator> {
    let key = deepl_api_key.map(str::trim).filter(|k| !k.is_empty());

    match (provider.map(str::trim), key) {
        (Some(p), Some(key)) if p.eq_ignore_ascii_case("deepl") => Arc::new(DeepLTranslator::new(
            client,
            SecretString::from(key.to_string()),
        )),
        (Some(p), None) if p.eq_ignore_ascii_case("deepl") => {
            tracing::warn!("DeepL selected but no API key configured, using Google free translator");
            Arc::new(GoogleFreeTranslator::new(client))
        }
        _ => Arc::new(GoogleFreeTranslator::new(client)),
    }
}

async fn send_with_timeout(request: reqwest::RequestBuilder) -> Result<Vec<u8>, TranslateError> {
    let response = tokio::time::timeout(TRANSLATE_TIMEOUT, request.send())
        .await
        .map_err(|_| TranslateError::Timeout)??;

    if !response.status().is_success() {
        return Err(TranslateError::HttpStatus(response.status().as_u16()));
    }

    let body = tokio::time::timeout(TRANSLATE_TIMEOUT, response.bytes())
        .await
        .map_err(|_| TranslateError::Timeout)??;
    Ok(body.to_vec())
}
