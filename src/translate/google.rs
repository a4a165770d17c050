use async_trait::async_trait;
use url::Url;

use super::{send_with_timeout, TranslateError, Translator};

const DEFAULT_BASE_URL: &str = "https://translate.googleapis.com";

/// Keyless translator using the public `translate_a/single` endpoint.
pub struct GoogleFreeTranslator {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleFreeTranslator {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Translator for GoogleFreeTranslator {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, TranslateError> {
        let url = Url::parse_with_params(
            &format!("{}/translate_a/single", self.base_url),
            &[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_lang),
                ("dt", "t"),
                ("q", text),
            ],
        )
        .map_err(|e| TranslateError::InvalidResponse(format!("bad endpoint: {}", e)))?;

        let body = send_with_timeout(self.client.get(url)).await?;
        parse_response(&body)
    }
}

/// The response is a nested array; the first element holds
/// `[translated, original, ...]` segments that are concatenated.
fn parse_response(body: &[u8]) -> Result<String, TranslateError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;

    let segments = value
        .get(0)
        .and_then(|v| v.as_array())
        .ok_or_else(|| TranslateError::InvalidResponse("missing segments".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(|s| s.as_str()))
        .collect();

    if translated.is_empty() {
        return Err(TranslateError::InvalidResponse("empty translation".to_string()));
    }

    Ok(translated)
}
