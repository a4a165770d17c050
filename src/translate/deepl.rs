use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{send_with_timeout, TranslateError, Translator};

const FREE_API_URL: &str = "https://api-free.deepl.com";
const PRO_API_URL: &str = "https://api.deepl.com";

/// DeepL API translator. Free-plan keys (suffix `:fx`) use the free endpoint.
pub struct DeepLTranslator {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    target_lang: String,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

impl DeepLTranslator {
    pub fn new(client: reqwest::Client, api_key: SecretString) -> Self {
        let base_url = if api_key.expose_secret().ends_with(":fx") {
            FREE_API_URL
        } else {
            PRO_API_URL
        };
        Self::with_base_url(client, api_key, base_url)
    }

    pub fn with_base_url(client: reqwest::Client, api_key: SecretString, base_url: &str) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, TranslateError> {
        let payload = serde_json::to_vec(&TranslateRequest {
            text: [text],
            target_lang: target_lang.to_ascii_uppercase(),
        })
        .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;

        let request = self
            .client
            .post(format!("{}/v2/translate", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.api_key.expose_secret()),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);

        let body = send_with_timeout(request).await?;
        let response: TranslateResponse = serde_json::from_slice(&body)
            .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;

        response
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| TranslateError::InvalidResponse("no translations".to_string()))
    }
}
