use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::config::Config;
use crate::message::GenerateContentRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);
const LIST_TIMEOUT: Duration = Duration::from_secs(15);
const LIST_PAGE_SIZE: &str = "1000";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Raw HTTP outcome. Status classification is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The two provider endpoints the chat needs.
///
/// `Err` means the request never produced an HTTP response (DNS, TLS, timeout).
#[async_trait]
pub trait ModelApi: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<ApiReply>;

    async fn list_models(&self) -> Result<ApiReply>;
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_base: config.api_base(),
            api_key: config.api_key.clone(),
        }
    }

    async fn into_reply(response: reqwest::Response) -> Result<ApiReply> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to read response body")?;
        Ok(ApiReply { status, body })
    }
}

#[async_trait]
impl ModelApi for GeminiClient {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<ApiReply> {
        let url = format!("{}/models/{}:generateContent", self.api_base, model);
        tracing::debug!(%url, contents = request.contents.len(), "POST generateContent");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .timeout(GENERATE_TIMEOUT)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to send request to {url}"))?;

        Self::into_reply(response).await
    }

    async fn list_models(&self) -> Result<ApiReply> {
        let url = format!("{}/models", self.api_base);
        tracing::debug!(%url, "GET models");

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("pageSize", LIST_PAGE_SIZE)])
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to fetch models from {url}"))?;

        Self::into_reply(response).await
    }
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_base", &self.api_base)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_success_covers_2xx_only() {
        let reply = |status| ApiReply {
            status,
            body: String::new(),
        };
        assert!(reply(200).is_success());
        assert!(reply(204).is_success());
        assert!(!reply(199).is_success());
        assert!(!reply(404).is_success());
        assert!(!reply(429).is_success());
    }

    #[test]
    fn models_response_tolerates_missing_fields() {
        let parsed: ModelsResponse = serde_json::from_str(
            r#"{"models": [{"name": "models/a", "supportedGenerationMethods": ["generateContent"]}, {}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.models.len(), 2);
        assert_eq!(parsed.models[0].supported_generation_methods, ["generateContent"]);
        assert!(parsed.models[1].name.is_empty());
    }

    #[test]
    fn client_uses_versioned_base_and_hides_key() {
        let mut config = Config::new("secret-key");
        config.base_url = "http://localhost:8080".to_string();
        let client = GeminiClient::new(&config);

        let debug = format!("{client:?}");
        assert!(debug.contains("http://localhost:8080/v1beta"));
        assert!(!debug.contains("secret-key"));
    }

    #[tokio::test]
    async fn transport_errors_never_carry_the_key() {
        let mut config = Config::new("SUPER-SECRET-KEY");
        config.base_url = "http://127.0.0.1:1".to_string();
        let client = GeminiClient::new(&config);
        let request = GenerateContentRequest::new(&[], &config.generation);

        let err = client
            .generate_content("gemini-2.0-flash", &request)
            .await
            .unwrap_err();
        assert!(!format!("{err:#}").contains("SUPER-SECRET-KEY"));
        assert!(!format!("{err:?}").contains("SUPER-SECRET-KEY"));

        let err = client.list_models().await.unwrap_err();
        assert!(!format!("{err:#}").contains("SUPER-SECRET-KEY"));
    }
}
