//! Chat-completion endpoint client.

use super::{AssistantReply, ChatRequest, ChatResponse};
use crate::core::config::data::LlmConfig;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const COMPLETION_TIMEOUT_SECONDS: u64 = 120;

/// Seam between the conversation engine and the completion endpoint, so
/// turns can be driven by scripted replies in tests.
#[async_trait]
pub trait CompletionBackend: Send {
    async fn complete(&self, request: &ChatRequest) -> Result<AssistantReply, String>;
}

/// Azure OpenAI deployment client. The deployment and API version are part
/// of the request URL; the key travels in the `api-key` header.
pub struct AzureCompletionClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl AzureCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(COMPLETION_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| err.to_string())?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.deployment,
            config.api_version
        );
        Ok(Self {
            http,
            url,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CompletionBackend for AzureCompletionClient {
    async fn complete(&self, request: &ChatRequest) -> Result<AssistantReply, String> {
        debug!(messages = request.messages.len(), "Sending completion request");
        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body.trim()));
        }

        let parsed: ChatResponse = response.json().await.map_err(|err| err.to_string())?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| "Completion response contained no choices".to_string())
    }
}
