use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOutput {
    pub body_markdown: String,
    pub citations: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request was cancelled before completion")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The only piece of the core that observes cancellation directly:
/// `complete` races the underlying HTTP call against `cancel`, aborting
/// the in-flight request promptly if `cancel` fires first.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<LlmOutput, LlmError>;
}

pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: url::Url,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(base_url: url::Url, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<LlmOutput, LlmError> {
        let url = self
            .base_url
            .join("chat/completions")
            .map_err(|e| LlmError::Other(e.into()))?;

        let request = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": model,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = request => result.map_err(|e| LlmError::Other(e.into()))?,
        };

        let response = response
            .error_for_status()
            .map_err(|e| LlmError::Other(e.into()))?;

        let body: serde_json::Value = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = response.json() => result.map_err(|e| LlmError::Other(e.into()))?,
        };

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(LlmOutput {
            body_markdown: content,
            citations: body["choices"][0]["message"]["citations"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect(),
        })
    }
}
