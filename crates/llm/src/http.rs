use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::client::{GenerationRequest, ModelClient};
use crate::config::ModelEndpointConfig;
use crate::error::ModelClientError;

/// HTTP model client targeting an OpenAI-compatible chat completions
/// API.
///
/// Each call applies the request's own deadline; the pool-level connect
/// timeout comes from configuration. 5xx and 429 surface as retryable.
#[derive(Debug)]
pub struct HttpModelClient {
    client: reqwest::Client,
    config: ModelEndpointConfig,
}

impl HttpModelClient {
    /// Create a new client from the given configuration.
    pub fn new(config: ModelEndpointConfig) -> Result<Self, ModelClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| ModelClientError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Pull the completion text out of the provider response envelope.
    fn extract_content(response: &serde_json::Value) -> Result<String, ModelClientError> {
        response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                ModelClientError::Parse(format!("unexpected response format: {response}"))
            })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelClientError> {
        let mut body = json!({
            "model": request.model.as_str(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": request.prompt,
                }
            ]
        });
        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }

        debug!(
            endpoint = %self.config.endpoint,
            model = %request.model,
            timeout_ms = %request.timeout.as_millis(),
            "sending generation request"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(request.timeout)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    #[allow(clippy::cast_possible_truncation)]
                    ModelClientError::Timeout(request.timeout.as_millis() as u64)
                } else {
                    ModelClientError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "model API returned error");
            return Err(ModelClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelClientError::Parse(e.to_string()))?;

        Self::extract_content(&envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_from_envelope() {
        let envelope = json!({
            "choices": [{"message": {"content": "{\"summary\": \"ok\"}"}}]
        });
        let content = HttpModelClient::extract_content(&envelope).unwrap();
        assert_eq!(content, "{\"summary\": \"ok\"}");
    }

    #[test]
    fn extract_content_rejects_missing_choices() {
        let envelope = json!({"error": "overloaded"});
        let result = HttpModelClient::extract_content(&envelope);
        assert!(matches!(result, Err(ModelClientError::Parse(_))));
    }

    #[test]
    fn extract_content_rejects_non_string() {
        let envelope = json!({"choices": [{"message": {"content": 42}}]});
        assert!(HttpModelClient::extract_content(&envelope).is_err());
    }

    #[test]
    fn client_builds_from_config() {
        let config = ModelEndpointConfig::new("http://localhost:9999/v1/chat/completions", "sk-x");
        assert!(HttpModelClient::new(config).is_ok());
    }
}
