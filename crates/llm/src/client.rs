use std::time::Duration;

use async_trait::async_trait;

use mailsift_core::ModelId;

use crate::error::ModelClientError;

/// A single generation call: prompt plus explicit sampling options.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: ModelId,
    pub max_tokens: u32,
    pub temperature: f64,
    pub stop: Vec<String>,
    /// Per-call deadline; clients must abort the call when it elapses.
    pub timeout: Duration,
}

impl GenerationRequest {
    /// Create a request with conservative defaults: 1024 tokens,
    /// temperature 0.2, 45s deadline, no stop sequences.
    #[must_use]
    pub fn new(model: impl Into<ModelId>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.2,
            stop: Vec::new(),
            timeout: Duration::from_secs(45),
        }
    }

    /// Set the maximum response tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set stop sequences.
    #[must_use]
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Trait for text-generation backends.
///
/// Implementations must be `Send + Sync`; the analysis workers hold them
/// behind `Arc<dyn ModelClient>`.
#[async_trait]
pub trait ModelClient: Send + Sync + std::fmt::Debug {
    /// Generate a completion for the request, honoring its deadline.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let request = GenerationRequest::new("primary-12b", "classify this");
        assert_eq!(request.max_tokens, 1024);
        assert!((request.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(request.timeout, Duration::from_secs(45));
        assert!(request.stop.is_empty());
    }

    #[test]
    fn request_builder() {
        let request = GenerationRequest::new("critical-70b", "think hard")
            .with_max_tokens(4096)
            .with_temperature(0.0)
            .with_stop(vec!["###".into()])
            .with_timeout(Duration::from_secs(180));
        assert_eq!(request.max_tokens, 4096);
        assert!((request.temperature - 0.0).abs() < f64::EPSILON);
        assert_eq!(request.stop, vec!["###"]);
        assert_eq!(request.timeout, Duration::from_secs(180));
    }
}
