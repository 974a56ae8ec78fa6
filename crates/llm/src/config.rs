/// Configuration for the HTTP model client.
#[derive(Debug, Clone)]
pub struct ModelEndpointConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    /// API key for bearer authentication.
    pub api_key: String,
    /// Connect timeout in seconds; per-call deadlines come from the
    /// request.
    pub connect_timeout_seconds: u64,
}

impl ModelEndpointConfig {
    /// Create a config with a 10s connect timeout.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            connect_timeout_seconds: 10,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout_seconds = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ModelEndpointConfig::new("http://localhost:8080/v1/chat/completions", "sk-test");
        assert_eq!(config.connect_timeout_seconds, 10);
    }

    #[test]
    fn builder() {
        let config = ModelEndpointConfig::new("http://localhost:8080", "sk-test")
            .with_connect_timeout(30);
        assert_eq!(config.connect_timeout_seconds, 30);
    }
}
