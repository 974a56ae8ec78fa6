use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{GenerationRequest, ModelClient};
use crate::error::ModelClientError;

/// A mock client that returns a fixed reply.
#[derive(Debug, Clone)]
pub struct MockModelClient {
    reply: String,
}

impl MockModelClient {
    /// Create a mock that always returns `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ModelClientError> {
        Ok(self.reply.clone())
    }
}

/// A mock client that always fails with a retryable API error.
#[derive(Debug, Clone)]
pub struct FailingModelClient {
    message: String,
}

impl FailingModelClient {
    /// Create a failing client with the given error body.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ModelClient for FailingModelClient {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ModelClientError> {
        Err(ModelClientError::Api {
            status: 503,
            body: self.message.clone(),
        })
    }
}

/// A mock client that replays a scripted sequence of outcomes, then
/// repeats the last one. Drives parse-retry and backoff tests.
#[derive(Debug)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<String, u16>>>,
    last: Mutex<Option<Result<String, u16>>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModelClient {
    /// Create a client from a sequence of replies; `Err(status)` entries
    /// produce API errors with that status.
    #[must_use]
    pub fn new(script: Vec<Result<String, u16>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of generate calls observed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// The requests observed so far, cloned.
    #[must_use]
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelClientError> {
        self.calls.lock().push(request.clone());
        let next = {
            let mut script = self.script.lock();
            match script.pop_front() {
                Some(entry) => {
                    *self.last.lock() = Some(entry.clone());
                    entry
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or(Err(500)),
            }
        };
        match next {
            Ok(reply) => Ok(reply),
            Err(status) => Err(ModelClientError::Api {
                status,
                body: "scripted failure".into(),
            }),
        }
    }
}
