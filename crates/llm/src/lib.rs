pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mock;

pub use client::{GenerationRequest, ModelClient};
pub use config::ModelEndpointConfig;
pub use error::ModelClientError;
pub use http::HttpModelClient;
pub use mock::{FailingModelClient, MockModelClient, ScriptedModelClient};
