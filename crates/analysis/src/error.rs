use thiserror::Error;

use mailsift_core::ErrorKind;
use mailsift_llm::ModelClientError;

/// Errors surfaced by the analysis stages.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The model call itself failed. Retryable variants are handled by
    /// the orchestrator's backoff loop.
    #[error(transparent)]
    Model(#[from] ModelClientError),

    /// Model output never normalized into the expected structure.
    /// The stage already exhausted its parse retries; the orchestrator
    /// records the phase as failed and continues with earlier results.
    #[error("unparseable model output after {attempts} attempts: {message}")]
    Parse { attempts: u32, message: String },
}

impl AnalysisError {
    /// Map into the pipeline failure taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Model(err) if err.is_retryable() => ErrorKind::TransientUpstream(err.to_string()),
            Self::Model(err) => ErrorKind::ParseFailure(err.to_string()),
            Self::Parse { message, .. } => ErrorKind::ParseFailure(message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_model_error_maps_to_transient() {
        let err = AnalysisError::Model(ModelClientError::Timeout(45_000));
        assert!(matches!(err.kind(), ErrorKind::TransientUpstream(_)));
        assert!(err.kind().retryable());
    }

    #[test]
    fn parse_error_is_permanent() {
        let err = AnalysisError::Parse {
            attempts: 4,
            message: "no json found".into(),
        };
        assert!(matches!(err.kind(), ErrorKind::ParseFailure(_)));
        assert!(!err.kind().retryable());
    }

    #[test]
    fn permanent_model_error_maps_to_parse_failure() {
        let err = AnalysisError::Model(ModelClientError::Api {
            status: 400,
            body: "bad prompt".into(),
        });
        assert!(!err.kind().retryable());
    }
}
