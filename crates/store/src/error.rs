use thiserror::Error;

use mailsift_core::ErrorKind;

/// Errors surfaced by repository implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A version-checked write lost the race. Re-read, merge, retry.
    #[error("version conflict: expected {expected}, current {current}")]
    Conflict { expected: u64, current: u64 },

    /// A structural invariant would be broken by the write.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Map into the pipeline failure taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::PersistenceConflict(self.to_string()),
            Self::InvariantViolation(msg) => ErrorKind::InvariantViolation(msg.clone()),
            Self::Serialization(msg) | Self::Backend(msg) => {
                ErrorKind::TransientUpstream(msg.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_persistence_conflict() {
        let err = StoreError::Conflict {
            expected: 3,
            current: 4,
        };
        assert!(matches!(err.kind(), ErrorKind::PersistenceConflict(_)));
        assert!(err.kind().retryable());
    }

    #[test]
    fn invariant_violation_is_fatal() {
        let err = StoreError::InvariantViolation("phase2 before phase1".into());
        assert!(!err.kind().retryable());
        assert!(err.kind().operator_visible());
    }

    #[test]
    fn display_carries_versions() {
        let err = StoreError::Conflict {
            expected: 1,
            current: 2,
        };
        assert_eq!(err.to_string(), "version conflict: expected 1, current 2");
    }
}
