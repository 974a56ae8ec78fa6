use thiserror::Error;

/// The failure taxonomy shared across the pipeline.
///
/// The orchestrator keys its retry and propagation policy off these
/// variants; crate-local error types convert into `ErrorKind` at the
/// pipeline boundary.
#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    /// Ingest or model timeout/5xx. Retried with backoff.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Model output could not be normalized into the expected structure
    /// after all parse retries.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Email missing required fields. Never retried.
    #[error("validation reject: {0}")]
    ValidationReject(String),

    /// CAS failure on a task upsert. Re-read, merge, retry.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    /// A downstream queue stayed full beyond the send deadline.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Shutdown or deadline exceeded. Partial work is discarded, not
    /// reported as failure.
    #[error("cancelled")]
    Cancelled,

    /// A structural invariant was broken (e.g. a phase result without
    /// its predecessor). Fatal for the affected email.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ErrorKind {
    /// Whether the orchestrator should retry the failed operation.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientUpstream(_) | Self::PersistenceConflict(_) | Self::ResourceExhaustion(_)
        )
    }

    /// Whether the failure is reported on the operator-visible failed
    /// queue. Cancellation is silent by design.
    #[must_use]
    pub fn operator_visible(&self) -> bool {
        matches!(self, Self::ValidationReject(_) | Self::InvariantViolation(_))
    }
}
