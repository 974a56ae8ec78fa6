use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mailsift_core::{EmailId, ErrorKind, Phase};

/// An email that permanently failed, kept for operator inspection.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub email_id: EmailId,
    /// The stage that failed, when the email got that far.
    pub stage: Option<Phase>,
    pub error: ErrorKind,
    /// Execution attempts made before the email was abandoned.
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// The operator-visible failed queue.
///
/// Validation rejects, invariant violations, and emails that exhausted
/// their retries land here; cancellations do not. Append-only buffer
/// guarded by a mutex held only for non-blocking pushes.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    /// Create a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failed email.
    pub fn push(
        &self,
        email_id: EmailId,
        stage: Option<Phase>,
        error: ErrorKind,
        attempts: u32,
        timestamp: DateTime<Utc>,
    ) {
        self.entries.lock().push(DeadLetterEntry {
            email_id,
            stage,
            error,
            attempts,
            timestamp,
        });
    }

    /// Drain all entries, leaving the queue empty.
    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no entries are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_is_empty() {
        let dlq = DeadLetterQueue::new();
        assert!(dlq.is_empty());
        assert_eq!(dlq.len(), 0);
    }

    #[test]
    fn push_and_drain() {
        let dlq = DeadLetterQueue::new();
        dlq.push(
            EmailId::new("em-1"),
            None,
            ErrorKind::ValidationReject("no sender".into()),
            1,
            Utc::now(),
        );
        dlq.push(
            EmailId::new("em-2"),
            Some(Phase::Analyst),
            ErrorKind::TransientUpstream("model down".into()),
            5,
            Utc::now(),
        );
        assert_eq!(dlq.len(), 2);

        let entries = dlq.drain();
        assert_eq!(entries.len(), 2);
        assert!(dlq.is_empty());
        assert_eq!(entries[0].email_id.as_str(), "em-1");
        assert_eq!(entries[1].stage, Some(Phase::Analyst));
        assert_eq!(entries[1].attempts, 5);
    }

    #[test]
    fn drain_on_empty_returns_empty_vec() {
        let dlq = DeadLetterQueue::new();
        assert!(dlq.drain().is_empty());
    }
}
