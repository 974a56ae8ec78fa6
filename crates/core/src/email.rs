use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::types::{EmailId, MessageId};

/// Sender-declared importance of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

/// A raw business email, immutable once ingested.
///
/// The pipeline never mutates an `Email` after ingest; all derived data
/// lives in phase results, chains, and tasks keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Opaque unique identifier assigned at ingest.
    pub id: EmailId,

    /// RFC 5322 message identifier. Unique across the store.
    pub message_id: MessageId,

    /// Conversation identifier from the mail source, when present.
    /// An empty string from the source is normalized to `None`.
    pub conversation_id: Option<String>,

    /// Sender address.
    pub sender_email: String,

    /// Sender display name, when the source provides one.
    pub sender_name: Option<String>,

    /// Recipient addresses (to + cc).
    pub recipients: Vec<String>,

    /// Subject line.
    pub subject: String,

    /// Plain-text body.
    pub body_text: String,

    /// When the message was received, UTC. Monotonic per source but not
    /// globally.
    pub received_at: DateTime<Utc>,

    /// Whether the message carried attachments.
    pub has_attachments: bool,

    /// Sender-declared importance.
    #[serde(default)]
    pub importance: Importance,
}

impl Email {
    /// Create a new email with required fields. Generates a UUID-v4 id.
    #[must_use]
    pub fn new(
        message_id: impl Into<MessageId>,
        sender_email: impl Into<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EmailId::new(Uuid::new_v4().to_string()),
            message_id: message_id.into(),
            conversation_id: None,
            sender_email: sender_email.into(),
            sender_name: None,
            recipients: Vec::new(),
            subject: subject.into(),
            body_text: body_text.into(),
            received_at,
            has_attachments: false,
            importance: Importance::Normal,
        }
    }

    /// Set the conversation identifier. An empty string is treated as
    /// unknown and stored as `None`.
    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        let id = conversation_id.into();
        self.conversation_id = if id.is_empty() { None } else { Some(id) };
        self
    }

    /// Set the sender display name.
    #[must_use]
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Set the recipient list.
    #[must_use]
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Mark the message as carrying attachments.
    #[must_use]
    pub fn with_attachments(mut self, has_attachments: bool) -> Self {
        self.has_attachments = has_attachments;
        self
    }

    /// Set the sender-declared importance.
    #[must_use]
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// Validate required fields at the ingest boundary.
    ///
    /// A rejected email is never retried and produces no downstream work.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.message_id.as_str().is_empty() {
            return Err(ErrorKind::ValidationReject("empty message_id".into()));
        }
        if self.sender_email.is_empty() {
            return Err(ErrorKind::ValidationReject("empty sender_email".into()));
        }
        if self.subject.is_empty() && self.body_text.is_empty() {
            return Err(ErrorKind::ValidationReject(
                "both subject and body are empty".into(),
            ));
        }
        Ok(())
    }

    /// Combined subject + body text used by the pattern extractors.
    #[must_use]
    pub fn full_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_email() -> Email {
        Email::new(
            "<msg-1@example.com>",
            "buyer@example.com",
            "Need quote for 15 servers",
            "Please send pricing by Friday.",
            Utc::now(),
        )
    }

    #[test]
    fn email_creation() {
        let email = test_email();
        assert_eq!(email.message_id.as_str(), "<msg-1@example.com>");
        assert_eq!(email.sender_email, "buyer@example.com");
        assert!(email.conversation_id.is_none());
        assert!(!email.has_attachments);
    }

    #[test]
    fn empty_conversation_id_is_unknown() {
        let email = test_email().with_conversation_id("");
        assert!(email.conversation_id.is_none());

        let email = test_email().with_conversation_id("C-1");
        assert_eq!(email.conversation_id.as_deref(), Some("C-1"));
    }

    #[test]
    fn email_serde_roundtrip() {
        let email = test_email()
            .with_conversation_id("C-9")
            .with_sender_name("Pat Buyer")
            .with_recipients(vec!["sales@vendor.example".into()]);
        let json = serde_json::to_string(&email).unwrap();
        let back: Email = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, email.id);
        assert_eq!(back.conversation_id.as_deref(), Some("C-9"));
        assert_eq!(back.recipients, email.recipients);
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut email = test_email();
        email.sender_email.clear();
        let err = email.validate().unwrap_err();
        assert!(matches!(err, ErrorKind::ValidationReject(_)));

        let mut email = test_email();
        email.subject.clear();
        email.body_text.clear();
        assert!(email.validate().is_err());
    }

    #[test]
    fn validate_accepts_complete_email() {
        assert!(test_email().validate().is_ok());
    }

    #[test]
    fn full_text_joins_subject_and_body() {
        let email = test_email();
        let text = email.full_text();
        assert!(text.starts_with("Need quote"));
        assert!(text.contains("pricing by Friday"));
    }
}
