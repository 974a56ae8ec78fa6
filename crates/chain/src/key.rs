use std::sync::LazyLock;

use regex::Regex;

use mailsift_core::{ChainId, Email};

static REPLY_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(re|fw|fwd)\s*:\s*").expect("valid regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// The chain identity for an email.
///
/// The source conversation id wins when present. Otherwise a synthetic
/// key is derived from the normalized subject plus the participant set,
/// so replies without threading headers still land in one chain.
#[must_use]
pub fn chain_key(email: &Email) -> ChainId {
    if let Some(conversation_id) = &email.conversation_id {
        return ChainId::new(conversation_id.clone());
    }

    let subject = normalize_subject(&email.subject);
    let mut participants: Vec<String> = email
        .recipients
        .iter()
        .map(|r| r.to_lowercase())
        .chain(std::iter::once(email.sender_email.to_lowercase()))
        .collect();
    participants.sort();
    participants.dedup();

    ChainId::new(format!("synth:{subject}|{}", participants.join(",")))
}

/// Strip reply/forward prefixes, lowercase, collapse whitespace.
fn normalize_subject(subject: &str) -> String {
    let mut current = subject.trim().to_lowercase();
    loop {
        let stripped = REPLY_PREFIX_RE.replace(&current, "").into_owned();
        if stripped == current {
            break;
        }
        current = stripped;
    }
    WHITESPACE_RE.replace_all(current.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn email(subject: &str, sender: &str, conversation: Option<&str>) -> Email {
        let mut email = Email::new("<t@example.com>", sender, subject, "body", Utc::now());
        if let Some(c) = conversation {
            email = email.with_conversation_id(c);
        }
        email
    }

    #[test]
    fn conversation_id_wins() {
        let key = chain_key(&email("anything", "a@x.example", Some("C-7")));
        assert_eq!(key.as_str(), "C-7");
    }

    #[test]
    fn reply_chain_shares_synthetic_key() {
        let original = email("Quote for servers", "buyer@x.example", None)
            .with_recipients(vec!["sales@y.example".into()]);
        let reply = email("RE: Quote for servers", "sales@y.example", None)
            .with_recipients(vec!["buyer@x.example".into()]);
        assert_eq!(chain_key(&original), chain_key(&reply));
    }

    #[test]
    fn nested_prefixes_are_stripped() {
        assert_eq!(normalize_subject("Re: FW: re: Order 99"), "order 99");
    }

    #[test]
    fn whitespace_collapsed() {
        assert_eq!(normalize_subject("  Order   status \t update "), "order status update");
    }

    #[test]
    fn different_participants_split_chains() {
        let a = email("Quote", "buyer@x.example", None);
        let b = email("Quote", "other@z.example", None);
        assert_ne!(chain_key(&a), chain_key(&b));
    }
}
