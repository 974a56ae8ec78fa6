use std::sync::LazyLock;

use regex::Regex;

/// Default keyword list that forces the full analysis route regardless
/// of other routing signals. Overridable through pipeline configuration.
pub const DEFAULT_COMPETITOR_KEYWORDS: [&str; 4] =
    ["competitor", "expedite", "rush", "escalate"];

static URGENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(urgent|asap|immediately|critical|by\s+e\.?o\.?d\.?|right\s+away|time.sensitive)\b",
    )
    .expect("valid regex")
});

/// Urgency phrases found in the text, lowercased, deduplicated.
#[must_use]
pub fn urgency_hits(text: &str) -> Vec<String> {
    let mut hits: Vec<String> = Vec::new();
    for m in URGENCY_RE.find_iter(text) {
        let phrase = m.as_str().to_lowercase();
        if !hits.contains(&phrase) {
            hits.push(phrase);
        }
    }
    hits
}

/// Case-insensitive keyword containment against a configured list.
#[must_use]
pub fn contains_keyword(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_phrases_found() {
        let hits = urgency_hits("URGENT: need this ASAP, it is time-sensitive");
        assert_eq!(hits, vec!["urgent", "asap", "time-sensitive"]);
    }

    #[test]
    fn urgency_dedupes() {
        let hits = urgency_hits("urgent urgent URGENT");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn eod_counts_as_urgency() {
        let hits = urgency_hits("please reply by EOD");
        assert_eq!(hits, vec!["by eod"]);
    }

    #[test]
    fn calm_text_has_no_hits() {
        assert!(urgency_hits("thanks for the update, no hurry").is_empty());
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let keywords: Vec<String> = DEFAULT_COMPETITOR_KEYWORDS
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        assert!(contains_keyword("A Competitor quoted lower", &keywords));
        assert!(contains_keyword("please EXPEDITE shipping", &keywords));
        assert!(!contains_keyword("regular order status", &keywords));
    }
}
