//! Rule-based Phase-1 triage.
//!
//! Runs for every ingested email, synchronously and without I/O: entity
//! extraction, workflow-type hinting, urgency scoring, and lifecycle
//! marker detection.

mod lifecycle;
mod scoring;

use mailsift_core::{Email, Importance, Phase1Result, WorkflowType};
use mailsift_extract::{contains_keyword, extract, urgency_hits};

pub use lifecycle::detect_lifecycle;
pub use scoring::score_workflow_hint;

/// Tunables for the triage pass.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Tie-break order for workflow hint scoring; earlier wins.
    pub tie_order: Vec<WorkflowType>,
    /// Keywords that signal competitive pressure; they contribute to the
    /// urgency score and are surfaced as key phrases.
    pub competitor_keywords: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            tie_order: WorkflowType::TIE_ORDER.to_vec(),
            competitor_keywords: mailsift_extract::DEFAULT_COMPETITOR_KEYWORDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

/// The Phase-1 stage seam the orchestrator injects.
pub trait Triager: Send + Sync {
    /// Produce the triage result for one email. Pure; must not block.
    fn triage(&self, email: &Email) -> Phase1Result;
}

/// The production triager: phrase tables plus the pattern library.
#[derive(Debug, Clone, Default)]
pub struct PhraseTriager {
    config: TriageConfig,
}

impl PhraseTriager {
    #[must_use]
    pub fn new(config: TriageConfig) -> Self {
        Self { config }
    }

    fn urgency_score(&self, email: &Email, text: &str, hits: &[String]) -> u8 {
        let mut score = 0u8;
        // Urgency in the subject line is the strongest signal.
        if !urgency_hits(&email.subject).is_empty() {
            score += 2;
        } else if !hits.is_empty() {
            score += 1;
        }
        if hits.len() >= 2 {
            score += 1;
        }
        if contains_keyword(text, &self.config.competitor_keywords) {
            score += 1;
        }
        if email.importance == Importance::High {
            score += 1;
        }
        score.min(3)
    }
}

impl Triager for PhraseTriager {
    fn triage(&self, email: &Email) -> Phase1Result {
        let text = email.full_text();
        let lower = text.to_lowercase();

        let entities = extract(email);
        let hits = urgency_hits(&text);
        let urgency_score = self.urgency_score(email, &text, &hits);
        let (lifecycle_marker, lifecycle_phrase) = lifecycle::detect_lifecycle(&lower);
        let workflow_hint = scoring::score_workflow_hint(&lower, &entities, &self.config.tie_order);

        let mut key_phrases = hits;
        if let Some(phrase) = lifecycle_phrase {
            key_phrases.push(phrase.to_owned());
        }
        for keyword in &self.config.competitor_keywords {
            if lower.contains(&keyword.to_lowercase()) && !key_phrases.contains(keyword) {
                key_phrases.push(keyword.clone());
            }
        }

        Phase1Result {
            entities,
            workflow_hint,
            urgency_score,
            key_phrases,
            lifecycle_marker,
        }
    }
}

/// Convenience wrapper running the default triager once.
#[must_use]
pub fn triage(email: &Email) -> Phase1Result {
    PhraseTriager::default().triage(email)
}
