use std::sync::LazyLock;

use regex::Regex;

use mailsift_core::{ChainEvidence, ChainScore, Email, LifecycleMarker, Phase1Result};

/// Completeness at or above this is a completed chain.
pub const COMPLETED_THRESHOLD: u8 = 70;
/// Completeness at or above this (and below completed) is in progress.
pub const IN_PROGRESS_THRESHOLD: u8 = 40;

/// Explicit resolution phrases beyond the completion lifecycle marker.
const RESOLUTION_PHRASES: [&str; 5] = [
    "resolved",
    "issue closed",
    "invoice attached",
    "order complete",
    "thank you for your business",
];

// Carrier tracking numbers (UPS 1Z…, and long bare numeric forms
// following the word "tracking").
static TRACKING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b1Z[0-9A-Z]{6,}\b|tracking\s*#?\s*:?\s*[0-9A-Z]{6,}").expect("valid regex")
});

/// Whether this email carries an explicit resolution indicator.
#[must_use]
pub fn has_resolution_indicator(email: &Email, phase1: &Phase1Result) -> bool {
    if phase1.lifecycle_marker == LifecycleMarker::Completion {
        return true;
    }
    let lower = email.full_text().to_lowercase();
    if RESOLUTION_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }
    if TRACKING_RE.is_match(&lower) {
        return true;
    }
    // An attachment on an email that talks about invoicing is treated
    // as the invoice itself.
    email.has_attachments && lower.contains("invoice")
}

/// Derive the completeness score from accumulated evidence.
///
/// Components: progression 0–30 (10 per lifecycle stage observed),
/// entity continuity 0 or 20 (a PO/quote/case recurring across ≥2
/// messages), resolution 0 or 40, characteristics 0–10 (5 for ≥3
/// messages, 5 for ordered timestamps across ≥2 messages).
#[must_use]
pub fn score_chain(evidence: &ChainEvidence, email_count: usize) -> ChainScore {
    let mut progression = 0u8;
    if evidence.start {
        progression += 10;
    }
    if evidence.progress {
        progression += 10;
    }
    if evidence.completion {
        progression += 10;
    }

    let entity_continuity = if evidence.has_reference_continuity() {
        20
    } else {
        0
    };

    let resolution = if evidence.resolution { 40 } else { 0 };

    let mut characteristics = 0u8;
    if email_count >= 3 {
        characteristics += 5;
    }
    if email_count >= 2 && evidence.timestamps_ordered {
        characteristics += 5;
    }

    ChainScore {
        progression,
        entity_continuity,
        resolution,
        characteristics,
    }
}
