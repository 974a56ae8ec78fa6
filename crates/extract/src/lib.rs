//! Deterministic entity extraction for business email.
//!
//! All recognizers are regex tables compiled once; extraction is pure
//! and side-effect-free, so it is safe to run on the hot Phase-1 path.

mod dates;
mod money;
mod patterns;
mod urgency;

use mailsift_core::{Email, Entities, EntityItem};

pub use dates::extract_dates;
pub use money::extract_money;
pub use urgency::{DEFAULT_COMPETITOR_KEYWORDS, contains_keyword, urgency_hits};

/// Exact-format matches (prefixed PO, `Q-…`, `CAS-…`, full addresses).
pub const CONFIDENCE_EXACT: f64 = 0.95;
/// Heuristic matches (bare digit runs, ambiguous date formats).
pub const CONFIDENCE_HEURISTIC: f64 = 0.7;
/// Loose matches (relative dates, weak context).
pub const CONFIDENCE_LOOSE: f64 = 0.5;
/// Items below this confidence are dropped from Phase-1 output. The
/// analyst may revive them when conversation context supports it.
pub const MIN_PHASE1_CONFIDENCE: f64 = 0.5;

/// Run every recognizer over the email's subject and body.
///
/// Items below [`MIN_PHASE1_CONFIDENCE`] are already dropped here; all
/// surviving items carry `source_phase = 1`.
#[must_use]
pub fn extract(email: &Email) -> Entities {
    let text = email.full_text();
    let mut entities = Entities {
        po_numbers: patterns::extract_po_numbers(&text),
        quote_numbers: patterns::extract_quote_numbers(&text),
        case_numbers: patterns::extract_case_numbers(&text),
        part_numbers: patterns::extract_part_numbers(&text),
        money_values: money::extract_money(&text),
        dates: dates::extract_dates(&text),
        contacts: extract_contacts(&text),
    };
    entities.retain_confident(MIN_PHASE1_CONFIDENCE);
    entities
}

fn extract_contacts(text: &str) -> Vec<EntityItem> {
    patterns::extract_email_addresses(text)
}
