use std::sync::LazyLock;

use regex::Regex;

use mailsift_core::EntityItem;

use crate::{CONFIDENCE_EXACT, CONFIDENCE_HEURISTIC};

// Prefixed purchase-order forms: PO# 12345, P.O. 12345, SO#, BO#, LYPO#.
static PO_PREFIXED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:P\.?O\.?|SO|BO|LYPO)\s*#?\s*:?\s*(\d{4,})").expect("valid regex")
});

// Bare digit runs of six or more are treated as order references.
static PO_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{6,})\b").expect("valid regex"));

static QUOTE_DASHED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(Q-\d{4,}|FTQ-\d{6})\b").expect("valid regex"));

static QUOTE_WORDED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bquote\s*#\s*([A-Za-z0-9][A-Za-z0-9-]*)").expect("valid regex"));

static CASE_PREFIXED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(CAS-[A-Za-z0-9-]+)\b").expect("valid regex"));

static CASE_WORDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:case|ticket)\s*#?\s*:?\s*(\d[A-Za-z0-9-]*)").expect("valid regex")
});

// Vendor SKU shapes: an alphanumeric stem and suffix joined by '#'.
static PART_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Z0-9]{1,11}#[A-Z0-9][A-Z0-9-]*)\b").expect("valid regex")
});

static EMAIL_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});

/// Stems that look like part-number prefixes but are order/case markers.
const RESERVED_STEMS: [&str; 5] = ["PO", "SO", "BO", "LYPO", "CAS"];

fn push_unique(items: &mut Vec<EntityItem>, value: &str, confidence: f64) {
    if let Some(existing) = items.iter_mut().find(|i| i.value == value) {
        if confidence > existing.confidence {
            existing.confidence = confidence;
        }
        return;
    }
    items.push(EntityItem::new(value, confidence, 1));
}

/// Recognize purchase-order references.
#[must_use]
pub(crate) fn extract_po_numbers(text: &str) -> Vec<EntityItem> {
    let mut items = Vec::new();
    for caps in PO_PREFIXED_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_EXACT);
    }
    for caps in PO_BARE_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_HEURISTIC);
    }
    items
}

/// Recognize quote references (`Q-1001`, `FTQ-123456`, `Quote #A77`).
#[must_use]
pub(crate) fn extract_quote_numbers(text: &str) -> Vec<EntityItem> {
    let mut items = Vec::new();
    for caps in QUOTE_DASHED_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_EXACT);
    }
    for caps in QUOTE_WORDED_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_HEURISTIC);
    }
    items
}

/// Recognize support-case references (`CAS-…`, `case# 5512`, ticket ids).
#[must_use]
pub(crate) fn extract_case_numbers(text: &str) -> Vec<EntityItem> {
    let mut items = Vec::new();
    for caps in CASE_PREFIXED_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_EXACT);
    }
    for caps in CASE_WORDED_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_HEURISTIC);
    }
    items
}

/// Recognize vendor part numbers, skipping stems that are really order
/// or case prefixes.
#[must_use]
pub(crate) fn extract_part_numbers(text: &str) -> Vec<EntityItem> {
    let mut items = Vec::new();
    for caps in PART_NUMBER_RE.captures_iter(text) {
        let value = &caps[1];
        let stem = value.split('#').next().unwrap_or_default();
        if RESERVED_STEMS.contains(&stem) {
            continue;
        }
        push_unique(&mut items, value, CONFIDENCE_EXACT);
    }
    items
}

/// Recognize contact email addresses.
#[must_use]
pub(crate) fn extract_email_addresses(text: &str) -> Vec<EntityItem> {
    let mut items = Vec::new();
    for m in EMAIL_ADDRESS_RE.find_iter(text) {
        push_unique(&mut items, m.as_str(), CONFIDENCE_EXACT);
    }
    items
}
