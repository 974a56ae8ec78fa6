use std::sync::LazyLock;

use regex::Regex;

use mailsift_core::EntityItem;

use crate::{CONFIDENCE_EXACT, CONFIDENCE_HEURISTIC, CONFIDENCE_LOOSE};

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid regex"));

// US (3/14/2025) and EU (14.3.2025) forms are ambiguous without locale
// context, so they score heuristic.
static US_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{4})\b").expect("valid regex"));

static EU_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}\.\d{1,2}\.\d{4})\b").expect("valid regex"));

static RELATIVE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(by\s+(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)|by\s+e\.?o\.?d\.?|e\.?o\.?d\.?|end\s+of\s+(?:day|week|month)|tomorrow|next\s+week)\b",
    )
    .expect("valid regex")
});

fn push_unique(items: &mut Vec<EntityItem>, value: &str, confidence: f64) {
    let normalized = value.to_lowercase();
    if !items.iter().any(|i| i.value == normalized) {
        items.push(EntityItem::new(normalized, confidence, 1));
    }
}

/// Recognize absolute (ISO, US, EU) and relative date references.
#[must_use]
pub fn extract_dates(text: &str) -> Vec<EntityItem> {
    let mut items = Vec::new();
    for caps in ISO_DATE_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_EXACT);
    }
    for caps in US_DATE_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_HEURISTIC);
    }
    for caps in EU_DATE_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_HEURISTIC);
    }
    for caps in RELATIVE_DATE_RE.captures_iter(text) {
        push_unique(&mut items, &caps[1], CONFIDENCE_LOOSE);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_dates_are_exact() {
        let items = extract_dates("ship by 2025-02-01 at the latest");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, "2025-02-01");
        assert!((items[0].confidence - CONFIDENCE_EXACT).abs() < f64::EPSILON);
    }

    #[test]
    fn us_and_eu_dates_are_heuristic() {
        let items = extract_dates("delivered 3/14/2025, invoiced 14.3.2025");
        assert_eq!(items.len(), 2);
        assert!(
            items
                .iter()
                .all(|i| (i.confidence - CONFIDENCE_HEURISTIC).abs() < f64::EPSILON)
        );
    }

    #[test]
    fn relative_dates_are_loose() {
        let items = extract_dates("need this by Friday, ideally EOD");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].value, "by friday");
        assert_eq!(items[1].value, "eod");
        assert!(
            items
                .iter()
                .all(|i| (i.confidence - CONFIDENCE_LOOSE).abs() < f64::EPSILON)
        );
    }

    #[test]
    fn end_of_phrases() {
        let items = extract_dates("expect it end of week or next week");
        assert!(items.iter().any(|i| i.value == "end of week"));
        assert!(items.iter().any(|i| i.value == "next week"));
    }

    #[test]
    fn no_dates() {
        assert!(extract_dates("no schedule mentioned here").is_empty());
    }

    #[test]
    fn duplicates_collapse_case_insensitively() {
        let items = extract_dates("By Friday. I said by friday!");
        assert_eq!(items.len(), 1);
    }
}
