use std::sync::LazyLock;

use regex::Regex;

use mailsift_core::MoneyValue;

use crate::CONFIDENCE_EXACT;

// Currency symbol followed by an amount: $48,000 / €1.200,50 is out of
// scope — amounts use US digit grouping.
static SYMBOL_AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([$€£])\s?(\d[\d,]*)(?:\.(\d{1,2}))?").expect("valid regex")
});

// Amount followed by an ISO-4217 code: 48000 USD / 1,200.50 EUR.
static AMOUNT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d[\d,]*)(?:\.(\d{1,2}))?\s?(USD|EUR|GBP|CAD|AUD)\b").expect("valid regex")
});

fn currency_for_symbol(symbol: &str) -> &'static str {
    match symbol {
        "€" => "EUR",
        "£" => "GBP",
        _ => "USD",
    }
}

fn minor_units(whole: &str, cents: Option<&str>) -> Option<i64> {
    let whole: i64 = whole.replace(',', "").parse().ok()?;
    let cents: i64 = match cents {
        // A single fractional digit means tenths.
        Some(c) if c.len() == 1 => c.parse::<i64>().ok()? * 10,
        Some(c) => c.parse().ok()?,
        None => 0,
    };
    Some(whole * 100 + cents)
}

/// Recognize monetary amounts, normalized to minor units.
#[must_use]
pub fn extract_money(text: &str) -> Vec<MoneyValue> {
    let mut values: Vec<MoneyValue> = Vec::new();
    let mut push = |amount_minor: i64, currency: &str| {
        if !values
            .iter()
            .any(|v| v.amount_minor == amount_minor && v.currency == currency)
        {
            values.push(MoneyValue {
                amount_minor,
                currency: currency.to_owned(),
                confidence: CONFIDENCE_EXACT,
                source_phase: 1,
            });
        }
    };

    for caps in SYMBOL_AMOUNT_RE.captures_iter(text) {
        if let Some(minor) = minor_units(&caps[2], caps.get(3).map(|m| m.as_str())) {
            push(minor, currency_for_symbol(&caps[1]));
        }
    }
    for caps in AMOUNT_CODE_RE.captures_iter(text) {
        if let Some(minor) = minor_units(&caps[1], caps.get(2).map(|m| m.as_str())) {
            push(minor, &caps[3]);
        }
    }
    values
}
