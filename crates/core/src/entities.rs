use serde::{Deserialize, Serialize};

/// A single extracted entity value with its confidence and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityItem {
    /// The extracted value, normalized (e.g. bare PO number without prefix).
    pub value: String,
    /// Extraction confidence in `0..=1`.
    pub confidence: f64,
    /// The phase that produced or last adjusted this item (1, 2, or 3).
    pub source_phase: u8,
}

impl EntityItem {
    /// Create an item produced by the given phase.
    #[must_use]
    pub fn new(value: impl Into<String>, confidence: f64, source_phase: u8) -> Self {
        Self {
            value: value.into(),
            confidence,
            source_phase,
        }
    }
}

/// A monetary amount normalized to minor units with its currency tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyValue {
    /// Amount in minor units (cents for USD).
    pub amount_minor: i64,
    /// ISO-4217 currency code.
    pub currency: String,
    /// Extraction confidence in `0..=1`.
    pub confidence: f64,
    /// The phase that produced this value.
    pub source_phase: u8,
}

/// The tagged set of business entities recognized in an email.
///
/// Phases are additive: later phases may add items or adjust confidence
/// but never silently remove what an earlier phase found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub po_numbers: Vec<EntityItem>,
    #[serde(default)]
    pub quote_numbers: Vec<EntityItem>,
    #[serde(default)]
    pub case_numbers: Vec<EntityItem>,
    #[serde(default)]
    pub part_numbers: Vec<EntityItem>,
    #[serde(default)]
    pub money_values: Vec<MoneyValue>,
    #[serde(default)]
    pub dates: Vec<EntityItem>,
    #[serde(default)]
    pub contacts: Vec<EntityItem>,
}

impl Entities {
    /// Total number of items across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.po_numbers.len()
            + self.quote_numbers.len()
            + self.case_numbers.len()
            + self.part_numbers.len()
            + self.money_values.len()
            + self.dates.len()
            + self.contacts.len()
    }

    /// Returns `true` if no entities were recognized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if any category holds an actionable reference
    /// (PO, quote, or case number).
    #[must_use]
    pub fn has_actionable(&self) -> bool {
        !self.po_numbers.is_empty()
            || !self.quote_numbers.is_empty()
            || !self.case_numbers.is_empty()
    }

    /// The largest recognized money value in minor units, if any.
    #[must_use]
    pub fn max_money_minor(&self) -> Option<i64> {
        self.money_values.iter().map(|m| m.amount_minor).max()
    }

    /// Drop items whose confidence is below `min`, keeping money values
    /// to the same rule.
    pub fn retain_confident(&mut self, min: f64) {
        let keep = |item: &EntityItem| item.confidence >= min;
        self.po_numbers.retain(keep);
        self.quote_numbers.retain(keep);
        self.case_numbers.retain(keep);
        self.part_numbers.retain(keep);
        self.dates.retain(keep);
        self.contacts.retain(keep);
        self.money_values.retain(|m| m.confidence >= min);
    }

    /// Merge `other` into `self`, skipping values already present in the
    /// same category. Confidence of existing items is raised when the
    /// incoming duplicate is more confident.
    pub fn merge(&mut self, other: &Entities) {
        merge_items(&mut self.po_numbers, &other.po_numbers);
        merge_items(&mut self.quote_numbers, &other.quote_numbers);
        merge_items(&mut self.case_numbers, &other.case_numbers);
        merge_items(&mut self.part_numbers, &other.part_numbers);
        merge_items(&mut self.dates, &other.dates);
        merge_items(&mut self.contacts, &other.contacts);
        for money in &other.money_values {
            if !self
                .money_values
                .iter()
                .any(|m| m.amount_minor == money.amount_minor && m.currency == money.currency)
            {
                self.money_values.push(money.clone());
            }
        }
    }

    /// Mutable access to every item category, for callers that apply a
    /// uniform edit (rejection filters, confidence adjustments).
    pub fn item_categories_mut(&mut self) -> [&mut Vec<EntityItem>; 6] {
        [
            &mut self.po_numbers,
            &mut self.quote_numbers,
            &mut self.case_numbers,
            &mut self.part_numbers,
            &mut self.dates,
            &mut self.contacts,
        ]
    }

    /// Whether any category contains an item with this value.
    #[must_use]
    pub fn contains_value(&self, value: &str) -> bool {
        self.po_numbers
            .iter()
            .chain(&self.quote_numbers)
            .chain(&self.case_numbers)
            .chain(&self.part_numbers)
            .chain(&self.dates)
            .chain(&self.contacts)
            .any(|i| i.value == value)
    }

    /// All item values across reference categories (PO, quote, case),
    /// used for cross-message continuity checks.
    #[must_use]
    pub fn reference_values(&self) -> Vec<&str> {
        self.po_numbers
            .iter()
            .chain(&self.quote_numbers)
            .chain(&self.case_numbers)
            .map(|i| i.value.as_str())
            .collect()
    }
}

fn merge_items(target: &mut Vec<EntityItem>, incoming: &[EntityItem]) {
    for item in incoming {
        match target.iter_mut().find(|t| t.value == item.value) {
            Some(existing) => {
                if item.confidence > existing.confidence {
                    existing.confidence = item.confidence;
                    existing.source_phase = item.source_phase;
                }
            }
            None => target.push(item.clone()),
        }
    }
}
