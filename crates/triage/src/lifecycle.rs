use mailsift_core::LifecycleMarker;

/// Phrases indicating a workflow is being opened.
const START_PHRASES: [&str; 5] = ["need quote", "new order", "inquiry", "rfq", "please provide"];

/// Phrases indicating a workflow is underway.
const PROGRESS_PHRASES: [&str; 5] = [
    "working on",
    "pending",
    "waiting for",
    "following up",
    "checking in",
];

/// Phrases indicating a workflow reached its end.
const COMPLETION_PHRASES: [&str; 5] = [
    "resolved",
    "shipped",
    "tracking #",
    "delivered",
    "thank you for your business",
];

/// Detect the lifecycle marker for one message.
///
/// Expects lowercased text. Completion evidence outranks start, which
/// outranks progress: a shipping notice that also thanks the customer
/// for a "new order" is still a completion.
#[must_use]
pub fn detect_lifecycle(lower_text: &str) -> (LifecycleMarker, Option<&'static str>) {
    for phrase in COMPLETION_PHRASES {
        if lower_text.contains(phrase) {
            return (LifecycleMarker::Completion, Some(phrase));
        }
    }
    for phrase in START_PHRASES {
        if lower_text.contains(phrase) {
            return (LifecycleMarker::Start, Some(phrase));
        }
    }
    for phrase in PROGRESS_PHRASES {
        if lower_text.contains(phrase) {
            return (LifecycleMarker::Progress, Some(phrase));
        }
    }
    (LifecycleMarker::None, None)
}
