use mailsift_core::{Entities, WorkflowType};

/// Keyword table for workflow-hint scoring. Each occurrence-independent
/// containment hit scores one point.
const KEYWORD_TABLE: [(WorkflowType, &[&str]); 8] = [
    (
        WorkflowType::OrderManagement,
        &["order", "purchase order", "po#", "invoice", "backorder"],
    ),
    (
        WorkflowType::QuoteProcessing,
        &["quote", "quotation", "rfq", "pricing"],
    ),
    (
        WorkflowType::CustomerSupport,
        &["support", "issue", "problem", "broken", "not working", "case"],
    ),
    (
        WorkflowType::ShippingLogistics,
        &["shipped", "shipping", "tracking", "delivery", "freight", "carrier"],
    ),
    (
        WorkflowType::DealRegistration,
        &["deal registration", "deal reg", "opportunity"],
    ),
    (
        WorkflowType::Approval,
        &["approval", "approve", "sign-off", "authorization"],
    ),
    (WorkflowType::Renewal, &["renewal", "renew", "expiring contract"]),
    (
        WorkflowType::VendorManagement,
        &["vendor", "supplier", "onboarding"],
    ),
];

/// Points added when extracted entities corroborate a workflow type.
const ENTITY_BOOST: u32 = 2;

/// Score the workflow taxonomy against lowercased text and extracted
/// entities, breaking ties by `tie_order` (earlier wins).
///
/// Returns [`WorkflowType::General`] when nothing scores.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn score_workflow_hint(
    lower_text: &str,
    entities: &Entities,
    tie_order: &[WorkflowType],
) -> WorkflowType {
    let mut scores: Vec<(WorkflowType, u32)> = KEYWORD_TABLE
        .iter()
        .map(|(workflow, keywords)| {
            let score = keywords
                .iter()
                .filter(|k| lower_text.contains(**k))
                .count() as u32;
            (*workflow, score)
        })
        .collect();

    for (workflow, score) in &mut scores {
        match workflow {
            WorkflowType::OrderManagement if !entities.po_numbers.is_empty() => {
                *score += ENTITY_BOOST;
            }
            WorkflowType::QuoteProcessing if !entities.quote_numbers.is_empty() => {
                *score += ENTITY_BOOST;
            }
            WorkflowType::CustomerSupport if !entities.case_numbers.is_empty() => {
                *score += ENTITY_BOOST;
            }
            _ => {}
        }
    }

    let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    if best == 0 {
        return WorkflowType::General;
    }

    let rank = |workflow: WorkflowType| {
        tie_order
            .iter()
            .position(|w| *w == workflow)
            .unwrap_or(tie_order.len())
    };
    scores
        .into_iter()
        .filter(|(_, s)| *s == best)
        .min_by_key(|(w, _)| rank(*w))
        .map_or(WorkflowType::General, |(w, _)| w)
}
