use std::fmt::Write;

use mailsift_core::{Chain, Email, Phase1Result, Phase2Result};

/// Longest email body slice included in a prompt. Bodies beyond this are
/// truncated with a marker; analysis quality degrades gracefully while
/// the token budget stays bounded.
const MAX_BODY_CHARS: usize = 6_000;

fn truncated_body(email: &Email) -> String {
    if email.body_text.len() <= MAX_BODY_CHARS {
        return email.body_text.clone();
    }
    let mut end = MAX_BODY_CHARS;
    while !email.body_text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... truncated]", &email.body_text[..end])
}

fn chain_context(chain: &Chain) -> String {
    format!(
        "messages={} completeness={} lifecycle={:?} continuity={}",
        chain.len(),
        chain.completeness,
        chain.lifecycle,
        chain.evidence.has_reference_continuity(),
    )
}

/// Build the analyst prompt: email, triage output, and chain context,
/// with a strict JSON reply contract.
#[must_use]
pub fn analyst_prompt(email: &Email, phase1: &Phase1Result, chain: &Chain) -> String {
    let triage_json =
        serde_json::to_string(phase1).unwrap_or_else(|_| "{}".to_owned());
    let mut prompt = String::with_capacity(2_048);
    let _ = write!(
        prompt,
        "You are a business email analyst. Validate and enrich the triage \
         output below. Do not re-extract entities: you may add entities the \
         triage missed, adjust confidence on existing ones, or reject \
         entities with a reason, but never silently drop one.\n\n\
         Email:\nFrom: {sender}\nSubject: {subject}\nReceived: {received}\n\
         Body:\n{body}\n\n\
         Triage output:\n{triage}\n\n\
         Conversation chain: {chain}\n\n\
         Reply with a single JSON object, no prose, with fields: \
         workflow_type (snake_case taxonomy value), summary (<=600 chars), \
         sla_hours (integer), action_items (array of {{task, owner, \
         deadline, priority}}), risk_flags (array of strings), \
         added_entities (entity sets keyed by category), \
         confidence_adjustments (array of {{value, confidence}}), \
         rejected_entities (array of {{value, reason}}).",
        sender = email.sender_email,
        subject = email.subject,
        received = email.received_at.to_rfc3339(),
        body = truncated_body(email),
        triage = triage_json,
        chain = chain_context(chain),
    );
    prompt
}

/// Build the strategist prompt on top of analyst output. Entity
/// extraction and workflow typing are settled upstream and are out of
/// bounds here.
#[must_use]
pub fn strategist_prompt(
    email: &Email,
    phase1: &Phase1Result,
    phase2: &Phase2Result,
    chain: &Chain,
) -> String {
    let mut prompt = String::with_capacity(2_048);
    let _ = write!(
        prompt,
        "You are a revenue strategist reviewing an analyzed business email. \
         Entity extraction and workflow classification are final; provide \
         strategic context only.\n\n\
         Email subject: {subject}\n\
         Workflow: {workflow}\nAnalyst summary: {summary}\n\
         Risk flags: {risks:?}\nUrgency: {urgency}/3\n\
         Conversation chain: {chain}\n\n\
         Reply with a single JSON object, no prose, with fields: \
         executive_summary (string), revenue_impact ({{immediate_minor, \
         potential_minor}} in minor currency units), competitive_strategy \
         (array of strings), cross_email_patterns (array of strings), \
         escalation_needed (boolean).",
        subject = email.subject,
        workflow = phase2.workflow_type,
        summary = phase2.summary,
        risks = phase2.risk_flags,
        urgency = phase1.urgency_score,
        chain = chain_context(chain),
    );
    prompt
}
