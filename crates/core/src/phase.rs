use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Entities;
use crate::types::ModelId;
use crate::workflow::{LifecycleMarker, WorkflowType};

/// One of the three analysis stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Triage,
    Analyst,
    Strategist,
}

impl Phase {
    /// Numeric phase for persistence keys and payload provenance.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Triage => 1,
            Self::Analyst => 2,
            Self::Strategist => 3,
        }
    }

    /// The phase that must have completed before this one may run.
    #[must_use]
    pub fn predecessor(self) -> Option<Self> {
        match self {
            Self::Triage => None,
            Self::Analyst => Some(Self::Triage),
            Self::Strategist => Some(Self::Analyst),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "phase{}", self.as_u8())
    }
}

/// Outcome status of a phase run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Ok,
    Skipped,
    Failed,
}

/// The persisted record of one phase run for one email.
///
/// Append-only: retries overwrite the same `(email_id, phase)` key in the
/// store rather than creating new records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    pub model_id: Option<ModelId>,
    /// Phase-specific payload; field names are stable, consumers must
    /// tolerate added fields.
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
}

impl PhaseResult {
    /// Create an `ok` result carrying the given payload.
    #[must_use]
    pub fn ok(phase: Phase, payload: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            phase,
            status: PhaseStatus::Ok,
            duration_ms,
            model_id: None,
            payload,
            produced_at: Utc::now(),
        }
    }

    /// Create a `failed` result with an error description payload.
    #[must_use]
    pub fn failed(phase: Phase, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            phase,
            status: PhaseStatus::Failed,
            duration_ms,
            model_id: None,
            payload: serde_json::json!({ "error": error.into() }),
            produced_at: Utc::now(),
        }
    }

    /// Attach the model that produced this result.
    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<ModelId>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// Output of Phase-1 triage. Produced for every ingested email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase1Result {
    pub entities: Entities,
    pub workflow_hint: WorkflowType,
    /// Urgency score in `0..=3`.
    pub urgency_score: u8,
    pub key_phrases: Vec<String>,
    pub lifecycle_marker: LifecycleMarker,
}

/// A concrete follow-up item produced by the analyst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub task: String,
    pub owner: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub priority: crate::task::Priority,
}

/// An entity the analyst rejected, with the reason recorded for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedEntity {
    pub value: String,
    pub reason: String,
}

/// Output of Phase-2 analysis. Extends the triage result; entities are
/// validated and enriched, never re-extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase2Result {
    /// Final workflow classification.
    pub workflow_type: WorkflowType,
    pub action_items: Vec<ActionItem>,
    /// SLA allowance in hours; starts from policy, may be narrowed.
    pub sla_hours: u32,
    pub risk_flags: Vec<String>,
    /// Phase-1 entities plus analyst additions and confidence
    /// adjustments.
    pub validated_entities: Entities,
    /// Entities from Phase-1 the analyst rejected, with reasons.
    #[serde(default)]
    pub rejected_entities: Vec<RejectedEntity>,
    /// Short summary, at most 600 characters.
    pub summary: String,
}

/// Revenue impact estimated by the strategist, minor units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevenueImpact {
    pub immediate_minor: i64,
    pub potential_minor: i64,
}

/// Output of Phase-3 strategic analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase3Result {
    pub executive_summary: String,
    pub revenue_impact: RevenueImpact,
    pub competitive_strategy: Vec<String>,
    pub cross_email_patterns: Vec<String>,
    pub escalation_needed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_numbering_and_order() {
        assert_eq!(Phase::Triage.as_u8(), 1);
        assert_eq!(Phase::Analyst.as_u8(), 2);
        assert_eq!(Phase::Strategist.as_u8(), 3);
        assert!(Phase::Triage < Phase::Analyst);
        assert!(Phase::Analyst < Phase::Strategist);
    }

    #[test]
    fn phase_predecessors() {
        assert_eq!(Phase::Triage.predecessor(), None);
        assert_eq!(Phase::Analyst.predecessor(), Some(Phase::Triage));
        assert_eq!(Phase::Strategist.predecessor(), Some(Phase::Analyst));
    }

    #[test]
    fn phase_result_ok() {
        let result = PhaseResult::ok(Phase::Triage, serde_json::json!({"urgency_score": 2}), 4);
        assert_eq!(result.status, PhaseStatus::Ok);
        assert_eq!(result.duration_ms, 4);
        assert!(result.model_id.is_none());
    }

    #[test]
    fn phase_result_failed_carries_error() {
        let result = PhaseResult::failed(Phase::Analyst, "model timeout", 45_000);
        assert_eq!(result.status, PhaseStatus::Failed);
        assert_eq!(result.payload["error"], "model timeout");
    }

    #[test]
    fn phase_result_with_model() {
        let result = PhaseResult::ok(Phase::Analyst, serde_json::Value::Null, 900)
            .with_model("primary-12b");
        assert_eq!(result.model_id.as_ref().unwrap().as_str(), "primary-12b");
    }

    #[test]
    fn phase_serde_tag_is_snake_case() {
        let json = serde_json::to_string(&Phase::Strategist).unwrap();
        assert_eq!(json, "\"strategist\"");
    }

    #[test]
    fn phase_result_serde_roundtrip() {
        let result = PhaseResult::ok(
            Phase::Analyst,
            serde_json::json!({"summary": "quote requested"}),
            1200,
        )
        .with_model("primary-12b");
        let json = serde_json::to_string(&result).unwrap();
        let back: PhaseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase, Phase::Analyst);
        assert_eq!(back.payload["summary"], "quote requested");
    }
}
