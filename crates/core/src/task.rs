use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::ActionItem;
use crate::route::RouteDecision;
use crate::sla::SlaStatus;
use crate::types::{ChainId, EmailId, TaskId};
use crate::workflow::WorkflowType;

/// Operational priority of a workflow task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Short lowercase label for logging and event payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operational record materialized for each analyzed email, the unit
/// dashboards consume.
///
/// Mutated monotonically: every update bumps `version`, and the store
/// rejects writes that do not CAS on the current version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub task_id: TaskId,
    pub email_id: EmailId,
    pub chain_id: Option<ChainId>,
    pub workflow_type: WorkflowType,
    pub priority: Priority,
    /// Traffic-light SLA status; a pure function of `priority`,
    /// `received_at`, and the clock.
    pub status: SlaStatus,
    pub owner: Option<String>,
    /// When the email entered the system; SLA elapsed time is measured
    /// from here.
    pub received_at: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub action_items: Vec<ActionItem>,
    pub strategic_notes: Option<String>,
    /// Estimated revenue at risk, minor units.
    pub revenue_at_risk: Option<i64>,
    /// The routing decision that produced this task, kept for audit.
    pub routing: RouteDecision,
    /// Set when a later phase failed and the task was materialized from
    /// earlier results only.
    #[serde(default)]
    pub degraded: bool,
    /// Strictly monotonic update counter.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTask {
    /// Create a version-1 task for an email.
    #[must_use]
    pub fn new(
        email_id: EmailId,
        workflow_type: WorkflowType,
        priority: Priority,
        received_at: DateTime<Utc>,
        sla_deadline: DateTime<Utc>,
        routing: RouteDecision,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: TaskId::new(Uuid::new_v4().to_string()),
            email_id,
            chain_id: None,
            workflow_type,
            priority,
            status: SlaStatus::Green,
            owner: None,
            received_at,
            sla_deadline,
            action_items: Vec::new(),
            strategic_notes: None,
            revenue_at_risk: None,
            routing,
            degraded: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Associate the task with a conversation chain.
    #[must_use]
    pub fn with_chain(mut self, chain_id: impl Into<ChainId>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    /// Set the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Record an update at `now`, bumping the version.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
