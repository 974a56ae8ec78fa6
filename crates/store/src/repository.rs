use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mailsift_core::{
    Chain, ChainId, Email, EmailId, Event, MessageId, Phase, PhaseResult, SlaStatus, TaskId,
    WorkflowTask,
};

use crate::error::StoreError;

/// Result of a version-checked task upsert.
#[derive(Debug, Clone)]
pub enum TaskCasResult {
    /// The write succeeded.
    Ok,
    /// The expected version did not match; the caller should re-read
    /// the current task, merge, and retry.
    Conflict { current: Box<WorkflowTask> },
}

/// Point-in-time collection counts for dashboards and health checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub emails: usize,
    pub phase1_results: usize,
    pub phase2_results: usize,
    pub phase3_results: usize,
    pub chains: usize,
    pub tasks: usize,
    pub events: usize,
}

/// Typed storage for the pipeline's durable state.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// All writes are idempotent by primary key so at-least-once delivery
/// upstream converges.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Store an email, idempotent by `message_id`. Returns `true` if the
    /// email was newly inserted, `false` if the message id was already
    /// present (the stored email is left untouched).
    async fn put_email(&self, email: &Email) -> Result<bool, StoreError>;

    /// Fetch an email by id.
    async fn get_email(&self, email_id: &EmailId) -> Result<Option<Email>, StoreError>;

    /// Fetch an email by message id. Replayed deliveries resolve to the
    /// originally stored record through this lookup.
    async fn get_email_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<Email>, StoreError>;

    /// Store a phase result, idempotent by `(email_id, phase)`.
    ///
    /// Rejects with [`StoreError::InvariantViolation`] when the
    /// predecessor phase is absent or not `ok`.
    async fn put_phase_result(
        &self,
        email_id: &EmailId,
        result: &PhaseResult,
    ) -> Result<(), StoreError>;

    /// Fetch one phase result.
    async fn get_phase_result(
        &self,
        email_id: &EmailId,
        phase: Phase,
    ) -> Result<Option<PhaseResult>, StoreError>;

    /// All phase results for an email, in phase order.
    async fn list_phase_results(&self, email_id: &EmailId)
    -> Result<Vec<PhaseResult>, StoreError>;

    /// Version-checked chain write: the incoming version must be exactly
    /// one above the stored version (or the chain must be new).
    async fn upsert_chain(&self, chain: &Chain) -> Result<(), StoreError>;

    /// Fetch a chain by id.
    async fn get_chain(&self, chain_id: &ChainId) -> Result<Option<Chain>, StoreError>;

    /// Compare-and-swap task write keyed on `version`.
    async fn upsert_task(&self, task: &WorkflowTask) -> Result<TaskCasResult, StoreError>;

    /// Fetch a task by id.
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<WorkflowTask>, StoreError>;

    /// Fetch the task materialized for an email, if any.
    async fn get_task_by_email(
        &self,
        email_id: &EmailId,
    ) -> Result<Option<WorkflowTask>, StoreError>;

    /// Append one event, assigning its monotonic `event_id`. Returns the
    /// stamped event.
    async fn append_event(&self, event: Event) -> Result<Event, StoreError>;

    /// Transactional group: phase result (when present), task upsert,
    /// and event appends land together, so subscribers never observe a
    /// task without its backing phase result. Returns the stamped
    /// events. A task version conflict fails the whole group.
    async fn commit_task_group(
        &self,
        email_id: &EmailId,
        phase_result: Option<&PhaseResult>,
        task: &WorkflowTask,
        events: Vec<Event>,
    ) -> Result<Vec<Event>, StoreError>;

    /// All tasks. Dashboards and the SLA tracker scan this.
    async fn list_tasks(&self) -> Result<Vec<WorkflowTask>, StoreError>;

    /// Tasks currently in the given SLA status.
    async fn list_tasks_by_status(
        &self,
        status: SlaStatus,
    ) -> Result<Vec<WorkflowTask>, StoreError>;

    /// Tasks whose deadline falls strictly before `t`.
    async fn list_tasks_by_sla_deadline_before(
        &self,
        t: DateTime<Utc>,
    ) -> Result<Vec<WorkflowTask>, StoreError>;

    /// Chains with completeness in `lo..=hi`.
    async fn get_chains_by_completeness_range(
        &self,
        lo: u8,
        hi: u8,
    ) -> Result<Vec<Chain>, StoreError>;

    /// Collection counts.
    async fn pipeline_stats(&self) -> Result<StoreStats, StoreError>;

    /// Emails with no materialized task, paired with their highest `ok`
    /// phase. The orchestrator re-enqueues these on restart.
    async fn list_unfinished_emails(
        &self,
    ) -> Result<Vec<(Email, Option<Phase>)>, StoreError>;
}
