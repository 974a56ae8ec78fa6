use std::sync::Arc;

use tracing::{debug, warn};

use mailsift_bus::EventBus;
use mailsift_core::{
    Chain, Clock, Email, ErrorKind, Event, EventTopic, Phase1Result, Phase2Result, Phase3Result,
    PhaseResult, Priority, RouteDecision, SlaPolicy, WorkflowTask, sla_status_for_deadline,
};
use mailsift_store::{Repository, StoreError};

use crate::metrics::PipelineMetrics;

/// CAS retries on a task upsert before the update is abandoned for this
/// round. The next update (or the SLA tracker) will converge it.
const MAX_CAS_RETRIES: u32 = 3;

/// Everything known about an email at materialization time.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeInput<'a> {
    pub email: &'a Email,
    pub chain: Option<&'a Chain>,
    pub phase1: &'a Phase1Result,
    pub phase2: Option<&'a Phase2Result>,
    pub phase3: Option<&'a Phase3Result>,
    pub route: RouteDecision,
    pub priority: Priority,
    /// A later routed phase failed; the task carries the best available
    /// earlier data.
    pub degraded: bool,
    /// The final phase result, committed atomically with the task so
    /// subscribers never observe one without the other.
    pub final_phase_result: Option<&'a PhaseResult>,
}

/// Materializes and updates workflow tasks from pipeline output.
pub struct TaskGenerator {
    repo: Arc<dyn Repository>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    policy: SlaPolicy,
    at_risk_fraction: f64,
    metrics: Arc<PipelineMetrics>,
}

impl TaskGenerator {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        policy: SlaPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let at_risk_fraction = policy.at_risk_fraction;
        Self {
            repo,
            bus,
            clock,
            policy,
            at_risk_fraction,
            metrics,
        }
    }

    /// Create or update the task for an email, commit it with its
    /// backing phase result, and publish the resulting events.
    pub async fn materialize(
        &self,
        input: MaterializeInput<'_>,
    ) -> Result<WorkflowTask, ErrorKind> {
        let mut attempt = 0u32;
        loop {
            let existing = self
                .repo
                .get_task_by_email(&input.email.id)
                .await
                .map_err(|e| e.kind())?;
            let is_update = existing.is_some();
            let task = self.build_task(&input, existing);

            let topic = if is_update {
                EventTopic::TaskUpdated
            } else {
                EventTopic::TaskCreated
            };
            let event = Event::new(
                topic,
                task.task_id.as_str(),
                task_payload(&task),
                self.clock.now(),
            );

            match self
                .repo
                .commit_task_group(
                    &input.email.id,
                    input.final_phase_result,
                    &task,
                    vec![event],
                )
                .await
            {
                Ok(stamped) => {
                    for event in stamped {
                        self.bus.publish(event);
                    }
                    self.metrics
                        .tasks_materialized
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if task.degraded {
                        self.metrics
                            .tasks_degraded
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    self.metrics
                        .record_phase_mix(input.phase2.is_some(), input.phase3.is_some());
                    debug!(
                        task_id = %task.task_id,
                        email_id = %input.email.id,
                        version = task.version,
                        degraded = task.degraded,
                        "task materialized"
                    );
                    return Ok(task);
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_CAS_RETRIES => {
                    // A concurrent writer (SLA tracker) advanced the
                    // task; re-read and rebuild on top of it.
                    attempt += 1;
                    warn!(
                        email_id = %input.email.id,
                        attempt,
                        "task upsert conflict, re-reading"
                    );
                }
                Err(e) => return Err(e.kind()),
            }
        }
    }

    fn build_task(
        &self,
        input: &MaterializeInput<'_>,
        existing: Option<WorkflowTask>,
    ) -> WorkflowTask {
        let now = self.clock.now();
        let email = input.email;

        let workflow_type = input
            .phase2
            .map_or(input.phase1.workflow_hint, |p2| p2.workflow_type);

        // Policy sets the allowance; the analyst may only narrow it.
        let policy_hours = self.policy.hours_for(input.priority);
        let effective_hours = input
            .phase2
            .map_or(policy_hours, |p2| p2.sla_hours.min(policy_hours));
        let sla_deadline = email.received_at + chrono::Duration::hours(i64::from(effective_hours));

        let mut task = match existing {
            Some(mut task) => {
                task.touch(now);
                task
            }
            None => WorkflowTask::new(
                email.id.clone(),
                workflow_type,
                input.priority,
                email.received_at,
                sla_deadline,
                input.route,
                now,
            ),
        };

        task.workflow_type = workflow_type;
        task.priority = input.priority;
        task.sla_deadline = sla_deadline;
        task.routing = input.route;
        task.degraded = input.degraded;
        task.chain_id = input.chain.map(|c| c.chain_id.clone());
        task.status = sla_status_for_deadline(
            email.received_at,
            sla_deadline,
            now,
            self.at_risk_fraction,
        );

        if let Some(phase2) = input.phase2 {
            task.action_items = phase2.action_items.clone();
            if task.owner.is_none() {
                task.owner = phase2
                    .action_items
                    .iter()
                    .find_map(|item| item.owner.clone());
            }
        }
        if let Some(phase3) = input.phase3 {
            task.strategic_notes = Some(phase3.executive_summary.clone());
            task.revenue_at_risk = Some(phase3.revenue_impact.immediate_minor);
        }
        task
    }
}

fn task_payload(task: &WorkflowTask) -> serde_json::Value {
    serde_json::json!({
        "task_id": task.task_id.as_str(),
        "email_id": task.email_id.as_str(),
        "workflow_type": task.workflow_type.label(),
        "priority": task.priority.as_str(),
        "status": task.status.as_str(),
        "sla_deadline": task.sla_deadline.to_rfc3339(),
        "routing": task.routing.label(),
        "degraded": task.degraded,
        "version": task.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mailsift_core::{Entities, ManualClock, Phase, SlaStatus, WorkflowType};
    use mailsift_store::MemoryRepository;

    fn generator(clock: ManualClock) -> (TaskGenerator, Arc<MemoryRepository>, Arc<EventBus>) {
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(EventBus::default());
        let generator = TaskGenerator::new(
            repo.clone(),
            bus.clone(),
            Arc::new(clock),
            SlaPolicy::default(),
            Arc::new(PipelineMetrics::new()),
        );
        (generator, repo, bus)
    }

    fn email_received_at(at: chrono::DateTime<Utc>) -> Email {
        Email::new("<m@example.com>", "buyer@example.com", "subject", "body", at)
    }

    fn phase1() -> Phase1Result {
        Phase1Result {
            workflow_hint: WorkflowType::QuoteProcessing,
            ..Phase1Result::default()
        }
    }

    fn phase2() -> Phase2Result {
        Phase2Result {
            workflow_type: WorkflowType::OrderManagement,
            action_items: vec![mailsift_core::ActionItem {
                task: "confirm stock".into(),
                owner: Some("ops".into()),
                deadline: None,
                priority: Priority::High,
            }],
            sla_hours: 8,
            risk_flags: Vec::new(),
            validated_entities: Entities::default(),
            rejected_entities: Vec::new(),
            summary: "order needs stock confirmation".into(),
        }
    }

    #[tokio::test]
    async fn first_materialization_creates_task_and_event() {
        let t0 = "2025-01-10T08:00:00Z".parse().unwrap();
        let (generator, repo, bus) = generator(ManualClock::new(t0));
        let email = email_received_at(t0);
        repo.put_email(&email).await.unwrap();
        let p1 = phase1();
        let p1_result = PhaseResult::ok(Phase::Triage, serde_json::json!({}), 1);
        repo.put_phase_result(&email.id, &p1_result).await.unwrap();

        let task = generator
            .materialize(MaterializeInput {
                email: &email,
                chain: None,
                phase1: &p1,
                phase2: None,
                phase3: None,
                route: RouteDecision::terminal(4),
                priority: Priority::Medium,
                degraded: false,
                final_phase_result: None,
            })
            .await
            .unwrap();

        assert_eq!(task.version, 1);
        assert_eq!(task.workflow_type, WorkflowType::QuoteProcessing);
        assert_eq!(task.status, SlaStatus::Green);
        assert_eq!(bus.len(), 1, "task.created published");
        assert!(repo.get_task_by_email(&email.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_materialization_updates_with_higher_version() {
        let t0 = "2025-01-10T08:00:00Z".parse().unwrap();
        let (generator, repo, bus) = generator(ManualClock::new(t0));
        let email = email_received_at(t0);
        repo.put_email(&email).await.unwrap();
        repo.put_phase_result(&email.id, &PhaseResult::ok(Phase::Triage, serde_json::json!({}), 1))
            .await
            .unwrap();

        let p1 = phase1();
        let input = MaterializeInput {
            email: &email,
            chain: None,
            phase1: &p1,
            phase2: None,
            phase3: None,
            route: RouteDecision::terminal(4),
            priority: Priority::Medium,
            degraded: false,
            final_phase_result: None,
        };
        let first = generator.materialize(input).await.unwrap();
        let second = generator.materialize(input).await.unwrap();

        assert_eq!(first.task_id, second.task_id, "single task per email");
        assert_eq!(second.version, 2);
        assert_eq!(bus.len(), 2, "created then updated");
    }

    #[tokio::test]
    async fn analyst_narrows_sla_but_never_widens() {
        let t0 = "2025-01-10T08:00:00Z".parse().unwrap();
        let (generator, repo, _) = generator(ManualClock::new(t0));
        let email = email_received_at(t0);
        repo.put_email(&email).await.unwrap();
        repo.put_phase_result(&email.id, &PhaseResult::ok(Phase::Triage, serde_json::json!({}), 1))
            .await
            .unwrap();

        let p1 = phase1();
        let p2 = phase2();
        let p2_result = PhaseResult::ok(Phase::Analyst, serde_json::json!({}), 900);
        // Medium policy is 72h; the analyst narrowed to 8h.
        let task = generator
            .materialize(MaterializeInput {
                email: &email,
                chain: None,
                phase1: &p1,
                phase2: Some(&p2),
                phase3: None,
                route: RouteDecision::analyst_only(3),
                priority: Priority::Medium,
                degraded: false,
                final_phase_result: Some(&p2_result),
            })
            .await
            .unwrap();
        assert_eq!(task.sla_deadline, t0 + Duration::hours(8));
        assert_eq!(task.workflow_type, WorkflowType::OrderManagement);
        assert_eq!(task.owner.as_deref(), Some("ops"));

        // A widening attempt is clamped to policy.
        let mut wide = phase2();
        wide.sla_hours = 1_000;
        let task = generator
            .materialize(MaterializeInput {
                email: &email,
                chain: None,
                phase1: &p1,
                phase2: Some(&wide),
                phase3: None,
                route: RouteDecision::analyst_only(3),
                priority: Priority::Medium,
                degraded: false,
                final_phase_result: None,
            })
            .await
            .unwrap();
        assert_eq!(task.sla_deadline, t0 + Duration::hours(72));
    }

    #[tokio::test]
    async fn strategist_output_lands_on_task() {
        let t0 = "2025-01-10T08:00:00Z".parse().unwrap();
        let (generator, repo, _) = generator(ManualClock::new(t0));
        let email = email_received_at(t0);
        repo.put_email(&email).await.unwrap();
        repo.put_phase_result(&email.id, &PhaseResult::ok(Phase::Triage, serde_json::json!({}), 1))
            .await
            .unwrap();
        repo.put_phase_result(&email.id, &PhaseResult::ok(Phase::Analyst, serde_json::json!({}), 1))
            .await
            .unwrap();

        let p1 = phase1();
        let p2 = phase2();
        let p3 = Phase3Result {
            executive_summary: "deal at risk".into(),
            revenue_impact: mailsift_core::RevenueImpact {
                immediate_minor: 4_800_000,
                potential_minor: 20_000_000,
            },
            competitive_strategy: Vec::new(),
            cross_email_patterns: Vec::new(),
            escalation_needed: true,
        };
        let p3_result = PhaseResult::ok(Phase::Strategist, serde_json::json!({}), 30_000);
        let task = generator
            .materialize(MaterializeInput {
                email: &email,
                chain: None,
                phase1: &p1,
                phase2: Some(&p2),
                phase3: Some(&p3),
                route: RouteDecision::full(1),
                priority: Priority::Critical,
                degraded: false,
                final_phase_result: Some(&p3_result),
            })
            .await
            .unwrap();
        assert_eq!(task.strategic_notes.as_deref(), Some("deal at risk"));
        assert_eq!(task.revenue_at_risk, Some(4_800_000));
        // Critical policy (4h) is tighter than the analyst's 8h.
        assert_eq!(task.sla_deadline, t0 + Duration::hours(4));
    }

    #[tokio::test]
    async fn degraded_flag_is_carried() {
        let t0 = "2025-01-10T08:00:00Z".parse().unwrap();
        let (generator, repo, _) = generator(ManualClock::new(t0));
        let email = email_received_at(t0);
        repo.put_email(&email).await.unwrap();
        repo.put_phase_result(&email.id, &PhaseResult::ok(Phase::Triage, serde_json::json!({}), 1))
            .await
            .unwrap();

        let p1 = phase1();
        let failed_p2 = PhaseResult::failed(Phase::Analyst, "parse failure", 2_000);
        let task = generator
            .materialize(MaterializeInput {
                email: &email,
                chain: None,
                phase1: &p1,
                phase2: None,
                phase3: None,
                route: RouteDecision::analyst_only(5),
                priority: Priority::Medium,
                degraded: true,
                final_phase_result: Some(&failed_p2),
            })
            .await
            .unwrap();
        assert!(task.degraded);
        // The failed phase result landed with the task.
        assert!(
            repo.get_phase_result(&email.id, Phase::Analyst)
                .await
                .unwrap()
                .is_some()
        );
    }
}
