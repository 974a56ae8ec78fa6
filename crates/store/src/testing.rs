use chrono::{Duration, Utc};

use mailsift_core::{
    Email, EmailId, Event, EventTopic, Phase, PhaseResult, Priority, RouteDecision, SlaStatus,
    WorkflowTask, WorkflowType,
};

use crate::error::StoreError;
use crate::repository::{Repository, TaskCasResult};

fn test_email(tag: &str) -> Email {
    let mut email = Email::new(
        format!("<{tag}@conformance.example>"),
        "sender@conformance.example",
        format!("subject {tag}"),
        "body",
        Utc::now(),
    );
    email.id = EmailId::new(format!("conf-{tag}"));
    email
}

fn test_task(email_id: &EmailId) -> WorkflowTask {
    let now = Utc::now();
    WorkflowTask::new(
        email_id.clone(),
        WorkflowType::General,
        Priority::Medium,
        now,
        now + Duration::hours(72),
        RouteDecision::analyst_only(5),
        now,
    )
}

/// Run the full repository conformance test suite.
///
/// Call this from your backend's test module with a fresh repository
/// instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_repository_conformance_tests(repo: &dyn Repository) -> Result<(), StoreError> {
    test_email_idempotent_by_message_id(repo).await?;
    test_phase_order_invariant(repo).await?;
    test_phase_result_overwrite_is_idempotent(repo).await?;
    test_chain_version_check(repo).await?;
    test_task_cas(repo).await?;
    test_event_ids_are_monotonic(repo).await?;
    test_commit_task_group(repo).await?;
    test_queries(repo).await?;
    test_unfinished_scan(repo).await?;
    Ok(())
}

async fn test_email_idempotent_by_message_id(repo: &dyn Repository) -> Result<(), StoreError> {
    let email = test_email("dedup");
    let inserted = repo.put_email(&email).await?;
    assert!(inserted, "first put should insert");

    let mut replay = email.clone();
    replay.subject = "mutated subject".into();
    let inserted = repo.put_email(&replay).await?;
    assert!(!inserted, "replay with same message_id should be a no-op");

    let stored = repo.get_email(&email.id).await?.expect("email stored");
    assert_eq!(stored.subject, email.subject, "original record kept");

    let by_message = repo
        .get_email_by_message(&email.message_id)
        .await?
        .expect("lookup by message id");
    assert_eq!(by_message.id, email.id);
    Ok(())
}

async fn test_phase_order_invariant(repo: &dyn Repository) -> Result<(), StoreError> {
    let email = test_email("order");
    repo.put_email(&email).await?;

    // Phase 2 before phase 1 must be rejected.
    let p2 = PhaseResult::ok(Phase::Analyst, serde_json::json!({}), 5);
    let result = repo.put_phase_result(&email.id, &p2).await;
    assert!(
        matches!(result, Err(StoreError::InvariantViolation(_))),
        "phase 2 without phase 1 should be rejected"
    );

    let p1 = PhaseResult::ok(Phase::Triage, serde_json::json!({}), 2);
    repo.put_phase_result(&email.id, &p1).await?;
    repo.put_phase_result(&email.id, &p2).await?;

    // Phase 3 on top of a failed phase 2 must be rejected.
    let failed_p2 = PhaseResult::failed(Phase::Analyst, "timeout", 45_000);
    repo.put_phase_result(&email.id, &failed_p2).await?;
    let p3 = PhaseResult::ok(Phase::Strategist, serde_json::json!({}), 9);
    let result = repo.put_phase_result(&email.id, &p3).await;
    assert!(
        matches!(result, Err(StoreError::InvariantViolation(_))),
        "phase 3 on failed phase 2 should be rejected"
    );
    Ok(())
}

async fn test_phase_result_overwrite_is_idempotent(
    repo: &dyn Repository,
) -> Result<(), StoreError> {
    let email = test_email("idem");
    repo.put_email(&email).await?;

    let p1 = PhaseResult::ok(Phase::Triage, serde_json::json!({"pass": 1}), 2);
    repo.put_phase_result(&email.id, &p1).await?;
    let retry = PhaseResult::ok(Phase::Triage, serde_json::json!({"pass": 2}), 3);
    repo.put_phase_result(&email.id, &retry).await?;

    let results = repo.list_phase_results(&email.id).await?;
    assert_eq!(results.len(), 1, "same (email, phase) key overwrites");
    assert_eq!(results[0].payload["pass"], 2);
    Ok(())
}

async fn test_chain_version_check(repo: &dyn Repository) -> Result<(), StoreError> {
    let mut chain = mailsift_core::Chain::new("conf-chain", Utc::now());
    chain.version = 1;
    repo.upsert_chain(&chain).await?;

    // Stale write (same version) must conflict.
    let result = repo.upsert_chain(&chain).await;
    assert!(
        matches!(result, Err(StoreError::Conflict { .. })),
        "stale chain write should conflict"
    );

    chain.version = 2;
    chain.completeness = 45;
    repo.upsert_chain(&chain).await?;
    let stored = repo.get_chain(&chain.chain_id).await?.expect("chain stored");
    assert_eq!(stored.completeness, 45);
    Ok(())
}

async fn test_task_cas(repo: &dyn Repository) -> Result<(), StoreError> {
    let email = test_email("cas");
    repo.put_email(&email).await?;
    let task = test_task(&email.id);

    let result = repo.upsert_task(&task).await?;
    assert!(matches!(result, TaskCasResult::Ok), "initial insert");

    // Replaying version 1 conflicts and reports the current record.
    let result = repo.upsert_task(&task).await?;
    match result {
        TaskCasResult::Conflict { current } => assert_eq!(current.version, 1),
        TaskCasResult::Ok => panic!("stale task write should conflict"),
    }

    let mut updated = task.clone();
    updated.touch(Utc::now());
    let result = repo.upsert_task(&updated).await?;
    assert!(matches!(result, TaskCasResult::Ok), "version 2 accepted");

    let stored = repo.get_task(&task.task_id).await?.expect("task stored");
    assert_eq!(stored.version, 2, "version strictly monotonic");
    Ok(())
}

async fn test_event_ids_are_monotonic(repo: &dyn Repository) -> Result<(), StoreError> {
    let mut last = 0u64;
    for n in 0..5 {
        let event = Event::new(
            EventTopic::MetricsUpdated,
            format!("conf-corr-{n}"),
            serde_json::json!({"n": n}),
            Utc::now(),
        );
        let stamped = repo.append_event(event).await?;
        assert!(stamped.event_id > last, "event ids must increase");
        last = stamped.event_id;
    }
    Ok(())
}

async fn test_commit_task_group(repo: &dyn Repository) -> Result<(), StoreError> {
    let email = test_email("group");
    repo.put_email(&email).await?;
    let p1 = PhaseResult::ok(Phase::Triage, serde_json::json!({}), 2);
    repo.put_phase_result(&email.id, &p1).await?;

    let task = test_task(&email.id);
    let p2 = PhaseResult::ok(Phase::Analyst, serde_json::json!({}), 800);
    let events = vec![Event::new(
        EventTopic::TaskCreated,
        task.task_id.as_str(),
        serde_json::json!({"priority": task.priority.as_str()}),
        Utc::now(),
    )];
    let stamped = repo
        .commit_task_group(&email.id, Some(&p2), &task, events)
        .await?;
    assert_eq!(stamped.len(), 1);
    assert!(stamped[0].event_id > 0, "group events are stamped");

    // Everything in the group landed.
    assert!(
        repo.get_phase_result(&email.id, Phase::Analyst)
            .await?
            .is_some()
    );
    assert!(repo.get_task_by_email(&email.id).await?.is_some());
    Ok(())
}

async fn test_queries(repo: &dyn Repository) -> Result<(), StoreError> {
    let email = test_email("query");
    repo.put_email(&email).await?;
    let mut task = test_task(&email.id);
    task.status = SlaStatus::Yellow;
    task.sla_deadline = Utc::now() + Duration::hours(1);
    repo.upsert_task(&task).await?;

    let yellow = repo.list_tasks_by_status(SlaStatus::Yellow).await?;
    assert!(yellow.iter().any(|t| t.task_id == task.task_id));

    let due_soon = repo
        .list_tasks_by_sla_deadline_before(Utc::now() + Duration::hours(2))
        .await?;
    assert!(due_soon.iter().any(|t| t.task_id == task.task_id));

    let not_due = repo
        .list_tasks_by_sla_deadline_before(Utc::now())
        .await?;
    assert!(!not_due.iter().any(|t| t.task_id == task.task_id));

    let mut chain = mailsift_core::Chain::new("conf-chain-range", Utc::now());
    chain.version = 1;
    chain.completeness = 55;
    repo.upsert_chain(&chain).await?;
    let mid = repo.get_chains_by_completeness_range(40, 69).await?;
    assert!(mid.iter().any(|c| c.chain_id == chain.chain_id));
    let high = repo.get_chains_by_completeness_range(70, 100).await?;
    assert!(!high.iter().any(|c| c.chain_id == chain.chain_id));

    let stats = repo.pipeline_stats().await?;
    assert!(stats.emails >= 1);
    assert!(stats.tasks >= 1);
    Ok(())
}

async fn test_unfinished_scan(repo: &dyn Repository) -> Result<(), StoreError> {
    // An email with only a triage result and no task is unfinished.
    let email = test_email("unfinished");
    repo.put_email(&email).await?;
    let p1 = PhaseResult::ok(Phase::Triage, serde_json::json!({}), 2);
    repo.put_phase_result(&email.id, &p1).await?;

    let unfinished = repo.list_unfinished_emails().await?;
    let entry = unfinished
        .iter()
        .find(|(e, _)| e.id == email.id)
        .expect("email should be unfinished");
    assert_eq!(entry.1, Some(Phase::Triage));

    // Materializing a task removes it from the scan.
    let task = test_task(&email.id);
    repo.upsert_task(&task).await?;
    let unfinished = repo.list_unfinished_emails().await?;
    assert!(!unfinished.iter().any(|(e, _)| e.id == email.id));
    Ok(())
}
