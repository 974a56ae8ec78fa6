use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use mailsift_core::{
    Chain, ChainId, Email, EmailId, Event, MessageId, Phase, PhaseResult, PhaseStatus, SlaStatus,
    TaskId, WorkflowTask,
};

use crate::error::StoreError;
use crate::repository::{Repository, StoreStats, TaskCasResult};

/// In-memory [`Repository`] backed by `DashMap` collections.
///
/// Suitable for tests, development, and single-node deployments; durable
/// backends implement the same trait and must pass the conformance suite
/// in [`crate::testing`].
#[derive(Debug, Default)]
pub struct MemoryRepository {
    emails: DashMap<String, Email>,
    message_index: DashMap<String, EmailId>,
    phase_results: DashMap<(String, u8), PhaseResult>,
    chains: DashMap<String, Chain>,
    tasks: DashMap<String, WorkflowTask>,
    task_by_email: DashMap<String, TaskId>,
    events: Mutex<Vec<Event>>,
    event_sequence: AtomicU64,
    /// Serializes transactional groups; held only across in-memory
    /// writes, never across await points.
    commit_lock: Mutex<()>,
}

impl MemoryRepository {
    /// Create a new, empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_phase_predecessor(
        &self,
        email_id: &EmailId,
        result: &PhaseResult,
    ) -> Result<(), StoreError> {
        let Some(predecessor) = result.phase.predecessor() else {
            return Ok(());
        };
        let key = (email_id.as_str().to_owned(), predecessor.as_u8());
        match self.phase_results.get(&key) {
            Some(prior) if prior.status == PhaseStatus::Ok => Ok(()),
            Some(prior) => Err(StoreError::InvariantViolation(format!(
                "{} for {email_id} requires {predecessor} to be ok, found {:?}",
                result.phase, prior.status
            ))),
            None => Err(StoreError::InvariantViolation(format!(
                "{} for {email_id} requires {predecessor} first",
                result.phase
            ))),
        }
    }

    fn stamp_event(&self, mut event: Event) -> Event {
        event.event_id = self.event_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        event
    }

    fn write_task(&self, task: &WorkflowTask) -> Result<TaskCasResult, StoreError> {
        let key = task.task_id.as_str().to_owned();
        match self.tasks.get(&key) {
            None => {
                if task.version != 1 {
                    return Err(StoreError::InvariantViolation(format!(
                        "new task {} must start at version 1, got {}",
                        task.task_id, task.version
                    )));
                }
            }
            Some(current) => {
                if task.version != current.version + 1 {
                    return Ok(TaskCasResult::Conflict {
                        current: Box::new(current.clone()),
                    });
                }
            }
        }
        self.tasks.insert(key, task.clone());
        self.task_by_email
            .insert(task.email_id.as_str().to_owned(), task.task_id.clone());
        Ok(TaskCasResult::Ok)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn put_email(&self, email: &Email) -> Result<bool, StoreError> {
        let message_key = email.message_id.as_str().to_owned();
        // Dedup on message id first; replays keep the original record.
        match self.message_index.entry(message_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(email.id.clone());
                self.emails
                    .insert(email.id.as_str().to_owned(), email.clone());
                Ok(true)
            }
        }
    }

    async fn get_email(&self, email_id: &EmailId) -> Result<Option<Email>, StoreError> {
        Ok(self.emails.get(email_id.as_str()).map(|e| e.clone()))
    }

    async fn get_email_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<Email>, StoreError> {
        let Some(email_id) = self.message_index.get(message_id.as_str()) else {
            return Ok(None);
        };
        Ok(self.emails.get(email_id.as_str()).map(|e| e.clone()))
    }

    async fn put_phase_result(
        &self,
        email_id: &EmailId,
        result: &PhaseResult,
    ) -> Result<(), StoreError> {
        self.check_phase_predecessor(email_id, result)?;
        self.phase_results.insert(
            (email_id.as_str().to_owned(), result.phase.as_u8()),
            result.clone(),
        );
        Ok(())
    }

    async fn get_phase_result(
        &self,
        email_id: &EmailId,
        phase: Phase,
    ) -> Result<Option<PhaseResult>, StoreError> {
        let key = (email_id.as_str().to_owned(), phase.as_u8());
        Ok(self.phase_results.get(&key).map(|r| r.clone()))
    }

    async fn list_phase_results(
        &self,
        email_id: &EmailId,
    ) -> Result<Vec<PhaseResult>, StoreError> {
        let mut results: Vec<PhaseResult> = [Phase::Triage, Phase::Analyst, Phase::Strategist]
            .iter()
            .filter_map(|phase| {
                let key = (email_id.as_str().to_owned(), phase.as_u8());
                self.phase_results.get(&key).map(|r| r.clone())
            })
            .collect();
        results.sort_by_key(|r| r.phase);
        Ok(results)
    }

    async fn upsert_chain(&self, chain: &Chain) -> Result<(), StoreError> {
        let key = chain.chain_id.as_str().to_owned();
        if let Some(current) = self.chains.get(&key)
            && chain.version <= current.version
        {
            return Err(StoreError::Conflict {
                expected: current.version + 1,
                current: current.version,
            });
        }
        self.chains.insert(key, chain.clone());
        Ok(())
    }

    async fn get_chain(&self, chain_id: &ChainId) -> Result<Option<Chain>, StoreError> {
        Ok(self.chains.get(chain_id.as_str()).map(|c| c.clone()))
    }

    async fn upsert_task(&self, task: &WorkflowTask) -> Result<TaskCasResult, StoreError> {
        let _guard = self.commit_lock.lock();
        self.write_task(task)
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<WorkflowTask>, StoreError> {
        Ok(self.tasks.get(task_id.as_str()).map(|t| t.clone()))
    }

    async fn get_task_by_email(
        &self,
        email_id: &EmailId,
    ) -> Result<Option<WorkflowTask>, StoreError> {
        let Some(task_id) = self.task_by_email.get(email_id.as_str()) else {
            return Ok(None);
        };
        Ok(self.tasks.get(task_id.as_str()).map(|t| t.clone()))
    }

    async fn append_event(&self, event: Event) -> Result<Event, StoreError> {
        let stamped = self.stamp_event(event);
        self.events.lock().push(stamped.clone());
        Ok(stamped)
    }

    async fn commit_task_group(
        &self,
        email_id: &EmailId,
        phase_result: Option<&PhaseResult>,
        task: &WorkflowTask,
        events: Vec<Event>,
    ) -> Result<Vec<Event>, StoreError> {
        if let Some(result) = phase_result {
            self.check_phase_predecessor(email_id, result)?;
        }

        let _guard = self.commit_lock.lock();
        match self.write_task(task)? {
            TaskCasResult::Ok => {}
            TaskCasResult::Conflict { current } => {
                return Err(StoreError::Conflict {
                    expected: current.version + 1,
                    current: current.version,
                });
            }
        }
        if let Some(result) = phase_result {
            self.phase_results.insert(
                (email_id.as_str().to_owned(), result.phase.as_u8()),
                result.clone(),
            );
        }
        let mut stamped = Vec::with_capacity(events.len());
        {
            let mut log = self.events.lock();
            for event in events {
                let event = self.stamp_event(event);
                log.push(event.clone());
                stamped.push(event);
            }
        }
        Ok(stamped)
    }

    async fn list_tasks(&self) -> Result<Vec<WorkflowTask>, StoreError> {
        Ok(self.tasks.iter().map(|t| t.clone()).collect())
    }

    async fn list_tasks_by_status(
        &self,
        status: SlaStatus,
    ) -> Result<Vec<WorkflowTask>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect())
    }

    async fn list_tasks_by_sla_deadline_before(
        &self,
        t: DateTime<Utc>,
    ) -> Result<Vec<WorkflowTask>, StoreError> {
        let mut tasks: Vec<WorkflowTask> = self
            .tasks
            .iter()
            .filter(|task| task.sla_deadline < t)
            .map(|task| task.clone())
            .collect();
        tasks.sort_by_key(|task| task.sla_deadline);
        Ok(tasks)
    }

    async fn get_chains_by_completeness_range(
        &self,
        lo: u8,
        hi: u8,
    ) -> Result<Vec<Chain>, StoreError> {
        Ok(self
            .chains
            .iter()
            .filter(|c| c.completeness >= lo && c.completeness <= hi)
            .map(|c| c.clone())
            .collect())
    }

    async fn pipeline_stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats {
            emails: self.emails.len(),
            chains: self.chains.len(),
            tasks: self.tasks.len(),
            events: self.events.lock().len(),
            ..StoreStats::default()
        };
        for entry in &self.phase_results {
            match entry.key().1 {
                1 => stats.phase1_results += 1,
                2 => stats.phase2_results += 1,
                _ => stats.phase3_results += 1,
            }
        }
        Ok(stats)
    }

    async fn list_unfinished_emails(
        &self,
    ) -> Result<Vec<(Email, Option<Phase>)>, StoreError> {
        let mut unfinished = Vec::new();
        for entry in &self.emails {
            let email = entry.value();
            if self.task_by_email.contains_key(email.id.as_str()) {
                continue;
            }
            let highest_ok = [Phase::Strategist, Phase::Analyst, Phase::Triage]
                .into_iter()
                .find(|phase| {
                    let key = (email.id.as_str().to_owned(), phase.as_u8());
                    self.phase_results
                        .get(&key)
                        .is_some_and(|r| r.status == PhaseStatus::Ok)
                });
            unfinished.push((email.clone(), highest_ok));
        }
        Ok(unfinished)
    }
}

// Keep a compile-time check that the trait object stays usable.
#[allow(dead_code)]
fn _assert_dyn_repository(_: &dyn Repository) {}

/// `MessageId` lookups are served by the index, so expose a helper for
/// ingest-side dedup probes.
impl MemoryRepository {
    /// Whether a message id has been stored already.
    #[must_use]
    pub fn contains_message(&self, message_id: &MessageId) -> bool {
        self.message_index.contains_key(message_id.as_str())
    }
}
