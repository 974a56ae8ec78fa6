use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mailsift_bus::EventBus;
use mailsift_core::{Clock, Event, EventTopic, SlaPolicy, SlaStatus, sla_status_for_deadline};
use mailsift_store::{Repository, StoreError};

/// Timer-driven SLA tracking.
///
/// Scans open tasks on an interval, recomputes traffic-light status
/// against the injected clock, and emits transition events only when a
/// status actually changes. A CAS conflict on the bumped task is left
/// for the next tick.
pub struct SlaTracker {
    repo: Arc<dyn Repository>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    policy: SlaPolicy,
    interval: Duration,
}

impl SlaTracker {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        policy: SlaPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            repo,
            bus,
            clock,
            policy,
            interval,
        }
    }

    /// Run until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "sla tracker starting");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("sla tracker stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        warn!(error = %e, "sla scan failed");
                    }
                }
            }
        }
    }

    /// One scan over all tasks. Public so tests and the health endpoint
    /// can force a pass without waiting for the timer.
    pub async fn scan(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut transitions = 0usize;

        for task in self.repo.list_tasks().await? {
            let status = sla_status_for_deadline(
                task.received_at,
                task.sla_deadline,
                now,
                self.policy.at_risk_fraction,
            );
            if status == task.status {
                continue;
            }

            let previous = task.status;
            let mut updated = task;
            updated.status = status;
            updated.touch(now);

            let mut events = vec![Event::new(
                EventTopic::TaskStatusChanged,
                updated.task_id.as_str(),
                serde_json::json!({
                    "task_id": updated.task_id.as_str(),
                    "previous": previous.as_str(),
                    "status": status.as_str(),
                    "version": updated.version,
                }),
                now,
            )];
            match status {
                SlaStatus::Yellow => events.push(Event::new(
                    EventTopic::SlaWarning,
                    updated.task_id.as_str(),
                    serde_json::json!({
                        "task_id": updated.task_id.as_str(),
                        "sla_deadline": updated.sla_deadline.to_rfc3339(),
                        "version": updated.version,
                    }),
                    now,
                )),
                SlaStatus::Red => events.push(Event::new(
                    EventTopic::SlaOverdue,
                    updated.task_id.as_str(),
                    serde_json::json!({
                        "task_id": updated.task_id.as_str(),
                        "sla_deadline": updated.sla_deadline.to_rfc3339(),
                        "version": updated.version,
                    }),
                    now,
                )),
                SlaStatus::Green => {}
            }

            match self
                .repo
                .commit_task_group(&updated.email_id, None, &updated, events)
                .await
            {
                Ok(stamped) => {
                    for event in stamped {
                        self.bus.publish(event);
                    }
                    transitions += 1;
                    debug!(
                        task_id = %updated.task_id,
                        previous = previous.as_str(),
                        status = status.as_str(),
                        "sla transition"
                    );
                }
                Err(StoreError::Conflict { .. }) => {
                    // A pipeline update won the race; the next tick will
                    // re-evaluate against the fresh record.
                    debug!(task_id = %updated.task_id, "sla update lost cas race");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use mailsift_core::{
        Email, EmailId, ManualClock, Priority, RouteDecision, WorkflowTask, WorkflowType,
    };
    use mailsift_store::MemoryRepository;
    use tokio_stream::StreamExt;

    fn t0() -> DateTime<Utc> {
        "2025-01-10T08:00:00Z".parse().unwrap()
    }

    async fn seed_task(
        repo: &MemoryRepository,
        priority: Priority,
        received_at: DateTime<Utc>,
    ) -> WorkflowTask {
        let email = Email::new("<m@x>", "a@x", "s", "b", received_at);
        repo.put_email(&email).await.unwrap();
        let policy = SlaPolicy::default();
        let task = WorkflowTask::new(
            EmailId::new(email.id.as_str()),
            WorkflowType::General,
            priority,
            received_at,
            policy.deadline(received_at, priority),
            RouteDecision::analyst_only(5),
            received_at,
        );
        repo.upsert_task(&task).await.unwrap();
        task
    }

    fn tracker(
        repo: Arc<MemoryRepository>,
        bus: Arc<EventBus>,
        clock: ManualClock,
    ) -> SlaTracker {
        SlaTracker::new(
            repo,
            bus,
            Arc::new(clock),
            SlaPolicy::default(),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn green_task_produces_no_transition() {
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(EventBus::default());
        let clock = ManualClock::new(t0() + ChronoDuration::hours(1));
        seed_task(&repo, Priority::High, t0()).await;

        let tracker = tracker(repo, bus.clone(), clock);
        let transitions = tracker.scan().await.unwrap();
        assert_eq!(transitions, 0);
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn yellow_transition_emits_exactly_one_warning() {
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(EventBus::default());
        // 19.2h elapsed of a 24h allowance.
        let clock = ManualClock::new(t0() + ChronoDuration::minutes(19 * 60 + 12));
        let task = seed_task(&repo, Priority::High, t0()).await;

        let tracker = tracker(repo.clone(), bus.clone(), clock);
        assert_eq!(tracker.scan().await.unwrap(), 1);

        let stored = repo.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SlaStatus::Yellow);
        assert_eq!(stored.version, 2);

        // One status_changed + one sla.warning, and a rescan is silent.
        assert_eq!(bus.len(), 2);
        assert_eq!(tracker.scan().await.unwrap(), 0);
        assert_eq!(bus.len(), 2);
    }

    #[tokio::test]
    async fn red_transition_emits_overdue_once() {
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(EventBus::default());
        let clock = ManualClock::new(t0());
        let task = seed_task(&repo, Priority::High, t0()).await;

        let tracker = tracker(repo.clone(), bus.clone(), clock.clone());

        clock.set(t0() + ChronoDuration::hours(24));
        assert_eq!(tracker.scan().await.unwrap(), 1);
        let stored = repo.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SlaStatus::Red);

        let mut overdue = bus.subscribe("test", &[EventTopic::SlaOverdue], None);
        let event = overdue.next().await.unwrap();
        assert_eq!(event.correlation_id, task.task_id.as_str());

        assert_eq!(tracker.scan().await.unwrap(), 0, "no repeat emission");
    }

    #[tokio::test]
    async fn full_green_yellow_red_progression() {
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(EventBus::default());
        let clock = ManualClock::new(t0() + ChronoDuration::hours(19));
        let task = seed_task(&repo, Priority::High, t0()).await;
        let tracker = tracker(repo.clone(), bus.clone(), clock.clone());

        // 19h: still green.
        assert_eq!(tracker.scan().await.unwrap(), 0);

        // 19.2h: yellow, one warning.
        clock.set(t0() + ChronoDuration::minutes(19 * 60 + 12));
        assert_eq!(tracker.scan().await.unwrap(), 1);

        // 24h: red, one overdue.
        clock.set(t0() + ChronoDuration::hours(24));
        assert_eq!(tracker.scan().await.unwrap(), 1);

        let stored = repo.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SlaStatus::Red);
        assert_eq!(stored.version, 3, "one bump per transition");

        // Log: status_changed + warning + status_changed + overdue.
        assert_eq!(bus.len(), 4);
    }

    #[tokio::test]
    async fn run_loop_scans_on_interval() {
        tokio::time::pause();
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(EventBus::default());
        let clock = ManualClock::new(t0() + ChronoDuration::hours(25));
        seed_task(&repo, Priority::High, t0()).await;

        let tracker = Arc::new(SlaTracker::new(
            repo.clone(),
            bus.clone(),
            Arc::new(clock),
            SlaPolicy::default(),
            Duration::from_secs(300),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            async move { tracker.run(cancel).await }
        });

        // First tick fires immediately.
        tokio::time::advance(Duration::from_millis(10)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(bus.len() >= 2, "overdue transition observed by the loop");
    }
}
