use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mailsift_analysis::{Analyst, Analyzed, Strategist};
use mailsift_bus::EventBus;
use mailsift_chain::{ChainAnalyzer, chain_key};
use mailsift_core::{
    Chain, Clock, Email, EmailState, ErrorKind, Phase, Phase1Result, Phase2Result, PhaseResult,
    Priority, RouteDecision,
};
use mailsift_router::Router;
use mailsift_store::{Repository, StoreError};
use mailsift_triage::Triager;

use dashmap::DashMap;

use crate::config::PipelineConfig;
use crate::dlq::DeadLetterQueue;
use crate::materialize::{MaterializeInput, TaskGenerator};
use crate::metrics::PipelineMetrics;
use crate::retry::RetryPolicy;
use crate::sla::SlaTracker;

/// Shared services every worker needs: repositories, clock, metrics,
/// and the failed queue. No module-level mutable state; everything is
/// injected here.
#[derive(Clone)]
pub struct Runtime {
    pub repo: Arc<dyn Repository>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,
    pub dlq: Arc<DeadLetterQueue>,
}

/// Injected stage implementations. Small trait objects composed into
/// the orchestrator; no inheritance anywhere.
#[derive(Clone)]
pub struct Stages {
    pub triager: Arc<dyn Triager>,
    pub router: Arc<dyn Router>,
    pub analyst: Arc<dyn Analyst>,
    pub strategist: Arc<dyn Strategist>,
}

/// Outcome of handing an email to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New email accepted and enqueued.
    Accepted,
    /// Known message id; the stored record was re-enqueued. Idempotent
    /// sinks converge, the task version advances.
    Replayed,
    /// The email is already being processed; nothing was enqueued.
    InFlight,
}

struct ChainWork {
    email: Email,
    phase1: Phase1Result,
}

struct RouteWork {
    email: Email,
    phase1: Phase1Result,
    chain: Chain,
}

struct AnalyzeWork {
    email: Email,
    phase1: Phase1Result,
    chain: Chain,
    route: RouteDecision,
    priority: Priority,
}

struct StrategizeWork {
    email: Email,
    phase1: Phase1Result,
    phase2: Phase2Result,
    chain: Chain,
    route: RouteDecision,
    priority: Priority,
}

struct Inlets {
    p1_tx: mpsc::Sender<Email>,
    chain_tx: mpsc::Sender<ChainWork>,
    p3_tx: mpsc::Sender<StrategizeWork>,
}

/// Worker-side context: everything cloned into stage tasks.
#[derive(Clone)]
struct Ctx {
    runtime: Runtime,
    config: Arc<PipelineConfig>,
    stages: Stages,
    generator: Arc<TaskGenerator>,
    in_flight: Arc<DashMap<String, EmailState>>,
    throttle: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Ctx {
    fn transition(&self, email: &Email, next: EmailState) {
        let mut entry = self
            .in_flight
            .entry(email.id.as_str().to_owned())
            .or_insert(EmailState::Ingested);
        if entry.can_transition_to(next) {
            *entry = next;
        } else {
            // Transitions here are driven by the fixed stage order, so
            // a disallowed one is a bug upstream.
            warn!(
                email_id = %email.id,
                from = ?*entry,
                to = ?next,
                "invalid state transition, keeping current state"
            );
        }
    }

    fn finish(&self, email: &Email) {
        self.in_flight.remove(email.id.as_str());
    }

    fn fail(&self, email: &Email, stage: Option<Phase>, kind: &ErrorKind, attempts: u32) {
        if matches!(kind, ErrorKind::Cancelled) {
            // Cancellation is silent; the checkpoint scan picks the
            // email back up on restart.
            self.in_flight.remove(email.id.as_str());
            return;
        }
        warn!(email_id = %email.id, ?stage, error = %kind, attempts, "email failed");
        self.runtime.dlq.push(
            email.id.clone(),
            stage,
            kind.clone(),
            attempts,
            self.runtime.clock.now(),
        );
        self.runtime
            .metrics
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
        self.in_flight.remove(email.id.as_str());
    }
}

/// The pipeline orchestrator: bounded stage queues, per-stage worker
/// pools, retry with backoff, checkpoint recovery, and cooperative
/// cancellation.
pub struct Pipeline {
    runtime: Runtime,
    config: Arc<PipelineConfig>,
    ctx: Ctx,
    inlets: Inlets,
    intake_open: Arc<AtomicBool>,
    cancel: CancellationToken,
    /// Stops the timer-driven background loops (throttle monitor, SLA
    /// tracker); they hold no work, so shutdown cancels them at once.
    background_cancel: CancellationToken,
    workers: JoinSet<()>,
}

impl Pipeline {
    /// Wire the stages together and start all workers.
    #[must_use]
    pub fn start(runtime: Runtime, stages: Stages, config: PipelineConfig) -> Self {
        let config = Arc::new(config);
        let caps = &config.queue_caps;

        let (p1_tx, p1_rx) = mpsc::channel::<Email>(caps.p1);
        let (chain_tx, chain_rx) = mpsc::channel::<ChainWork>(caps.chain);
        let (router_tx, router_rx) = mpsc::channel::<RouteWork>(caps.router);
        let (p2_tx, p2_rx) = mpsc::channel::<AnalyzeWork>(caps.p2);
        let (p3_tx, p3_rx) = mpsc::channel::<StrategizeWork>(caps.p3);

        let generator = Arc::new(TaskGenerator::new(
            runtime.repo.clone(),
            runtime.bus.clone(),
            runtime.clock.clone(),
            config.sla.policy.clone(),
            runtime.metrics.clone(),
        ));

        let cancel = CancellationToken::new();
        let ctx = Ctx {
            runtime: runtime.clone(),
            config: config.clone(),
            stages,
            generator,
            in_flight: Arc::new(DashMap::new()),
            throttle: Arc::new(AtomicBool::new(false)),
            cancel: cancel.clone(),
        };

        let background_cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        workers.spawn(phase1_stage(p1_rx, chain_tx.clone(), ctx.clone()));
        workers.spawn(chain_stage(chain_rx, router_tx, ctx.clone()));
        workers.spawn(router_stage(router_rx, p2_tx, ctx.clone()));
        workers.spawn(analyst_stage(p2_rx, p3_tx.clone(), ctx.clone()));
        workers.spawn(strategist_stage(p3_rx, ctx.clone()));
        workers.spawn(throttle_monitor(ctx.clone(), background_cancel.clone()));

        let tracker = SlaTracker::new(
            runtime.repo.clone(),
            runtime.bus.clone(),
            runtime.clock.clone(),
            config.sla.policy.clone(),
            Duration::from_secs(config.sla.check_interval_secs),
        );
        let tracker_cancel = background_cancel.clone();
        workers.spawn(async move { tracker.run(tracker_cancel).await });

        info!(
            phase1 = config.phase1_workers(),
            phase2 = config.phase2_workers(),
            phase3 = config.phase3_workers(),
            "pipeline started"
        );

        Self {
            runtime,
            config,
            ctx,
            inlets: Inlets {
                p1_tx,
                chain_tx,
                p3_tx,
            },
            intake_open: Arc::new(AtomicBool::new(true)),
            cancel,
            background_cancel,
            workers,
        }
    }

    /// The ingest contract: validate, store, enqueue.
    ///
    /// Backpressure surfaces here: when the pipeline is saturated the
    /// send times out and the caller observes
    /// [`ErrorKind::ResourceExhaustion`]; nothing is dropped silently.
    pub async fn on_email(&self, email: Email) -> Result<IngestOutcome, ErrorKind> {
        if !self.intake_open.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }

        if let Err(kind) = email.validate() {
            self.runtime
                .metrics
                .validation_rejected
                .fetch_add(1, Ordering::Relaxed);
            self.runtime.dlq.push(
                email.id.clone(),
                None,
                kind.clone(),
                1,
                self.runtime.clock.now(),
            );
            self.runtime
                .metrics
                .dead_lettered
                .fetch_add(1, Ordering::Relaxed);
            return Err(kind);
        }

        let inserted = self
            .runtime
            .repo
            .put_email(&email)
            .await
            .map_err(|e| e.kind())?;
        let email = if inserted {
            email
        } else {
            // Redelivery: reprocess the stored record so every write
            // keys to the original email id and converges.
            self.runtime
                .metrics
                .deduplicated
                .fetch_add(1, Ordering::Relaxed);
            self.runtime
                .repo
                .get_email_by_message(&email.message_id)
                .await
                .map_err(|e| e.kind())?
                .ok_or_else(|| {
                    ErrorKind::InvariantViolation(format!(
                        "message {} indexed but email record missing",
                        email.message_id
                    ))
                })?
        };

        if self.ctx.in_flight.contains_key(email.id.as_str()) {
            return Ok(IngestOutcome::InFlight);
        }
        self.ctx
            .in_flight
            .insert(email.id.as_str().to_owned(), EmailState::Ingested);

        let send = tokio::time::timeout(
            self.config.p2_send_timeout(),
            self.inlets.p1_tx.send(email.clone()),
        )
        .await;
        match send {
            Ok(Ok(())) => {
                self.runtime
                    .metrics
                    .ingested
                    .fetch_add(1, Ordering::Relaxed);
                self.runtime
                    .metrics
                    .p1_queue_depth
                    .fetch_add(1, Ordering::Relaxed);
                Ok(if inserted {
                    IngestOutcome::Accepted
                } else {
                    IngestOutcome::Replayed
                })
            }
            Ok(Err(_)) => {
                self.ctx.in_flight.remove(email.id.as_str());
                Err(ErrorKind::Cancelled)
            }
            Err(_elapsed) => {
                self.ctx.in_flight.remove(email.id.as_str());
                Err(ErrorKind::ResourceExhaustion(
                    "phase1 queue full beyond send deadline".into(),
                ))
            }
        }
    }

    /// Checkpoint recovery: scan for emails with missing downstream
    /// results and re-enqueue them at the right stage. Call once after
    /// start, before opening ingest traffic.
    pub async fn recover(&self) -> Result<usize, ErrorKind> {
        let unfinished = self
            .runtime
            .repo
            .list_unfinished_emails()
            .await
            .map_err(|e| e.kind())?;
        let mut requeued = 0usize;

        for (email, highest_ok) in unfinished {
            if self.ctx.in_flight.contains_key(email.id.as_str()) {
                continue;
            }

            // Seed the in-flight state to match the durable progress so
            // the re-entry stage performs a legal transition.
            match highest_ok {
                None => {
                    self.ctx
                        .in_flight
                        .insert(email.id.as_str().to_owned(), EmailState::Ingested);
                    if self.inlets.p1_tx.send(email).await.is_ok() {
                        self.runtime
                            .metrics
                            .p1_queue_depth
                            .fetch_add(1, Ordering::Relaxed);
                        requeued += 1;
                    }
                }
                Some(Phase::Triage) => {
                    let Some(phase1) = self.load_phase1(&email).await? else {
                        continue;
                    };
                    self.ctx
                        .in_flight
                        .insert(email.id.as_str().to_owned(), EmailState::Phase1Ok);
                    let work = ChainWork { email, phase1 };
                    if self.inlets.chain_tx.send(work).await.is_ok() {
                        self.runtime
                            .metrics
                            .chain_queue_depth
                            .fetch_add(1, Ordering::Relaxed);
                        requeued += 1;
                    }
                }
                Some(Phase::Analyst | Phase::Strategist) => {
                    requeued += self.recover_analyzed(email).await?;
                }
            }
        }
        if requeued > 0 {
            info!(requeued, "checkpoint recovery re-enqueued emails");
        }
        Ok(requeued)
    }

    async fn load_phase1(&self, email: &Email) -> Result<Option<Phase1Result>, ErrorKind> {
        let Some(record) = self
            .runtime
            .repo
            .get_phase_result(&email.id, Phase::Triage)
            .await
            .map_err(|e| e.kind())?
        else {
            return Ok(None);
        };
        serde_json::from_value(record.payload)
            .map(Some)
            .map_err(|e| ErrorKind::InvariantViolation(format!("unreadable phase1 payload: {e}")))
    }

    /// Resume an email whose analyst pass already completed: re-route
    /// deterministically and either strategize or materialize.
    async fn recover_analyzed(&self, email: Email) -> Result<usize, ErrorKind> {
        let Some(phase1) = self.load_phase1(&email).await? else {
            return Ok(0);
        };
        let phase2_record = self
            .runtime
            .repo
            .get_phase_result(&email.id, Phase::Analyst)
            .await
            .map_err(|e| e.kind())?;
        let Some(phase2_record) = phase2_record else {
            return Ok(0);
        };
        let phase2: Phase2Result = serde_json::from_value(phase2_record.payload)
            .map_err(|e| ErrorKind::InvariantViolation(format!("unreadable phase2 payload: {e}")))?;
        self.ctx
            .in_flight
            .insert(email.id.as_str().to_owned(), EmailState::Phase2Ok);

        let chain = self
            .runtime
            .repo
            .get_chain(&chain_key(&email))
            .await
            .map_err(|e| e.kind())?
            .unwrap_or_else(|| Chain::new(chain_key(&email), self.runtime.clock.now()));
        let (route, priority) = self.ctx.stages.router.route(&phase1, &chain);

        let phase3 = match self
            .runtime
            .repo
            .get_phase_result(&email.id, Phase::Strategist)
            .await
            .map_err(|e| e.kind())?
        {
            Some(record) if record.status == mailsift_core::PhaseStatus::Ok => {
                serde_json::from_value::<mailsift_core::Phase3Result>(record.payload)
                    .map(Some)
                    .map_err(|e| {
                        ErrorKind::InvariantViolation(format!("unreadable phase3 payload: {e}"))
                    })?
            }
            _ => None,
        };

        if route.run_strategist && phase3.is_none() {
            let work = StrategizeWork {
                email,
                phase1,
                phase2,
                chain,
                route,
                priority,
            };
            if self.inlets.p3_tx.send(work).await.is_ok() {
                self.runtime
                    .metrics
                    .p3_queue_depth
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(1);
            }
            return Ok(0);
        }

        // All routed phases are present; only the task is missing.
        self.ctx
            .generator
            .materialize(MaterializeInput {
                email: &email,
                chain: Some(&chain),
                phase1: &phase1,
                phase2: Some(&phase2),
                phase3: phase3.as_ref(),
                route,
                priority,
                degraded: false,
                final_phase_result: None,
            })
            .await?;
        self.ctx.finish(&email);
        Ok(1)
    }

    /// Current pipeline health derived from metrics.
    #[must_use]
    pub fn health(&self) -> crate::metrics::PipelineHealth {
        self.runtime.metrics.health(self.config.queue_caps.p2)
    }

    /// The full health payload: overall state, per-stage metrics, and
    /// the SLA status distribution over stored tasks.
    pub async fn health_report(&self) -> Result<crate::metrics::HealthReport, ErrorKind> {
        let mut sla = crate::metrics::SlaDistribution::default();
        for task in self
            .runtime
            .repo
            .list_tasks()
            .await
            .map_err(|e| e.kind())?
        {
            match task.status {
                mailsift_core::SlaStatus::Green => sla.green += 1,
                mailsift_core::SlaStatus::Yellow => sla.yellow += 1,
                mailsift_core::SlaStatus::Red => sla.red += 1,
            }
        }
        Ok(crate::metrics::HealthReport {
            overall: self.health(),
            metrics: self.runtime.metrics.snapshot(),
            sla,
        })
    }

    /// Graceful shutdown: stop intake, drain the stages, and give
    /// in-flight model calls until `grace` before hard-cancelling.
    /// Partially completed work is discarded, not persisted.
    pub async fn shutdown(self, grace: Duration) {
        info!("pipeline shutting down");
        let Self {
            inlets,
            intake_open,
            cancel,
            background_cancel,
            mut workers,
            ..
        } = self;
        intake_open.store(false, Ordering::Release);
        background_cancel.cancel();
        // Dropping the inlets closes the first queue; drains cascade
        // stage by stage.
        drop(inlets);

        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("drain deadline exceeded, cancelling in-flight work");
            cancel.cancel();
            while workers.join_next().await.is_some() {}
        }
        info!("pipeline stopped");
    }
}

/// Cancellable bounded send that keeps the depth gauge accurate.
async fn send_stage<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    depth: &AtomicUsize,
    cancel: &CancellationToken,
) -> Result<(), ErrorKind> {
    tokio::select! {
        () = cancel.cancelled() => Err(ErrorKind::Cancelled),
        sent = tx.send(item) => match sent {
            Ok(()) => {
                depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => Err(ErrorKind::Cancelled),
        }
    }
}

/// Reap one finished per-item job, counting panics as worker restarts.
fn reap(result: Result<(), tokio::task::JoinError>, ctx: &Ctx) {
    if let Err(e) = result
        && e.is_panic()
    {
        warn!(error = %e, "stage worker panicked; pool slot recovered");
        ctx.runtime
            .metrics
            .worker_restarts
            .fetch_add(1, Ordering::Relaxed);
    }
}

async fn phase1_stage(mut rx: mpsc::Receiver<Email>, chain_tx: mpsc::Sender<ChainWork>, ctx: Ctx) {
    let pool = Arc::new(Semaphore::new(ctx.config.phase1_workers()));
    let mut jobs = JoinSet::new();

    loop {
        let email = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            Some(finished) = jobs.join_next(), if !jobs.is_empty() => {
                reap(finished, &ctx);
                continue;
            }
            received = rx.recv() => match received {
                Some(email) => email,
                None => break,
            }
        };
        ctx.runtime
            .metrics
            .p1_queue_depth
            .fetch_sub(1, Ordering::Relaxed);

        let permit = pool
            .clone()
            .acquire_owned()
            .await
            .expect("phase1 pool never closed");
        let ctx = ctx.clone();
        let chain_tx = chain_tx.clone();
        jobs.spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let phase1 = ctx.stages.triager.triage(&email);
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let payload = match serde_json::to_value(&phase1) {
                Ok(payload) => payload,
                Err(e) => {
                    ctx.fail(
                        &email,
                        Some(Phase::Triage),
                        &ErrorKind::InvariantViolation(e.to_string()),
                        1,
                    );
                    return;
                }
            };
            let record = PhaseResult::ok(Phase::Triage, payload, elapsed_ms);
            if let Err(e) = ctx.runtime.repo.put_phase_result(&email.id, &record).await {
                ctx.fail(&email, Some(Phase::Triage), &e.kind(), 1);
                return;
            }
            ctx.runtime.metrics.record_phase_ok(Phase::Triage, elapsed_ms);
            ctx.transition(&email, EmailState::Phase1Ok);

            let work = ChainWork { email, phase1 };
            let _ = send_stage(
                &chain_tx,
                work,
                &ctx.runtime.metrics.chain_queue_depth,
                &ctx.cancel,
            )
            .await;
        });
    }

    // Finish in-flight triage jobs before closing the chain queue.
    while let Some(finished) = jobs.join_next().await {
        reap(finished, &ctx);
    }
}

/// Chain updates are serialized through this single consumer, which is
/// the single-writer guarantee the completeness invariants need.
async fn chain_stage(
    mut rx: mpsc::Receiver<ChainWork>,
    router_tx: mpsc::Sender<RouteWork>,
    ctx: Ctx,
) {
    let analyzer = ChainAnalyzer::new();
    loop {
        let work = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(work) => work,
                None => break,
            }
        };
        ctx.runtime
            .metrics
            .chain_queue_depth
            .fetch_sub(1, Ordering::Relaxed);

        let key = chain_key(&work.email);
        let prior = match ctx.runtime.repo.get_chain(&key).await {
            Ok(prior) => prior,
            Err(e) => {
                ctx.fail(&work.email, Some(Phase::Triage), &e.kind(), 1);
                continue;
            }
        };
        let chain = analyzer.update(&work.email, &work.phase1, prior, ctx.runtime.clock.now());
        if let Err(e) = ctx.runtime.repo.upsert_chain(&chain).await {
            // Single writer: a conflict here means a replayed item; the
            // stored chain already contains this email.
            if !matches!(e, StoreError::Conflict { .. }) {
                ctx.fail(&work.email, Some(Phase::Triage), &e.kind(), 1);
                continue;
            }
        }
        ctx.runtime.metrics.record_completeness(chain.completeness);
        ctx.transition(&work.email, EmailState::Chained);

        let work = RouteWork {
            email: work.email,
            phase1: work.phase1,
            chain,
        };
        if send_stage(
            &router_tx,
            work,
            &ctx.runtime.metrics.router_queue_depth,
            &ctx.cancel,
        )
        .await
        .is_err()
        {
            break;
        }
    }
}

async fn router_stage(
    mut rx: mpsc::Receiver<RouteWork>,
    p2_tx: mpsc::Sender<AnalyzeWork>,
    ctx: Ctx,
) {
    loop {
        let work = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(work) => work,
                None => break,
            }
        };
        ctx.runtime
            .metrics
            .router_queue_depth
            .fetch_sub(1, Ordering::Relaxed);

        let (route, priority) = ctx.stages.router.route(&work.phase1, &work.chain);
        ctx.transition(&work.email, EmailState::Routed);

        if route.run_analyst {
            let work = AnalyzeWork {
                email: work.email,
                phase1: work.phase1,
                chain: work.chain,
                route,
                priority,
            };
            if send_stage(
                &p2_tx,
                work,
                &ctx.runtime.metrics.p2_queue_depth,
                &ctx.cancel,
            )
            .await
            .is_err()
            {
                break;
            }
            continue;
        }

        // Phase-1 terminal: materialize straight from triage.
        let input = MaterializeInput {
            email: &work.email,
            chain: Some(&work.chain),
            phase1: &work.phase1,
            phase2: None,
            phase3: None,
            route,
            priority,
            degraded: false,
            final_phase_result: None,
        };
        match ctx.generator.materialize(input).await {
            Ok(_) => {
                ctx.transition(&work.email, EmailState::TaskMaterialized);
                ctx.finish(&work.email);
            }
            Err(kind) => ctx.fail(&work.email, Some(Phase::Triage), &kind, 1),
        }
    }
}

async fn analyst_stage(
    mut rx: mpsc::Receiver<AnalyzeWork>,
    p3_tx: mpsc::Sender<StrategizeWork>,
    ctx: Ctx,
) {
    let pool = Arc::new(Semaphore::new(ctx.config.phase2_workers()));
    let mut jobs = JoinSet::new();

    loop {
        let work = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            Some(finished) = jobs.join_next(), if !jobs.is_empty() => {
                reap(finished, &ctx);
                continue;
            }
            received = rx.recv() => match received {
                Some(work) => work,
                None => break,
            }
        };
        ctx.runtime
            .metrics
            .p2_queue_depth
            .fetch_sub(1, Ordering::Relaxed);

        let permit = pool
            .clone()
            .acquire_owned()
            .await
            .expect("phase2 pool never closed");
        let ctx = ctx.clone();
        let p3_tx = p3_tx.clone();
        jobs.spawn(async move {
            let _permit = permit;
            run_analyst(work, &p3_tx, &ctx).await;
        });
    }

    while let Some(finished) = jobs.join_next().await {
        reap(finished, &ctx);
    }
}

async fn run_analyst(work: AnalyzeWork, p3_tx: &mpsc::Sender<StrategizeWork>, ctx: &Ctx) {
    let retry = RetryPolicy::new(&ctx.config.retry);
    let mut attempt = 0u32;

    loop {
        let started = Instant::now();
        let outcome = tokio::select! {
            () = ctx.cancel.cancelled() => return,
            result = tokio::time::timeout(
                ctx.config.primary_timeout(),
                ctx.stages.analyst.analyze(&work.email, &work.phase1, &work.chain),
            ) => result,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result: Result<Analyzed<Phase2Result>, ErrorKind> = match outcome {
            Ok(Ok(analyzed)) => Ok(analyzed),
            Ok(Err(e)) => Err(e.kind()),
            Err(_elapsed) => Err(ErrorKind::TransientUpstream(
                "analyst hard timeout exceeded".into(),
            )),
        };

        match result {
            Ok(analyzed) => {
                ctx.runtime
                    .metrics
                    .record_parse_retries(Phase::Analyst, analyzed.parse_retries);
                ctx.runtime
                    .metrics
                    .record_phase_ok(Phase::Analyst, elapsed_ms);

                let payload = serde_json::to_value(&analyzed.result).unwrap_or_default();
                let record = PhaseResult::ok(Phase::Analyst, payload, elapsed_ms)
                    .with_model(ctx.config.model.primary_id.as_str());

                if work.route.run_strategist {
                    // Durable before the next stage sees the item.
                    if let Err(e) = ctx.runtime.repo.put_phase_result(&work.email.id, &record).await
                    {
                        ctx.fail(&work.email, Some(Phase::Analyst), &e.kind(), attempt + 1);
                        return;
                    }
                    ctx.transition(&work.email, EmailState::Phase2Ok);
                    if wait_while_throttled(ctx).await.is_err() {
                        return;
                    }
                    let next = StrategizeWork {
                        email: work.email,
                        phase1: work.phase1,
                        phase2: analyzed.result,
                        chain: work.chain,
                        route: work.route,
                        priority: work.priority,
                    };
                    let _ = send_stage(
                        p3_tx,
                        next,
                        &ctx.runtime.metrics.p3_queue_depth,
                        &ctx.cancel,
                    )
                    .await;
                    return;
                }

                ctx.transition(&work.email, EmailState::Phase2Ok);
                let input = MaterializeInput {
                    email: &work.email,
                    chain: Some(&work.chain),
                    phase1: &work.phase1,
                    phase2: Some(&analyzed.result),
                    phase3: None,
                    route: work.route,
                    priority: work.priority,
                    degraded: false,
                    final_phase_result: Some(&record),
                };
                match ctx.generator.materialize(input).await {
                    Ok(_) => {
                        ctx.transition(&work.email, EmailState::TaskMaterialized);
                        ctx.finish(&work.email);
                    }
                    Err(kind) => ctx.fail(&work.email, Some(Phase::Analyst), &kind, attempt + 1),
                }
                return;
            }
            Err(kind) if kind.retryable() && attempt + 1 < retry.max_attempts() => {
                ctx.runtime.metrics.record_phase_retry(Phase::Analyst);
                warn!(
                    email_id = %work.email.id,
                    attempt,
                    error = %kind,
                    "analyst attempt failed, backing off"
                );
                let delay = retry.delay_for(attempt);
                tokio::select! {
                    () = ctx.cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(kind) => {
                if matches!(kind, ErrorKind::Cancelled) {
                    return;
                }
                ctx.runtime.metrics.record_phase_failed(Phase::Analyst);
                let record =
                    PhaseResult::failed(Phase::Analyst, kind.to_string(), elapsed_ms);
                // The task still materializes with the triage data and a
                // degraded marker; earlier results are never removed.
                let input = MaterializeInput {
                    email: &work.email,
                    chain: Some(&work.chain),
                    phase1: &work.phase1,
                    phase2: None,
                    phase3: None,
                    route: work.route,
                    priority: work.priority,
                    degraded: true,
                    final_phase_result: Some(&record),
                };
                match ctx.generator.materialize(input).await {
                    Ok(_) => {
                        if kind.retryable() || kind.operator_visible() {
                            // Retries exhausted or structurally broken:
                            // the operator queue gets an entry either way.
                            ctx.fail(&work.email, Some(Phase::Analyst), &kind, attempt + 1);
                        } else {
                            ctx.finish(&work.email);
                        }
                    }
                    Err(materialize_kind) => {
                        ctx.fail(&work.email, Some(Phase::Analyst), &materialize_kind, attempt + 1);
                    }
                }
                return;
            }
        }
    }
}

async fn strategist_stage(mut rx: mpsc::Receiver<StrategizeWork>, ctx: Ctx) {
    let pool = Arc::new(Semaphore::new(ctx.config.phase3_workers()));
    let mut jobs = JoinSet::new();

    loop {
        let work = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            Some(finished) = jobs.join_next(), if !jobs.is_empty() => {
                reap(finished, &ctx);
                continue;
            }
            received = rx.recv() => match received {
                Some(work) => work,
                None => break,
            }
        };
        ctx.runtime
            .metrics
            .p3_queue_depth
            .fetch_sub(1, Ordering::Relaxed);

        let permit = pool
            .clone()
            .acquire_owned()
            .await
            .expect("phase3 pool never closed");
        let ctx = ctx.clone();
        jobs.spawn(async move {
            let _permit = permit;
            run_strategist(work, &ctx).await;
        });
    }

    while let Some(finished) = jobs.join_next().await {
        reap(finished, &ctx);
    }
}

async fn run_strategist(work: StrategizeWork, ctx: &Ctx) {
    let retry = RetryPolicy::new(&ctx.config.retry);
    let mut attempt = 0u32;

    loop {
        let started = Instant::now();
        let outcome = tokio::select! {
            () = ctx.cancel.cancelled() => return,
            result = tokio::time::timeout(
                ctx.config.critical_timeout(),
                ctx.stages.strategist.strategize(
                    &work.email,
                    &work.phase1,
                    &work.phase2,
                    &work.chain,
                ),
            ) => result,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(Ok(analyzed)) => Ok(analyzed),
            Ok(Err(e)) => Err(e.kind()),
            Err(_elapsed) => Err(ErrorKind::TransientUpstream(
                "strategist hard timeout exceeded".into(),
            )),
        };

        match result {
            Ok(analyzed) => {
                ctx.runtime
                    .metrics
                    .record_parse_retries(Phase::Strategist, analyzed.parse_retries);
                ctx.runtime
                    .metrics
                    .record_phase_ok(Phase::Strategist, elapsed_ms);
                ctx.transition(&work.email, EmailState::Phase3Ok);

                let payload = serde_json::to_value(&analyzed.result).unwrap_or_default();
                let record = PhaseResult::ok(Phase::Strategist, payload, elapsed_ms)
                    .with_model(ctx.config.model.critical_id.as_str());
                let input = MaterializeInput {
                    email: &work.email,
                    chain: Some(&work.chain),
                    phase1: &work.phase1,
                    phase2: Some(&work.phase2),
                    phase3: Some(&analyzed.result),
                    route: work.route,
                    priority: work.priority,
                    degraded: false,
                    final_phase_result: Some(&record),
                };
                match ctx.generator.materialize(input).await {
                    Ok(_) => {
                        ctx.transition(&work.email, EmailState::TaskMaterialized);
                        ctx.finish(&work.email);
                    }
                    Err(kind) => {
                        ctx.fail(&work.email, Some(Phase::Strategist), &kind, attempt + 1);
                    }
                }
                return;
            }
            Err(kind) if kind.retryable() && attempt + 1 < retry.max_attempts() => {
                ctx.runtime.metrics.record_phase_retry(Phase::Strategist);
                warn!(
                    email_id = %work.email.id,
                    attempt,
                    error = %kind,
                    "strategist attempt failed, backing off"
                );
                let delay = retry.delay_for(attempt);
                tokio::select! {
                    () = ctx.cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(kind) => {
                if matches!(kind, ErrorKind::Cancelled) {
                    return;
                }
                ctx.runtime.metrics.record_phase_failed(Phase::Strategist);
                let record =
                    PhaseResult::failed(Phase::Strategist, kind.to_string(), elapsed_ms);
                let input = MaterializeInput {
                    email: &work.email,
                    chain: Some(&work.chain),
                    phase1: &work.phase1,
                    phase2: Some(&work.phase2),
                    phase3: None,
                    route: work.route,
                    priority: work.priority,
                    degraded: true,
                    final_phase_result: Some(&record),
                };
                match ctx.generator.materialize(input).await {
                    Ok(_) => {
                        if kind.retryable() || kind.operator_visible() {
                            ctx.fail(&work.email, Some(Phase::Strategist), &kind, attempt + 1);
                        } else {
                            ctx.finish(&work.email);
                        }
                    }
                    Err(materialize_kind) => {
                        ctx.fail(
                            &work.email,
                            Some(Phase::Strategist),
                            &materialize_kind,
                            attempt + 1,
                        );
                    }
                }
                return;
            }
        }
    }
}

/// Phase-3 enqueues wait here while the Phase-2 queue is saturated.
/// Phase-2 itself is never paused.
async fn wait_while_throttled(ctx: &Ctx) -> Result<(), ErrorKind> {
    while ctx.throttle.load(Ordering::Acquire) {
        tokio::select! {
            () = ctx.cancel.cancelled() => return Err(ErrorKind::Cancelled),
            () = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
    }
    Ok(())
}

/// Samples the Phase-2 queue depth once per second; when it stays above
/// the configured fraction for the sustain window, Phase-3 enqueues are
/// paused until the queue recedes.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
async fn throttle_monitor(ctx: Ctx, stop: CancellationToken) {
    let cap = ctx.config.queue_caps.p2;
    let threshold = (cap as f64 * ctx.config.throttle.p2_high_fraction).ceil() as usize;
    let mut high_for = 0u64;

    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            () = ctx.cancel.cancelled() => return,
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }

        let depth = ctx.runtime.metrics.p2_queue_depth.load(Ordering::Relaxed);
        if depth >= threshold {
            high_for += 1;
            if high_for >= ctx.config.throttle.sustain_secs
                && !ctx.throttle.swap(true, Ordering::AcqRel)
            {
                warn!(depth, cap, "phase2 queue saturated; pausing phase3 enqueues");
                ctx.runtime
                    .metrics
                    .throttle_engaged
                    .store(1, Ordering::Relaxed);
            }
        } else {
            high_for = 0;
            if ctx.throttle.swap(false, Ordering::AcqRel) {
                info!(depth, "phase2 queue recovered; resuming phase3 enqueues");
                ctx.runtime
                    .metrics
                    .throttle_engaged
                    .store(0, Ordering::Relaxed);
            }
        }
    }
}
