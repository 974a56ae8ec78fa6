use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use mailsift_core::Phase;

/// Maximum latency samples retained per phase. Oldest samples are
/// evicted; 1 000 samples keeps p99 meaningful at this pipeline's
/// throughput while bounding memory.
const MAX_LATENCY_SAMPLES: usize = 1_000;

/// Overall pipeline health, derived from error rate and queue
/// saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl PipelineHealth {
    /// Lowercase label for the health endpoint payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Default)]
struct PhaseStats {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    parse_retries: AtomicU64,
    latency_samples: Mutex<VecDeque<u64>>,
}

impl PhaseStats {
    fn push_latency(&self, latency_ms: u64) {
        let mut buf = self.latency_samples.lock();
        if buf.len() >= MAX_LATENCY_SAMPLES {
            buf.pop_front();
        }
        buf.push_back(latency_ms);
    }

    fn percentiles(&self) -> (f64, f64, f64) {
        let buf = self.latency_samples.lock();
        if buf.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut sorted: Vec<u64> = buf.iter().copied().collect();
        sorted.sort_unstable();
        (
            percentile_value(&sorted, 50.0),
            percentile_value(&sorted, 95.0),
            percentile_value(&sorted, 99.0),
        )
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile_value(sorted: &[u64], pct: f64) -> f64 {
    let idx = ((pct / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)] as f64
}

/// Atomic counters and gauges for the pipeline.
///
/// All counters use relaxed ordering; call [`snapshot`](Self::snapshot)
/// for a consistent point-in-time view.
#[derive(Debug)]
pub struct PipelineMetrics {
    /// When this metrics instance was created; throughput is measured
    /// from here.
    started: Instant,
    /// Emails accepted by ingest.
    pub ingested: AtomicU64,
    /// Emails rejected at validation.
    pub validation_rejected: AtomicU64,
    /// Emails deduplicated by message id.
    pub deduplicated: AtomicU64,
    /// Tasks materialized.
    pub tasks_materialized: AtomicU64,
    /// Tasks materialized in degraded mode (a later phase failed).
    pub tasks_degraded: AtomicU64,
    /// Emails that ended on the operator-visible failed queue.
    pub dead_lettered: AtomicU64,
    /// Worker restarts after a panic or poisoned stage.
    pub worker_restarts: AtomicU64,
    /// Phase-3 enqueues currently paused by the adaptive throttle.
    pub throttle_engaged: AtomicU64,

    // Phase mix at materialization time.
    pub mix_phase1_only: AtomicU64,
    pub mix_phase2: AtomicU64,
    pub mix_phase3: AtomicU64,

    // Stage queue depth gauges.
    pub p1_queue_depth: AtomicUsize,
    pub chain_queue_depth: AtomicUsize,
    pub router_queue_depth: AtomicUsize,
    pub p2_queue_depth: AtomicUsize,
    pub p3_queue_depth: AtomicUsize,

    phase1: PhaseStats,
    phase2: PhaseStats,
    phase3: PhaseStats,

    /// Chain completeness histogram: bucket i covers `[i*10, i*10+9]`,
    /// with 100 landing in the last bucket.
    completeness_histogram: [AtomicU64; 10],
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            ingested: AtomicU64::new(0),
            validation_rejected: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            tasks_materialized: AtomicU64::new(0),
            tasks_degraded: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            worker_restarts: AtomicU64::new(0),
            throttle_engaged: AtomicU64::new(0),
            mix_phase1_only: AtomicU64::new(0),
            mix_phase2: AtomicU64::new(0),
            mix_phase3: AtomicU64::new(0),
            p1_queue_depth: AtomicUsize::new(0),
            chain_queue_depth: AtomicUsize::new(0),
            router_queue_depth: AtomicUsize::new(0),
            p2_queue_depth: AtomicUsize::new(0),
            p3_queue_depth: AtomicUsize::new(0),
            phase1: PhaseStats::default(),
            phase2: PhaseStats::default(),
            phase3: PhaseStats::default(),
            completeness_histogram: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn phase_stats(&self, phase: Phase) -> &PhaseStats {
        match phase {
            Phase::Triage => &self.phase1,
            Phase::Analyst => &self.phase2,
            Phase::Strategist => &self.phase3,
        }
    }

    /// Record a completed phase run.
    pub fn record_phase_ok(&self, phase: Phase, latency_ms: u64) {
        let stats = self.phase_stats(phase);
        stats.processed.fetch_add(1, Ordering::Relaxed);
        stats.push_latency(latency_ms);
    }

    /// Record a failed phase run.
    pub fn record_phase_failed(&self, phase: Phase) {
        self.phase_stats(phase).failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transient-failure retry for a phase.
    pub fn record_phase_retry(&self, phase: Phase) {
        self.phase_stats(phase).retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record parse retries consumed by a model-backed phase.
    pub fn record_parse_retries(&self, phase: Phase, count: u32) {
        self.phase_stats(phase)
            .parse_retries
            .fetch_add(u64::from(count), Ordering::Relaxed);
    }

    /// Record a chain completeness observation.
    pub fn record_completeness(&self, completeness: u8) {
        let bucket = usize::from(completeness.min(99)) / 10;
        self.completeness_histogram[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Record the phase mix of a materialized task.
    pub fn record_phase_mix(&self, ran_phase2: bool, ran_phase3: bool) {
        if ran_phase3 {
            self.mix_phase3.fetch_add(1, Ordering::Relaxed);
        } else if ran_phase2 {
            self.mix_phase2.fetch_add(1, Ordering::Relaxed);
        } else {
            self.mix_phase1_only.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a consistent point-in-time snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_mins = self.started.elapsed().as_secs_f64() / 60.0;
        let throughput_emails_per_min = if elapsed_mins > 0.0 {
            self.phase1.processed.load(Ordering::Relaxed) as f64 / elapsed_mins
        } else {
            0.0
        };
        let phase = |stats: &PhaseStats| {
            let (p50, p95, p99) = stats.percentiles();
            PhaseSnapshot {
                processed: stats.processed.load(Ordering::Relaxed),
                failed: stats.failed.load(Ordering::Relaxed),
                retried: stats.retried.load(Ordering::Relaxed),
                parse_retries: stats.parse_retries.load(Ordering::Relaxed),
                p50_latency_ms: p50,
                p95_latency_ms: p95,
                p99_latency_ms: p99,
            }
        };
        MetricsSnapshot {
            throughput_emails_per_min,
            ingested: self.ingested.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            tasks_materialized: self.tasks_materialized.load(Ordering::Relaxed),
            tasks_degraded: self.tasks_degraded.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
            throttle_engaged: self.throttle_engaged.load(Ordering::Relaxed),
            mix_phase1_only: self.mix_phase1_only.load(Ordering::Relaxed),
            mix_phase2: self.mix_phase2.load(Ordering::Relaxed),
            mix_phase3: self.mix_phase3.load(Ordering::Relaxed),
            p1_queue_depth: self.p1_queue_depth.load(Ordering::Relaxed),
            chain_queue_depth: self.chain_queue_depth.load(Ordering::Relaxed),
            router_queue_depth: self.router_queue_depth.load(Ordering::Relaxed),
            p2_queue_depth: self.p2_queue_depth.load(Ordering::Relaxed),
            p3_queue_depth: self.p3_queue_depth.load(Ordering::Relaxed),
            phase1: phase(&self.phase1),
            phase2: phase(&self.phase2),
            phase3: phase(&self.phase3),
            completeness_histogram: std::array::from_fn(|i| {
                self.completeness_histogram[i].load(Ordering::Relaxed)
            }),
        }
    }

    /// Derive overall health from the snapshot: unhealthy when failures
    /// dominate, degraded on elevated error rate or a saturated Phase-2
    /// queue.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn health(&self, p2_queue_cap: usize) -> PipelineHealth {
        let snap = self.snapshot();
        let processed = snap.phase1.processed + snap.phase2.processed + snap.phase3.processed;
        let failed = snap.phase1.failed + snap.phase2.failed + snap.phase3.failed;
        let total = processed + failed;
        let error_rate = if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        };

        if error_rate > 0.5 {
            return PipelineHealth::Unhealthy;
        }
        let p2_saturated = p2_queue_cap > 0
            && snap.p2_queue_depth as f64 / p2_queue_cap as f64 > 0.9;
        if error_rate > 0.05 || p2_saturated || snap.throttle_engaged > 0 {
            return PipelineHealth::Degraded;
        }
        PipelineHealth::Healthy
    }
}

/// Per-phase counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub parse_retries: u64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

/// Per-status task counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaDistribution {
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
}

/// The health endpoint payload: overall state plus the backing numbers.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub overall: PipelineHealth,
    pub metrics: MetricsSnapshot,
    pub sla: SlaDistribution,
}

/// A plain data snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Phase-1 completions per minute since startup.
    pub throughput_emails_per_min: f64,
    pub ingested: u64,
    pub validation_rejected: u64,
    pub deduplicated: u64,
    pub tasks_materialized: u64,
    pub tasks_degraded: u64,
    pub dead_lettered: u64,
    pub worker_restarts: u64,
    pub throttle_engaged: u64,
    pub mix_phase1_only: u64,
    pub mix_phase2: u64,
    pub mix_phase3: u64,
    pub p1_queue_depth: usize,
    pub chain_queue_depth: usize,
    pub router_queue_depth: usize,
    pub p2_queue_depth: usize,
    pub p3_queue_depth: usize,
    pub phase1: PhaseSnapshot,
    pub phase2: PhaseSnapshot,
    pub phase3: PhaseSnapshot,
    pub completeness_histogram: [u64; 10],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_zero() {
        let metrics = PipelineMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.ingested, 0);
        assert_eq!(snap.phase1.processed, 0);
        assert_eq!(snap.completeness_histogram, [0; 10]);
    }

    #[test]
    fn phase_counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_phase_ok(Phase::Triage, 5);
        metrics.record_phase_ok(Phase::Analyst, 900);
        metrics.record_phase_failed(Phase::Analyst);
        metrics.record_phase_retry(Phase::Analyst);
        metrics.record_parse_retries(Phase::Analyst, 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.phase1.processed, 1);
        assert_eq!(snap.phase2.processed, 1);
        assert_eq!(snap.phase2.failed, 1);
        assert_eq!(snap.phase2.retried, 1);
        assert_eq!(snap.phase2.parse_retries, 2);
    }

    #[test]
    fn percentiles_from_samples() {
        let metrics = PipelineMetrics::new();
        for ms in 1..=100 {
            metrics.record_phase_ok(Phase::Analyst, ms);
        }
        let snap = metrics.snapshot();
        assert!((snap.phase2.p50_latency_ms - 50.0).abs() < 2.0);
        assert!((snap.phase2.p95_latency_ms - 95.0).abs() < 2.0);
        assert!((snap.phase2.p99_latency_ms - 99.0).abs() < 2.0);
    }

    #[test]
    fn completeness_buckets() {
        let metrics = PipelineMetrics::new();
        metrics.record_completeness(0);
        metrics.record_completeness(9);
        metrics.record_completeness(45);
        metrics.record_completeness(99);
        metrics.record_completeness(100);
        let snap = metrics.snapshot();
        assert_eq!(snap.completeness_histogram[0], 2);
        assert_eq!(snap.completeness_histogram[4], 1);
        assert_eq!(snap.completeness_histogram[9], 2, "100 folds into the top bucket");
    }

    #[test]
    fn phase_mix() {
        let metrics = PipelineMetrics::new();
        metrics.record_phase_mix(false, false);
        metrics.record_phase_mix(true, false);
        metrics.record_phase_mix(true, true);
        let snap = metrics.snapshot();
        assert_eq!(snap.mix_phase1_only, 1);
        assert_eq!(snap.mix_phase2, 1);
        assert_eq!(snap.mix_phase3, 1);
    }

    #[test]
    fn health_healthy_when_quiet() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.health(256), PipelineHealth::Healthy);
    }

    #[test]
    fn health_degrades_on_error_rate() {
        let metrics = PipelineMetrics::new();
        for _ in 0..90 {
            metrics.record_phase_ok(Phase::Triage, 1);
        }
        for _ in 0..10 {
            metrics.record_phase_failed(Phase::Analyst);
        }
        assert_eq!(metrics.health(256), PipelineHealth::Degraded);
    }

    #[test]
    fn health_unhealthy_when_failures_dominate() {
        let metrics = PipelineMetrics::new();
        metrics.record_phase_ok(Phase::Triage, 1);
        for _ in 0..9 {
            metrics.record_phase_failed(Phase::Analyst);
        }
        assert_eq!(metrics.health(256), PipelineHealth::Unhealthy);
    }

    #[test]
    fn health_degrades_on_saturated_p2_queue() {
        let metrics = PipelineMetrics::new();
        metrics.p2_queue_depth.store(95, Ordering::Relaxed);
        assert_eq!(metrics.health(100), PipelineHealth::Degraded);
    }
}
