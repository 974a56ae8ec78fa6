//! Pipeline orchestration for the adaptive three-phase email analysis
//! system: bounded stage queues, per-stage worker pools, retry with
//! backoff, checkpoint recovery, SLA tracking, and health metrics.

pub mod config;
pub mod dlq;
pub mod materialize;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod sla;

pub use config::{ModelConfig, PipelineConfig, QueueCaps, RetryConfig, SlaConfig, ThrottleConfig};
pub use dlq::{DeadLetterEntry, DeadLetterQueue};
pub use materialize::{MaterializeInput, TaskGenerator};
pub use metrics::{
    HealthReport, MetricsSnapshot, PhaseSnapshot, PipelineHealth, PipelineMetrics, SlaDistribution,
};
pub use orchestrator::{IngestOutcome, Pipeline, Runtime, Stages};
pub use retry::RetryPolicy;
pub use sla::SlaTracker;
