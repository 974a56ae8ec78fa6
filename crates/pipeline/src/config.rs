use std::time::Duration;

use serde::Deserialize;

use mailsift_core::SlaPolicy;

/// Bounded capacities for the stage queues.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueCaps {
    /// Ingest → Phase-1. The intake buffer in front of the analysis
    /// stages; sized to match the Phase-1 → chain queue.
    pub p1: usize,
    /// Phase-1 → chain analyzer.
    pub chain: usize,
    /// Chain analyzer → router.
    pub router: usize,
    /// Router → Phase-2.
    pub p2: usize,
    /// Phase-2 → Phase-3.
    pub p3: usize,
}

impl Default for QueueCaps {
    fn default() -> Self {
        Self {
            p1: 1024,
            chain: 1024,
            router: 512,
            p2: 256,
            p3: 64,
        }
    }
}

/// Model selection and hard timeouts for the model-backed phases.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Phase-2 model.
    pub primary_id: String,
    /// Phase-3 model.
    pub critical_id: String,
    /// Phase-2 hard timeout, milliseconds.
    pub timeout_primary_ms: u64,
    /// Phase-3 hard timeout, milliseconds.
    pub timeout_critical_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary_id: "primary".into(),
            critical_id: "critical".into(),
            timeout_primary_ms: 45_000,
            timeout_critical_ms: 180_000,
        }
    }
}

/// Backoff policy for transient failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per transient failure, including the first.
    pub max_attempts: u32,
    /// Initial backoff, milliseconds.
    pub base_ms: u64,
    /// Factor applied per attempt.
    pub multiplier: f64,
    /// Jitter spread as a fraction (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_ms: 500,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// SLA tracking settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    /// Per-priority response allowances and at-risk fraction.
    pub policy: SlaPolicy,
    /// Scan interval for the tracker, seconds.
    pub check_interval_secs: u64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            policy: SlaPolicy::default(),
            check_interval_secs: 300,
        }
    }
}

/// Adaptive throttling of the Phase-3 queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Phase-2 queue fill fraction that arms the throttle.
    pub p2_high_fraction: f64,
    /// Seconds the queue must stay above the fraction before Phase-3
    /// enqueues pause. Phase-2 is never paused.
    pub sustain_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            p2_high_fraction: 0.9,
            sustain_secs: 10,
        }
    }
}

/// Frozen pipeline configuration. Constructed once at startup; workers
/// receive it behind an `Arc` and never mutate it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Phase-1 worker count; 0 means one per CPU core.
    pub phase1_concurrency: usize,
    /// Phase-2 worker count.
    pub phase2_concurrency: usize,
    /// Phase-3 worker count.
    pub phase3_concurrency: usize,
    pub queue_caps: QueueCaps,
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub sla: SlaConfig,
    /// Chains at or above this completeness take the full route.
    pub chain_complete_threshold: u8,
    /// Money values at or above this (minor units) take the full route.
    pub money_high_value_threshold_minor: i64,
    /// Keywords that force the full route.
    pub router_high_value_keywords: Vec<String>,
    pub throttle: ThrottleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            phase1_concurrency: 0,
            phase2_concurrency: 3,
            phase3_concurrency: 1,
            queue_caps: QueueCaps::default(),
            model: ModelConfig::default(),
            retry: RetryConfig::default(),
            sla: SlaConfig::default(),
            chain_complete_threshold: 70,
            money_high_value_threshold_minor: 5_000_000,
            router_high_value_keywords: mailsift_extract::DEFAULT_COMPETITOR_KEYWORDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Router tunables drawn from this configuration.
    #[must_use]
    pub fn router_config(&self) -> mailsift_router::RouterConfig {
        mailsift_router::RouterConfig {
            complete_threshold: self.chain_complete_threshold,
            high_value_threshold_minor: self.money_high_value_threshold_minor,
            high_value_keywords: self.router_high_value_keywords.clone(),
        }
    }

    /// Phase-2 analyst tunables drawn from this configuration.
    #[must_use]
    pub fn analyst_config(&self) -> mailsift_analysis::AnalystConfig {
        mailsift_analysis::AnalystConfig {
            model: mailsift_core::ModelId::new(self.model.primary_id.clone()),
            timeout: self.primary_timeout(),
            ..mailsift_analysis::AnalystConfig::default()
        }
    }

    /// Phase-3 strategist tunables drawn from this configuration.
    #[must_use]
    pub fn strategist_config(&self) -> mailsift_analysis::StrategistConfig {
        mailsift_analysis::StrategistConfig {
            model: mailsift_core::ModelId::new(self.model.critical_id.clone()),
            timeout: self.critical_timeout(),
            ..mailsift_analysis::StrategistConfig::default()
        }
    }
    /// Effective Phase-1 worker count.
    #[must_use]
    pub fn phase1_workers(&self) -> usize {
        if self.phase1_concurrency == 0 {
            num_cpus::get()
        } else {
            self.phase1_concurrency
        }
    }

    /// Effective Phase-2 worker count.
    #[must_use]
    pub fn phase2_workers(&self) -> usize {
        if self.phase2_concurrency == 0 {
            3
        } else {
            self.phase2_concurrency
        }
    }

    /// Effective Phase-3 worker count.
    #[must_use]
    pub fn phase3_workers(&self) -> usize {
        if self.phase3_concurrency == 0 {
            1
        } else {
            self.phase3_concurrency
        }
    }

    /// Phase-2 hard timeout.
    #[must_use]
    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.model.timeout_primary_ms)
    }

    /// Phase-3 hard timeout.
    #[must_use]
    pub fn critical_timeout(&self) -> Duration {
        Duration::from_millis(self.model.timeout_critical_ms)
    }

    /// Send deadline when enqueueing toward the Phase-2 stage: twice the
    /// downstream hard timeout. Backpressure surfaces as a send timeout
    /// rather than a silent drop.
    #[must_use]
    pub fn p2_send_timeout(&self) -> Duration {
        self.primary_timeout() * 2
    }

    /// Send deadline when enqueueing toward the Phase-3 stage.
    #[must_use]
    pub fn p3_send_timeout(&self) -> Duration {
        self.critical_timeout() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_caps.p1, 1024);
        assert_eq!(config.queue_caps.chain, 1024);
        assert_eq!(config.queue_caps.router, 512);
        assert_eq!(config.queue_caps.p2, 256);
        assert_eq!(config.queue_caps.p3, 64);
        assert_eq!(config.phase2_workers(), 3);
        assert_eq!(config.phase3_workers(), 1);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_ms, 500);
        assert_eq!(config.model.timeout_primary_ms, 45_000);
        assert_eq!(config.model.timeout_critical_ms, 180_000);
        assert_eq!(config.sla.check_interval_secs, 300);
    }

    #[test]
    fn phase1_defaults_to_cores() {
        let config = PipelineConfig::default();
        assert_eq!(config.phase1_workers(), num_cpus::get());
        let config = PipelineConfig {
            phase1_concurrency: 2,
            ..PipelineConfig::default()
        };
        assert_eq!(config.phase1_workers(), 2);
    }

    #[test]
    fn send_timeouts_are_twice_hard_timeouts() {
        let config = PipelineConfig::default();
        assert_eq!(config.p2_send_timeout(), Duration::from_secs(90));
        assert_eq!(config.p3_send_timeout(), Duration::from_secs(360));
    }

    #[test]
    fn routing_defaults_match_policy() {
        let config = PipelineConfig::default();
        assert_eq!(config.chain_complete_threshold, 70);
        assert_eq!(config.money_high_value_threshold_minor, 5_000_000);
        assert!(
            config
                .router_high_value_keywords
                .iter()
                .any(|k| k == "competitor")
        );

        let router = config.router_config();
        assert_eq!(router.complete_threshold, 70);
        assert_eq!(router.high_value_threshold_minor, 5_000_000);
    }

    #[test]
    fn stage_configs_inherit_models_and_timeouts() {
        let config = PipelineConfig {
            model: ModelConfig {
                primary_id: "fast-12b".into(),
                critical_id: "deep-70b".into(),
                timeout_primary_ms: 30_000,
                timeout_critical_ms: 120_000,
            },
            ..PipelineConfig::default()
        };
        let analyst = config.analyst_config();
        assert_eq!(analyst.model.as_str(), "fast-12b");
        assert_eq!(analyst.timeout, Duration::from_secs(30));
        let strategist = config.strategist_config();
        assert_eq!(strategist.model.as_str(), "deep-70b");
        assert_eq!(strategist.timeout, Duration::from_secs(120));
    }

    #[test]
    fn config_deserializes_from_partial_json() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "phase2_concurrency": 1,
                "queue_caps": {"p2": 8},
                "model": {"timeout_primary_ms": 1000}
            }"#,
        )
        .unwrap();
        assert_eq!(config.phase2_workers(), 1);
        assert_eq!(config.queue_caps.p2, 8);
        assert_eq!(config.queue_caps.p1, 1024, "unset fields keep defaults");
        assert_eq!(config.model.timeout_primary_ms, 1000);
    }
}
