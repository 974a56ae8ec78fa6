use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use mailsift_core::{Chain, Email, ModelId, Phase1Result, Phase2Result, Phase3Result, RevenueImpact};
use mailsift_llm::{GenerationRequest, ModelClient};

use crate::error::AnalysisError;
use crate::parse::{self, Normalization};
use crate::{Analyzed, prompts};

/// Tunables for the Phase-3 strategist.
#[derive(Debug, Clone)]
pub struct StrategistConfig {
    pub model: ModelId,
    /// Hard per-call deadline.
    pub timeout: Duration,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Parse retries before the phase is recorded as failed.
    pub max_parse_retries: u32,
}

impl Default for StrategistConfig {
    fn default() -> Self {
        Self {
            model: ModelId::new("critical"),
            timeout: Duration::from_secs(180),
            temperature: 0.3,
            max_tokens: 2048,
            max_parse_retries: 3,
        }
    }
}

/// The Phase-3 stage seam the orchestrator injects.
#[async_trait]
pub trait Strategist: Send + Sync {
    /// Produce strategic context on top of analyst output. Never
    /// re-extracts entities or re-types the workflow.
    async fn strategize(
        &self,
        email: &Email,
        phase1: &Phase1Result,
        phase2: &Phase2Result,
        chain: &Chain,
    ) -> Result<Analyzed<Phase3Result>, AnalysisError>;
}

/// Model-backed strategist.
#[derive(Debug)]
pub struct LlmStrategist {
    client: Arc<dyn ModelClient>,
    config: StrategistConfig,
}

/// Wire shape of the model's reply; absent fields degrade to empty.
#[derive(Debug, Deserialize)]
struct StrategistReply {
    executive_summary: Option<String>,
    #[serde(default)]
    revenue_impact: RevenueImpact,
    #[serde(default)]
    competitive_strategy: Vec<String>,
    #[serde(default)]
    cross_email_patterns: Vec<String>,
    escalation_needed: Option<bool>,
}

impl LlmStrategist {
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, config: StrategistConfig) -> Self {
        Self { client, config }
    }

    fn build_result(reply: StrategistReply) -> Phase3Result {
        Phase3Result {
            executive_summary: reply.executive_summary.unwrap_or_default(),
            revenue_impact: reply.revenue_impact,
            competitive_strategy: reply.competitive_strategy,
            cross_email_patterns: reply.cross_email_patterns,
            escalation_needed: reply.escalation_needed.unwrap_or(false),
        }
    }
}

#[async_trait]
impl Strategist for LlmStrategist {
    async fn strategize(
        &self,
        email: &Email,
        phase1: &Phase1Result,
        phase2: &Phase2Result,
        chain: &Chain,
    ) -> Result<Analyzed<Phase3Result>, AnalysisError> {
        let prompt = prompts::strategist_prompt(email, phase1, phase2, chain);
        let mut temperature = self.config.temperature;
        let mut parse_retries = 0u32;
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_parse_retries {
            let request = GenerationRequest::new(self.config.model.clone(), prompt.clone())
                .with_temperature(temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_timeout(self.config.timeout);
            let raw = self.client.generate(&request).await?;

            match parse::parse_json_lenient(&raw) {
                Ok((value, normalization)) => {
                    match serde_json::from_value::<StrategistReply>(value) {
                        Ok(reply) => {
                            if normalization != Normalization::Direct {
                                parse_retries += 1;
                            }
                            debug!(email_id = %email.id, attempt, "strategy parsed");
                            return Ok(Analyzed {
                                result: Self::build_result(reply),
                                parse_retries,
                            });
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                }
                Err(e) => last_error = e,
            }

            if attempt < self.config.max_parse_retries {
                parse_retries += 1;
                temperature = 0.0;
                warn!(
                    email_id = %email.id,
                    attempt,
                    error = %last_error,
                    "unparseable strategist output, regenerating"
                );
            }
        }

        Err(AnalysisError::Parse {
            attempts: parse_retries,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailsift_core::{Entities, WorkflowType};
    use mailsift_llm::{MockModelClient, ScriptedModelClient};

    fn email() -> Email {
        Email::new(
            "<t@example.com>",
            "buyer@example.com",
            "URGENT: competitor pricing",
            "They quoted 10% lower.",
            Utc::now(),
        )
    }

    fn phase1() -> Phase1Result {
        Phase1Result {
            urgency_score: 3,
            ..Phase1Result::default()
        }
    }

    fn phase2() -> Phase2Result {
        Phase2Result {
            workflow_type: WorkflowType::QuoteProcessing,
            action_items: Vec::new(),
            sla_hours: 4,
            risk_flags: vec!["competitor_pressure".into()],
            validated_entities: Entities::default(),
            rejected_entities: Vec::new(),
            summary: "High-value quote under competitive pressure".into(),
        }
    }

    fn strategist(client: Arc<dyn ModelClient>) -> LlmStrategist {
        LlmStrategist::new(client, StrategistConfig::default())
    }

    const GOOD_REPLY: &str = r#"{
        "executive_summary": "Deal at risk from a lower competing quote",
        "revenue_impact": {"immediate_minor": 4800000, "potential_minor": 20000000},
        "competitive_strategy": ["match pricing", "bundle support"],
        "cross_email_patterns": ["third competitive mention this quarter"],
        "escalation_needed": true
    }"#;

    #[tokio::test]
    async fn clean_reply_parses() {
        let strategist = strategist(Arc::new(MockModelClient::new(GOOD_REPLY)));
        let analyzed = strategist
            .strategize(&email(), &phase1(), &phase2(), &Chain::new("C-1", Utc::now()))
            .await
            .unwrap();
        assert!(analyzed.result.escalation_needed);
        assert_eq!(analyzed.result.revenue_impact.immediate_minor, 4_800_000);
        assert_eq!(analyzed.result.competitive_strategy.len(), 2);
        assert_eq!(analyzed.parse_retries, 0);
    }

    #[tokio::test]
    async fn sparse_reply_defaults_to_no_escalation() {
        let strategist = strategist(Arc::new(MockModelClient::new(
            r#"{"executive_summary": "routine"}"#,
        )));
        let analyzed = strategist
            .strategize(&email(), &phase1(), &phase2(), &Chain::new("C-1", Utc::now()))
            .await
            .unwrap();
        assert!(!analyzed.result.escalation_needed);
        assert_eq!(analyzed.result.revenue_impact.immediate_minor, 0);
    }

    #[tokio::test]
    async fn parse_ladder_applies() {
        let fenced = format!("```json\n{GOOD_REPLY}\n```");
        let strategist = strategist(Arc::new(MockModelClient::new(fenced)));
        let analyzed = strategist
            .strategize(&email(), &phase1(), &phase2(), &Chain::new("C-1", Utc::now()))
            .await
            .unwrap();
        assert_eq!(analyzed.parse_retries, 1);
        assert!(analyzed.result.escalation_needed);
    }

    #[tokio::test]
    async fn exhausted_retries_fail() {
        let client = Arc::new(ScriptedModelClient::new(vec![Ok("no structure here".into())]));
        let strategist = strategist(client.clone());
        let err = strategist
            .strategize(&email(), &phase1(), &phase2(), &Chain::new("C-1", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Parse { .. }));
        assert_eq!(client.call_count(), 4);
    }
}
