use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use mailsift_core::{
    ActionItem, Chain, Email, Entities, ModelId, Phase1Result, Phase2Result, Priority,
    RejectedEntity, WorkflowType,
};
use mailsift_llm::{GenerationRequest, ModelClient};

use crate::error::AnalysisError;
use crate::parse::{self, Normalization};
use crate::{Analyzed, prompts};

/// Longest summary carried on a Phase-2 result.
const MAX_SUMMARY_CHARS: usize = 600;

/// Tunables for the Phase-2 analyst.
#[derive(Debug, Clone)]
pub struct AnalystConfig {
    pub model: ModelId,
    /// Hard per-call deadline.
    pub timeout: Duration,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Parse retries before the phase is recorded as failed.
    pub max_parse_retries: u32,
    /// SLA hours used when the model omits them.
    pub default_sla_hours: u32,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            model: ModelId::new("primary"),
            timeout: Duration::from_secs(45),
            temperature: 0.2,
            max_tokens: 1024,
            max_parse_retries: 3,
            default_sla_hours: 72,
        }
    }
}

/// The Phase-2 stage seam the orchestrator injects.
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Validate and enrich triage output for one email.
    async fn analyze(
        &self,
        email: &Email,
        phase1: &Phase1Result,
        chain: &Chain,
    ) -> Result<Analyzed<Phase2Result>, AnalysisError>;
}

/// Model-backed analyst.
#[derive(Debug)]
pub struct LlmAnalyst {
    client: Arc<dyn ModelClient>,
    config: AnalystConfig,
}

/// Wire shape of the model's reply. Every field tolerates absence so a
/// partially-formed reply still yields a usable result.
#[derive(Debug, Deserialize)]
struct AnalystReply {
    workflow_type: Option<WorkflowType>,
    summary: Option<String>,
    sla_hours: Option<u32>,
    #[serde(default)]
    action_items: Vec<ActionItemReply>,
    #[serde(default)]
    risk_flags: Vec<String>,
    #[serde(default)]
    added_entities: Entities,
    #[serde(default)]
    confidence_adjustments: Vec<ConfidenceAdjustment>,
    #[serde(default)]
    rejected_entities: Vec<RejectedEntity>,
}

#[derive(Debug, Deserialize)]
struct ActionItemReply {
    task: String,
    owner: Option<String>,
    deadline: Option<DateTime<Utc>>,
    priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
struct ConfidenceAdjustment {
    value: String,
    confidence: f64,
}

impl LlmAnalyst {
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, config: AnalystConfig) -> Self {
        Self { client, config }
    }

    /// Fold the model reply into a Phase-2 result, enforcing the entity
    /// preservation contract: every triage entity survives unless the
    /// model rejected it with a reason.
    fn build_result(&self, phase1: &Phase1Result, reply: AnalystReply) -> Phase2Result {
        let mut validated = phase1.entities.clone();

        // Apply rejections; only values that actually matched a triage
        // entity are recorded as rejected.
        let mut rejected = Vec::new();
        for rejection in reply.rejected_entities {
            if validated.contains_value(&rejection.value) {
                for category in validated.item_categories_mut() {
                    category.retain(|i| i.value != rejection.value);
                }
                rejected.push(rejection);
            }
        }

        for adjustment in reply.confidence_adjustments {
            let confidence = adjustment.confidence.clamp(0.0, 1.0);
            for category in validated.item_categories_mut() {
                if let Some(item) = category.iter_mut().find(|i| i.value == adjustment.value) {
                    item.confidence = confidence;
                    item.source_phase = 2;
                }
            }
        }

        // Additions (including revived low-confidence extractions) are
        // attributed to this phase.
        let mut added = reply.added_entities;
        for category in added.item_categories_mut() {
            for item in category.iter_mut() {
                item.confidence = item.confidence.clamp(0.0, 1.0);
                item.source_phase = 2;
            }
        }
        for money in &mut added.money_values {
            money.confidence = money.confidence.clamp(0.0, 1.0);
            money.source_phase = 2;
        }
        validated.merge(&added);

        let mut summary = reply.summary.unwrap_or_default();
        if summary.chars().count() > MAX_SUMMARY_CHARS {
            summary = summary.chars().take(MAX_SUMMARY_CHARS).collect();
        }

        Phase2Result {
            workflow_type: reply.workflow_type.unwrap_or(phase1.workflow_hint),
            action_items: reply
                .action_items
                .into_iter()
                .map(|item| ActionItem {
                    task: item.task,
                    owner: item.owner,
                    deadline: item.deadline,
                    priority: item.priority.unwrap_or_default(),
                })
                .collect(),
            sla_hours: reply.sla_hours.unwrap_or(self.config.default_sla_hours),
            risk_flags: reply.risk_flags,
            validated_entities: validated,
            rejected_entities: rejected,
            summary,
        }
    }
}

#[async_trait]
impl Analyst for LlmAnalyst {
    async fn analyze(
        &self,
        email: &Email,
        phase1: &Phase1Result,
        chain: &Chain,
    ) -> Result<Analyzed<Phase2Result>, AnalysisError> {
        let prompt = prompts::analyst_prompt(email, phase1, chain);
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
                    match serde_json::from_value::<AnalystReply>(value) {
                        Ok(reply) => {
                            if normalization != Normalization::Direct {
                                parse_retries += 1;
                            }
                            debug!(
                                email_id = %email.id,
                                attempt,
                                parse_retries,
                                "analysis parsed"
                            );
                            return Ok(Analyzed {
                                result: self.build_result(phase1, reply),
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
                // Deterministic output on retries.
                temperature = 0.0;
                warn!(
                    email_id = %email.id,
                    attempt,
                    error = %last_error,
                    "unparseable analyst output, regenerating"
                );
            }
        }

        Err(AnalysisError::Parse {
            attempts: parse_retries,
            message: last_error,
        })
    }
}
