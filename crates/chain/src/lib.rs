//! Conversation-chain grouping and completeness scoring.
//!
//! Chains are recomputed incrementally: each new email folds its
//! evidence into the chain aggregate, and the score is derived from the
//! accumulated evidence alone. Updates for one chain must be serialized
//! by the caller; the orchestrator shards work by chain id.

mod key;
mod scoring;

use chrono::{DateTime, Utc};
use mailsift_core::{Chain, ChainLifecycle, Email, LifecycleMarker, Phase1Result};
use tracing::debug;

pub use key::chain_key;
pub use scoring::{COMPLETED_THRESHOLD, IN_PROGRESS_THRESHOLD, score_chain};

/// Incremental analyzer over conversation chains.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainAnalyzer;

impl ChainAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Fold one email into its chain, recomputing score and lifecycle.
    ///
    /// Idempotent per email: folding the same email id twice leaves the
    /// chain unchanged apart from `last_updated`.
    #[must_use]
    pub fn update(
        &self,
        email: &Email,
        phase1: &Phase1Result,
        prior: Option<Chain>,
        now: DateTime<Utc>,
    ) -> Chain {
        let mut chain = prior.unwrap_or_else(|| Chain::new(chain_key(email), now));

        if !chain.email_ids.contains(&email.id) {
            // Maintain received-time order on insert; sources deliver
            // out of order after reconnects.
            if let Some(last) = chain.evidence.last_received_at
                && email.received_at < last
            {
                chain.evidence.timestamps_ordered = false;
            }
            chain.email_ids.push(email.id.clone());
            chain.evidence.last_received_at = Some(
                chain
                    .evidence
                    .last_received_at
                    .map_or(email.received_at, |last| last.max(email.received_at)),
            );

            match phase1.lifecycle_marker {
                LifecycleMarker::Start => chain.evidence.start = true,
                LifecycleMarker::Progress => chain.evidence.progress = true,
                LifecycleMarker::Completion => chain.evidence.completion = true,
                LifecycleMarker::None => {}
            }
            if scoring::has_resolution_indicator(email, phase1) {
                chain.evidence.resolution = true;
            }
            for reference in phase1.entities.reference_values() {
                *chain
                    .evidence
                    .reference_mentions
                    .entry(reference.to_owned())
                    .or_insert(0) += 1;
            }
        }

        chain.score = scoring::score_chain(&chain.evidence, chain.email_ids.len());
        chain.completeness = chain.score.total();
        chain.lifecycle = derive_lifecycle(&chain);
        chain.last_updated = now;
        chain.version += 1;

        debug!(
            chain_id = %chain.chain_id,
            emails = chain.email_ids.len(),
            completeness = chain.completeness,
            lifecycle = ?chain.lifecycle,
            "chain updated"
        );
        chain
    }
}

fn derive_lifecycle(chain: &Chain) -> ChainLifecycle {
    let evidence = &chain.evidence;
    let no_markers =
        !evidence.start && !evidence.progress && !evidence.completion && !evidence.resolution;
    if chain.email_ids.len() <= 1 && no_markers {
        return ChainLifecycle::Orphan;
    }
    match chain.completeness {
        c if c >= scoring::COMPLETED_THRESHOLD => ChainLifecycle::Completed,
        c if c >= scoring::IN_PROGRESS_THRESHOLD => ChainLifecycle::InProgress,
        _ => ChainLifecycle::StartOnly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mailsift_core::{Entities, EntityItem, WorkflowType};

    fn email_at(id: &str, conversation: &str, offset_mins: i64) -> Email {
        let base: DateTime<Utc> = "2025-01-10T08:00:00Z".parse().unwrap();
        let mut email = Email::new(
            format!("<{id}@example.com>"),
            "buyer@example.com",
            "subject",
            "body",
            base + Duration::minutes(offset_mins),
        )
        .with_conversation_id(conversation);
        email.id = mailsift_core::EmailId::new(id);
        email
    }

    fn phase1(marker: LifecycleMarker, references: &[&str]) -> Phase1Result {
        let mut entities = Entities::default();
        for reference in references {
            entities.po_numbers.push(EntityItem::new(*reference, 0.95, 1));
        }
        Phase1Result {
            entities,
            workflow_hint: WorkflowType::General,
            urgency_score: 0,
            key_phrases: Vec::new(),
            lifecycle_marker: marker,
        }
    }

    #[test]
    fn single_unmarked_email_is_orphan() {
        let analyzer = ChainAnalyzer::new();
        let email = email_at("em-1", "C-1", 0);
        let chain = analyzer.update(&email, &phase1(LifecycleMarker::None, &[]), None, Utc::now());
        assert_eq!(chain.lifecycle, ChainLifecycle::Orphan);
        assert_eq!(chain.completeness, 0);
        assert_eq!(chain.version, 1);
    }

    #[test]
    fn start_email_opens_chain() {
        let analyzer = ChainAnalyzer::new();
        let email = email_at("em-1", "C-1", 0);
        let chain = analyzer.update(
            &email,
            &phase1(LifecycleMarker::Start, &["123456"]),
            None,
            Utc::now(),
        );
        assert_eq!(chain.lifecycle, ChainLifecycle::StartOnly);
        assert_eq!(chain.score.progression, 10);
        assert!(chain.evidence.start);
    }

    #[test]
    fn full_arc_reaches_completed() {
        let analyzer = ChainAnalyzer::new();
        let now = Utc::now();

        let chain = analyzer.update(
            &email_at("em-1", "C-1", 0),
            &phase1(LifecycleMarker::Start, &["123456"]),
            None,
            now,
        );
        let chain = analyzer.update(
            &email_at("em-2", "C-1", 30),
            &phase1(LifecycleMarker::Progress, &["123456"]),
            Some(chain),
            now,
        );
        let mut completion_email = email_at("em-3", "C-1", 60);
        completion_email.body_text = "Order shipped, tracking #1Z999AA10123456784".into();
        let chain = analyzer.update(
            &completion_email,
            &phase1(LifecycleMarker::Completion, &["123456"]),
            Some(chain),
            now,
        );

        assert_eq!(chain.lifecycle, ChainLifecycle::Completed);
        // 30 progression + 20 continuity + 40 resolution + 10 structure.
        assert_eq!(chain.completeness, 100);
        assert!(chain.invariant_holds());
        assert_eq!(chain.version, 3);
    }

    #[test]
    fn replay_is_idempotent() {
        let analyzer = ChainAnalyzer::new();
        let email = email_at("em-1", "C-1", 0);
        let p1 = phase1(LifecycleMarker::Start, &["123456"]);
        let chain = analyzer.update(&email, &p1, None, Utc::now());
        let replayed = analyzer.update(&email, &p1, Some(chain.clone()), Utc::now());
        assert_eq!(replayed.email_ids, chain.email_ids);
        assert_eq!(replayed.completeness, chain.completeness);
        assert_eq!(replayed.evidence.reference_mentions["123456"], 1);
    }

    #[test]
    fn out_of_order_timestamps_lose_structure_points() {
        let analyzer = ChainAnalyzer::new();
        let now = Utc::now();
        let chain = analyzer.update(
            &email_at("em-1", "C-1", 60),
            &phase1(LifecycleMarker::Start, &[]),
            None,
            now,
        );
        let chain = analyzer.update(
            &email_at("em-2", "C-1", 0),
            &phase1(LifecycleMarker::Progress, &[]),
            Some(chain),
            now,
        );
        let chain = analyzer.update(
            &email_at("em-3", "C-1", 90),
            &phase1(LifecycleMarker::Progress, &[]),
            Some(chain),
            now,
        );
        assert!(!chain.evidence.timestamps_ordered);
        // Three messages earn the size half of the structure score only.
        assert_eq!(chain.score.characteristics, 5);
    }

    #[test]
    fn continuity_needs_shared_reference() {
        let analyzer = ChainAnalyzer::new();
        let now = Utc::now();
        let chain = analyzer.update(
            &email_at("em-1", "C-1", 0),
            &phase1(LifecycleMarker::Start, &["111111"]),
            None,
            now,
        );
        let chain = analyzer.update(
            &email_at("em-2", "C-1", 30),
            &phase1(LifecycleMarker::Progress, &["222222"]),
            Some(chain),
            now,
        );
        assert_eq!(chain.score.entity_continuity, 0);

        let chain = analyzer.update(
            &email_at("em-3", "C-1", 60),
            &phase1(LifecycleMarker::Progress, &["111111"]),
            Some(chain),
            now,
        );
        assert_eq!(chain.score.entity_continuity, 20);
    }

    #[test]
    fn lifecycle_thresholds() {
        // start only: progression 10 -> start_only.
        // start + progress + continuity: 20 + 20 = 40 -> in_progress.
        let analyzer = ChainAnalyzer::new();
        let now = Utc::now();
        let chain = analyzer.update(
            &email_at("em-1", "C-1", 0),
            &phase1(LifecycleMarker::Start, &["123456"]),
            None,
            now,
        );
        assert_eq!(chain.lifecycle, ChainLifecycle::StartOnly);

        let chain = analyzer.update(
            &email_at("em-2", "C-1", 30),
            &phase1(LifecycleMarker::Progress, &["123456"]),
            Some(chain),
            now,
        );
        // 20 progression + 20 continuity + 5 structure.
        assert_eq!(chain.completeness, 45);
        assert_eq!(chain.lifecycle, ChainLifecycle::InProgress);
    }
}
