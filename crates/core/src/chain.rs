use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChainId, EmailId};

/// Lifecycle position of a conversation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainLifecycle {
    StartOnly,
    InProgress,
    Completed,
    /// A single email with no recognizable workflow markers.
    Orphan,
}

/// The component breakdown behind a chain's completeness score.
///
/// Kept on the chain so distribution tests and dashboards can explain a
/// score without recomputing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainScore {
    /// Workflow progression evidence, 0–30.
    pub progression: u8,
    /// Entity continuity across messages, 0–20.
    pub entity_continuity: u8,
    /// Resolution indicators, 0–40.
    pub resolution: u8,
    /// Structural characteristics, 0–10.
    pub characteristics: u8,
}

impl ChainScore {
    /// Total completeness, 0–100.
    #[must_use]
    pub fn total(self) -> u8 {
        self.progression + self.entity_continuity + self.resolution + self.characteristics
    }
}

/// Accumulated per-chain evidence, carried on the chain so incremental
/// recomputes survive restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainEvidence {
    /// A member carried a workflow start indicator.
    pub start: bool,
    /// A member carried in-progress evidence.
    pub progress: bool,
    /// A member carried completion evidence.
    pub completion: bool,
    /// A member carried an explicit resolution indicator (resolution
    /// phrase, tracking number, or attached invoice).
    pub resolution: bool,
    /// Reference value (PO/quote/case) to the number of distinct member
    /// emails mentioning it.
    #[serde(default)]
    pub reference_mentions: HashMap<String, u32>,
    /// Received time of the most recent member.
    pub last_received_at: Option<DateTime<Utc>>,
    /// False once a member arrived with a timestamp earlier than its
    /// predecessor.
    pub timestamps_ordered: bool,
}

impl ChainEvidence {
    /// Whether any PO/quote/case reference recurs across two or more
    /// member emails.
    #[must_use]
    pub fn has_reference_continuity(&self) -> bool {
        self.reference_mentions.values().any(|&count| count >= 2)
    }
}

/// A derived aggregate over the emails of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: ChainId,
    /// Member emails in received-time order.
    pub email_ids: Vec<EmailId>,
    /// Completeness score 0–100.
    pub completeness: u8,
    /// Component breakdown of `completeness`.
    pub score: ChainScore,
    pub lifecycle: ChainLifecycle,
    /// Evidence backing the score, updated incrementally.
    pub evidence: ChainEvidence,
    pub last_updated: DateTime<Utc>,
    /// Bumped on every recompute; the store rejects stale writes.
    pub version: u64,
}

impl Chain {
    /// Create a new empty chain in the orphan state.
    #[must_use]
    pub fn new(chain_id: impl Into<ChainId>, now: DateTime<Utc>) -> Self {
        Self {
            chain_id: chain_id.into(),
            email_ids: Vec::new(),
            completeness: 0,
            score: ChainScore::default(),
            lifecycle: ChainLifecycle::Orphan,
            evidence: ChainEvidence {
                timestamps_ordered: true,
                ..ChainEvidence::default()
            },
            last_updated: now,
            version: 0,
        }
    }

    /// Number of member emails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.email_ids.len()
    }

    /// Returns `true` if the chain has no members yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email_ids.is_empty()
    }

    /// Check the completeness invariant: a score of 100 requires a
    /// completed lifecycle plus both start and resolution evidence.
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        if self.completeness == 100 {
            self.lifecycle == ChainLifecycle::Completed
                && self.evidence.start
                && self.evidence.resolution
        } else {
            true
        }
    }
}
