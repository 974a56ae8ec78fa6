use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Position of one email in the pipeline.
///
/// ```text
/// Ingested -> Phase1Ok -> Chained -> Routed ->
///            |- TaskMaterialized            (phase1-only route)
///            |- Phase2Ok -> [Phase3Ok] -> TaskMaterialized
///            `- Failed(stage)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EmailState {
    Ingested,
    Phase1Ok,
    Chained,
    Routed,
    Phase2Ok,
    Phase3Ok,
    TaskMaterialized,
    Failed { stage: Phase },
}

impl EmailState {
    /// Terminal states admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TaskMaterialized | Self::Failed { .. })
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use EmailState::{
            Chained, Failed, Ingested, Phase1Ok, Phase2Ok, Phase3Ok, Routed, TaskMaterialized,
        };
        match (self, next) {
            (Ingested, Phase1Ok)
            | (Phase1Ok, Chained)
            | (Chained, Routed)
            // Phase1-only routes materialize straight from Routed.
            | (Routed, TaskMaterialized | Phase2Ok)
            | (Phase2Ok, Phase3Ok | TaskMaterialized)
            | (Phase3Ok, TaskMaterialized) => true,
            // Any non-terminal state may fail at its stage.
            (from, Failed { .. }) => !from.is_terminal(),
            _ => false,
        }
    }
}
