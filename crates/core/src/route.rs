use serde::{Deserialize, Serialize};

/// The routing verdict for one email: which model-backed phases run, and
/// which rule produced the verdict.
///
/// Recorded on the materialized task so routing behavior can be audited
/// and tuned offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Run the Phase-2 analyst.
    pub run_analyst: bool,
    /// Run the Phase-3 strategist. Implies `run_analyst`.
    pub run_strategist: bool,
    /// 1-based index of the rule that matched, in evaluation order.
    pub rule: u8,
}

impl RouteDecision {
    /// Both model-backed phases run.
    #[must_use]
    pub fn full(rule: u8) -> Self {
        Self {
            run_analyst: true,
            run_strategist: true,
            rule,
        }
    }

    /// Only the analyst runs.
    #[must_use]
    pub fn analyst_only(rule: u8) -> Self {
        Self {
            run_analyst: true,
            run_strategist: false,
            rule,
        }
    }

    /// Triage output is terminal; no model-backed phase runs.
    #[must_use]
    pub fn terminal(rule: u8) -> Self {
        Self {
            run_analyst: false,
            run_strategist: false,
            rule,
        }
    }

    /// Short label for logs and event payloads.
    #[must_use]
    pub fn label(self) -> &'static str {
        match (self.run_analyst, self.run_strategist) {
            (true, true) => "analyst+strategist",
            (true, false) => "analyst-only",
            (false, _) => "phase1-only",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_flags() {
        let full = RouteDecision::full(1);
        assert!(full.run_analyst && full.run_strategist);
        assert_eq!(full.rule, 1);

        let analyst = RouteDecision::analyst_only(3);
        assert!(analyst.run_analyst);
        assert!(!analyst.run_strategist);

        let terminal = RouteDecision::terminal(4);
        assert!(!terminal.run_analyst && !terminal.run_strategist);
    }

    #[test]
    fn labels() {
        assert_eq!(RouteDecision::full(1).label(), "analyst+strategist");
        assert_eq!(RouteDecision::analyst_only(5).label(), "analyst-only");
        assert_eq!(RouteDecision::terminal(4).label(), "phase1-only");
    }

    #[test]
    fn serde_roundtrip() {
        let decision = RouteDecision::full(2);
        let json = serde_json::to_string(&decision).unwrap();
        let back: RouteDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decision);
    }
}
