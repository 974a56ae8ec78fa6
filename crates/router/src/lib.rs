//! Adaptive routing: given triage output and chain context, decide which
//! model-backed phases run.
//!
//! Rules are evaluated in a fixed order, first match wins, and the
//! matched rule index travels with the decision so routing behavior can
//! be audited and tuned from outcomes.

use mailsift_core::{Chain, LifecycleMarker, Phase1Result, Priority, RouteDecision, WorkflowType};
use tracing::debug;

/// Tunables for the routing rules.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Chains at or above this completeness take the full route.
    pub complete_threshold: u8,
    /// Money values at or above this (minor units) take the full route.
    pub high_value_threshold_minor: i64,
    /// Keywords that force the full route when present in key phrases.
    pub high_value_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            complete_threshold: 70,
            high_value_threshold_minor: 5_000_000,
            high_value_keywords: mailsift_extract::DEFAULT_COMPETITOR_KEYWORDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

/// The routing seam the orchestrator injects.
pub trait Router: Send + Sync {
    /// Decide the route for one email, plus its priority class.
    fn route(&self, phase1: &Phase1Result, chain: &Chain) -> (RouteDecision, Priority);
}

/// The production rule-based router.
#[derive(Debug, Clone, Default)]
pub struct RuleRouter {
    config: RouterConfig,
}

impl RuleRouter {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    fn has_high_value_keyword(&self, phase1: &Phase1Result) -> bool {
        phase1.key_phrases.iter().any(|phrase| {
            self.config
                .high_value_keywords
                .iter()
                .any(|k| phrase.eq_ignore_ascii_case(k))
        })
    }

    fn has_high_value_money(&self, phase1: &Phase1Result) -> bool {
        phase1
            .entities
            .max_money_minor()
            .is_some_and(|m| m >= self.config.high_value_threshold_minor)
    }
}

impl Router for RuleRouter {
    fn route(&self, phase1: &Phase1Result, chain: &Chain) -> (RouteDecision, Priority) {
        let decision = if phase1.urgency_score >= 2
            || self.has_high_value_money(phase1)
            || self.has_high_value_keyword(phase1)
        {
            RouteDecision::full(1)
        } else if chain.completeness >= self.config.complete_threshold {
            // Complete chains produce the richest learning signal.
            RouteDecision::full(2)
        } else if matches!(
            phase1.workflow_hint,
            WorkflowType::QuoteProcessing | WorkflowType::OrderManagement | WorkflowType::Approval
        ) {
            RouteDecision::analyst_only(3)
        } else if phase1.lifecycle_marker == LifecycleMarker::Completion
            && !phase1.entities.has_actionable()
        {
            RouteDecision::terminal(4)
        } else {
            RouteDecision::analyst_only(5)
        };

        let priority = priority_for(phase1, &decision);
        debug!(
            rule = decision.rule,
            route = decision.label(),
            priority = %priority,
            urgency = phase1.urgency_score,
            completeness = chain.completeness,
            "routing decided"
        );
        (decision, priority)
    }
}

/// Priority class from urgency and route shape.
///
/// Full-route emails with maximum urgency are critical; completed
/// low-signal traffic sinks to low.
fn priority_for(phase1: &Phase1Result, decision: &RouteDecision) -> Priority {
    if phase1.urgency_score >= 3 {
        Priority::Critical
    } else if phase1.urgency_score == 2 || (decision.run_strategist && decision.rule == 1) {
        Priority::High
    } else if phase1.lifecycle_marker == LifecycleMarker::Completion {
        Priority::Low
    } else {
        Priority::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailsift_core::{Chain, Entities, EntityItem, MoneyValue};

    fn phase1() -> Phase1Result {
        Phase1Result {
            entities: Entities::default(),
            workflow_hint: WorkflowType::General,
            urgency_score: 0,
            key_phrases: Vec::new(),
            lifecycle_marker: LifecycleMarker::None,
        }
    }

    fn chain_with_completeness(completeness: u8) -> Chain {
        let mut chain = Chain::new("C-1", Utc::now());
        chain.completeness = completeness;
        chain
    }

    fn router() -> RuleRouter {
        RuleRouter::default()
    }

    #[test]
    fn urgency_2_takes_full_route() {
        let mut p1 = phase1();
        p1.urgency_score = 2;
        let (decision, priority) = router().route(&p1, &chain_with_completeness(0));
        assert!(decision.run_analyst && decision.run_strategist);
        assert_eq!(decision.rule, 1);
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn urgency_3_is_critical() {
        let mut p1 = phase1();
        p1.urgency_score = 3;
        let (decision, priority) = router().route(&p1, &chain_with_completeness(0));
        assert_eq!(decision.rule, 1);
        assert_eq!(priority, Priority::Critical);
    }

    #[test]
    fn high_value_money_takes_full_route() {
        let mut p1 = phase1();
        p1.entities.money_values.push(MoneyValue {
            amount_minor: 5_000_000,
            currency: "USD".into(),
            confidence: 0.95,
            source_phase: 1,
        });
        let (decision, _) = router().route(&p1, &chain_with_completeness(0));
        assert_eq!(decision.rule, 1);
        assert!(decision.run_strategist);
    }

    #[test]
    fn below_threshold_money_does_not() {
        let mut p1 = phase1();
        p1.entities.money_values.push(MoneyValue {
            amount_minor: 4_999_999,
            currency: "USD".into(),
            confidence: 0.95,
            source_phase: 1,
        });
        let (decision, _) = router().route(&p1, &chain_with_completeness(0));
        assert_ne!(decision.rule, 1);
    }

    #[test]
    fn competitor_keyword_takes_full_route() {
        let mut p1 = phase1();
        p1.key_phrases.push("competitor".into());
        let (decision, _) = router().route(&p1, &chain_with_completeness(0));
        assert_eq!(decision.rule, 1);
    }

    #[test]
    fn complete_chain_takes_full_route() {
        let (decision, _) = router().route(&phase1(), &chain_with_completeness(70));
        assert_eq!(decision.rule, 2);
        assert!(decision.run_analyst && decision.run_strategist);
    }

    #[test]
    fn transactional_hints_take_analyst_only() {
        for hint in [
            WorkflowType::QuoteProcessing,
            WorkflowType::OrderManagement,
            WorkflowType::Approval,
        ] {
            let mut p1 = phase1();
            p1.workflow_hint = hint;
            let (decision, _) = router().route(&p1, &chain_with_completeness(30));
            assert_eq!(decision.rule, 3, "hint {hint:?}");
            assert!(decision.run_analyst && !decision.run_strategist);
        }
    }

    #[test]
    fn completed_without_actionables_is_terminal() {
        let mut p1 = phase1();
        p1.lifecycle_marker = LifecycleMarker::Completion;
        let (decision, priority) = router().route(&p1, &chain_with_completeness(30));
        assert_eq!(decision.rule, 4);
        assert!(!decision.run_analyst);
        assert_eq!(priority, Priority::Low);
    }

    #[test]
    fn completed_with_actionables_is_not_terminal() {
        let mut p1 = phase1();
        p1.lifecycle_marker = LifecycleMarker::Completion;
        p1.entities.po_numbers.push(EntityItem::new("123456", 0.95, 1));
        let (decision, _) = router().route(&p1, &chain_with_completeness(30));
        assert_eq!(decision.rule, 5);
        assert!(decision.run_analyst);
    }

    #[test]
    fn default_route_is_analyst_only_medium() {
        let (decision, priority) = router().route(&phase1(), &chain_with_completeness(35));
        assert_eq!(decision.rule, 5);
        assert!(decision.run_analyst && !decision.run_strategist);
        assert_eq!(priority, Priority::Medium);
    }

    #[test]
    fn rule_order_urgency_beats_completeness() {
        let mut p1 = phase1();
        p1.urgency_score = 2;
        let (decision, _) = router().route(&p1, &chain_with_completeness(90));
        assert_eq!(decision.rule, 1);
    }

    #[allow(dead_code)]
    fn _assert_dyn_router(_: &dyn Router) {}
}
