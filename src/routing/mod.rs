//! Dual-process routing and the credit-assignment stack.
//!
//! The router decides per turn whether a call runs as fast, habitual
//! System 1 or deliberate System 2. Any single escalation trigger forces
//! System 2 and is recorded as a reason. Sibling modules:
//!
//! - [`reputation`]: per-entity trust with quarantine and forgiveness
//! - [`shapley`]: exact / Monte Carlo credit assignment over coalitions
//! - [`nash`]: fixed-step best-response model/task routing
//! - [`truthful`]: declared-vs-observed capability credibility

pub mod nash;
pub mod reputation;
pub mod shapley;
pub mod truthful;

use serde::{Deserialize, Serialize};

/// Which reasoning system handles the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    System1,
    System2,
}

impl ProcessType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::System1 => "system1",
            Self::System2 => "system2",
        }
    }
}

/// Why the router escalated to System 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    HighSurprise,
    LowAgreement,
    HighNovelty,
    SafetyCritical,
    ExplicitRequest,
    PreviousError,
    GoalDrift,
    /// Raised by a registered escalation policy.
    Policy(String),
}

impl RouteReason {
    pub fn label(&self) -> &str {
        match self {
            Self::HighSurprise => "high_surprise",
            Self::LowAgreement => "low_agreement",
            Self::HighNovelty => "high_novelty",
            Self::SafetyCritical => "safety_critical",
            Self::ExplicitRequest => "explicit_request",
            Self::PreviousError => "previous_error",
            Self::GoalDrift => "goal_drift",
            Self::Policy(name) => name,
        }
    }
}

/// Classified turn signals the router reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteContext {
    pub surprise: f64,
    /// Agreement among population members; low agreement escalates.
    pub population_agreement: f64,
    pub novelty: f64,
    pub safety: f64,
    pub explicit_system2: bool,
    pub previous_error: bool,
    pub goal_drift: f64,
}

impl Default for RouteContext {
    fn default() -> Self {
        Self {
            surprise: 0.0,
            population_agreement: 1.0,
            novelty: 0.0,
            safety: 0.0,
            explicit_system2: false,
            previous_error: false,
            goal_drift: 0.0,
        }
    }
}

/// A routing verdict and the triggers behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub process: ProcessType,
    pub reasons: Vec<RouteReason>,
}

/// Extension point: collaborator-registered escalation rules, installed at
/// session construction and immutable afterwards.
pub trait EscalationPolicy: Send + Sync {
    /// A name for the policy, used in route reasons and audit details.
    fn name(&self) -> &str;
    /// Return true to force System 2 for this context.
    fn escalate(&self, ctx: &RouteContext) -> bool;
}

/// The System 1 / System 2 router.
pub struct DualProcessRouter {
    policies: Vec<Box<dyn EscalationPolicy>>,
}

impl std::fmt::Debug for DualProcessRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualProcessRouter")
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl Default for DualProcessRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DualProcessRouter {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    pub fn with_policies(policies: Vec<Box<dyn EscalationPolicy>>) -> Self {
        Self { policies }
    }

    /// Route a turn. Any trigger escalates; otherwise System 1.
    pub fn route(&self, ctx: &RouteContext) -> RouteDecision {
        let mut reasons = Vec::new();
        if ctx.surprise > 0.6 {
            reasons.push(RouteReason::HighSurprise);
        }
        if ctx.population_agreement < 0.4 {
            reasons.push(RouteReason::LowAgreement);
        }
        if ctx.novelty > 0.7 {
            reasons.push(RouteReason::HighNovelty);
        }
        if ctx.safety > 0.8 {
            reasons.push(RouteReason::SafetyCritical);
        }
        if ctx.explicit_system2 {
            reasons.push(RouteReason::ExplicitRequest);
        }
        if ctx.previous_error {
            reasons.push(RouteReason::PreviousError);
        }
        if ctx.goal_drift > 0.4 {
            reasons.push(RouteReason::GoalDrift);
        }
        for policy in &self.policies {
            if policy.escalate(ctx) {
                reasons.push(RouteReason::Policy(policy.name().to_string()));
            }
        }

        let process = if reasons.is_empty() {
            ProcessType::System1
        } else {
            ProcessType::System2
        };
        RouteDecision { process, reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> RouteContext {
        RouteContext {
            surprise: 0.05,
            population_agreement: 0.9,
            novelty: 0.1,
            safety: 0.0,
            explicit_system2: false,
            previous_error: false,
            goal_drift: 0.1,
        }
    }

    #[test]
    fn calm_context_routes_system1() {
        let router = DualProcessRouter::new();
        let decision = router.route(&calm());
        assert_eq!(decision.process, ProcessType::System1);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn goal_drift_escalates_with_reason() {
        let router = DualProcessRouter::new();
        let ctx = RouteContext {
            goal_drift: 0.5,
            ..calm()
        };
        let decision = router.route(&ctx);
        assert_eq!(decision.process, ProcessType::System2);
        assert!(decision.reasons.contains(&RouteReason::GoalDrift));
    }

    #[test]
    fn each_trigger_escalates_alone() {
        let router = DualProcessRouter::new();
        let contexts = [
            RouteContext { surprise: 0.7, ..calm() },
            RouteContext { population_agreement: 0.3, ..calm() },
            RouteContext { novelty: 0.8, ..calm() },
            RouteContext { safety: 0.9, ..calm() },
            RouteContext { explicit_system2: true, ..calm() },
            RouteContext { previous_error: true, ..calm() },
        ];
        for ctx in contexts {
            assert_eq!(router.route(&ctx).process, ProcessType::System2);
        }
    }

    struct AlwaysEscalate;
    impl EscalationPolicy for AlwaysEscalate {
        fn name(&self) -> &str {
            "always"
        }
        fn escalate(&self, _ctx: &RouteContext) -> bool {
            true
        }
    }

    #[test]
    fn registered_policy_escalates_with_named_reason() {
        let router = DualProcessRouter::with_policies(vec![Box::new(AlwaysEscalate)]);
        let decision = router.route(&calm());
        assert_eq!(decision.process, ProcessType::System2);
        assert!(matches!(decision.reasons[0], RouteReason::Policy(ref n) if n == "always"));
    }
}
