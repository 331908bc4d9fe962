use serde::{Deserialize, Serialize};
use tracing::info;

use crate::planner::types::{Plan, PlanKind};
use crate::safety::policy::SafetyClass;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateMode {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GateDecision {
    /// Run the approved plan for real.
    Execute,
    /// Run the approved plan in simulation.
    DryRun,
    /// Preview only; the plan waits for an explicit approval.
    AwaitConfirmation,
    /// Every action was blocked by policy.
    Blocked,
    /// Nothing executable (suggestions, clarifications, no-ops).
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub approved: Plan,
    pub blocked_reasons: Vec<String>,
    pub decision: GateDecision,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGate;

impl SafetyGate {
    pub fn new() -> Self {
        Self
    }

    pub fn gate(&self, plan: Plan, mode: GateMode) -> GateOutcome {
        if plan.kind != PlanKind::Execute {
            return GateOutcome {
                approved: plan,
                blocked_reasons: Vec::new(),
                decision: GateDecision::Nothing,
            };
        }

        let mut approved = plan;
        let mut blocked_reasons = Vec::new();
        approved.actions.retain(|action| {
            if action.safety_class == SafetyClass::Blocked {
                blocked_reasons.push(
                    action
                        .note
                        .clone()
                        .unwrap_or_else(|| format!("{} is not allowed by policy", action.describe())),
                );
                false
            } else {
                true
            }
        });
        approved.refresh_confirmation();

        let decision = if approved.actions.is_empty() {
            if blocked_reasons.is_empty() {
                GateDecision::Nothing
            } else {
                GateDecision::Blocked
            }
        } else if mode.dry_run {
            approved.dry_run = true;
            GateDecision::DryRun
        } else if approved.requires_confirmation && !approved.approved {
            // Preview stays; nothing is released for execution.
            approved.actions.clear();
            GateDecision::AwaitConfirmation
        } else {
            GateDecision::Execute
        };

        info!(
            plan_id = %approved.id,
            ?decision,
            actions = approved.actions.len(),
            blocked = blocked_reasons.len(),
            "Plan gated"
        );

        GateOutcome {
            approved,
            blocked_reasons,
            decision,
        }
    }
}
