use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::event::ActionStatus;
use crate::kernel::intent::types::{ClarifyReason, Verb};
use crate::planner::types::{Op, PlanKind};
use crate::safety::gate::GateDecision;

// Allowed: IDs, Durations, Counts, Enums
// Forbidden: utterance text, package names, arguments, session ids

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    IntentClassified {
        verb: Verb,
        op: Option<Op>,
    },

    Clarification {
        reason: ClarifyReason,
    },

    PlanGated {
        plan_id: Uuid,
        kind: PlanKind,
        decision: GateDecision,
        actions: usize,
        blocked: usize,
    },

    ActionFinished {
        plan_id: Uuid,
        op: Op,
        status: ActionStatus,
        duration_ms: u64,
    },

    TurnCompleted {
        plan_id: Uuid,
        duration_ms: u64,
    },

    TurnCancelled {
        plan_id: Uuid,
    },

    SessionsEvicted {
        count: usize,
    },
}
