use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use super::event::TelemetryEvent;
use crate::kernel::event::ActionStatus;
use crate::kernel::intent::types::Verb;
use crate::safety::gate::GateDecision;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub turn_stats: TurnStats,
    pub gate_stats: GateStats,
    pub action_stats: ActionStats,
    pub verb_counts: BTreeMap<Verb, u64>,
    pub sessions_evicted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnStats {
    pub completed: u64,
    pub cancelled: u64,
    pub clarifications: u64,
    pub total_ms: u64,
    pub avg_turn_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateStats {
    pub executed: u64,
    pub dry_runs: u64,
    pub awaiting_confirmation: u64,
    pub blocked: u64,
    pub nothing: u64,
    pub blocked_actions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionStats {
    pub succeeded: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub skipped: u64,
    pub total_ms: u64,
    pub avg_action_ms: f64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    let mut timed_actions = 0u64;

    for event in events {
        match event {
            TelemetryEvent::IntentClassified { verb, .. } => {
                *snap.verb_counts.entry(*verb).or_insert(0) += 1;
            }
            TelemetryEvent::Clarification { .. } => snap.turn_stats.clarifications += 1,
            TelemetryEvent::PlanGated { decision, blocked, .. } => {
                snap.gate_stats.blocked_actions += *blocked as u64;
                match decision {
                    GateDecision::Execute => snap.gate_stats.executed += 1,
                    GateDecision::DryRun => snap.gate_stats.dry_runs += 1,
                    GateDecision::AwaitConfirmation => snap.gate_stats.awaiting_confirmation += 1,
                    GateDecision::Blocked => snap.gate_stats.blocked += 1,
                    GateDecision::Nothing => snap.gate_stats.nothing += 1,
                }
            }
            TelemetryEvent::ActionFinished { status, duration_ms, .. } => {
                match status {
                    ActionStatus::Success => snap.action_stats.succeeded += 1,
                    ActionStatus::Failed => snap.action_stats.failed += 1,
                    ActionStatus::RolledBack => snap.action_stats.rolled_back += 1,
                    ActionStatus::SkippedDueToPriorFailure => snap.action_stats.skipped += 1,
                }
                // Skipped actions are not timed.
                if *status != ActionStatus::SkippedDueToPriorFailure {
                    snap.action_stats.total_ms += duration_ms;
                    timed_actions += 1;
                }
            }
            TelemetryEvent::TurnCompleted { duration_ms, .. } => {
                snap.turn_stats.completed += 1;
                snap.turn_stats.total_ms += duration_ms;
            }
            TelemetryEvent::TurnCancelled { .. } => snap.turn_stats.cancelled += 1,
            TelemetryEvent::SessionsEvicted { count } => snap.sessions_evicted += *count as u64,
        }
    }

    if snap.turn_stats.completed > 0 {
        snap.turn_stats.avg_turn_ms = snap.turn_stats.total_ms as f64 / snap.turn_stats.completed as f64;
    }
    if timed_actions > 0 {
        snap.action_stats.avg_action_ms = snap.action_stats.total_ms as f64 / timed_actions as f64;
    }

    snap
}
