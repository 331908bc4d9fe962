use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::kernel::focus::FocusEntry;
use crate::kernel::intent::types::Verb;
use crate::planner::types::{Op, PlanKind};
use crate::safety::gate::GateDecision;
use crate::services::package_manager::{ChangeRecord, GenerationId, GenerationMeta, PackageMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Started,
    Progress,
    Completed,
}

/// Transient progress for one action. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub action_index: usize,
    pub phase: Phase,
    pub percent: Option<f32>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    Success,
    Failed,
    SkippedDueToPriorFailure,
    RolledBack,
}

/// Data returned by query ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionOutput {
    Packages(Vec<PackageMeta>),
    Generations(Vec<GenerationMeta>),
    Changes(Vec<ChangeRecord>),
    /// Names of installed packages, sorted.
    Installed(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action_index: usize,
    pub op: Op,
    pub args: BTreeMap<String, String>,
    pub status: ActionStatus,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
    pub output: Option<ActionOutput>,
    /// Set instead of a real call when the plan ran as a dry run.
    pub preview: Option<String>,
    pub generation_before: Option<GenerationId>,
    pub generation_after: Option<GenerationId>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, ActionStatus::Failed | ActionStatus::RolledBack)
    }
}

/// Everything a turn produced, handed back at the end of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub plan_id: Uuid,
    pub verb: Verb,
    pub confidence: f32,
    pub plan_kind: PlanKind,
    pub decision: GateDecision,
    pub preview_text: Vec<String>,
    pub candidates: Vec<String>,
    pub blocked_reasons: Vec<String>,
    pub results: Vec<ExecutionResult>,
    /// Read-only copy of the focus stack after the turn.
    pub focus: Vec<FocusEntry>,
}

impl TurnOutcome {
    pub fn awaiting_confirmation(&self) -> bool {
        self.decision == GateDecision::AwaitConfirmation
    }
}

/// What `submit_utterance` streams, in this order: `Interpreted`, `Preview`,
/// any number of `Progress`, then exactly one `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TurnEvent {
    Interpreted {
        verb: Verb,
        op: Option<Op>,
        confidence: f32,
    },
    Preview {
        plan_id: Uuid,
        lines: Vec<String>,
        requires_confirmation: bool,
    },
    Progress(ProgressEvent),
    Completed(TurnOutcome),
}
