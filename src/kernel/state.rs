use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::entity::EntityKind;
use crate::kernel::event::{ExecutionResult, ActionStatus};
use crate::kernel::focus::{FocusEntry, FocusStack};
use crate::kernel::intent::types::Intent;
use crate::planner::types::{MutationRecord, PlanKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseLevel {
    Quiet,
    #[default]
    Normal,
    Noisy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privacy {
    #[default]
    Standard,
    /// Never written to disk.
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub noise_level: NoiseLevel,
    pub privacy: Privacy,
}

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub intent: Intent,
    pub plan_kind: PlanKind,
    pub results: Vec<ExecutionResult>,
    pub at: DateTime<Utc>,
}

/// Strict state delta. This is the ONLY way a session mutates.
#[derive(Debug, Clone)]
pub enum StateDelta {
    FocusPushed { kind: EntityKind, ids: Vec<String> },
    TurnRecorded(HistoryEntry),
    PendingSet(Intent),
    PendingCleared,
    EnvironmentChanged(Environment),
    Touched(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    focus: FocusStack,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
    environment: Environment,
    /// Intent awaiting the user's confirmation.
    pending: Option<Intent>,
    last_active: DateTime<Utc>,
    /// Monotonic, bumped on every reduction.
    pub version: u64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, history_limit: usize) -> Self {
        Self {
            session_id: session_id.into(),
            focus: FocusStack::new(),
            history: VecDeque::with_capacity(history_limit),
            history_limit: history_limit.max(1),
            environment: Environment::default(),
            pending: None,
            last_active: Utc::now(),
            version: 0,
        }
    }

    /// Rebuilds a session from persisted parts.
    pub fn restore(
        session_id: impl Into<String>,
        history_limit: usize,
        focus: FocusStack,
        history: Vec<HistoryEntry>,
        environment: Environment,
    ) -> Self {
        let mut ctx = Self::new(session_id, history_limit);
        ctx.focus = focus;
        ctx.environment = environment;
        for entry in history {
            ctx.push_history(entry);
        }
        ctx
    }

    /// Pure reduction: Session + Delta -> mutated Session.
    pub fn reduce(&mut self, delta: StateDelta) {
        self.version += 1;

        match delta {
            StateDelta::FocusPushed { kind, ids } => {
                self.focus.push_group(kind, ids);
            }
            StateDelta::TurnRecorded(entry) => {
                self.push_history(entry);
            }
            StateDelta::PendingSet(intent) => {
                self.pending = Some(intent);
            }
            StateDelta::PendingCleared => {
                self.pending = None;
            }
            StateDelta::EnvironmentChanged(environment) => {
                self.environment = environment;
            }
            StateDelta::Touched(at) => {
                self.last_active = at;
            }
        }
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    pub fn focus(&self) -> &FocusStack {
        &self.focus
    }

    pub fn focus_snapshot(&self) -> Vec<FocusEntry> {
        self.focus.entries().to_vec()
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn is_private(&self) -> bool {
        self.environment.privacy == Privacy::Private
    }

    pub fn pending(&self) -> Option<&Intent> {
        self.pending.as_ref()
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// The newest successful mutating action that moved the system to another
    /// generation, the anchor for "undo".
    pub fn last_mutation(&self) -> Option<MutationRecord> {
        self.history
            .iter()
            .rev()
            .flat_map(|entry| entry.results.iter().rev())
            .find(|r| {
                r.status == ActionStatus::Success
                    && r.op.is_mutating()
                    && r.preview.is_none()
                    && r.generation_before != r.generation_after
            })
            .map(|r| MutationRecord {
                op: r.op,
                args: r.args.clone(),
                generation_before: r.generation_before,
            })
    }
}
