use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::focus::FocusStack;
use crate::kernel::state::{Environment, HistoryEntry, SessionContext};

/// On-disk form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub focus_stack: FocusStack,
    /// Oldest first; at most the configured history limit.
    pub history: Vec<HistoryEntry>,
    pub environment: Environment,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    pub fn capture(ctx: &SessionContext, history_limit: usize) -> Self {
        let history: Vec<HistoryEntry> = ctx.history().cloned().collect();
        let skip = history.len().saturating_sub(history_limit);
        Self {
            session_id: ctx.session_id.clone(),
            focus_stack: ctx.focus().clone(),
            history: history.into_iter().skip(skip).collect(),
            environment: ctx.environment(),
            saved_at: Utc::now(),
        }
    }

    pub fn into_context(self, history_limit: usize) -> SessionContext {
        SessionContext::restore(
            self.session_id,
            history_limit,
            self.focus_stack,
            self.history,
            self.environment,
        )
    }
}
