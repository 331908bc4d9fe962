use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Tracks the token of each session's active turn so `cancel` can reach it.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    active: Mutex<HashMap<String, (Uuid, CancellationToken)>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as the running turn of `session_id`.
    pub fn activate(&self, session_id: &str, turn_id: Uuid, token: CancellationToken) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(session_id.to_string(), (turn_id, token));
    }

    /// Deregisters the turn, unless a newer one already replaced it.
    pub fn finish(&self, session_id: &str, turn_id: Uuid) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.get(session_id).map(|(id, _)| *id) == Some(turn_id) {
            active.remove(session_id);
        }
    }

    /// Cancels the running turn. Returns false if nothing was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(session_id) {
            Some((turn_id, token)) => {
                info!(session_id, %turn_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.contains_key(session_id)
    }
}
