use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::StoreError;
use crate::kernel::state::SessionContext;
use crate::memory::persist::{FileSessionPersistence, SessionPersistence};
use crate::memory::types::PersistedSession;

pub type SessionHandle = Arc<Mutex<SessionContext>>;

/// Concurrent map of per-session mutexes.
///
/// Holding a session's guard serialises its turns; different sessions never
/// contend.
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    config: SessionConfig,
    persistence: Option<Arc<dyn SessionPersistence>>,
}

impl SessionStore {
    /// Persists to `config.persist_dir` when set.
    pub fn new(config: SessionConfig) -> Self {
        let persistence = config
            .persist_dir
            .clone()
            .map(|dir| Arc::new(FileSessionPersistence::new(dir)) as Arc<dyn SessionPersistence>);
        Self {
            sessions: DashMap::new(),
            config,
            persistence,
        }
    }

    pub fn with_persistence(config: SessionConfig, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            persistence: Some(persistence),
        }
    }

    /// Existing handle, a restored one, or a fresh session.
    pub fn handle(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.get(session_id) {
            return Arc::clone(handle.value());
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.restore_or_create(session_id))))
            .value()
            .clone()
    }

    /// Waits (FIFO) for exclusive access to the session.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<SessionContext> {
        self.handle(session_id).lock_owned().await
    }

    /// Writes the session record. Returns false when nothing was written
    /// (no persistence configured, or a private session).
    pub fn persist(&self, ctx: &SessionContext) -> Result<bool, StoreError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        if ctx.is_private() {
            return Ok(false);
        }
        persistence.save(&PersistedSession::capture(ctx, self.config.history_limit))?;
        Ok(true)
    }

    /// Deletes the session's persisted record, if any. Returns false when no
    /// persistence is configured.
    pub fn discard(&self, session_id: &str) -> Result<bool, StoreError> {
        match &self.persistence {
            Some(persistence) => {
                persistence.remove(session_id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops sessions idle longer than the TTL. Sessions that are locked or
    /// referenced by a queued turn are kept.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let ttl = chrono::Duration::seconds(self.config.idle_ttl_secs as i64);
        let mut evicted = Vec::new();
        self.sessions.retain(|id, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(ctx) if now - ctx.last_active() > ttl => {
                    evicted.push(id.clone());
                    false
                }
                _ => true,
            }
        });
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Idle sessions evicted");
        }
        evicted
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn history_limit(&self) -> usize {
        self.config.history_limit
    }

    fn restore_or_create(&self, session_id: &str) -> SessionContext {
        let limit = self.config.history_limit;
        match self.persistence.as_ref().map(|p| p.load(session_id)) {
            Some(Ok(Some(record))) => {
                info!(session_id, history = record.history.len(), "Session restored");
                record.into_context(limit)
            }
            Some(Err(err)) => {
                warn!(session_id, error = %err, "Session record unreadable; starting fresh");
                SessionContext::new(session_id, limit)
            }
            _ => SessionContext::new(session_id, limit),
        }
    }
}
