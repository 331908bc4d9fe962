use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::memory::types::PersistedSession;

/// Durable storage for session records.
pub trait SessionPersistence: Send + Sync {
    fn save(&self, record: &PersistedSession) -> Result<(), StoreError>;
    fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError>;
    fn remove(&self, session_id: &str) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per session.
#[derive(Debug, Clone)]
pub struct FileSessionPersistence {
    dir: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session ids are caller-supplied; only a safe subset reaches the filesystem.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("session_{}.json", safe))
    }
}

impl SessionPersistence for FileSessionPersistence {
    fn save(&self, record: &PersistedSession) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        let path = self.path_for(&record.session_id);
        fs::write(&path, json)?;
        debug!(path = %path.display(), "Session saved");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.path_for(session_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
