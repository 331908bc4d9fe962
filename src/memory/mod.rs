//! Session context store: per-conversation state, keyed by session id.

pub mod persist;
pub mod store;
pub mod types;

pub use persist::{FileSessionPersistence, SessionPersistence};
pub use store::{SessionHandle, SessionStore};
pub use types::PersistedSession;
