//! Utterance -> typed `Intent`.
//!
//! Normalisation, then deterministic rule matching, then reference
//! resolution against the entity index and the session's focus stack.

pub mod extractor;
pub mod normalize;
pub mod rules;
pub mod types;

pub use extractor::IntentExtractor;
pub use types::{ClarifyReason, EntityRef, Intent, Resolution, Verb};
