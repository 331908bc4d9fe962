//! Safety classification and the confirmation / dry-run gate.
//!
//! The gate only reads the classes the compiler tagged onto each action; it
//! never performs I/O.

pub mod gate;
pub mod policy;

pub use gate::{GateDecision, GateMode, GateOutcome, SafetyGate};
pub use policy::{Classification, SafetyClass, SafetyPolicy};
