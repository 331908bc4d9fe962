//! The conversational kernel: intent extraction, execution, session state
//! and the reactor that drives a turn through them.

pub mod cancel;
pub mod event;
pub mod executor;
pub mod focus;
pub mod intent;
pub mod reactor;
pub mod state;
pub mod telemetry;
