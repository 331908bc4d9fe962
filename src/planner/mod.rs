pub mod compiler;
pub mod types;

pub use compiler::PlanCompiler;
pub use types::{Action, MutationRecord, Op, Plan, PlanKind, StateSnapshot};
