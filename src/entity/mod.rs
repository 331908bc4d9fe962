//! Entity/alias index: maps the words people use onto canonical names.

pub mod catalog;
pub mod index;

use serde::{Deserialize, Serialize};

pub use index::{EntityIndex, Lookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Package,
    Generation,
    Category,
}
