pub mod config;
pub mod entity;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod outputs;
pub mod planner;
pub mod safety;
pub mod services;

pub use config::Config;
pub use kernel::reactor::{Reactor, TurnHandle};
