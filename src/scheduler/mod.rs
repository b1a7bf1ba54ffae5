#[allow(clippy::module_inception)]
pub mod scheduler;

pub use scheduler::{RoundRobin, Scheduler};
