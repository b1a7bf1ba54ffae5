pub mod api;
pub mod client;
#[allow(clippy::module_inception)]
pub mod manager;
pub mod types;

pub use client::WorkerClient;
pub use manager::{process_tasks, update_tasks_loop};
pub use types::{Manager, ManagerError, ManagerResult, ManagerServer, ReconcileReport};
