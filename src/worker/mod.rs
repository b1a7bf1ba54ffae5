pub mod api;
pub mod stats;
pub mod types;
#[allow(clippy::module_inception)]
pub mod worker;

pub use types::{LoadAverage, SystemStats, TaskServer, Usage, Worker, WorkerError, WorkerResult};
pub use worker::{collect_stats, run_tasks};
