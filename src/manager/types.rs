use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::client::WorkerClient;
use crate::scheduler::Scheduler;
use crate::tasks::types::{Task, TaskEvent};

/// Global pending queue, placement bookkeeping and merged task view.
///
/// The roster is fixed at construction. `dispatch` serialises `send_work`
/// so the pending queue has a single consumer.
pub struct Manager {
    pub workers: Vec<String>,
    pub(crate) client: WorkerClient,
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) dispatch: Mutex<()>,
}

pub(crate) struct ManagerState {
    pub pending: VecDeque<TaskEvent>,
    pub task_db: HashMap<Uuid, Task>,
    pub event_db: HashMap<Uuid, TaskEvent>,
    pub worker_task_map: HashMap<String, Vec<Uuid>>,
    pub task_worker_map: HashMap<Uuid, String>,
    pub scheduler: Box<dyn Scheduler>,
}

pub struct ManagerServer {
    pub manager: Arc<Manager>,
    pub address: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Reports merged into the global view.
    pub updated: usize,
    /// Reports ignored because the task is unknown or owned by another worker.
    pub unknown: usize,
    /// Workers that could not be polled.
    pub failed_workers: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no workers are available to handle tasks")]
    NoWorkersAvailable,

    #[error("could not reach worker {worker}: {source}")]
    Transport {
        worker: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("worker {worker} answered {status}: {message}")]
    WorkerRejected {
        worker: String,
        status: u16,
        message: String,
    },

    #[error("undecodable response from worker {worker}: {source}")]
    Decode {
        worker: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("task {0} not found")]
    UnknownTask(Uuid),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
