use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::tasks::runtime::{Runtime, RuntimeError};
use crate::tasks::types::{State, Task, TaskEvent};

/// Local run queue and observed-state store for one node.
///
/// `state` is only ever locked for short read-modify-write sections and is
/// never held across a runtime call. `drain` serialises `run_task` so the
/// queue has a single consumer.
pub struct Worker {
    pub name: String,
    pub(crate) runtime: Arc<dyn Runtime>,
    pub(crate) runtime_timeout: Duration,
    pub(crate) state: Mutex<WorkerState>,
    pub(crate) drain: Mutex<()>,
}

#[derive(Debug, Default)]
pub(crate) struct WorkerState {
    pub queue: VecDeque<TaskEvent>,
    pub db: HashMap<Uuid, Task>,
    pub stats: Option<SystemStats>,
}

/// Host usage snapshot served on `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    #[serde(serialize_with = "super::stats::percent")]
    pub cpu_usage: f32,
    pub memory: Usage,
    pub swap: Usage,
    pub disk: Usage,
    pub load: LoadAverage,
    pub task_count: u64,
}

/// Used and total capacity of one resource, in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: State,
        to: State,
    },

    #[error("no action for requested state {state} on task {task_id}")]
    UnhandledState { task_id: Uuid, state: State },

    #[error("runtime failure for task {task_id}: {source}")]
    Runtime {
        task_id: Uuid,
        #[source]
        source: RuntimeError,
    },

    #[error("task {0} not found")]
    UnknownTask(Uuid),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
