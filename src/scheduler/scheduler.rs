use crate::tasks::types::Task;

/// Placement policy: picks the worker an unassigned task is sent to.
pub trait Scheduler: Send + Sync {
    /// Returns `None` only when `workers` is empty.
    fn select_worker(&mut self, task: &Task, workers: &[String]) -> Option<String>;
}

/// Positional rotation over the roster. Not load aware.
#[derive(Debug, Default, Clone)]
pub struct RoundRobin {
    next_worker: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn select_worker(&mut self, _task: &Task, workers: &[String]) -> Option<String> {
        if workers.is_empty() {
            return None;
        }

        let index = self.next_worker % workers.len();
        self.next_worker = (index + 1) % workers.len();
        Some(workers[index].clone())
    }
}
