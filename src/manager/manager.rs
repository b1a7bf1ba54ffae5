use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::WorkerClient;
use super::types::{Manager, ManagerError, ManagerResult, ManagerState, ReconcileReport};
use crate::scheduler::{RoundRobin, Scheduler};
use crate::tasks::{
    state::valid_state_transition,
    types::{State, Task, TaskEvent},
};

impl Manager {
    pub fn new(workers: Vec<String>, http_timeout: Duration) -> ManagerResult<Self> {
        Self::with_scheduler(workers, Box::new(RoundRobin::new()), http_timeout)
    }

    pub fn with_scheduler(
        workers: Vec<String>,
        scheduler: Box<dyn Scheduler>,
        http_timeout: Duration,
    ) -> ManagerResult<Self> {
        let worker_task_map: HashMap<String, Vec<Uuid>> = workers
            .iter()
            .map(|worker| (worker.clone(), Vec::new()))
            .collect();

        Ok(Manager {
            workers,
            client: WorkerClient::new(http_timeout)?,
            state: Mutex::new(ManagerState {
                pending: VecDeque::new(),
                task_db: HashMap::new(),
                event_db: HashMap::new(),
                worker_task_map,
                task_worker_map: HashMap::new(),
                scheduler,
            }),
            dispatch: Mutex::new(()),
        })
    }

    /// Queue an event for dispatch. Legality is the worker's call.
    pub async fn add_task(&self, event: TaskEvent) {
        debug!(task_id = %event.task.id, state = %event.state, "Queueing task event");
        self.state.lock().await.pending.push_back(event);
    }

    /// Pick a worker for a task that has none yet.
    pub async fn select_worker(&self, task: &Task) -> ManagerResult<String> {
        self.state
            .lock()
            .await
            .scheduler
            .select_worker(task, &self.workers)
            .ok_or(ManagerError::NoWorkersAvailable)
    }

    /// Push the oldest pending event to a worker.
    ///
    /// A task already placed goes back to its worker; otherwise the
    /// scheduler picks one. If the worker cannot be reached the event goes
    /// to the back of the queue and nothing is recorded. If the worker
    /// answers with an error the task still counts as scheduled until the
    /// next reconciliation says otherwise.
    pub async fn send_work(&self) -> ManagerResult<Option<Task>> {
        let _dispatch = self.dispatch.lock().await;

        let (event, worker) = {
            let mut state = self.state.lock().await;
            let Some(mut event) = state.pending.pop_front() else {
                debug!("Pending queue is empty");
                return Ok(None);
            };

            let assigned = state.task_worker_map.get(&event.task.id).cloned();
            let worker = match assigned {
                Some(worker) => worker,
                None => match state.scheduler.select_worker(&event.task, &self.workers) {
                    Some(worker) => worker,
                    None => {
                        state.pending.push_back(event);
                        return Err(ManagerError::NoWorkersAvailable);
                    }
                },
            };

            // The pushed copy carries the state the manager records, so the
            // worker's first-sighting baseline never lags behind it.
            if event.state == State::Scheduled
                && valid_state_transition(event.task.state, State::Scheduled)
            {
                event.task.state = State::Scheduled;
            }

            (event, worker)
        };

        info!(task_id = %event.task.id, event_id = %event.id, worker = %worker, "Dispatching task event");
        let result = self.client.send_task(&worker, &event).await;

        if let Err(ManagerError::Transport { source, .. }) = &result {
            warn!(task_id = %event.task.id, worker = %worker, error = %source, "Worker unreachable, requeueing");
            self.state.lock().await.pending.push_back(event);
            return result.map(Some);
        }

        self.record_dispatch(&worker, &event).await;

        match result {
            Ok(task) => {
                debug!(task_id = %task.id, worker = %worker, "Worker accepted task");
                Ok(Some(task))
            }
            Err(e) => {
                warn!(
                    task_id = %event.task.id,
                    worker = %worker,
                    error = %e,
                    "Worker did not accept task; it stays scheduled until reconciled"
                );
                Err(e)
            }
        }
    }

    async fn record_dispatch(&self, worker: &str, event: &TaskEvent) {
        let mut state = self.state.lock().await;
        let id = event.task.id;

        state.event_db.insert(event.id, event.clone());

        if !state.task_worker_map.contains_key(&id) {
            state.task_worker_map.insert(id, worker.to_string());
            state
                .worker_task_map
                .entry(worker.to_string())
                .or_default()
                .push(id);
        }

        let known = state.task_db.get(&id).cloned();
        let current = known.as_ref().map_or(event.task.state, |task| task.state);

        let task = if event.state == State::Scheduled
            && valid_state_transition(current, State::Scheduled)
        {
            Task {
                state: State::Scheduled,
                ..event.task.clone()
            }
        } else {
            known.unwrap_or_else(|| event.task.clone())
        };

        state.task_db.insert(id, task);
    }

    /// Poll every worker and merge what it reports into the global view.
    ///
    /// Only tasks this manager dispatched to that same worker are merged;
    /// anything else is ignored. A worker that cannot be polled is skipped.
    pub async fn update_tasks(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for worker in &self.workers {
            debug!(worker = %worker, "Checking worker for task updates");

            let tasks = match self.client.get_tasks(worker).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Unable to get tasks from worker");
                    report.failed_workers.push(worker.clone());
                    continue;
                }
            };

            let mut state = self.state.lock().await;
            for reported in tasks {
                let owner = state.task_worker_map.get(&reported.id);
                if owner.is_none_or(|owner| owner != worker) {
                    warn!(worker = %worker, task_id = %reported.id, "Ignoring report for task not placed on this worker");
                    report.unknown += 1;
                    continue;
                }

                let Some(task) = state.task_db.get_mut(&reported.id) else {
                    warn!(worker = %worker, task_id = %reported.id, "Task not found");
                    report.unknown += 1;
                    continue;
                };

                if task.state != reported.state {
                    info!(task_id = %task.id, from = %task.state, to = %reported.state, "Task state updated");
                }

                task.state = reported.state;
                task.start_time = reported.start_time;
                task.finish_time = reported.finish_time;
                task.container_id = reported.container_id;
                report.updated += 1;
            }
        }

        report
    }

    /// Queue a `Completed` event for a task this manager knows about.
    pub async fn stop_task_request(&self, id: Uuid) -> ManagerResult<TaskEvent> {
        let mut state = self.state.lock().await;
        let mut task = state
            .task_db
            .get(&id)
            .cloned()
            .ok_or(ManagerError::UnknownTask(id))?;
        task.state = State::Completed;

        let event = TaskEvent::new(State::Completed, task);
        state.pending.push_back(event.clone());
        info!(task_id = %id, container_id = ?event.task.container_id, "Queued stop");

        Ok(event)
    }

    /// Snapshot of the global task view. Unordered.
    pub async fn get_tasks(&self) -> Vec<Task> {
        self.state.lock().await.task_db.values().cloned().collect()
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.state.lock().await.task_db.get(&id).cloned()
    }

    pub async fn get_event(&self, id: Uuid) -> Option<TaskEvent> {
        self.state.lock().await.event_db.get(&id).cloned()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Task IDs placed on `worker`, in dispatch order.
    pub async fn worker_tasks(&self, worker: &str) -> Vec<Uuid> {
        self.state
            .lock()
            .await
            .worker_task_map
            .get(worker)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn assigned_worker(&self, id: Uuid) -> Option<String> {
        self.state.lock().await.task_worker_map.get(&id).cloned()
    }
}

/// Dispatch one pending event per tick until shutdown.
pub async fn process_tasks(
    manager: Arc<Manager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "Starting dispatch loop");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.send_work().await {
                    error!(error = %e, "Error sending work");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Dispatch loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Reconcile against every worker per tick until shutdown.
pub async fn update_tasks_loop(
    manager: Arc<Manager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(workers = manager.workers.len(), interval_secs = interval.as_secs(), "Starting reconciliation loop");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = manager.update_tasks().await;
                debug!(
                    updated = report.updated,
                    unknown = report.unknown,
                    failed_workers = report.failed_workers.len(),
                    "Reconciliation pass finished"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Reconciliation loop shutting down");
                    break;
                }
            }
        }
    }
}
