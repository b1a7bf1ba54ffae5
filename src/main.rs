use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use cube::config::{Config, RuntimeKind};
use cube::logging::init_logging;
use cube::manager::{Manager, ManagerServer, process_tasks, update_tasks_loop};
use cube::tasks::{docker::DockerRuntime, runtime::MockRuntime, runtime::Runtime};
use cube::worker::{TaskServer, Worker, collect_stats, run_tasks};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(&config.log_level, config.log_json)?;

    info!(role = ?config.role, runtime = ?config.runtime, "Starting cube");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers: JoinSet<Result<()>> = JoinSet::new();

    if config.role.runs_worker() {
        let runtime: Arc<dyn Runtime> = match config.runtime {
            RuntimeKind::Docker => Arc::new(DockerRuntime::connect()?),
            RuntimeKind::Mock => Arc::new(MockRuntime::new()),
        };
        let worker = Arc::new(Worker::new(
            &config.worker_name,
            runtime,
            config.runtime_timeout,
        ));

        tokio::spawn(run_tasks(
            Arc::clone(&worker),
            config.drain_interval,
            shutdown_rx.clone(),
        ));
        tokio::spawn(collect_stats(
            Arc::clone(&worker),
            config.stats_interval,
            shutdown_rx.clone(),
        ));

        let server = TaskServer::new(worker, &config.worker_addr);
        servers.spawn(server.start_server(shutdown_rx.clone()));
    }

    if config.role.runs_manager() {
        let manager = Arc::new(Manager::new(config.workers.clone(), config.http_timeout)?);

        tokio::spawn(process_tasks(
            Arc::clone(&manager),
            config.dispatch_interval,
            shutdown_rx.clone(),
        ));
        tokio::spawn(update_tasks_loop(
            Arc::clone(&manager),
            config.reconcile_interval,
            shutdown_rx.clone(),
        ));

        let server = ManagerServer::new(manager, &config.manager_addr);
        servers.spawn(server.start_server(shutdown_rx.clone()));
    }

    let mut outcome = Ok(());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        Some(joined) = servers.join_next() => {
            match joined {
                Ok(Ok(())) => info!("Server exited"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server failed");
                    outcome = Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Server task panicked");
                    outcome = Err(e.into());
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    while servers.join_next().await.is_some() {}

    info!("Shutdown complete");
    outcome
}
