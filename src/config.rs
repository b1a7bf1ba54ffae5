//! Process configuration, read from `CUBE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Manager,
    All,
}

impl Role {
    pub fn runs_worker(&self) -> bool {
        matches!(self, Role::Worker | Role::All)
    }

    pub fn runs_manager(&self) -> bool {
        matches!(self, Role::Manager | Role::All)
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "worker" => Ok(Role::Worker),
            "manager" => Ok(Role::Manager),
            "all" => Ok(Role::All),
            other => bail!("unknown role {:?}, expected worker, manager or all", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Mock,
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "mock" => Ok(RuntimeKind::Mock),
            other => bail!("unknown runtime {:?}, expected docker or mock", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,

    /// Name the local worker logs under.
    pub worker_name: String,

    /// `host:port` the worker API binds to.
    pub worker_addr: String,

    /// `host:port` the manager API binds to.
    pub manager_addr: String,

    /// Worker roster handed to the manager.
    pub workers: Vec<String>,

    pub runtime: RuntimeKind,

    pub drain_interval: Duration,
    pub dispatch_interval: Duration,
    pub reconcile_interval: Duration,
    pub stats_interval: Duration,

    /// Deadline for a single runtime start or stop.
    pub runtime_timeout: Duration,

    /// Deadline for a single manager to worker request.
    pub http_timeout: Duration,

    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let role = match lookup("CUBE_ROLE") {
            Some(role) => role.parse()?,
            None => Role::All,
        };

        let runtime = match lookup("CUBE_RUNTIME") {
            Some(runtime) => runtime.parse()?,
            None => RuntimeKind::Docker,
        };

        let worker_addr = lookup("CUBE_WORKER_ADDR").unwrap_or_else(|| "127.0.0.1:5556".to_string());
        let manager_addr =
            lookup("CUBE_MANAGER_ADDR").unwrap_or_else(|| "127.0.0.1:5555".to_string());

        let workers = match lookup("CUBE_WORKERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|worker| !worker.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![worker_addr.clone()],
        };

        if role.runs_manager() && workers.is_empty() {
            bail!("CUBE_WORKERS is empty; the manager needs at least one worker");
        }

        let log_json = match lookup("CUBE_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("text") => false,
            Some("json") => true,
            Some(other) => bail!("unknown log format {:?}, expected text or json", other),
        };

        Ok(Config {
            role,
            worker_name: lookup("CUBE_WORKER_NAME").unwrap_or_else(|| "worker-1".to_string()),
            worker_addr,
            manager_addr,
            workers,
            runtime,
            drain_interval: secs(&lookup, "CUBE_DRAIN_INTERVAL", 10)?,
            dispatch_interval: secs(&lookup, "CUBE_DISPATCH_INTERVAL", 10)?,
            reconcile_interval: secs(&lookup, "CUBE_RECONCILE_INTERVAL", 15)?,
            stats_interval: secs(&lookup, "CUBE_STATS_INTERVAL", 15)?,
            runtime_timeout: secs(&lookup, "CUBE_RUNTIME_TIMEOUT", 300)?,
            http_timeout: secs(&lookup, "CUBE_HTTP_TIMEOUT", 10)?,
            log_level: lookup("CUBE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json,
        })
    }
}

fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw))?;

    if value == 0 {
        bail!("{} must be greater than zero", key);
    }

    Ok(Duration::from_secs(value))
}
