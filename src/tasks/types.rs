use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// On the wire a state is its lowercase name (`"pending"`, `"running"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Pending,
        State::Scheduled,
        State::Running,
        State::Completed,
        State::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Scheduled => "scheduled",
            State::Running => "running",
            State::Completed => "completed",
            State::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("{0:?} is not a valid state")]
    InvalidState(String),
}

impl FromStr for State {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(State::Pending),
            "scheduled" => Ok(State::Scheduled),
            "running" => Ok(State::Running),
            "completed" => Ok(State::Completed),
            "failed" => Ok(State::Failed),
            other => Err(StateError::InvalidState(other.to_string())),
        }
    }
}

impl Serialize for State {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// A workload specification plus its latest known status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: State,
    pub image: String,
    /// Fractional CPU share, `1.0` is one core.
    #[serde(default)]
    pub cpu: f64,
    /// Memory limit in bytes, `0` means unlimited.
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    /// `KEY=VALUE` pairs.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub restart_policy: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: &str, image: &str) -> Self {
        Task {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            container_id: None,
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            env: Vec::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
        }
    }
}

/// A command asking for `task` to be moved to `state`.
///
/// `state` is the authoritative target; workers validate and act on it, not
/// on `task.state`. Events built by this crate keep both in agreement. The
/// embedded task is a full copy, so an event can be replayed on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub state: State,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }
}

/// Resource spec handed to a [`Runtime`](super::runtime::Runtime).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory: u64,
    pub disk: u64,
    pub env: Vec<String>,
    pub exposed_ports: Vec<u16>,
    pub restart_policy: String,
}

impl From<&Task> for ContainerConfig {
    fn from(task: &Task) -> Self {
        let name = if task.name.is_empty() {
            format!("cube-{}", task.id)
        } else {
            task.name.clone()
        };

        ContainerConfig {
            name,
            image: task.image.clone(),
            cpu: task.cpu,
            memory: task.memory,
            disk: task.disk,
            env: task.env.clone(),
            exposed_ports: task.exposed_ports.clone(),
            restart_policy: task.restart_policy.clone(),
        }
    }
}
