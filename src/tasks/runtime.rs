//! Container runtime interface and an in-process mock.
//!
//! The worker only needs two operations from a runtime: start a workload
//! from a [`ContainerConfig`] and stop it again by ID.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::types::ContainerConfig;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),

    #[error("task has no container id to stop")]
    MissingContainerId,

    #[error("{0}")]
    Other(String),
}

/// Starts and stops single workloads.
///
/// Implementations are best-effort; retrying a failed start is up to the
/// caller.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start a workload and return its runtime-assigned ID.
    async fn start(&self, config: &ContainerConfig) -> Result<String, RuntimeError>;

    /// Stop and remove a workload.
    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;
}

/// Runtime that never leaves the process.
#[derive(Debug, Default)]
pub struct MockRuntime {
    counter: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    fail_starts: bool,
    fail_stops: bool,
    delay: Option<Duration>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every start fails.
    pub fn failing_starts(mut self) -> Self {
        self.fail_starts = true;
        self
    }

    /// Every stop fails.
    pub fn failing_stops(mut self) -> Self {
        self.fail_stops = true;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn start(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.fail_starts {
            return Err(RuntimeError::Other(format!(
                "mock runtime refused to start {}",
                config.name
            )));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let container_id = format!("mock_{:016x}", n);
        info!(name = %config.name, image = %config.image, container_id = %container_id, "[MOCK] Started container");

        Ok(container_id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.fail_stops {
            return Err(RuntimeError::Other(format!(
                "mock runtime refused to stop {}",
                container_id
            )));
        }

        info!(container_id = %container_id, "[MOCK] Stopped container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_hands_out_distinct_ids() {
        let runtime = MockRuntime::new();
        let config = ContainerConfig::default();

        let first = runtime.start(&config).await.unwrap();
        let second = runtime.start(&config).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(runtime.starts(), 2);
    }

    #[tokio::test]
    async fn mock_failures_are_reported() {
        let runtime = MockRuntime::new().failing_starts().failing_stops();

        assert!(runtime.start(&ContainerConfig::default()).await.is_err());
        assert!(runtime.stop("abc").await.is_err());
        assert_eq!(runtime.starts(), 1);
        assert_eq!(runtime.stops(), 1);
    }
}
