use std::collections::HashMap;
use std::pin::pin;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
};
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use super::runtime::{Runtime, RuntimeError};
use super::types::ContainerConfig;

/// [`Runtime`] backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(DockerRuntime { client })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image = %image, "Pulling image");

        let mut stream = pin!(self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        ));

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

fn restart_policy_name(policy: &str) -> RestartPolicyNameEnum {
    match policy {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    }
}

fn container_config(config: &ContainerConfig) -> Config<String> {
    let memory = match config.memory {
        0 => None,
        bytes => Some(i64::try_from(bytes).unwrap_or(i64::MAX)),
    };
    let nano_cpus = if config.cpu > 0.0 {
        Some((config.cpu * 1_000_000_000.0) as i64)
    } else {
        None
    };

    let host_config = HostConfig {
        restart_policy: Some(RestartPolicy {
            name: Some(restart_policy_name(&config.restart_policy)),
            maximum_retry_count: None,
        }),
        nano_cpus,
        memory,
        publish_all_ports: Some(true),
        ..Default::default()
    };

    Config {
        image: Some(config.image.clone()),
        env: Some(config.env.clone()),
        exposed_ports: Some(
            config
                .exposed_ports
                .iter()
                .map(|port| (format!("{}/tcp", port), HashMap::new()))
                .collect(),
        ),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn start(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        self.pull_image(&config.image).await?;

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });

        let created = self
            .client
            .create_container(options, container_config(config))
            .await
            .inspect_err(|e| warn!(name = %config.name, error = %e, "Error creating container"))?;

        debug!(container_id = %created.id, "Container created");

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .inspect_err(|e| warn!(name = %config.name, error = %e, "Error starting container"))?;

        info!(name = %config.name, container_id = %created.id, "Container started");
        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        info!(container_id = %container_id, "Stopping container");

        self.client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await?;

        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;

        info!(container_id = %container_id, "Container stopped and removed");
        Ok(())
    }
}
