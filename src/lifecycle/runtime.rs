//! Container runtime abstraction and its Docker implementation.
//!
//! Every call into the daemon is bounded by a timeout; expiry surfaces
//! as [`LifecycleError::RuntimeTimeout`] instead of hanging a request.
//! The trait seam keeps the controller testable without a daemon.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::service::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{LifecycleError, Result};

/// Everything needed to create and run one sandbox container. The
/// internal port the host port maps onto is fixed per runtime, not
/// per container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub workspace_path: PathBuf,
    pub host_port: u16,
}

/// Result of inspecting a single container by name.
#[derive(Debug, Clone, Copy)]
pub struct ContainerState {
    pub running: bool,
    /// Live host binding of the internal port, when running.
    pub host_port: Option<u16>,
}

/// One entry from a prefix-filtered container listing.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub name: String,
    pub running: bool,
    pub host_port: Option<u16>,
}

/// Operations the lifecycle needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Health probe. Fails when the daemon is unreachable or not installed.
    async fn ping(&self) -> Result<()>;

    /// Whether the image exists locally.
    async fn image_present(&self, image: &str) -> Result<bool>;

    /// Pull the image from its registry.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create the shared bridge network if it does not exist.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Create and start a container per the spec.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<()>;

    /// Graceful stop by name. Returns false if no such container exists.
    async fn stop_container(&self, name: &str) -> Result<bool>;

    /// Remove by name. Returns false if no such container exists.
    async fn remove_container(&self, name: &str, force: bool) -> Result<bool>;

    /// Last `tail` lines of the container's output; `None` when the
    /// container does not exist.
    async fn logs(&self, name: &str, tail: usize) -> Result<Option<String>>;

    /// Inspect by name; `None` when the container does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>>;

    /// All containers (running or not) whose name starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ContainerSummary>>;
}

/// [`ContainerRuntime`] backed by the local Docker daemon via bollard.
pub struct DockerRuntime {
    docker: Docker,
    internal_port: u16,
    op_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect with the platform defaults (unix socket / npipe).
    pub fn connect(
        internal_port: u16,
        op_timeout: Duration,
        pull_timeout: Duration,
    ) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| LifecycleError::runtime_unavailable(e.to_string()))?;
        Ok(Self {
            docker,
            internal_port,
            op_timeout,
            pull_timeout,
        })
    }

    /// Run one daemon call under the standard operation timeout.
    async fn bound<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, bollard::errors::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(operation, err)),
            Err(_) => Err(LifecycleError::timeout(operation, self.op_timeout)),
        }
    }

    fn internal_port_key(&self) -> String {
        format!("{}/tcp", self.internal_port)
    }
}

/// Map a bollard failure onto the domain taxonomy. Server responses are
/// daemon refusals; everything else means we could not talk to it.
fn classify(operation: &str, err: bollard::errors::Error) -> LifecycleError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => LifecycleError::runtime_failed(operation, format!("{status_code}: {message}")),
        other => LifecycleError::runtime_unavailable(other.to_string()),
    }
}

fn is_not_found(err: &LifecycleError) -> bool {
    matches!(
        err,
        LifecycleError::RuntimeFailed { message, .. } if message.starts_with("404")
    )
}

fn is_conflict(err: &LifecycleError) -> bool {
    matches!(
        err,
        LifecycleError::RuntimeFailed { message, .. } if message.starts_with("409")
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        match tokio::time::timeout(self.op_timeout, self.docker.ping()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(LifecycleError::runtime_unavailable(err.to_string())),
            Err(_) => Err(LifecycleError::timeout("ping", self.op_timeout)),
        }
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        match self.bound("inspect_image", self.docker.inspect_image(image)).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling sandbox image {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let drain = async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(chunk) = stream.next().await {
                let progress = chunk
                    .map_err(|e| LifecycleError::image_unavailable(image, e.to_string()))?;
                if let Some(error) = progress.error {
                    return Err(LifecycleError::image_unavailable(image, error));
                }
                if let Some(status) = progress.status {
                    debug!("pull: {}", status.trim());
                }
            }
            Ok(())
        };

        match tokio::time::timeout(self.pull_timeout, drain).await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::timeout("pull_image", self.pull_timeout)),
        }
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let existing = self
            .bound(
                "list_networks",
                self.docker.list_networks(Some(ListNetworksOptions { filters })),
            )
            .await
            .map_err(|e| LifecycleError::network_setup_failed(e.to_string()))?;

        if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(());
        }

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };

        match self
            .bound("create_network", self.docker.create_network(options))
            .await
        {
            Ok(_) => {
                info!("Created sandbox network {}", name);
                Ok(())
            }
            // A concurrent start can win the create race; that is fine.
            Err(err) if is_conflict(&err) => Ok(()),
            Err(err) => Err(LifecycleError::network_setup_failed(err.to_string())),
        }
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<()> {
        let port_key = self.internal_port_key();

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:/home/workspace:rw",
                    spec.workspace_path.display()
                )]),
                port_bindings: Some(port_bindings),
                network_mode: Some(spec.network.clone()),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!("Creating container {}", spec.name);
        self.bound(
            "create_container",
            self.docker.create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            ),
        )
        .await
        .map_err(|err| match err {
            timeout @ LifecycleError::RuntimeTimeout { .. } => timeout,
            unreachable @ LifecycleError::RuntimeUnavailable { .. } => unreachable,
            other => LifecycleError::creation_rejected(other.to_string()),
        })?;

        debug!("Starting container {}", spec.name);
        self.bound(
            "start_container",
            self.docker.start_container::<String>(&spec.name, None),
        )
        .await
        .map_err(|err| match err {
            timeout @ LifecycleError::RuntimeTimeout { .. } => timeout,
            unreachable @ LifecycleError::RuntimeUnavailable { .. } => unreachable,
            other => LifecycleError::creation_rejected(other.to_string()),
        })?;

        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<bool> {
        match self
            .bound(
                "stop_container",
                self.docker
                    .stop_container(name, Some(StopContainerOptions { t: 10 })),
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<bool> {
        match self
            .bound(
                "remove_container",
                self.docker.remove_container(
                    name,
                    Some(RemoveContainerOptions {
                        force,
                        ..Default::default()
                    }),
                ),
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Option<String>> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let drain = async {
            let mut stream = self.docker.logs(name, Some(options));
            let mut output = String::new();
            while let Some(chunk) = stream.next().await {
                let entry = chunk.map_err(|e| classify("logs", e))?;
                output.push_str(&String::from_utf8_lossy(&entry.into_bytes()));
            }
            Ok(output)
        };

        match tokio::time::timeout(self.op_timeout, drain).await {
            Ok(Ok(output)) => Ok(Some(output)),
            Ok(Err(err)) if is_not_found(&err) => Ok(None),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LifecycleError::timeout("logs", self.op_timeout)),
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        let response = match self
            .bound(
                "inspect_container",
                self.docker
                    .inspect_container(name, None::<InspectContainerOptions>),
            )
            .await
        {
            Ok(response) => response,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(err) => return Err(err),
        };

        let running = response
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let host_port = response
            .network_settings
            .as_ref()
            .and_then(|net| net.ports.as_ref())
            .and_then(|ports| ports.get(&self.internal_port_key()))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.as_ref())
            .and_then(|port| port.parse::<u16>().ok());

        Ok(Some(ContainerState { running, host_port }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let containers = self
            .bound(
                "list_containers",
                self.docker.list_containers(Some(ListContainersOptions {
                    all: true,
                    filters,
                    ..Default::default()
                })),
            )
            .await?;

        let mut result = Vec::new();
        for container in containers {
            // Docker reports names with a leading slash
            let Some(name) = container
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim_start_matches('/').to_string())
            else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }

            let running = container.state.as_deref() == Some("running");
            let host_port = container.ports.as_ref().and_then(|ports| {
                ports
                    .iter()
                    .find(|p| p.private_port == self.internal_port)
                    .and_then(|p| p.public_port)
            });

            result.push(ContainerSummary {
                name,
                running,
                host_port,
            });
        }

        Ok(result)
    }
}
