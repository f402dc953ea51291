//! Sandbox lifecycle control.
//!
//! Drives the container runtime to realize start/stop/restart/status
//! for a user's sandbox. Operations for the same user are serialized
//! through a per-user async mutex; no lock is held across a runtime
//! call for other users, so slow daemon calls never block unrelated
//! requests.

pub mod error;
#[cfg(test)]
pub(crate) mod mock;
pub mod runtime;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ports::PortAllocator;
use crate::store::{SandboxRecord, SandboxStatus, SandboxStore};
use crate::workspace::WorkspaceProvisioner;
use error::{LifecycleError, Result};
use runtime::{ContainerRuntime, ContainerSpec};

/// Where a freshly started sandbox can be reached.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub port: u16,
}

/// One container found by [`LifecycleController::list_all`].
#[derive(Debug, Clone, Serialize)]
pub struct SandboxListing {
    /// Parsed from the container name; `None` for containers matching
    /// the prefix but not the naming convention.
    pub user_id: Option<i64>,
    pub container_name: String,
    pub status: SandboxStatus,
    pub host_port: Option<u16>,
}

/// Coordinates the port allocator, record store and container runtime.
pub struct LifecycleController {
    config: Config,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<SandboxStore>,
    allocator: PortAllocator,
    workspaces: Arc<dyn WorkspaceProvisioner>,
    user_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<SandboxStore>,
        workspaces: Arc<dyn WorkspaceProvisioner>,
    ) -> Self {
        let allocator = PortAllocator::new(config.ports.base_port, config.ports.max_port);
        Self {
            config,
            runtime,
            store,
            allocator,
            workspaces,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SandboxStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Refresh the user's activity timestamp.
    #[allow(dead_code)] // Called by the embedding API layer
    pub fn touch(&self, user_id: i64) {
        self.store.touch(user_id);
    }

    /// Lease a port for the user without starting anything.
    pub fn ensure_port_assigned(&self, user_id: i64) -> Result<u16> {
        let workspace = self.workspaces.workspace_for(user_id);
        self.store
            .ensure_record(user_id, &self.config.container_name(user_id), &workspace);
        self.allocator.acquire(self.store.ports(), user_id)
    }

    /// Start (or replace) the user's sandbox and return its endpoint.
    pub async fn start(&self, user_id: i64) -> Result<Endpoint> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.start_locked(user_id).await
    }

    /// Stop and remove the user's sandbox, releasing its port.
    pub async fn stop(&self, user_id: i64) -> Result<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.stop_locked(user_id).await
    }

    /// Restart the user's sandbox, force-removing a container that does
    /// not respond to a graceful stop.
    pub async fn restart(&self, user_id: i64) -> Result<Endpoint> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        if let Err(err) = self.stop_locked(user_id).await {
            if err.is_runtime_unavailable() {
                return Err(err);
            }
            // A crashed container can refuse a graceful stop but must
            // still be cleared before a new one can take its name.
            let name = self.config.container_name(user_id);
            warn!(
                "Graceful stop failed for user {} ({}), forcing removal",
                user_id, err
            );
            self.runtime.remove_container(&name, true).await?;
            self.allocator.release(self.store.ports(), user_id)?;
        }

        self.start_locked(user_id).await
    }

    /// Ground-truth status for one user, reconciled into the store.
    pub async fn status(&self, user_id: i64) -> Result<SandboxRecord> {
        let name = self.config.container_name(user_id);

        if let Err(err) = self.runtime.ping().await {
            debug!("Runtime unreachable during status: {}", err);
            // Report without touching the store; the record keeps its
            // last known state for when the runtime comes back.
            return Ok(self.unavailable_snapshot(user_id, &name));
        }

        let workspace = self.workspaces.workspace_for(user_id);
        self.store.ensure_record(user_id, &name, &workspace);

        match self.runtime.inspect(&name).await? {
            None => self.store.set_status(user_id, SandboxStatus::NotCreated),
            Some(state) if state.running => {
                self.store.set_status(user_id, SandboxStatus::Running);
                // Heal drift between the lease file and the live binding.
                if let Some(live_port) = state.host_port {
                    if self.store.ports().get(user_id)? != Some(live_port) {
                        warn!(
                            "Reconciling drifted port for user {}: store -> {}",
                            user_id, live_port
                        );
                        self.store.ports().set(user_id, live_port)?;
                    }
                }
            }
            Some(_) => self.store.set_status(user_id, SandboxStatus::Stopped),
        }

        self.store
            .snapshot(user_id)?
            .ok_or(LifecycleError::NotFound { user_id })
    }

    /// Last `tail` lines of output from the user's container.
    pub async fn logs(&self, user_id: i64, tail: usize) -> Result<String> {
        self.runtime.ping().await?;
        let name = self.config.container_name(user_id);
        self.runtime
            .logs(&name, tail)
            .await?
            .ok_or(LifecycleError::NotFound { user_id })
    }

    /// Every container following the sandbox naming convention.
    pub async fn list_all(&self) -> Result<Vec<SandboxListing>> {
        let prefix = &self.config.runtime.container_prefix;
        let containers = self.runtime.list(prefix).await?;

        let mut listings: Vec<SandboxListing> = containers
            .into_iter()
            .map(|c| SandboxListing {
                user_id: c.name.strip_prefix(prefix.as_str()).and_then(|s| s.parse().ok()),
                status: if c.running {
                    SandboxStatus::Running
                } else {
                    SandboxStatus::Stopped
                },
                host_port: c.host_port,
                container_name: c.name,
            })
            .collect();
        listings.sort_by(|a, b| a.container_name.cmp(&b.container_name));
        Ok(listings)
    }

    /// Remove containers left in an exited state and release any
    /// lingering leases. Returns how many were cleared.
    pub async fn sweep_stale(&self) -> Result<usize> {
        let mut removed = 0;
        for listing in self.list_all().await? {
            if listing.status == SandboxStatus::Running {
                continue;
            }
            match self
                .runtime
                .remove_container(&listing.container_name, true)
                .await
            {
                Ok(_) => {
                    info!("Removed stale container {}", listing.container_name);
                    removed += 1;
                    if let Some(user_id) = listing.user_id {
                        self.allocator.release(self.store.ports(), user_id)?;
                        self.store.set_status(user_id, SandboxStatus::NotCreated);
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to remove stale container {}: {}",
                        listing.container_name, err
                    );
                }
            }
        }
        Ok(removed)
    }

    async fn start_locked(&self, user_id: i64) -> Result<Endpoint> {
        // Fail fast before mutating anything the runtime can't back up.
        self.runtime.ping().await?;
        let workspace = self.workspaces.verify(user_id)?;

        let name = self.config.container_name(user_id);
        self.store.ensure_record(user_id, &name, &workspace);
        self.store.set_status(user_id, SandboxStatus::Starting);

        match self.start_steps(user_id, &name, workspace).await {
            Ok(endpoint) => {
                self.store.set_status(user_id, SandboxStatus::Running);
                info!("Sandbox for user {} running at {}", user_id, endpoint.url);
                Ok(endpoint)
            }
            Err(err) => {
                self.store.set_status(user_id, SandboxStatus::Error);
                Err(err)
            }
        }
    }

    async fn start_steps(
        &self,
        user_id: i64,
        name: &str,
        workspace: std::path::PathBuf,
    ) -> Result<Endpoint> {
        let port = self.allocator.acquire(self.store.ports(), user_id)?;

        // Start always yields a fresh container; clear any leftover one.
        if self.runtime.inspect(name).await?.is_some() {
            debug!("Replacing existing container {}", name);
            if let Err(err) = self.runtime.stop_container(name).await {
                warn!("Stop of old container {} failed: {}", name, err);
            }
            self.runtime.remove_container(name, true).await?;
        }

        let image = &self.config.runtime.image;
        if !self.runtime.image_present(image).await? {
            self.runtime.pull_image(image).await?;
        }

        self.runtime
            .ensure_network(&self.config.runtime.network)
            .await?;

        let spec = ContainerSpec {
            name: name.to_string(),
            image: image.clone(),
            network: self.config.runtime.network.clone(),
            workspace_path: workspace,
            host_port: port,
        };
        self.runtime.create_and_start(&spec).await?;

        Ok(Endpoint {
            url: self.config.endpoint_url(port),
            port,
        })
    }

    async fn stop_locked(&self, user_id: i64) -> Result<()> {
        self.runtime.ping().await?;
        let name = self.config.container_name(user_id);

        // Both calls are attempted even if one fails; a half-stopped
        // container or a leaked port is worse than a noisy partial
        // success.
        let stop_result = self.runtime.stop_container(&name).await;
        let remove_result = self.runtime.remove_container(&name, false).await;
        self.allocator.release(self.store.ports(), user_id)?;

        match (stop_result, remove_result) {
            (Ok(stopped), Ok(removed)) => {
                if !stopped && !removed {
                    if self.store.snapshot(user_id)?.is_none() {
                        return Err(LifecycleError::NotFound { user_id });
                    }
                    self.store.set_status(user_id, SandboxStatus::NotCreated);
                } else {
                    self.store.set_status(user_id, SandboxStatus::Stopped);
                    info!("Stopped sandbox for user {}", user_id);
                }
                Ok(())
            }
            (Err(err), Ok(true)) => {
                // Removal succeeded, so nothing leaked; the stop error
                // is only worth a log line.
                warn!("Graceful stop failed for user {}: {}", user_id, err);
                self.store.set_status(user_id, SandboxStatus::Stopped);
                Ok(())
            }
            (Err(err), _) | (_, Err(err)) => {
                self.store.set_status(user_id, SandboxStatus::Error);
                Err(err)
            }
        }
    }

    fn unavailable_snapshot(&self, user_id: i64, name: &str) -> SandboxRecord {
        let assigned_port = self.store.ports().get(user_id).ok().flatten();
        let base = self
            .store
            .snapshot(user_id)
            .ok()
            .flatten();
        SandboxRecord {
            user_id,
            assigned_port,
            container_name: name.to_string(),
            workspace_path: base
                .as_ref()
                .map(|r| r.workspace_path.clone())
                .unwrap_or_else(|| self.workspaces.workspace_for(user_id)),
            status: SandboxStatus::RuntimeUnavailable,
            last_activity_at: base
                .map(|r| r.last_activity_at)
                .unwrap_or_else(chrono::Utc::now),
        }
    }

    fn user_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(user_id).or_default().clone()
    }
}
