//! In-memory container runtime for controller and scheduler tests.
//!
//! Tracks containers, images and networks in hash maps and exposes
//! switches that simulate the failure modes the lifecycle must survive:
//! an unreachable daemon, a failing registry, and a crashed container
//! that refuses a graceful stop.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::error::{LifecycleError, Result};
use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};

#[derive(Debug, Clone)]
struct MockContainer {
    running: bool,
    host_port: Option<u16>,
}

/// Configurable fake [`ContainerRuntime`].
#[derive(Default)]
pub(crate) struct MockRuntime {
    ping_ok: AtomicBool,
    fail_pull: AtomicBool,
    reject_create: AtomicBool,
    reject_stop: AtomicBool,
    stop_delay: Mutex<Option<Duration>>,
    containers: Mutex<HashMap<String, MockContainer>>,
    images: Mutex<HashSet<String>>,
    networks: Mutex<HashSet<String>>,
    logs: Mutex<HashMap<String, String>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        let runtime = Self::default();
        runtime.ping_ok.store(true, Ordering::SeqCst);
        runtime
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::SeqCst);
    }

    pub fn set_reject_create(&self, reject: bool) {
        self.reject_create.store(reject, Ordering::SeqCst);
    }

    /// Simulate a crashed container: graceful stop and non-forced
    /// removal fail, forced removal still works.
    pub fn set_reject_stop(&self, reject: bool) {
        self.reject_stop.store(reject, Ordering::SeqCst);
    }

    /// Make graceful stops take this long, like a real daemon waiting
    /// out a container's shutdown.
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = Some(delay);
    }

    /// Set the log text a container reports.
    pub fn set_logs(&self, name: &str, text: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert(name.to_string(), text.to_string());
    }

    /// Mark a container as exited without removing it.
    pub fn halt(&self, name: &str) {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(name) {
            container.running = false;
        }
    }

    /// Override the reported host port binding.
    pub fn set_host_port(&self, name: &str, port: u16) {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(name) {
            container.host_port = Some(port);
        }
    }

    /// Insert an exited container directly, as if left behind by a
    /// previous process.
    pub fn seed_exited(&self, name: &str, host_port: Option<u16>) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            MockContainer {
                running: false,
                host_port,
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|c| c.running)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.images.lock().unwrap().contains(image)
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.networks.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LifecycleError::runtime_unavailable("mock daemon down"))
        }
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(LifecycleError::image_unavailable(image, "mock pull failure"));
        }
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        self.networks.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<()> {
        if self.reject_create.load(Ordering::SeqCst) {
            return Err(LifecycleError::creation_rejected("mock creation refused"));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(LifecycleError::creation_rejected(format!(
                "409: name {} already in use",
                spec.name
            )));
        }
        containers.insert(
            spec.name.clone(),
            MockContainer {
                running: true,
                host_port: Some(spec.host_port),
            },
        );
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<bool> {
        let delay = *self.stop_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_stop.load(Ordering::SeqCst) {
            return Err(LifecycleError::runtime_failed(
                "stop_container",
                "500: container refused stop",
            ));
        }
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name) {
            Some(container) => {
                container.running = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<bool> {
        if self.reject_stop.load(Ordering::SeqCst) && !force {
            return Err(LifecycleError::runtime_failed(
                "remove_container",
                "409: cannot remove running container",
            ));
        }
        Ok(self.containers.lock().unwrap().remove(name).is_some())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Option<String>> {
        if !self.containers.lock().unwrap().contains_key(name) {
            return Ok(None);
        }
        let text = self
            .logs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(Some(lines[start..].join("\n")))
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        Ok(self.containers.lock().unwrap().get(name).map(|c| {
            ContainerState {
                running: c.running,
                host_port: c.host_port,
            }
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, c)| ContainerSummary {
                name: name.clone(),
                running: c.running,
                host_port: c.host_port,
            })
            .collect())
    }
}
