//! CLI command implementations.
//!
//! Each submodule implements one admin operation against the lifecycle
//! controller. The HTTP layer consumes the same controller as a
//! library; these commands are the operational tooling.

pub mod list;
pub mod logout;
pub mod logs;
pub mod port;
pub mod restart;
pub mod start;
pub mod status;
pub mod stop;
pub mod sweep;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::lifecycle::runtime::DockerRuntime;
use crate::lifecycle::LifecycleController;
use crate::store::{FilePortStore, SandboxStore};
use crate::workspace::DirWorkspaces;

/// Build a controller wired to the local Docker daemon, using the
/// config discovered in the current directory.
pub(crate) fn build_controller() -> Result<Arc<LifecycleController>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;

    let runtime = DockerRuntime::connect(
        config.runtime.internal_port,
        config.runtime.op_timeout(),
        config.runtime.pull_timeout(),
    )
    .context("Failed to connect to Docker. Is Docker installed?")?;

    let ports = FilePortStore::open(&config.ports.state_file)?;
    let store = Arc::new(SandboxStore::new(Box::new(ports)));
    let workspaces = Arc::new(DirWorkspaces::new(config.workspaces.root.clone()));

    Ok(Arc::new(LifecycleController::new(
        config,
        Arc::new(runtime),
        store,
        workspaces,
    )))
}
