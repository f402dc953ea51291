use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "devcell.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub workspaces: WorkspacesConfig,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

/// Container runtime configuration - image, naming and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Docker image for sandbox containers
    #[serde(default = "default_image")]
    pub image: String,

    /// Shared bridge network all sandboxes join
    #[serde(default = "default_network")]
    pub network: String,

    /// Container name prefix; the user id is appended
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Port the sandbox process listens on inside the container
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Timeout for individual runtime calls (seconds)
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,

    /// Timeout for image pulls (seconds)
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            network: default_network(),
            container_prefix: default_container_prefix(),
            internal_port: default_internal_port(),
            op_timeout_secs: default_op_timeout(),
            pull_timeout_secs: default_pull_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

/// Host port pool leased to sandboxes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    /// First port in the pool (inclusive)
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Last port in the pool (inclusive)
    #[serde(default = "default_max_port")]
    pub max_port: u16,

    /// File the lease table is persisted to
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            max_port: default_max_port(),
            state_file: default_state_file(),
        }
    }
}

/// How sandbox URLs are built for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Hostname or address callers reach sandboxes at.
    /// Deployments sit behind different names, so this is never hard-coded.
    #[serde(default = "default_host_label")]
    pub host_label: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host_label: default_host_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspacesConfig {
    /// Directory containing one subdirectory per user
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspacesConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

/// Background reclamation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// Hours since last activity before a running sandbox is stopped
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_hours: u64,

    /// Seconds between logout and forced reclamation
    #[serde(default = "default_logout_grace")]
    pub logout_grace_secs: u64,

    /// Seconds between idle sweep passes
    #[serde(default = "default_sweep_interval")]
    pub idle_sweep_interval_secs: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            idle_threshold_hours: default_idle_threshold(),
            logout_grace_secs: default_logout_grace(),
            idle_sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ReclaimConfig {
    pub fn idle_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.idle_threshold_hours as i64)
    }

    pub fn logout_grace(&self) -> Duration {
        Duration::from_secs(self.logout_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }
}

// Default value functions
fn default_image() -> String {
    "devcell/workspace:latest".to_string()
}

fn default_network() -> String {
    "devcell-net".to_string()
}

fn default_container_prefix() -> String {
    "devcell-user-".to_string()
}

fn default_internal_port() -> u16 {
    3000
}

fn default_op_timeout() -> u64 {
    30
}

fn default_pull_timeout() -> u64 {
    300
}

fn default_base_port() -> u16 {
    3001
}

fn default_max_port() -> u16 {
    3999
}

fn default_state_file() -> PathBuf {
    PathBuf::from("devcell-ports.toml")
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host_label() -> String {
    "localhost".to_string()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspaces")
}

fn default_idle_threshold() -> u64 {
    2
}

fn default_logout_grace() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    600
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Container name for a user. Pure function of the id so lookups
    /// stay idempotent across restarts.
    pub fn container_name(&self, user_id: i64) -> String {
        format!("{}{}", self.runtime.container_prefix, user_id)
    }

    /// External URL for a leased port
    pub fn endpoint_url(&self, port: u16) -> String {
        format!(
            "{}://{}:{}",
            self.endpoint.scheme, self.endpoint.host_label, port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ports.base_port, 3001);
        assert_eq!(config.ports.max_port, 3999);
        assert_eq!(config.runtime.internal_port, 3000);
        assert_eq!(config.endpoint.scheme, "http");
        assert_eq!(config.reclaim.idle_threshold_hours, 2);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
image = "registry.example.com/workspace:v3"
op_timeout_secs = 10

[ports]
base_port = 4001
max_port = 4099

[endpoint]
scheme = "https"
host_label = "sandbox.example.com"

[reclaim]
idle_threshold_hours = 6
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.image, "registry.example.com/workspace:v3");
        assert_eq!(config.runtime.op_timeout(), Duration::from_secs(10));
        assert_eq!(config.ports.base_port, 4001);
        assert_eq!(config.ports.max_port, 4099);
        assert_eq!(config.endpoint.host_label, "sandbox.example.com");
        assert_eq!(config.reclaim.idle_threshold_hours, 6);
        // Unset sections keep defaults
        assert_eq!(config.workspaces.root, PathBuf::from("workspaces"));
    }

    #[test]
    fn test_container_name_is_deterministic() {
        let config = Config::default();
        assert_eq!(config.container_name(42), "devcell-user-42");
        assert_eq!(config.container_name(42), config.container_name(42));
        // Demo identities use negative ids; no special casing
        assert_eq!(config.container_name(-1), "devcell-user--1");
    }

    #[test]
    fn test_endpoint_url() {
        let mut config = Config::default();
        config.endpoint.scheme = "https".to_string();
        config.endpoint.host_label = "dev.example.com".to_string();
        assert_eq!(config.endpoint_url(3042), "https://dev.example.com:3042");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.runtime.image, "devcell/workspace:latest");
    }
}
