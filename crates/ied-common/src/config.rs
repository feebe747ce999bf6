//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Shared primitives and utilities for the proxy runtime."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_iec_port() -> u16 {
    102
}

fn default_rpc_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 61850)
}

fn default_rpc_workers() -> usize {
    10
}

fn default_backend() -> String {
    "http://127.0.0.1:61851".to_owned()
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("config/points.json")
}

fn default_queue_capacity() -> usize {
    64
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9898)
}

/// Primary configuration object for the proxy daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub iec61850: Iec61850Config,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "IED_PROXY_CONFIG";

    /// Load configuration from disk, respecting the `IED_PROXY_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.iec61850.port == 0 {
            return Err(anyhow!("iec61850.port must be non-zero"));
        }
        self.rpc.validate()?;
        if self.control.queue_capacity == 0 {
            return Err(anyhow!("control.queue_capacity must be at least 1"));
        }
        if self.control.backend_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("control.backend_timeout must be positive when set"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Field-protocol server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iec61850Config {
    #[serde(default = "default_iec_port")]
    pub port: u16,
}

impl Default for Iec61850Config {
    fn default() -> Self {
        Self {
            port: default_iec_port(),
        }
    }
}

/// Remote-procedure surface: the inbound listener and the outbound backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_listen")]
    pub listen: SocketAddr,
    /// Upper bound on RPC calls executing core operations at once.
    #[serde(default = "default_rpc_workers")]
    pub workers: usize,
    /// Endpoint receiving forwarded control values.
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen: default_rpc_listen(),
            workers: default_rpc_workers(),
            backend: default_backend(),
        }
    }
}

impl RpcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("rpc.workers must be at least 1"));
        }
        let backend = url::Url::parse(&self.backend)
            .with_context(|| format!("rpc.backend '{}' is not a valid URI", self.backend))?;
        if !matches!(backend.scheme(), "http" | "https") {
            return Err(anyhow!(
                "rpc.backend must use http or https, found '{}'",
                backend.scheme()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// JSON schema file; rewritten whenever devices are added or reset.
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            schema_path: default_schema_path(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Bound on a single backend call. Unbounded when absent.
    #[serde(default, rename = "backend_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub backend_timeout: Option<Duration>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backend_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.iec61850.port, 102);
        assert_eq!(config.rpc.listen.port(), 61850);
        assert_eq!(config.rpc.workers, 10);
        assert_eq!(config.control.queue_capacity, 64);
        assert!(config.control.backend_timeout.is_none());
        assert_eq!(config.model.schema_path, PathBuf::from("config/points.json"));
    }

    #[test]
    fn timeouts_are_read_in_milliseconds() {
        let config: AppConfig = "[control]\nqueue_capacity = 8\nbackend_timeout_ms = 1500\n"
            .parse()
            .unwrap();
        assert_eq!(config.control.backend_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.control.queue_capacity, 8);
    }

    #[test]
    fn structural_invariants_are_enforced() {
        assert!("[iec61850]\nport = 0\n".parse::<AppConfig>().is_err());
        assert!("[control]\nqueue_capacity = 0\n".parse::<AppConfig>().is_err());
        assert!("[rpc]\nworkers = 0\n".parse::<AppConfig>().is_err());
        assert!("[rpc]\nbackend = \"not a uri\"\n".parse::<AppConfig>().is_err());
        assert!("[rpc]\nbackend = \"ftp://host\"\n".parse::<AppConfig>().is_err());
    }
}
