//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (config file path)
//! 2. Environment variables (`GEOCHECK_CONFIG`, then per-field overrides)
//! 3. TOML config file (`~/.config/geocheck/config.toml`)
//! 4. Built-in defaults
//!
//! A missing config file is never fatal: the resolver logs a warning and
//! falls back to defaults. An explicitly requested file that cannot be read
//! is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "GEOCHECK_CONFIG";
/// Environment override for `lookup.max_concurrency`
pub const ENV_MAX_CONCURRENCY: &str = "GEOCHECK_MAX_CONCURRENCY";
/// Environment override for `registry.endpoint`
pub const ENV_REGISTRY_URL: &str = "GEOCHECK_REGISTRY_URL";

/// Default registry endpoint (geo.admin.ch federal search service)
pub const DEFAULT_REGISTRY_ENDPOINT: &str =
    "https://api3.geo.admin.ch/rest/services/ech/MapServer/find";
/// Building and dwelling register layer
pub const DEFAULT_REGISTRY_LAYER: &str = "ch.bfs.gebaeude_wohnungs_register";
/// Attribute holding the building identifier
pub const DEFAULT_SEARCH_FIELD: &str = "egid";

/// Top-level TOML configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Remote registry connection settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Batch lookup settings
    #[serde(default)]
    pub lookup: LookupConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Search endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Layer identifier queried on the endpoint
    #[serde(default = "default_layer")]
    pub layer: String,

    /// Attribute name searched for the identifier
    #[serde(default = "default_search_field")]
    pub search_field: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum spacing between sequential requests in milliseconds
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

/// Batch lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Maximum number of in-flight registry requests
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Batches smaller than this are looked up sequentially
    #[serde(default = "default_concurrency_threshold")]
    pub concurrency_threshold: usize,

    /// Disable the concurrent strategy entirely
    #[serde(default)]
    pub sequential: bool,

    /// Worker threads for the dedicated lookup runtime (tokio default if unset)
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_endpoint() -> String {
    DEFAULT_REGISTRY_ENDPOINT.to_string()
}

fn default_layer() -> String {
    DEFAULT_REGISTRY_LAYER.to_string()
}

fn default_search_field() -> String {
    DEFAULT_SEARCH_FIELD.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_min_interval_ms() -> u64 {
    100
}

fn default_max_concurrency() -> usize {
    20
}

fn default_concurrency_threshold() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            layer: default_layer(),
            search_field: default_search_field(),
            timeout_secs: default_timeout_secs(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            concurrency_threshold: default_concurrency_threshold(),
            sequential: false,
            worker_threads: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.lookup.max_concurrency == 0 {
            return Err(Error::Config(
                "lookup.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.registry.timeout_secs == 0 {
            return Err(Error::Config(
                "registry.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.registry.endpoint.trim().is_empty() {
            return Err(Error::Config("registry.endpoint is empty".to_string()));
        }
        if matches!(self.lookup.worker_threads, Some(0)) {
            return Err(Error::Config(
                "lookup.worker_threads must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply per-field environment overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_MAX_CONCURRENCY) {
            self.lookup.max_concurrency = value.trim().parse().map_err(|e| {
                Error::Config(format!("Invalid {}='{}': {}", ENV_MAX_CONCURRENCY, value, e))
            })?;
            debug!(max_concurrency = self.lookup.max_concurrency, "Max concurrency from environment");
        }
        if let Ok(value) = std::env::var(ENV_REGISTRY_URL) {
            if !value.trim().is_empty() {
                self.registry.endpoint = value.trim().to_string();
                debug!(endpoint = %self.registry.endpoint, "Registry endpoint from environment");
            }
        }
        Ok(())
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geocheck").join("config.toml"))
}

/// Resolves the effective configuration from all sources
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Resolve, apply environment overrides, and validate
    pub fn resolve(&self) -> Result<TomlConfig> {
        let mut config = self.load_base()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn load_base(&self) -> Result<TomlConfig> {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_path {
            info!("Loading config from command line: {}", path.display());
            return load_toml_config(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(path);
            info!("Loading config from {}: {}", ENV_CONFIG_PATH, path.display());
            return load_toml_config(&path);
        }

        // Priority 3: TOML config file at the platform location
        if let Some(path) = default_config_path() {
            if path.exists() {
                info!("Loading config from {}", path.display());
                return load_toml_config(&path);
            }
            debug!("No config file at {}", path.display());
        }

        // Priority 4: Built-in defaults
        warn!("No configuration file found, using built-in defaults");
        Ok(TomlConfig::default())
    }
}

/// Write config atomically (temp file + rename)
///
/// On Unix the file is created with 0600 permissions.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}
