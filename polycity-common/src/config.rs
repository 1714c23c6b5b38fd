//! Configuration loading and store path resolution
//!
//! Every setting resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`POLYCITY_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable config file is not fatal: a warning is logged
//! and compiled defaults are used.

use crate::models::Stage;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the coordination store file
pub const ENV_STORE_PATH: &str = "POLYCITY_STORE";
/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "POLYCITY_CONFIG";

/// Default elevation service endpoint
pub const DEFAULT_ELEVATION_ENDPOINT: &str = "https://elevation.mapzen.com";

/// Top-level `polycity.toml` contents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Coordination store (SQLite file) shared by the coordinator and workers
    pub store_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub elevation: ElevationConfig,
    pub places: PlacesConfig,
    pub convert: ConvertConfig,
    pub workers: WorkerPoolConfig,
    pub timing: TimingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "polycity=info,polycity_common=info".to_string(),
        }
    }
}

/// Elevation capability settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElevationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Minimum spacing between requests from one worker
    pub min_interval_ms: u64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ELEVATION_ENDPOINT.to_string(),
            api_key: None,
            min_interval_ms: 100,
        }
    }
}

/// Place-lookup (gazetteer) capability settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlacesConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

/// Model conversion settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvertConfig {
    /// External converter program, invoked as `<program> export <in> <out>`
    pub program: String,
    /// Additional formats produced from the exported OBJ (file extensions)
    pub formats: Vec<String>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            program: "assimp".to_string(),
            formats: vec!["dae".to_string()],
        }
    }
}

/// Worker processes per stage
///
/// Network-bound and geometry-heavy stages get larger pools; the index
/// stage is lightweight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub repair: usize,
    pub triangulate: usize,
    pub elevation: usize,
    pub place_lookup: usize,
    pub export: usize,
    pub convert: usize,
    pub index: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            repair: 3,
            triangulate: 3,
            elevation: 5,
            place_lookup: 2,
            export: 3,
            convert: 3,
            index: 1,
        }
    }
}

impl WorkerPoolConfig {
    /// Pool size for a stage (at least one worker)
    pub fn size_for(&self, stage: Stage) -> usize {
        let size = match stage {
            Stage::Repair => self.repair,
            Stage::Triangulate => self.triangulate,
            Stage::Elevation => self.elevation,
            Stage::PlaceLookup => self.place_lookup,
            Stage::Export => self.export,
            Stage::Convert => self.convert,
            Stage::Index => self.index,
        };
        size.max(1)
    }

    /// Uniform pool size for every stage (used by in-process runs and tests)
    pub fn uniform(size: usize) -> Self {
        Self {
            repair: size,
            triangulate: size,
            elevation: size,
            place_lookup: size,
            export: size,
            convert: size,
            index: size,
        }
    }
}

/// Polling, settle and shutdown timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Coordinator completion-poll interval
    pub poll_interval_ms: u64,
    /// Delay between end of input and freezing the enqueue count
    pub split_settle_ms: u64,
    /// Time allowed for workers to finish their in-flight item on shutdown
    pub shutdown_grace_ms: u64,
    /// Queue lease; an unacknowledged delivery becomes visible again after this
    pub lease_secs: u64,
    /// Deliveries after which a payload is isolated as failed
    pub max_deliveries: u32,
    /// Sleep between pulls when a queue is empty
    pub idle_pull_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            split_settle_ms: 1000,
            shutdown_grace_ms: 10_000,
            lease_secs: 600,
            max_deliveries: 5,
            idle_pull_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn split_settle(&self) -> Duration {
        Duration::from_millis(self.split_settle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn idle_pull(&self) -> Duration {
        Duration::from_millis(self.idle_pull_ms)
    }
}

/// Load TOML configuration
///
/// Lookup order for the file itself: explicit path, `POLYCITY_CONFIG`,
/// platform config directory (`~/.config/polycity/polycity.toml` on Linux).
/// Missing file → defaults with a warning. A file that exists but fails to
/// parse is a configuration error.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => std::env::var(ENV_CONFIG_PATH)
            .ok()
            .map(PathBuf::from)
            .or_else(default_config_file),
    };

    let Some(path) = path else {
        warn!("No config directory available, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file not found: {}, using compiled defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Write TOML configuration (used to seed a config file)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the coordination store path
///
/// Priority: CLI argument → `POLYCITY_STORE` → TOML `store_path` → default.
pub fn resolve_store_path(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ENV_STORE_PATH) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.store_path {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_store_path()
}

/// Resolve an optional string setting: CLI → environment → TOML
pub fn resolve_optional(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
) -> Option<String> {
    if let Some(value) = cli_arg.filter(|v| is_set(v)) {
        return Some(value.to_string());
    }
    if let Ok(value) = std::env::var(env_var_name) {
        if is_set(&value) {
            return Some(value);
        }
    }
    toml_value.filter(|v| is_set(v)).map(str::to_string)
}

/// Non-empty, non-whitespace
pub fn is_set(value: &str) -> bool {
    !value.trim().is_empty()
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("polycity").join("polycity.toml"))
}

/// OS-dependent default store location
fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("polycity").join("coordination.db"))
        .unwrap_or_else(|| PathBuf::from("./polycity_data/coordination.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_never_zero() {
        let pools = WorkerPoolConfig::uniform(0);
        assert_eq!(pools.size_for(Stage::Repair), 1);
        assert_eq!(pools.size_for(Stage::Index), 1);
    }

    #[test]
    fn test_default_pools_favor_network_stages() {
        let pools = WorkerPoolConfig::default();
        assert!(pools.size_for(Stage::Elevation) > pools.size_for(Stage::Index));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            store_path = "/tmp/store.db"

            [workers]
            elevation = 9

            [timing]
            poll_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/store.db")));
        assert_eq!(config.workers.elevation, 9);
        assert_eq!(config.workers.repair, 3);
        assert_eq!(config.timing.poll_interval_ms, 250);
        assert_eq!(config.timing.max_deliveries, 5);
        assert_eq!(config.convert.formats, vec!["dae".to_string()]);
    }
}
