//! Bootstrap configuration and config-file resolution
//!
//! Configuration is read once at startup from a TOML file. Every section is
//! optional; anything missing falls back to a built-in default.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`BIDSMITH_CONFIG`)
//! 3. User config directory (`<config_dir>/bidsmith/config.toml`)
//! 4. Built-in defaults (no file)
//!
//! A config file that cannot be found is reported with a warning and the
//! defaults are used. A config file that exists but cannot be parsed is an
//! error.

use crate::files::write_atomic;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BIDSMITH_CONFIG";

/// Cognitive Atlas task listing endpoint
pub const DEFAULT_TASK_VOCABULARY_URL: &str = "https://www.cognitiveatlas.org/api/v-alpha/task";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub classification: ClassificationSettings,
    pub tasks: TaskSettings,
    pub dataset: DatasetSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Thresholds used by the classification heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    /// Largest volume count a spin-echo field map may have
    pub max_fmap_volumes: u32,

    /// Tolerance band when comparing timing parameters, applied in each
    /// field's own unit: echo time in milliseconds, repetition time in seconds
    pub time_tolerance: f64,

    /// Task names shorter than this need an explicit `task-<name>` token
    pub min_task_name_len: usize,

    /// Diffusion series at or below this volume count are field-map candidates
    pub low_volume_dwi_threshold: u32,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            max_fmap_volumes: 10,
            time_tolerance: 0.1,
            min_task_name_len: 4,
            low_volume_dwi_threshold: 10,
        }
    }
}

/// Task vocabulary sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Site-specific task names added to the built-in list
    pub extra: Vec<String>,

    /// Remote task listing (JSON array of objects with a `name` field)
    pub fetch_url: String,

    /// Fetch the remote listing at startup
    pub fetch: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            extra: Vec::new(),
            fetch_url: DEFAULT_TASK_VOCABULARY_URL.to_string(),
            fetch: false,
        }
    }
}

/// Dataset-level description written into the output document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub name: String,
    pub authors: Vec<String>,
    pub license: String,
    pub bids_version: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            authors: Vec::new(),
            license: "CC0".to_string(),
            bids_version: "1.9.0".to_string(),
        }
    }
}

impl TomlConfig {
    /// Reject values the heuristics cannot work with
    pub fn validate(&self) -> Result<()> {
        let tolerance = self.classification.time_tolerance;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(Error::Config(format!(
                "classification.time_tolerance must be non-negative, got {}",
                tolerance
            )));
        }
        if self.classification.max_fmap_volumes == 0 {
            return Err(Error::Config(
                "classification.max_fmap_volumes must be at least 1".to_string(),
            ));
        }
        if self.dataset.bids_version.trim().is_empty() {
            return Err(Error::Config("dataset.bids_version must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Default per-user config file location
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bidsmith").join("config.toml"))
}

/// Pick the config file to read, following the priority order above
///
/// Returns `None` when no candidate is configured or found.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory, only if present
    user_config_path().filter(|p| p.exists())
}

/// Where the loaded configuration came from
///
/// Configuration is loaded before logging is up, so the outcome is carried
/// back to the caller and reported once the subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// A config file was named but does not exist; defaults used
    NotFound(PathBuf),
    /// No config file configured; defaults used
    Defaults,
}

impl ConfigSource {
    /// Log how the configuration was obtained
    pub fn report(&self) {
        match self {
            ConfigSource::File(path) => info!(path = %path.display(), "Loaded configuration"),
            ConfigSource::NotFound(path) => {
                warn!(path = %path.display(), "Config file not found, using built-in defaults")
            }
            ConfigSource::Defaults => debug!("No config file found, using built-in defaults"),
        }
    }
}

/// Resolve and load configuration, falling back to defaults
pub fn load_config(cli_arg: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
    let Some(path) = resolve_config_path(cli_arg) else {
        return Ok((TomlConfig::default(), ConfigSource::Defaults));
    };

    if !path.exists() {
        return Ok((TomlConfig::default(), ConfigSource::NotFound(path)));
    }

    let config = load_config_file(&path)?;
    Ok((config, ConfigSource::File(path)))
}

/// Read and parse one TOML config file
pub fn load_config_file(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: TomlConfig = toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse TOML {}: {}", path.display(), e))
    })?;

    config.validate()?;
    Ok(config)
}

/// Write configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize TOML: {}", e)))?;

    write_atomic(target, content.as_bytes())?;
    debug!(path = %target.display(), "Wrote configuration file");
    Ok(())
}

/// Write a default configuration file, refusing to replace an existing one
pub fn init_default_config(target: &Path) -> Result<()> {
    if target.exists() {
        return Err(Error::InvalidInput(format!(
            "{} already exists",
            target.display()
        )));
    }
    write_toml_config(&TomlConfig::default(), target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.classification.max_fmap_volumes, 10);
        assert_eq!(config.classification.min_task_name_len, 4);
        assert!((config.classification.time_tolerance - 0.1).abs() < 1e-12);
        assert!(!config.tasks.fetch);
        assert_eq!(config.tasks.fetch_url, DEFAULT_TASK_VOCABULARY_URL);
        assert_eq!(config.dataset.license, "CC0");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [classification]
            max_fmap_volumes = 6

            [tasks]
            extra = ["localtask"]
            "#,
        )
        .unwrap();

        assert_eq!(config.classification.max_fmap_volumes, 6);
        assert_eq!(config.classification.low_volume_dwi_threshold, 10);
        assert_eq!(config.tasks.extra, vec!["localtask".to_string()]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_negative_tolerance() {
        let mut config = TomlConfig::default();
        config.classification.time_tolerance = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_fmap_volumes() {
        let mut config = TomlConfig::default();
        config.classification.max_fmap_volumes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }
}
