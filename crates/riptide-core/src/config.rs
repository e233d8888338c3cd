//! Configuration types for the Riptide launcher.
//!
//! Every field has a default so an absent or empty `riptide.yml` is valid.
//! Environment variables take precedence over the file for the handful of
//! settings that tests and packagers need to redirect.

use crate::params::LaunchMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Overrides the configuration file location.
pub const ENV_CONFIG: &str = "RIPTIDE_CONFIG";
/// Overrides the directory holding `riptide.yml` and `preferences.yml`.
pub const ENV_HOME: &str = "RIPTIDE_HOME";
/// Overrides the directory holding the lock file and relay socket.
pub const ENV_RUNTIME_DIR: &str = "RIPTIDE_RUNTIME_DIR";
/// Overrides `mode`.
pub const ENV_MODE: &str = "RIPTIDE_MODE";

const CONFIG_FILE: &str = "riptide.yml";

/// Top-level configuration for the launcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiptideConfig {
    /// Which surface this process drives once it owns the identity.
    #[serde(default)]
    pub mode: LaunchMode,

    /// Directory for the lock file and relay socket.
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,

    /// Directory for persisted preferences and crash reports.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub fault: FaultConfig,
}

/// Grace-period tuning for ownership checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    /// Lock attempts before concluding another owner is alive.
    #[serde(default = "default_grace_attempts")]
    pub grace_attempts: u32,

    /// Delay between attempts, in milliseconds.
    #[serde(default = "default_grace_interval_ms")]
    pub grace_interval_ms: u64,
}

fn default_grace_attempts() -> u32 {
    3
}

fn default_grace_interval_ms() -> u64 {
    100
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            grace_attempts: default_grace_attempts(),
            grace_interval_ms: default_grace_interval_ms(),
        }
    }
}

impl ArbitrationConfig {
    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.grace_interval_ms)
    }
}

/// Client and owner settings for the message relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upper bound on a client's delivery attempt, in milliseconds.
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,

    /// Messages the owner queues before accepting connections applies backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_relay_timeout_ms() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_relay_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where fault diagnostics are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// Banner and trace on stderr.
    #[default]
    Stderr,
    /// A `crash-<timestamp>.log` file in the data directory.
    CrashFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultConfig {
    #[serde(default)]
    pub reporter: ReporterKind,
}

impl RiptideConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        Self::parse_yaml(&content)
    }

    /// Parses configuration from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the configuration for this process.
    ///
    /// Reads `$RIPTIDE_CONFIG` or `<home>/riptide.yml` when present, then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| home_dir().join(CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else if explicit.is_some() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = std::env::var_os(ENV_RUNTIME_DIR) {
            self.runtime_dir = Some(PathBuf::from(dir));
        }
        if self.data_dir.is_none()
            && let Some(home) = std::env::var_os(ENV_HOME)
        {
            self.data_dir = Some(PathBuf::from(home));
        }
        if let Ok(mode) = std::env::var(ENV_MODE) {
            self.mode = mode
                .parse()
                .map_err(|()| ConfigError::InvalidMode(mode.clone()))?;
        }
        Ok(())
    }

    /// Rejects settings that would make startup hang or never succeed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arbitration.grace_attempts == 0 {
            return Err(ConfigError::NonPositive("arbitration.grace_attempts"));
        }
        if self.relay.timeout_ms == 0 {
            return Err(ConfigError::NonPositive("relay.timeout_ms"));
        }
        if self.relay.queue_capacity == 0 {
            return Err(ConfigError::NonPositive("relay.queue_capacity"));
        }
        Ok(())
    }

    /// Directory holding the lock file and relay socket.
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Directory holding preferences and crash reports.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(home_dir)
    }

    /// Path of the persisted preferences file.
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir().join("preferences.yml")
    }
}

fn home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(ENV_HOME) {
        return PathBuf::from(home);
    }
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(crate::APP_NAME)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid mode '{0}' - expected 'interactive' or 'headless'")]
    InvalidMode(String),

    #[error("'{0}' must be greater than zero")]
    NonPositive(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RiptideConfig::default();
        assert_eq!(config.mode, LaunchMode::Headless);
        assert_eq!(config.arbitration.grace_attempts, 3);
        assert_eq!(config.arbitration.grace_interval(), Duration::from_millis(100));
        assert_eq!(config.relay.timeout(), Duration::from_secs(2));
        assert_eq!(config.relay.queue_capacity, 64);
        assert_eq!(config.fault.reporter, ReporterKind::Stderr);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RiptideConfig::parse_yaml("   \n").unwrap();
        assert_eq!(config.relay.timeout_ms, 2000);
    }

    #[test]
    fn test_parse_yaml_overrides() {
        let yaml = r#"
mode: interactive
runtime_dir: "/run/user/1000/riptide"
arbitration:
  grace_attempts: 5
relay:
  timeout_ms: 750
fault:
  reporter: crash_file
"#;
        let config = RiptideConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.mode, LaunchMode::Interactive);
        assert_eq!(
            config.runtime_dir(),
            PathBuf::from("/run/user/1000/riptide")
        );
        assert_eq!(config.arbitration.grace_attempts, 5);
        // Unspecified nested fields keep their defaults
        assert_eq!(config.arbitration.grace_interval_ms, 100);
        assert_eq!(config.relay.timeout_ms, 750);
        assert_eq!(config.relay.queue_capacity, 64);
        assert_eq!(config.fault.reporter, ReporterKind::CrashFile);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = RiptideConfig::parse_yaml("relay:\n  timeout_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::NonPositive("relay.timeout_ms")));
    }

    #[test]
    fn test_zero_grace_attempts_rejected() {
        let err =
            RiptideConfig::parse_yaml("arbitration:\n  grace_attempts: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonPositive("arbitration.grace_attempts")
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = RiptideConfig::parse_yaml("mode: kiosk\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_preferences_path_under_data_dir() {
        let config = RiptideConfig {
            data_dir: Some(PathBuf::from("/var/lib/riptide")),
            ..RiptideConfig::default()
        };
        assert_eq!(
            config.preferences_path(),
            PathBuf::from("/var/lib/riptide/preferences.yml")
        );
    }
}
