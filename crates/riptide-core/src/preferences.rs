//! Persisted user preferences touched during startup.
//!
//! The full preference set belongs to the client proper; the launcher reads
//! and writes only the legal-notice flag and the Web UI port, and reads the
//! splash toggle.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default Web UI port when none has been configured.
pub const DEFAULT_WEBUI_PORT: u16 = 8080;

/// Typed get/set access to the preferences the launcher needs.
pub trait PreferencesStore {
    fn accepted_legal(&self) -> bool;
    fn set_accepted_legal(&mut self, accepted: bool) -> Result<(), PreferencesError>;
    fn webui_port(&self) -> u16;
    fn set_webui_port(&mut self, port: u16) -> Result<(), PreferencesError>;
    fn splash_disabled(&self) -> bool;
}

/// The persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub accepted_legal: bool,

    #[serde(default = "default_webui_port")]
    pub webui_port: u16,

    #[serde(default)]
    pub splash_disabled: bool,
}

fn default_webui_port() -> u16 {
    DEFAULT_WEBUI_PORT
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            accepted_legal: false,
            webui_port: DEFAULT_WEBUI_PORT,
            splash_disabled: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse preferences: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Preferences kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    pub values: Preferences,
}

impl PreferencesStore for MemoryPreferences {
    fn accepted_legal(&self) -> bool {
        self.values.accepted_legal
    }

    fn set_accepted_legal(&mut self, accepted: bool) -> Result<(), PreferencesError> {
        self.values.accepted_legal = accepted;
        Ok(())
    }

    fn webui_port(&self) -> u16 {
        self.values.webui_port
    }

    fn set_webui_port(&mut self, port: u16) -> Result<(), PreferencesError> {
        self.values.webui_port = port;
        Ok(())
    }

    fn splash_disabled(&self) -> bool {
        self.values.splash_disabled
    }
}

/// Preferences backed by a YAML file, rewritten on every change.
#[derive(Debug)]
pub struct YamlPreferences {
    path: PathBuf,
    values: Preferences,
}

impl YamlPreferences {
    /// Loads `path`, or starts from defaults if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferencesError> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Preferences::default()
            } else {
                serde_yaml::from_str(&content)?
            }
        } else {
            Preferences::default()
        };
        debug!(path = %path.display(), "Loaded preferences");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values(&self) -> &Preferences {
        &self.values
    }

    /// Writes to a sibling temp file and renames it over the original.
    fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&self.values)?;
        let tmp = self.path.with_extension("yml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferencesStore for YamlPreferences {
    fn accepted_legal(&self) -> bool {
        self.values.accepted_legal
    }

    fn set_accepted_legal(&mut self, accepted: bool) -> Result<(), PreferencesError> {
        self.values.accepted_legal = accepted;
        self.save()
    }

    fn webui_port(&self) -> u16 {
        self.values.webui_port
    }

    fn set_webui_port(&mut self, port: u16) -> Result<(), PreferencesError> {
        self.values.webui_port = port;
        self.save()
    }

    fn splash_disabled(&self) -> bool {
        self.values.splash_disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = YamlPreferences::open(temp_dir.path().join("preferences.yml")).unwrap();
        assert!(!prefs.accepted_legal());
        assert_eq!(prefs.webui_port(), DEFAULT_WEBUI_PORT);
        assert!(!prefs.splash_disabled());
        // Reading never creates the file
        assert!(!prefs.path().exists());
    }

    #[test]
    fn test_changes_persist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/preferences.yml");

        let mut prefs = YamlPreferences::open(&path).unwrap();
        prefs.set_accepted_legal(true).unwrap();
        prefs.set_webui_port(9000).unwrap();

        let reopened = YamlPreferences::open(&path).unwrap();
        assert!(reopened.accepted_legal());
        assert_eq!(reopened.webui_port(), 9000);
        assert!(!path.with_extension("yml.tmp").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.yml");
        std::fs::write(&path, "splash_disabled: true\n").unwrap();

        let prefs = YamlPreferences::open(&path).unwrap();
        assert!(prefs.splash_disabled());
        assert_eq!(prefs.webui_port(), DEFAULT_WEBUI_PORT);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.yml");
        std::fs::write(&path, "webui_port: [not, a, port]\n").unwrap();

        assert!(matches!(
            YamlPreferences::open(&path),
            Err(PreferencesError::Parse(_))
        ));
    }
}
