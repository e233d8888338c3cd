//! Per-user application identity and the rendezvous names derived from it.

use std::fmt;
use std::path::{Path, PathBuf};

/// Identifies "this application, for this OS user".
///
/// Processes started with equal identities compete for the same lock file and
/// relay socket, so the derived names must be deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationIdentity(String);

impl ApplicationIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `<app>-<user id>`, stable across runs for the same account.
    pub fn for_current_user(app_name: &str) -> Self {
        Self(format!("{app_name}-{}", user_id_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity reduced to characters safe in a file name.
    pub fn resource_name(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    pub fn lock_path(&self, runtime_dir: &Path) -> PathBuf {
        runtime_dir.join(format!("{}.lock", self.resource_name()))
    }

    pub fn socket_path(&self, runtime_dir: &Path) -> PathBuf {
        runtime_dir.join(format!("{}.sock", self.resource_name()))
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(unix)]
fn user_id_string() -> String {
    nix::unistd::getuid().as_raw().to_string()
}

#[cfg(not(unix))]
fn user_id_string() -> String {
    std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "default".to_string())
}
