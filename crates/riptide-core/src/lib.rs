//! # riptide-core
//!
//! Startup control for the Riptide BitTorrent client.
//!
//! This crate provides:
//! - Command-line interpretation into a validated [`LaunchIntent`]
//! - The legal-notice consent gate backed by a preferences store
//! - Per-user single-instance arbitration over an OS file lock
//! - The relay that carries a client's targets to the running owner
//! - Fault capture for fatal and termination signals
//! - The startup orchestrator that composes all of the above

pub mod arbiter;
mod config;
pub mod consent;
pub mod fault;
pub mod file_lock;
pub mod identity;
pub mod params;
pub mod preferences;
pub mod relay;
pub mod session;
pub mod startup;

pub use arbiter::{ArbitrationError, ArbitrationOutcome, IdentityArbiter, OwnerGuard, OwnerHandle};
pub use config::{
    ArbitrationConfig, ConfigError, FaultConfig, ReporterKind, RelayConfig, RiptideConfig,
};
pub use consent::{ConsentError, ConsentGate, ConsentPrompt, ConsolePrompt, LEGAL_NOTICE};
pub use fault::{
    CrashFileReporter, FaultError, FaultEvent, FaultKind, FaultReporter, StderrReporter,
};
pub use file_lock::{HeldLock, LockFile};
pub use identity::ApplicationIdentity;
pub use params::{LaunchIntent, LaunchMode, UsageError};
pub use preferences::{MemoryPreferences, Preferences, PreferencesError, PreferencesStore, YamlPreferences};
pub use relay::{
    MessageInbox, PendingMessages, RelayClient, RelayError, RelayMessage, RelayServer,
    SHOW_SENTINEL,
};
pub use session::{HeadlessLoader, Session};
pub use startup::{OwnerStartup, Startup, StartupError, StartupOrchestrator};

/// Application name used for the identity prefix and version output.
pub const APP_NAME: &str = "riptide";

/// Crate version reported by `--version` and fault diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
