//! Startup orchestration.
//!
//! One pass, in order: parse, version/help short-circuit, persist the Web UI
//! port, consent gate, arbitration. A client relays its targets and is done;
//! an owner gets back an [`OwnerStartup`] carrying its intent and the guard
//! that keeps it the owner.

use crate::arbiter::{ArbitrationError, ArbitrationOutcome, IdentityArbiter, OwnerGuard};
use crate::config::RiptideConfig;
use crate::consent::{ConsentError, ConsentGate, ConsentPrompt};
use crate::identity::ApplicationIdentity;
use crate::params::{self, LaunchIntent, LaunchMode, UsageError};
use crate::preferences::{PreferencesError, PreferencesStore};
use crate::relay::{RelayClient, RelayError, RelayMessage};
use tracing::{info, warn};

/// How startup concluded.
#[derive(Debug)]
pub enum Startup {
    /// Print to stdout and exit 0.
    ShowVersion(String),
    /// Print to stdout and exit 0.
    ShowHelp(String),
    /// The legal notice was declined; exit 0.
    Declined,
    /// Another instance owns the identity; exit 0 whether or not it was reached.
    Relayed { delivered: bool },
    /// This process is the owner and continues into its event loop.
    Owner(OwnerStartup),
}

/// Everything an owner needs to continue.
#[derive(Debug)]
pub struct OwnerStartup {
    pub intent: LaunchIntent,
    /// Must outlive the event loop.
    pub guard: OwnerGuard,
    /// Interactive mode only; headless never shows a splash.
    pub show_splash: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Consent(#[from] ConsentError),

    #[error(transparent)]
    Arbitration(#[from] ArbitrationError),

    #[error("Failed to save preferences: {0}")]
    Preferences(#[from] PreferencesError),

    #[error("Failed to daemonize: {0}")]
    Daemonize(String),
}

impl StartupError {
    /// Bad command lines are reported with a distinct prefix.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Runs the startup sequence for one process.
pub struct StartupOrchestrator<'a> {
    config: &'a RiptideConfig,
    identity: ApplicationIdentity,
    prefs: &'a mut dyn PreferencesStore,
    prompt: &'a mut dyn ConsentPrompt,
}

impl<'a> StartupOrchestrator<'a> {
    pub fn new(
        config: &'a RiptideConfig,
        identity: ApplicationIdentity,
        prefs: &'a mut dyn PreferencesStore,
        prompt: &'a mut dyn ConsentPrompt,
    ) -> Self {
        Self {
            config,
            identity,
            prefs,
            prompt,
        }
    }

    /// Drives startup for `args` (program name excluded).
    pub fn start<I, S>(&mut self, args: I) -> Result<Startup, StartupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mode = self.config.mode;
        let intent = params::parse(args, mode)?;

        if intent.show_version {
            return Ok(Startup::ShowVersion(version_text()));
        }
        if intent.show_help {
            return Ok(Startup::ShowHelp(params::usage(mode, self.prefs.webui_port())));
        }

        // Fail on unrelayable targets before anything is persisted
        let message = RelayMessage::for_targets(&intent.targets);
        if let Err(
            e @ (RelayError::ReservedCharacter(_)
            | RelayError::ReservedTarget(_)
            | RelayError::TooLarge { .. }),
        ) = message.encode()
        {
            return Err(UsageError::Invalid(e.to_string()).into());
        }

        if let Some(port) = intent.webui_port {
            self.prefs.set_webui_port(port)?;
            info!(port, "Web UI port set from the command line");
        }

        if !ConsentGate::new(&mut *self.prefs).ensure(&mut *self.prompt)? {
            return Ok(Startup::Declined);
        }

        let arbiter = IdentityArbiter::new(self.identity.clone(), self.config.runtime_dir())
            .with_config(&self.config.arbitration);

        match arbiter.acquire()? {
            ArbitrationOutcome::Client(owner) => {
                if intent.daemonize {
                    return Err(UsageError::AlreadyRunning.into());
                }
                info!(pid = ?owner.pid, "riptide is already running for this user");

                let client = RelayClient::new(&owner.socket_path, self.config.relay.timeout());
                let delivered = match client.send(&message) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Could not hand the launch over to the running instance");
                        false
                    }
                };
                Ok(Startup::Relayed { delivered })
            }
            ArbitrationOutcome::Owner(guard) => {
                let show_splash = mode == LaunchMode::Interactive
                    && !intent.suppress_splash
                    && !self.prefs.splash_disabled();
                Ok(Startup::Owner(OwnerStartup {
                    intent,
                    guard,
                    show_splash,
                }))
            }
        }
    }
}

fn version_text() -> String {
    format!("{} {}", crate::APP_NAME, crate::VERSION)
}

/// The version line if `args` is exactly a version request.
///
/// Needs no configuration or preferences, so it can run before either is
/// loaded.
pub fn version_request(args: &[String]) -> Option<String> {
    // `-v` means the same in every mode
    let intent = params::parse(args, LaunchMode::default()).ok()?;
    intent.show_version.then(version_text)
}

/// Detaches from the terminal, keeping the working directory.
///
/// The parent exits inside this call. The lock descriptor is inherited, so
/// the child stays the owner; its pid is rewritten into the lock file.
/// Must run before any runtime threads exist.
#[cfg(unix)]
pub fn daemonize(guard: &OwnerGuard) -> Result<(), StartupError> {
    nix::unistd::daemon(true, false).map_err(|e| StartupError::Daemonize(e.to_string()))?;
    if let Err(e) = guard.refresh_pid() {
        warn!(error = %e, "Could not record daemon pid in lock file");
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize(_guard: &OwnerGuard) -> Result<(), StartupError> {
    Err(StartupError::Daemonize(
        "not supported on this platform".to_owned(),
    ))
}
