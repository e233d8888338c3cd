//! Riptide launcher.
//!
//! Decides whether this launch owns the per-user instance. Owners run the
//! session loop; every other launch hands its targets to the owner and exits.

use anyhow::{Context, Result};
use riptide_core::fault;
use riptide_core::startup::{self, OwnerStartup, Startup, StartupError, StartupOrchestrator};
use riptide_core::{
    APP_NAME, ApplicationIdentity, ConsolePrompt, HeadlessLoader, LaunchIntent, LaunchMode,
    OwnerGuard, RelayServer, RiptideConfig, Session, YamlPreferences,
};
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Log filter override, e.g. `RIPTIDE_LOG=debug`.
const LOG_ENV: &str = "RIPTIDE_LOG";

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(code) => code,
        Err(err) => {
            if let Some(startup_err) = err.downcast_ref::<StartupError>() {
                if startup_err.is_usage() {
                    eprintln!("Bad command line: {startup_err}");
                } else {
                    eprintln!("Error: {err:#}");
                }
                return ExitCode::from(startup_err.exit_code());
            }
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    // Answered before touching any file that could be unreadable
    if let Some(text) = startup::version_request(&args) {
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    let config = RiptideConfig::load().context("Failed to load configuration")?;
    let mut prefs =
        YamlPreferences::open(config.preferences_path()).context("Failed to load preferences")?;
    let mut prompt = ConsolePrompt::stdio();
    let identity = ApplicationIdentity::for_current_user(APP_NAME);

    let outcome = StartupOrchestrator::new(&config, identity, &mut prefs, &mut prompt).start(args)?;

    match outcome {
        Startup::ShowVersion(text) | Startup::ShowHelp(text) => {
            println!("{}", text.trim_end());
            Ok(ExitCode::SUCCESS)
        }
        Startup::Declined => Ok(ExitCode::SUCCESS),
        Startup::Relayed { delivered } => {
            debug!(delivered, "Launch handed over");
            Ok(ExitCode::SUCCESS)
        }
        Startup::Owner(owner) => run_owner(&config, owner),
    }
}

fn run_owner(config: &RiptideConfig, owner: OwnerStartup) -> Result<ExitCode> {
    let OwnerStartup {
        intent,
        guard,
        show_splash,
    } = owner;

    if config.mode == LaunchMode::Interactive {
        // No GUI in this build; the splash decision is only reported
        info!(show_splash, "Interactive surface unavailable, running headless session");
    }

    // Forking after the runtime exists would lose its threads
    if intent.daemonize {
        startup::daemonize(&guard)?;
    }

    fault::install(fault::reporter_for(config.fault.reporter, &config.data_dir()))
        .context("Failed to install fault handlers")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the event loop")?;
    runtime.block_on(owner_loop(config, &intent, &guard))?;

    guard.release();
    Ok(ExitCode::SUCCESS)
}

async fn owner_loop(config: &RiptideConfig, intent: &LaunchIntent, guard: &OwnerGuard) -> Result<()> {
    let mut inbox = RelayServer::bind(guard.socket_path())
        .context("Failed to open the relay endpoint")?
        .start_receiving(config.relay.queue_capacity);

    // Launches arriving while the session is built are buffered and replayed
    let targets = intent.targets.clone();
    let (mut session, _) = inbox
        .start_session(move || HeadlessLoader::new(&targets))
        .await
        .context("Failed to start the session")?;

    if let Some(port) = intent.webui_port {
        info!(port, "Web UI port override active");
    }
    info!(socket = %guard.socket_path().display(), "riptide is running");

    let stop = loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => session.handle(message),
                None => {
                    warn!("Relay endpoint closed, no further launches will be received");
                    break fault::wait_for_stop().await;
                }
            },
            kind = fault::wait_for_stop() => break kind,
        }
    };

    info!("Catching {}, exiting cleanly", stop.name());
    Ok(())
}
