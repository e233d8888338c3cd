//! Command-line interpretation.
//!
//! The argument surface is fixed: `-v|--version`, `-h|--help`,
//! `--webui-port=<1..65535>`, plus `--no-splash` in interactive mode or
//! `-d|--daemon` in headless mode. Every other token is a target, dashed or
//! not, either a torrent file (made absolute when it exists) or a URI kept
//! verbatim.

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Which surface an owner process drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Windowed session; accepts `--no-splash`.
    Interactive,
    /// Background session; accepts `-d|--daemon`.
    #[default]
    Headless,
}

impl FromStr for LaunchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" | "gui" => Ok(Self::Interactive),
            "headless" | "nox" => Ok(Self::Headless),
            _ => Err(()),
        }
    }
}

/// What the user asked this invocation to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchIntent {
    pub show_version: bool,
    pub show_help: bool,
    /// Headless mode only.
    pub daemonize: bool,
    /// Interactive mode only.
    pub suppress_splash: bool,
    pub webui_port: Option<u16>,
    /// Torrent files or URIs, in the order given.
    pub targets: Vec<String>,
}

/// Invalid command line. The process reports it and exits non-zero.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("{0} must be the single command line parameter.")]
    NotSole(&'static str),

    #[error("--webui-port must specify the correct port (1 to 65535).")]
    InvalidPort,

    #[error("You cannot use -d (or --daemon): riptide is already running for this user.")]
    AlreadyRunning,

    #[error("{0}")]
    Invalid(String),
}

const VERSION_FLAG: &str = "-v (or --version)";
const HELP_FLAG: &str = "-h (or --help)";

/// Builds the argument grammar for `mode`.
///
/// `current_port` is only used to render the help text.
pub fn command(mode: LaunchMode, current_port: u16) -> Command {
    let cmd = Command::new(crate::APP_NAME)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .args_override_self(true)
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Display program version"),
        )
        .arg(
            Arg::new("help")
                .short('h')
                .long("help")
                .action(ArgAction::SetTrue)
                .help("Display this help message"),
        )
        .arg(
            Arg::new("webui-port")
                .long("webui-port")
                .value_name("PORT")
                .require_equals(true)
                .value_parser(value_parser!(u16).range(1..))
                .help(format!("Change the Web UI port (current: {current_port})")),
        )
        .arg(
            Arg::new("targets")
                .value_name("FILES_OR_URLS")
                .num_args(1..)
                .action(ArgAction::Append)
                .help("Torrent files or URLs to add (optional)"),
        );

    match mode {
        LaunchMode::Interactive => cmd.arg(
            Arg::new("no-splash")
                .long("no-splash")
                .action(ArgAction::SetTrue)
                .help("Disable the splash screen"),
        ),
        LaunchMode::Headless => cmd.arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .action(ArgAction::SetTrue)
                .help("Run in daemon mode (background)"),
        ),
    }
}

/// Renders the usage text shown by `-h`.
pub fn usage(mode: LaunchMode, current_port: u16) -> String {
    command(mode, current_port).render_help().to_string()
}

/// Parses `args` (program name excluded) into a validated intent.
pub fn parse<I, S>(args: I, mode: LaunchMode) -> Result<LaunchIntent, UsageError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();

    // Only recognised flags reach clap; the rest are targets in order
    let (flags, targets): (Vec<&String>, Vec<&String>) =
        args.iter().partition(|token| is_flag(token, mode));
    let argv = std::iter::once(crate::APP_NAME).chain(flags.iter().map(|f| f.as_str()));

    let matches = command(mode, 0)
        .try_get_matches_from(argv)
        .map_err(|err| classify(&err, &flags))?;

    let mut intent = intent_from(&matches, mode);
    intent.targets = targets.into_iter().map(|raw| resolve_target(raw)).collect();

    // Version wins over help when both are present, and either is only
    // honoured on its own.
    let sole = args.len() == 1;
    if intent.show_version && !sole {
        return Err(UsageError::NotSole(VERSION_FLAG));
    }
    if intent.show_help && !sole {
        return Err(UsageError::NotSole(HELP_FLAG));
    }

    Ok(intent)
}

fn is_flag(token: &str, mode: LaunchMode) -> bool {
    match token {
        "-v" | "--version" | "-h" | "--help" => true,
        "--no-splash" => mode == LaunchMode::Interactive,
        "-d" | "--daemon" => mode == LaunchMode::Headless,
        _ => token.starts_with("--webui-port="),
    }
}

fn intent_from(matches: &ArgMatches, mode: LaunchMode) -> LaunchIntent {
    LaunchIntent {
        show_version: matches.get_flag("version"),
        show_help: matches.get_flag("help"),
        daemonize: mode == LaunchMode::Headless && matches.get_flag("daemon"),
        suppress_splash: mode == LaunchMode::Interactive && matches.get_flag("no-splash"),
        webui_port: matches.get_one::<u16>("webui-port").copied(),
        targets: Vec::new(),
    }
}

/// Existing paths become absolute; anything else is kept as typed.
fn resolve_target(raw: &str) -> String {
    let path = Path::new(raw);
    if !raw.is_empty()
        && path.exists()
        && let Ok(absolute) = std::path::absolute(path)
    {
        return absolute.display().to_string();
    }
    raw.to_string()
}

fn classify(err: &clap::Error, flags: &[&String]) -> UsageError {
    // Flags reaching clap are all known, so a port flag means a bad value
    if flags.iter().any(|f| f.starts_with("--webui-port=")) {
        return UsageError::InvalidPort;
    }

    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    UsageError::Invalid(first.trim_start_matches("error: ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn headless(args: &[&str]) -> Result<LaunchIntent, UsageError> {
        parse(args.iter().copied(), LaunchMode::Headless)
    }

    #[test]
    fn test_no_arguments() {
        let intent = headless(&[]).unwrap();
        assert_eq!(intent, LaunchIntent::default());
    }

    #[test]
    fn test_version_alone() {
        for flag in ["-v", "--version"] {
            let intent = headless(&[flag]).unwrap();
            assert!(intent.show_version);
            assert!(!intent.show_help);
            assert!(intent.targets.is_empty());
        }
    }

    #[test]
    fn test_help_alone() {
        for flag in ["-h", "--help"] {
            let intent = headless(&[flag]).unwrap();
            assert!(intent.show_help);
            assert!(intent.targets.is_empty());
        }
    }

    #[test]
    fn test_version_with_other_tokens_fails() {
        assert_eq!(
            headless(&["-v", "magnet:?xt=urn:btih:abc"]).unwrap_err(),
            UsageError::NotSole(VERSION_FLAG)
        );
        assert_eq!(
            headless(&["--webui-port=8080", "--version"]).unwrap_err(),
            UsageError::NotSole(VERSION_FLAG)
        );
    }

    #[test]
    fn test_help_with_other_tokens_fails() {
        assert_eq!(
            headless(&["--help", "-d"]).unwrap_err(),
            UsageError::NotSole(HELP_FLAG)
        );
    }

    #[test]
    fn test_version_and_help_together_fails() {
        assert_eq!(
            headless(&["-v", "-h"]).unwrap_err(),
            UsageError::NotSole(VERSION_FLAG)
        );
    }

    #[test]
    fn test_valid_ports() {
        for port in [1u16, 80, 8080, 65535] {
            let arg = format!("--webui-port={port}");
            let intent = headless(&[arg.as_str()]).unwrap();
            assert_eq!(intent.webui_port, Some(port));
        }
    }

    #[test]
    fn test_invalid_ports() {
        for value in ["0", "65536", "70000", "-1", "abc", ""] {
            let arg = format!("--webui-port={value}");
            assert_eq!(
                headless(&[arg.as_str()]).unwrap_err(),
                UsageError::InvalidPort,
                "port value {value:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_port_without_equals_is_a_target() {
        let intent = headless(&["--webui-port", "9000"]).unwrap();
        assert_eq!(intent.webui_port, None);
        assert_eq!(intent.targets, vec!["--webui-port", "9000"]);
    }

    #[test]
    fn test_repeated_port_last_wins() {
        let intent = headless(&["--webui-port=9000", "--webui-port=9001"]).unwrap();
        assert_eq!(intent.webui_port, Some(9001));
        assert!(intent.targets.is_empty());
    }

    #[test]
    fn test_unknown_dashed_tokens_are_targets() {
        let intent = headless(&["--frobnicate", "a.torrent", "-x.torrent", "-"]).unwrap();
        assert_eq!(
            intent.targets,
            vec!["--frobnicate", "a.torrent", "-x.torrent", "-"]
        );
        assert!(!intent.daemonize);
    }

    #[test]
    fn test_targets_keep_order_and_uris_verbatim() {
        let intent = headless(&[
            "magnet:?xt=urn:btih:first",
            "https://example.org/b.torrent",
            "/does/not/exist/c.torrent",
        ])
        .unwrap();
        assert_eq!(
            intent.targets,
            vec![
                "magnet:?xt=urn:btih:first",
                "https://example.org/b.torrent",
                "/does/not/exist/c.torrent",
            ]
        );
    }

    #[test]
    fn test_existing_file_made_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("ubuntu.torrent");
        std::fs::write(&file_path, b"d4:infoe").unwrap();

        let arg = file_path.display().to_string();
        let intent = headless(&[arg.as_str()]).unwrap();
        assert_eq!(intent.targets.len(), 1);
        assert!(Path::new(&intent.targets[0]).is_absolute());
        assert!(intent.targets[0].ends_with("ubuntu.torrent"));
    }

    #[test]
    fn test_daemon_flag_headless_only() {
        let intent = headless(&["-d", "a.torrent"]).unwrap();
        assert!(intent.daemonize);
        assert_eq!(intent.targets, vec!["a.torrent"]);

        // The other mode's flag is just a target
        let intent = parse(["-d", "--daemon"], LaunchMode::Interactive).unwrap();
        assert!(!intent.daemonize);
        assert_eq!(intent.targets, vec!["-d", "--daemon"]);
    }

    #[test]
    fn test_no_splash_interactive_only() {
        let intent = parse(["--no-splash"], LaunchMode::Interactive).unwrap();
        assert!(intent.suppress_splash);
        assert!(!intent.daemonize);

        let intent = headless(&["--no-splash"]).unwrap();
        assert!(!intent.suppress_splash);
        assert_eq!(intent.targets, vec!["--no-splash"]);
    }

    #[test]
    fn test_scenario_port_and_file() {
        let intent = headless(&["--webui-port=9000", "/tmp/riptide-missing/a.torrent"]).unwrap();
        assert_eq!(intent.webui_port, Some(9000));
        assert_eq!(intent.targets, vec!["/tmp/riptide-missing/a.torrent"]);
    }

    #[test]
    fn test_usage_mentions_current_port() {
        let text = usage(LaunchMode::Headless, 8123);
        assert!(text.contains("--webui-port"));
        assert!(text.contains("current: 8123"));
        assert!(text.contains("--daemon"));
        assert!(!text.contains("--no-splash"));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Interactive".parse(), Ok(LaunchMode::Interactive));
        assert_eq!("headless".parse(), Ok(LaunchMode::Headless));
        assert_eq!("kiosk".parse::<LaunchMode>(), Err(()));
    }
}
