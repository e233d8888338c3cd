//! Fatal and termination signal capture.
//!
//! Two categories, both single-shot (`SA_RESETHAND`):
//!
//! - **Graceful stop** (`SIGINT`, `SIGTERM`): the handler only flips an
//!   atomic flag. The owner loop polls it through [`wait_for_stop`] and shuts
//!   down in order. A second signal of the same kind gets the default action.
//! - **Fault** (`SIGSEGV`, `SIGABRT`): the handler resets both fault signals
//!   to their default, captures a best-effort backtrace, hands a
//!   [`FaultEvent`] to the installed [`FaultReporter`], then raises the
//!   original signal again so the OS and any crash reporter see a real fault.

#![allow(unsafe_code)]

use crate::config::ReporterKind;
use chrono::{DateTime, Utc};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

static REPORTER: OnceLock<Box<dyn FaultReporter>> = OnceLock::new();
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static STOP_KIND: AtomicU8 = AtomicU8::new(0);

/// What ended (or is ending) the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Interrupt,
    Terminate,
    Segfault,
    Abort,
    /// A Rust panic, reported through the panic hook.
    Panic,
}

impl FaultKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Segfault => "SIGSEGV",
            Self::Abort => "SIGABRT",
            Self::Panic => "panic",
        }
    }

    /// Interrupt and terminate request an orderly stop.
    pub fn is_graceful(self) -> bool {
        matches!(self, Self::Interrupt | Self::Terminate)
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Interrupt => 1,
            Self::Terminate => 2,
            Self::Segfault => 3,
            Self::Abort => 4,
            Self::Panic => 5,
        }
    }

    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Interrupt),
            2 => Some(Self::Terminate),
            3 => Some(Self::Segfault),
            4 => Some(Self::Abort),
            5 => Some(Self::Panic),
            _ => None,
        }
    }

    #[cfg(unix)]
    fn from_signal(signal: nix::sys::signal::Signal) -> Option<Self> {
        use nix::sys::signal::Signal;
        match signal {
            Signal::SIGINT => Some(Self::Interrupt),
            Signal::SIGTERM => Some(Self::Terminate),
            Signal::SIGSEGV => Some(Self::Segfault),
            Signal::SIGABRT => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Snapshot taken while handling a fault.
#[derive(Debug, Clone)]
pub struct FaultEvent {
    pub kind: FaultKind,
    /// `None` when no symbolized trace could be produced.
    pub trace: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl FaultEvent {
    /// Captures the current stack. Never panics; a failed capture yields no trace.
    pub fn capture(kind: FaultKind) -> Self {
        let trace = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::force_capture();
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
        })
        .ok()
        .flatten();

        Self {
            kind,
            trace,
            captured_at: Utc::now(),
        }
    }
}

/// Destination for fault diagnostics.
pub trait FaultReporter: Send + Sync {
    fn report(&self, event: &FaultEvent);
}

/// Renders the bug-report banner shared by the built-in reporters.
pub fn render_report(event: &FaultEvent, version: &str) -> String {
    let mut out = String::new();
    out.push_str("\n\n*************************************************************\n");
    out.push_str(&format!(
        "Catching {}, please report a bug and provide the following backtrace:\n",
        event.kind.name()
    ));
    out.push_str(&format!("{} version: {version}\n", crate::APP_NAME));
    out.push_str(&format!("Captured at: {}\n", event.captured_at.to_rfc3339()));
    match &event.trace {
        Some(trace) => out.push_str(trace),
        None => out.push_str("No backtrace available"),
    }
    out.push('\n');
    out
}

/// Writes the report to stderr.
#[derive(Debug, Clone)]
pub struct StderrReporter {
    version: String,
}

impl StderrReporter {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl FaultReporter for StderrReporter {
    fn report(&self, event: &FaultEvent) {
        let text = render_report(event, &self.version);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
    }
}

/// Writes the report to `crash-<timestamp>.log` and points to it on stderr.
#[derive(Debug, Clone)]
pub struct CrashFileReporter {
    dir: PathBuf,
    version: String,
}

impl CrashFileReporter {
    pub fn new(dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            version: version.into(),
        }
    }

    pub fn report_path(&self, event: &FaultEvent) -> PathBuf {
        self.dir.join(format!(
            "crash-{}.log",
            event.captured_at.format("%Y%m%d_%H%M%S")
        ))
    }
}

impl FaultReporter for CrashFileReporter {
    fn report(&self, event: &FaultEvent) {
        let text = render_report(event, &self.version);
        let path = self.report_path(event);
        let written = std::fs::create_dir_all(&self.dir).and_then(|()| std::fs::write(&path, &text));

        let mut stderr = std::io::stderr().lock();
        let _ = match written {
            Ok(()) => writeln!(
                stderr,
                "Caught {}; crash report saved to {}",
                event.kind.name(),
                path.display()
            ),
            // Fall back to the full report rather than losing it
            Err(_) => stderr.write_all(text.as_bytes()),
        };
        let _ = stderr.flush();
    }
}

/// Builds the reporter selected in configuration.
pub fn reporter_for(kind: ReporterKind, data_dir: &Path) -> Box<dyn FaultReporter> {
    match kind {
        ReporterKind::Stderr => Box::new(StderrReporter::new(crate::VERSION)),
        ReporterKind::CrashFile => Box::new(CrashFileReporter::new(data_dir, crate::VERSION)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FaultError {
    #[error("Fault capture is already installed")]
    AlreadyInstalled,

    #[cfg(unix)]
    #[error("Failed to install handler for {signal}: {source}")]
    Install {
        signal: &'static str,
        #[source]
        source: nix::Error,
    },
}

/// Installs the signal handlers and the panic hook.
///
/// Can be called once per process.
pub fn install(reporter: Box<dyn FaultReporter>) -> Result<(), FaultError> {
    if REPORTER.set(reporter).is_err() {
        return Err(FaultError::AlreadyInstalled);
    }

    #[cfg(unix)]
    posix::install_handlers()?;

    #[cfg(not(unix))]
    tracing::warn!("Signal capture is not available on this platform");

    install_panic_hook();
    Ok(())
}

/// Reports panics through the installed reporter, then runs the previous hook.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(reporter) = REPORTER.get() {
            let event = FaultEvent::capture(FaultKind::Panic);
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| reporter.report(&event)));
        }
        default_hook(info);
    }));
}

/// The graceful-stop signal received so far, if any.
pub fn stop_requested() -> Option<FaultKind> {
    if STOP_REQUESTED.load(Ordering::SeqCst) {
        FaultKind::from_u8(STOP_KIND.load(Ordering::SeqCst))
    } else {
        None
    }
}

/// Requests an orderly stop without a signal.
pub fn request_stop(kind: FaultKind) {
    STOP_KIND.store(kind.as_u8(), Ordering::SeqCst);
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Resolves once a graceful stop has been requested.
pub async fn wait_for_stop() -> FaultKind {
    loop {
        if let Some(kind) = stop_requested() {
            return kind;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

#[cfg(unix)]
mod posix {
    use super::*;
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::ffi::c_int;

    const STOP_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];
    const FAULT_SIGNALS: [Signal; 2] = [Signal::SIGSEGV, Signal::SIGABRT];

    pub(super) fn install_handlers() -> Result<(), FaultError> {
        // SA_RESETHAND restores the default disposition on entry, which is
        // what makes every handler fire at most once.
        let stop = SigAction::new(
            SigHandler::Handler(on_stop_signal),
            SaFlags::SA_RESETHAND,
            SigSet::empty(),
        );
        let fault = SigAction::new(
            SigHandler::Handler(on_fault_signal),
            SaFlags::SA_RESETHAND,
            SigSet::empty(),
        );

        for (signals, action) in [(STOP_SIGNALS, &stop), (FAULT_SIGNALS, &fault)] {
            for sig in signals {
                // SAFETY: both handlers only touch atomics, async-signal-safe
                // syscalls, and best-effort reporting guarded by catch_unwind.
                unsafe { signal::sigaction(sig, action) }.map_err(|source| {
                    FaultError::Install {
                        signal: sig.as_str(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    extern "C" fn on_stop_signal(signum: c_int) {
        let kind = Signal::try_from(signum)
            .ok()
            .and_then(FaultKind::from_signal)
            .unwrap_or(FaultKind::Terminate);
        request_stop(kind);
    }

    extern "C" fn on_fault_signal(signum: c_int) {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for sig in FAULT_SIGNALS {
            // SAFETY: installing SIG_DFL is async-signal-safe. Doing it for
            // the sibling first means a fault during capture is not re-entered.
            let _ = unsafe { signal::sigaction(sig, &default) };
        }

        let signal = Signal::try_from(signum).unwrap_or(Signal::SIGABRT);
        let kind = FaultKind::from_signal(signal).unwrap_or(FaultKind::Abort);

        let _ = std::panic::catch_unwind(|| {
            let event = FaultEvent::capture(kind);
            if let Some(reporter) = REPORTER.get() {
                reporter.report(&event);
            }
        });

        // Delivered with the default action as soon as this handler returns
        let _ = signal::raise(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: FaultKind, trace: Option<&str>) -> FaultEvent {
        FaultEvent {
            kind,
            trace: trace.map(String::from),
            captured_at: DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn test_graceful_categories() {
        assert!(FaultKind::Interrupt.is_graceful());
        assert!(FaultKind::Terminate.is_graceful());
        assert!(!FaultKind::Segfault.is_graceful());
        assert!(!FaultKind::Abort.is_graceful());
        assert!(!FaultKind::Panic.is_graceful());
    }

    #[test]
    fn test_kind_u8_round_trip() {
        for kind in [
            FaultKind::Interrupt,
            FaultKind::Terminate,
            FaultKind::Segfault,
            FaultKind::Abort,
            FaultKind::Panic,
        ] {
            assert_eq!(FaultKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(FaultKind::from_u8(0), None);
    }

    #[test]
    fn test_report_includes_trace_and_version() {
        let text = render_report(&event(FaultKind::Abort, Some("0: main")), "9.9.9");
        assert!(text.contains("Catching SIGABRT"));
        assert!(text.contains("riptide version: 9.9.9"));
        assert!(text.contains("0: main"));
    }

    #[test]
    fn test_report_without_trace() {
        let text = render_report(&event(FaultKind::Segfault, None), "1.0.0");
        assert!(text.contains("Catching SIGSEGV"));
        assert!(text.contains("No backtrace available"));
    }

    #[test]
    fn test_capture_never_panics() {
        let captured = FaultEvent::capture(FaultKind::Abort);
        assert_eq!(captured.kind, FaultKind::Abort);
        if let Some(trace) = captured.trace {
            assert!(!trace.is_empty());
        }
    }

    #[test]
    fn test_crash_file_reporter_writes_report() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let reporter = CrashFileReporter::new(temp_dir.path().join("crashes"), "1.2.3");
        let event = event(FaultKind::Segfault, Some("frame"));

        reporter.report(&event);

        let path = reporter.report_path(&event);
        assert!(path.ends_with("crash-20260301_123045.log"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("riptide version: 1.2.3"));
        assert!(content.contains("frame"));
    }

    #[test]
    fn test_reporter_selection() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        // Only checks construction; reporting is covered above
        let _ = reporter_for(ReporterKind::Stderr, temp_dir.path());
        let _ = reporter_for(ReporterKind::CrashFile, temp_dir.path());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_signal_requests_stop_once() {
        use nix::sys::signal::{Signal, raise};

        install(Box::new(StderrReporter::new("test"))).unwrap();
        assert!(matches!(
            install(Box::new(StderrReporter::new("test"))),
            Err(FaultError::AlreadyInstalled)
        ));

        // The handler runs on this thread before raise returns
        raise(Signal::SIGTERM).unwrap();
        assert_eq!(stop_requested(), Some(FaultKind::Terminate));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let kind = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(1), wait_for_stop()).await
        });
        assert_eq!(kind.ok(), Some(FaultKind::Terminate));
    }
}
