//! Legal-notice consent gate.
//!
//! Startup blocks here until the user has accepted the notice once. The
//! acceptance is persisted; declining persists nothing and ends the process
//! with a success code.

use crate::preferences::{PreferencesError, PreferencesStore};
use std::io::{self, BufRead, Write};
use tracing::info;

pub const LEGAL_NOTICE: &str = "riptide is a file sharing program. When you run a torrent, \
its data will be made available to others by means of upload. Any content you share is \
your sole responsibility.\n\nNo further notices will be issued.";

/// Asks the user to accept the legal notice.
pub trait ConsentPrompt {
    /// Returns `true` only on an explicit affirmative answer.
    fn ask(&mut self, notice: &str) -> io::Result<bool>;
}

/// Console prompt: prints the notice and accepts `y`/`Y`.
pub struct ConsolePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl ConsolePrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsentPrompt for ConsolePrompt<R, W> {
    fn ask(&mut self, notice: &str) -> io::Result<bool> {
        writeln!(self.output)?;
        writeln!(self.output, "*** Legal Notice ***")?;
        writeln!(self.output, "{notice}")?;
        writeln!(self.output)?;
        writeln!(self.output, "Press 'y' key to accept and continue...")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            // EOF: nobody there to agree
            return Ok(false);
        }
        Ok(matches!(line.chars().next(), Some('y' | 'Y')))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("Failed to read consent response: {0}")]
    Prompt(#[from] io::Error),

    #[error("Failed to persist consent: {0}")]
    Persist(#[from] PreferencesError),
}

/// Reads and, on acceptance, writes the persisted consent record.
pub struct ConsentGate<'a> {
    prefs: &'a mut dyn PreferencesStore,
}

impl<'a> ConsentGate<'a> {
    pub fn new(prefs: &'a mut dyn PreferencesStore) -> Self {
        Self { prefs }
    }

    pub fn is_accepted(&self) -> bool {
        self.prefs.accepted_legal()
    }

    /// Returns `true` if startup may proceed.
    ///
    /// Prompts only when the notice has not been accepted before.
    pub fn ensure(&mut self, prompt: &mut dyn ConsentPrompt) -> Result<bool, ConsentError> {
        if self.is_accepted() {
            return Ok(true);
        }

        if prompt.ask(LEGAL_NOTICE)? {
            self.prefs.set_accepted_legal(true)?;
            info!("Legal notice accepted");
            return Ok(true);
        }

        info!("Legal notice declined");
        Ok(false)
    }
}
