//! The surface an owner hands targets to once startup completes.

use crate::relay::RelayMessage;
use tracing::info;

/// Receives launch targets and focus requests.
///
/// The real implementations live in the GUI and the headless engine loader;
/// the launcher only needs this seam.
pub trait Session {
    /// Opens torrent files or URIs, in order.
    fn open_targets(&mut self, targets: &[String]);

    /// Brings the main surface to the foreground.
    fn raise(&mut self);

    /// Dispatches a message relayed from another launch.
    fn handle(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Show => self.raise(),
            RelayMessage::Targets(targets) => self.open_targets(&targets),
        }
    }
}

/// Headless session front end.
///
/// Records every target handed to it so the owner loop and tests can see
/// exactly what reached the engine.
#[derive(Debug, Default)]
pub struct HeadlessLoader {
    opened: Vec<String>,
    raise_requests: usize,
}

impl HeadlessLoader {
    /// Creates the loader and opens the targets of the launch that created it.
    pub fn new(initial_targets: &[String]) -> Self {
        let mut loader = Self::default();
        loader.open_targets(initial_targets);
        loader
    }

    pub fn opened(&self) -> &[String] {
        &self.opened
    }

    pub fn raise_requests(&self) -> usize {
        self.raise_requests
    }
}

impl Session for HeadlessLoader {
    fn open_targets(&mut self, targets: &[String]) {
        for target in targets {
            info!(torrent = %target, "Adding torrent");
            self.opened.push(target.clone());
        }
    }

    fn raise(&mut self) {
        // No window to raise without a GUI
        info!("Show request received");
        self.raise_requests += 1;
    }
}
