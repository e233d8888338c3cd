//! Message relay between a client launch and the running owner.
//!
//! A client writes one `|`-delimited line of targets (or the show sentinel)
//! to the owner's Unix socket and half-closes. The owner accepts connections
//! on its tokio runtime and turns each into exactly one [`RelayMessage`].
//!
//! # Design
//!
//! - **Bounded client**: delivery runs on a helper thread; the caller waits
//!   at most the configured timeout, then gives up
//! - **Reactive owner**: accepting and reading never block the event loop
//! - **Startup buffer**: messages that arrive before the session exists are
//!   drained into [`PendingMessages`] and replayed once

use crate::session::Session;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Payload meaning "no targets, just bring the main surface forward".
pub const SHOW_SENTINEL: &str = "riptide://show";

/// Separator between targets on the wire. Targets may not contain it.
pub const DELIMITER: char = '|';

const MAX_MESSAGE_BYTES: u64 = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(25);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// One relayed launch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Raise or focus the owner's main surface.
    Show,
    /// Open these targets, in order.
    Targets(Vec<String>),
}

impl RelayMessage {
    /// `Show` when `targets` is empty.
    pub fn for_targets(targets: &[String]) -> Self {
        if targets.is_empty() {
            Self::Show
        } else {
            Self::Targets(targets.to_vec())
        }
    }

    pub fn targets(&self) -> &[String] {
        match self {
            Self::Show => &[],
            Self::Targets(targets) => targets,
        }
    }

    /// Serializes to the wire line, without the trailing newline.
    ///
    /// Targets containing the delimiter or a line break, a target equal to
    /// the show sentinel, and lines over the size cap cannot be carried and
    /// are rejected.
    pub fn encode(&self) -> Result<String, RelayError> {
        match self {
            Self::Targets(targets) if !targets.is_empty() => {
                if let Some(bad) = targets
                    .iter()
                    .find(|t| t.contains(DELIMITER) || t.contains(['\n', '\r']))
                {
                    return Err(RelayError::ReservedCharacter(bad.clone()));
                }
                if let Some(bad) = targets.iter().find(|t| *t == SHOW_SENTINEL) {
                    return Err(RelayError::ReservedTarget(bad.clone()));
                }
                let separator = DELIMITER.to_string();
                let line = targets.join(separator.as_str());
                // The trailing newline counts against the cap
                if line.len() as u64 >= MAX_MESSAGE_BYTES {
                    return Err(RelayError::TooLarge {
                        len: line.len() as u64 + 1,
                        max: MAX_MESSAGE_BYTES,
                    });
                }
                Ok(line)
            }
            _ => Ok(SHOW_SENTINEL.to_string()),
        }
    }

    /// Parses a wire line. Empty segments are dropped.
    pub fn decode(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == SHOW_SENTINEL {
            return Self::Show;
        }
        let targets: Vec<String> = line
            .split(DELIMITER)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect();
        Self::for_targets(&targets)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Target contains a reserved character ('|' or line break): {0}")]
    ReservedCharacter(String),

    #[error("Target is reserved for show requests: {0}")]
    ReservedTarget(String),

    #[error("Message of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u64, max: u64 },

    #[error("No running instance is listening at {0}")]
    Unreachable(PathBuf),

    #[error("Timed out after {0:?} waiting for the running instance")]
    Timeout(Duration),

    #[error("Unauthorized peer: expected uid {expected}, got {actual}")]
    UnauthorizedPeer { expected: u32, actual: u32 },

    #[error("Message relay not supported on this platform")]
    Unsupported,
}

/// Client side: delivers one message to the owner.
#[derive(Debug, Clone)]
pub struct RelayClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Sends `message`, waiting at most the configured timeout.
    ///
    /// Connection refusals are retried inside the window since the owner
    /// may still be binding. On timeout the delivery thread is abandoned.
    pub fn send(&self, message: &RelayMessage) -> Result<(), RelayError> {
        let line = message.encode()?;
        let path = self.socket_path.clone();
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("riptide-relay".to_owned())
            .spawn(move || {
                let _ = tx.send(deliver(&path, &line, deadline));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                Err(RelayError::Timeout(self.timeout))
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(RelayError::Io(
                io::Error::other("relay thread exited without a result"),
            )),
        }
    }
}

#[cfg(unix)]
fn deliver(path: &Path, line: &str, deadline: Instant) -> Result<(), RelayError> {
    use std::io::Write;
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;

    let mut stream = loop {
        match UnixStream::connect(path) {
            Ok(stream) => break stream,
            Err(e) if owner_not_ready(&e) => {
                if Instant::now() + CONNECT_RETRY_INTERVAL >= deadline {
                    return Err(RelayError::Unreachable(path.to_path_buf()));
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(e) => return Err(RelayError::Io(e)),
        }
    };

    let remaining = deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(1));
    stream.set_write_timeout(Some(remaining))?;
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.shutdown(Shutdown::Write)?;
    debug!(path = %path.display(), "Relayed message to running instance");
    Ok(())
}

#[cfg(not(unix))]
fn deliver(_path: &Path, _line: &str, _deadline: Instant) -> Result<(), RelayError> {
    Err(RelayError::Unsupported)
}

#[cfg(unix)]
fn owner_not_ready(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

/// Owner side: the bound relay endpoint.
#[derive(Debug)]
pub struct RelayServer {
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    path: PathBuf,
}

impl RelayServer {
    /// Binds the owner's endpoint, replacing any socket a dead owner left.
    ///
    /// Must be called from within a tokio runtime, and only while holding
    /// the identity lock.
    #[cfg(unix)]
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, RelayError> {
        use std::os::unix::fs::PermissionsExt;

        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale relay socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RelayError::Io(e)),
        }

        let listener = tokio::net::UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        debug!(path = %path.display(), "Relay endpoint bound");
        Ok(Self { listener, path })
    }

    #[cfg(not(unix))]
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let _ = path.into();
        Err(RelayError::Unsupported)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts accepting connections in the background.
    ///
    /// Up to `capacity` decoded messages queue in the returned inbox; beyond
    /// that, connection handlers wait rather than drop messages.
    pub fn start_receiving(self, capacity: usize) -> MessageInbox {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        #[cfg(unix)]
        let accept_task = tokio::spawn(accept_loop(self.listener, tx));
        #[cfg(not(unix))]
        let accept_task = tokio::spawn(async move { drop(tx) });

        MessageInbox { rx, accept_task }
    }
}

#[cfg(unix)]
async fn accept_loop(listener: tokio::net::UnixListener, tx: mpsc::Sender<RelayMessage>) {
    let owner_uid = nix::unistd::getuid().as_raw();
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    match read_message(stream, owner_uid).await {
                        Ok(message) => {
                            debug!(?message, "Received relayed message");
                            // Receiver gone means the owner is shutting down
                            let _ = tx.send(message).await;
                        }
                        Err(e) => warn!(error = %e, "Discarded relay connection"),
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Relay accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
        if tx.is_closed() {
            break;
        }
    }
}

#[cfg(unix)]
async fn read_message(
    stream: tokio::net::UnixStream,
    owner_uid: u32,
) -> Result<RelayMessage, RelayError> {
    use tokio::io::AsyncReadExt;

    let peer = stream.peer_cred()?;
    if peer.uid() != owner_uid {
        return Err(RelayError::UnauthorizedPeer {
            expected: owner_uid,
            actual: peer.uid(),
        });
    }

    // One byte past the cap tells an oversized message from one at the limit
    let mut buf = Vec::new();
    let mut limited = stream.take(MAX_MESSAGE_BYTES + 1);
    tokio::time::timeout(READ_TIMEOUT, limited.read_to_end(&mut buf))
        .await
        .map_err(|_| RelayError::Timeout(READ_TIMEOUT))??;

    if buf.len() as u64 > MAX_MESSAGE_BYTES {
        return Err(RelayError::TooLarge {
            len: buf.len() as u64,
            max: MAX_MESSAGE_BYTES,
        });
    }

    let line = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let first = line.lines().next().unwrap_or_default();
    Ok(RelayMessage::decode(first))
}

/// The owner's subscription to relayed messages.
///
/// Dropping it stops accepting new connections.
#[derive(Debug)]
pub struct MessageInbox {
    rx: mpsc::Receiver<RelayMessage>,
    accept_task: JoinHandle<()>,
}

impl MessageInbox {
    /// Waits for the next message. `None` once the accept loop has ended.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }

    /// Builds the session off the event loop, then replays what arrived meanwhile.
    ///
    /// Connections keep being accepted while `build` runs; whatever they
    /// deliver is buffered and handed to the new session exactly once.
    /// Returns the session and the number of replayed messages.
    pub async fn start_session<S, F>(&mut self, build: F) -> Result<(S, usize), RelayError>
    where
        S: Session + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        let mut session = tokio::task::spawn_blocking(build)
            .await
            .map_err(|e| RelayError::Io(io::Error::other(e)))?;
        let replayed = self.drain_pending().replay_into(&mut session);
        if replayed > 0 {
            debug!(replayed, "Replayed messages received during startup");
        }
        Ok((session, replayed))
    }

    /// Takes every message already queued, without waiting.
    pub fn drain_pending(&mut self) -> PendingMessages {
        let mut pending = PendingMessages::default();
        self.drain_into(&mut pending);
        pending
    }

    /// Moves every message already queued into `pending` without waiting.
    pub fn drain_into(&mut self, pending: &mut PendingMessages) -> usize {
        let mut moved = 0;
        while let Ok(message) = self.rx.try_recv() {
            pending.messages.push_back(message);
            moved += 1;
        }
        moved
    }
}

impl Drop for MessageInbox {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Messages received before the session existed.
///
/// Replaying consumes the buffer, so each message reaches the session once.
#[derive(Debug, Default)]
pub struct PendingMessages {
    messages: VecDeque<RelayMessage>,
}

impl PendingMessages {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Hands every buffered message to `session` in arrival order.
    pub fn replay_into(self, session: &mut dyn Session) -> usize {
        let count = self.messages.len();
        for message in self.messages {
            session.handle(message);
        }
        count
    }
}

impl From<Vec<RelayMessage>> for PendingMessages {
    fn from(messages: Vec<RelayMessage>) -> Self {
        Self {
            messages: messages.into(),
        }
    }
}
