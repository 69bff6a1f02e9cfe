//! The transport trait seam.
//!
//! fansh never performs its own handshake or authentication. A provider
//! hands the shell one [`SessionFactory`] per named endpoint; the factory
//! yields authenticated [`RemoteSession`]s on demand. The kernel's fan-out,
//! completion catalogue, and liveness supervisor are written entirely
//! against these traits.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Transport-level errors surfaced through the trait seam.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("failed to open session: {0}")]
    Open(String),
    #[error("connection lost: {0}")]
    Lost(String),
    #[error("liveness probe failed: {0}")]
    Probe(String),
    #[error("remote refused pty: {0}")]
    Pty(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

/// A single remote command execution channel.
///
/// Handles are taken before [`run`](RemoteSession::run) is awaited; `run`
/// resolves when the remote command terminates (or the connection drops).
/// Methods take `&self` so one session can be shared between the task that
/// awaits `run` and the task that delivers an interrupt.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Ask the remote side for a pseudo-terminal before the command runs.
    async fn request_pty(&self) -> SessionResult<()>;

    /// Writer feeding the remote command's stdin. Shutting the writer down
    /// closes the remote stdin (EOF).
    fn stdin(&self) -> Box<dyn AsyncWrite + Send + Unpin>;

    /// Reader yielding the remote command's output. EOF when the command
    /// finishes or the connection is lost.
    fn stdout(&self) -> Box<dyn AsyncRead + Send + Unpin>;

    /// Execute a command and wait for its termination. Returns the remote
    /// exit code when the transport reports one.
    async fn run(&self, command: &str) -> SessionResult<i32>;

    /// Deliver an interrupt (SIGINT) to the running command.
    async fn interrupt(&self) -> SessionResult<()>;

    /// Tear the session down. Idempotent.
    async fn close(&self);
}

/// Yields sessions for one named endpoint.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a fresh authenticated session.
    async fn open(&self) -> SessionResult<Box<dyn RemoteSession>>;

    /// Lightweight liveness probe on the underlying connection.
    async fn check_alive(&self) -> SessionResult<()>;
}
