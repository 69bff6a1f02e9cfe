//! Terminal abstraction.
//!
//! Stages never touch `stdout` directly; they write through a [`Term`],
//! which is the process terminal in the binary and a capture buffer in
//! tests. Together with the `Sink`/`Source` sum types this keeps terminal
//! vs pipe routing explicit — no nullable writers anywhere.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// The user-facing terminal: stdout, stderr, and a stdin byte stream.
#[async_trait]
pub trait Term: Send + Sync {
    /// Write bytes to the terminal's stdout.
    async fn write_out(&self, bytes: &[u8]) -> io::Result<()>;

    /// Write bytes to the terminal's stderr.
    async fn write_err(&self, bytes: &[u8]) -> io::Result<()>;

    /// Open a reader over the user's stdin. Each pipeline stage that needs
    /// terminal input opens its own reader; the broadcast task owns it for
    /// the duration of the stage.
    fn open_stdin(&self) -> Box<dyn AsyncRead + Send + Unpin>;
}

/// The real process terminal.
pub struct StdTerm;

#[async_trait]
impl Term for StdTerm {
    async fn write_out(&self, bytes: &[u8]) -> io::Result<()> {
        let mut out = tokio::io::stdout();
        out.write_all(bytes).await?;
        out.flush().await
    }

    async fn write_err(&self, bytes: &[u8]) -> io::Result<()> {
        let mut err = tokio::io::stderr();
        err.write_all(bytes).await?;
        err.flush().await
    }

    fn open_stdin(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(tokio::io::stdin())
    }
}
