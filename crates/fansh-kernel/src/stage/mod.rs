//! Stage runners and their shared plumbing.
//!
//! A stage receives exactly the pipe ends the executor wired for it,
//! expressed as explicit [`Source`]/[`Sink`] sum types — the terminal and a
//! pipe are different variants, never a nullable writer. Dispatch is a
//! match on the kind classified at parse time.

mod builtin;
mod local;
mod remote;

pub use builtin::run_builtin;
pub use local::run_local;
pub use remote::run_remote;

use std::io;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use fansh_types::{Stage, StageKind};

use crate::connect::Connection;
use crate::history::HistoryStore;
use crate::pipe::{PipeReader, PipeWriter};
use crate::term::Term;

/// Where a stage reads from.
pub enum Source {
    /// The user's terminal stdin.
    Term,
    /// The upstream stage's pipe.
    Pipe(PipeReader),
}

impl Source {
    pub fn is_term(&self) -> bool {
        matches!(self, Source::Term)
    }
}

/// Where a stage writes to.
pub enum Sink {
    /// The user's terminal stdout.
    Term,
    /// The downstream stage's pipe.
    Pipe(PipeWriter),
}

impl Sink {
    pub fn is_term(&self) -> bool {
        matches!(self, Sink::Term)
    }

    /// Write through to the terminal or the pipe.
    pub async fn write_all(&mut self, term: &Arc<dyn Term>, bytes: &[u8]) -> io::Result<()> {
        match self {
            Sink::Term => term.write_out(bytes).await,
            Sink::Pipe(writer) => writer.write_all(bytes).await,
        }
    }

    /// Close the downstream pipe writer (EOF). A terminal sink has nothing
    /// to close.
    pub fn close(&mut self) {
        if let Sink::Pipe(writer) = self {
            writer.close();
        }
    }
}

/// Runtime options a stage consults.
#[derive(Debug, Clone, Copy)]
pub struct ShellOptions {
    /// Capture local-stage output under the `localhost` host name.
    pub record_local: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self { record_local: true }
    }
}

/// Everything a stage needs from the executor, handed over for the
/// duration of one line. Stages own their session handles; nothing here
/// points back into the shell.
#[derive(Clone)]
pub struct StageCtx {
    /// Serial of the line being executed.
    pub count: usize,
    pub term: Arc<dyn Term>,
    pub history: Arc<HistoryStore>,
    /// Connection list snapshot taken at line start.
    pub connections: Arc<Vec<Arc<Connection>>>,
    pub options: Arc<RwLock<ShellOptions>>,
    /// Cancelled when the user interrupts the line.
    pub kill: CancellationToken,
}

/// What a stage reports back to the executor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// The `exit`/`quit` builtin ran; the shell should terminate cleanly
    /// once the line finishes draining.
    pub exit_requested: bool,
}

/// Run one stage to completion. Every stage closes its sink before
/// returning, whatever happened.
pub async fn run_stage(stage: Stage, source: Source, sink: Sink, ctx: StageCtx) -> StageOutcome {
    match stage.kind {
        StageKind::Builtin => run_builtin(stage, source, sink, ctx).await,
        StageKind::Local => run_local(stage, source, sink, ctx).await,
        StageKind::Remote => run_remote(stage, source, sink, ctx).await,
    }
}
