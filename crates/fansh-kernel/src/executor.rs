//! The pipeline executor.
//!
//! Given a parsed line, the executor allocates one pipe pair per `|`,
//! wires each stage's source and sink by adjacency, launches every stage
//! concurrently, and waits for all of them. A single interrupt delivery
//! cancels the line token; each stage holds a child token and interprets
//! the kill locally.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use fansh_types::{Operator, PipelineLine};

use crate::connect::Connection;
use crate::history::HistoryStore;
use crate::pipe::{pipe, PipeReader, PipeWriter};
use crate::stage::{run_stage, ShellOptions, Sink, Source, StageCtx};
use crate::term::Term;

/// What the executor needs from the shell for one line.
pub struct LineCtx {
    /// Serial assigned to this line.
    pub count: usize,
    /// The literal line as typed, recorded in the history slot.
    pub command: String,
    pub term: Arc<dyn Term>,
    pub history: Arc<HistoryStore>,
    /// Connection snapshot; the supervisor cannot disturb it mid-line.
    pub connections: Arc<Vec<Arc<Connection>>>,
    pub options: Arc<RwLock<ShellOptions>>,
    /// Subscription on the shell's interrupt channel.
    pub interrupt: broadcast::Receiver<()>,
}

/// Result of executing one line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOutcome {
    /// An `exit`/`quit` builtin ran somewhere in the line.
    pub exit_requested: bool,
    /// The serial counter should advance.
    pub advanced: bool,
}

/// Execute a parsed line to completion.
pub async fn execute_line(line: PipelineLine, ctx: LineCtx) -> ExecOutcome {
    if line.is_empty() {
        return ExecOutcome::default();
    }

    let advanced = line.advances_serial();
    let display = line.display();
    ctx.history.begin_slot(ctx.count, &ctx.command);
    let _ = ctx
        .term
        .write_out(format!("[Command:{display} ]\n").as_bytes())
        .await;

    // One pipe pair per adjacency.
    let pipe_count = line.pipe_count();
    let mut writers: Vec<Option<PipeWriter>> = Vec::with_capacity(pipe_count);
    let mut readers: Vec<Option<PipeReader>> = Vec::with_capacity(pipe_count);
    for _ in 0..pipe_count {
        let (w, r) = pipe();
        writers.push(Some(w));
        readers.push(Some(r));
    }

    // One interrupt delivery cancels the whole line; the forwarder itself
    // is released when the line completes.
    let line_token = CancellationToken::new();
    let forwarder_exit = CancellationToken::new();
    let forwarder = {
        let line_token = line_token.clone();
        let forwarder_exit = forwarder_exit.clone();
        let mut interrupt = ctx.interrupt;
        tokio::spawn(async move {
            tokio::select! {
                _ = forwarder_exit.cancelled() => {}
                received = interrupt.recv() => {
                    if received.is_ok() {
                        line_token.cancel();
                    }
                }
            }
        })
    };

    // Launch every stage; no blocking between launches.
    let mut handles = Vec::with_capacity(line.stages.len());
    let mut next_pipe = 0usize;
    let mut prev_op = Operator::End;
    for stage in line.stages {
        let source = match prev_op {
            Operator::Pipe => Source::Pipe(
                readers[next_pipe - 1].take().expect("pipe reader used twice"),
            ),
            Operator::End => Source::Term,
        };
        let sink = match stage.op {
            Operator::Pipe => {
                let w = writers[next_pipe].take().expect("pipe writer used twice");
                next_pipe += 1;
                Sink::Pipe(w)
            }
            Operator::End => Sink::Term,
        };
        prev_op = stage.op;

        let stage_ctx = StageCtx {
            count: ctx.count,
            term: ctx.term.clone(),
            history: ctx.history.clone(),
            connections: ctx.connections.clone(),
            options: ctx.options.clone(),
            kill: line_token.child_token(),
        };
        handles.push(tokio::spawn(run_stage(stage, source, sink, stage_ctx)));
    }

    // Wait until every stage has signalled completion.
    let mut exit_requested = false;
    for result in join_all(handles).await {
        match result {
            Ok(outcome) => exit_requested |= outcome.exit_requested,
            Err(e) => tracing::error!("stage task failed: {e}"),
        }
    }

    forwarder_exit.cancel();
    let _ = forwarder.await;

    ExecOutcome {
        exit_requested,
        advanced,
    }
}
