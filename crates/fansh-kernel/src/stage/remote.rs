//! Remote stages: one logical command fanned out to every live connection.
//!
//! Each participating host gets a fresh session. Output merging depends on
//! the sink: terminal output is decorated per host and tee'd into the
//! history store, pipe output is raw interleaved bytes (host identity is
//! not preserved through a pipe). Stdin is broadcast — every byte the
//! stage reads is replicated to every session, in order.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use fansh_types::{RemoteSession, Stage};

use crate::output::DecoratedWriter;
use crate::pipe::PipeWriter;

use super::{Sink, Source, StageCtx, StageOutcome};

/// Pause after all sessions terminate, absorbing late transport buffers.
const DRAIN_PAUSE: Duration = Duration::from_millis(50);

/// Run one remote stage across the connection snapshot.
pub async fn run_remote(stage: Stage, source: Source, sink: Sink, ctx: StageCtx) -> StageOutcome {
    let outcome = StageOutcome::default();
    let command = stage.joined();

    // A PTY is only requested for a fully interactive stage: terminal in,
    // terminal out.
    let interactive = source.is_term() && sink.is_term();

    // The pipe writer is shared by every per-host output task; dropping
    // the last handle after they join signals EOF downstream.
    let shared_pipe: Option<Arc<PipeWriter>> = match sink {
        Sink::Pipe(writer) => Some(Arc::new(writer)),
        Sink::Term => None,
    };

    let mut sessions: Vec<(String, Arc<dyn RemoteSession>)> = Vec::new();
    let mut stdin_writers = Vec::new();
    let mut output_tasks = Vec::new();

    for conn in ctx.connections.iter() {
        let session: Arc<dyn RemoteSession> = match conn.factory.open().await {
            Ok(session) => Arc::from(session),
            Err(e) => {
                tracing::warn!("skipping {}: {e}", conn.name);
                continue;
            }
        };

        if interactive {
            if let Err(e) = session.request_pty().await {
                tracing::warn!("{}: pty request failed: {e}", conn.name);
            }
        }

        stdin_writers.push(session.stdin());
        let mut stdout = session.stdout();

        match &shared_pipe {
            None => {
                // Terminal sink: decorated lines to the terminal, raw bytes
                // into this host's history capture.
                let mut decorated =
                    DecoratedWriter::new(ctx.term.clone(), conn.decorator.prefix(ctx.count));
                let (hist_writer, hist_done) =
                    ctx.history
                        .writer(ctx.count, &conn.name, Some(conn.decorator.clone()));
                output_tasks.push(tokio::spawn(async move {
                    let mut hist_writer = hist_writer;
                    let mut buf = [0u8; 8192];
                    loop {
                        match stdout.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                let _ = decorated.write(&buf[..n]).await;
                                let _ = hist_writer.write_all(&buf[..n]).await;
                            }
                        }
                    }
                    let _ = decorated.flush().await;
                    hist_writer.close();
                    let _ = hist_done.await;
                }));
            }
            Some(pipe) => {
                // Pipe sink: raw interleaved bytes downstream — host
                // identity is lost in the pipe — but each host's bytes are
                // still tee'd into its own capture.
                let pipe = Arc::clone(pipe);
                let (hist_writer, hist_done) =
                    ctx.history
                        .writer(ctx.count, &conn.name, Some(conn.decorator.clone()));
                output_tasks.push(tokio::spawn(async move {
                    let mut hist_writer = hist_writer;
                    let mut buf = [0u8; 8192];
                    loop {
                        match stdout.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                let _ = hist_writer.write_all(&buf[..n]).await;
                                if pipe.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    hist_writer.close();
                    let _ = hist_done.await;
                }));
            }
        }

        sessions.push((conn.name.clone(), session));
    }

    // Broadcast stdin: one reader, every session's stdin a consumer.
    let broadcast_cancel = CancellationToken::new();
    let broadcast = spawn_broadcast(source, stdin_writers, &ctx, broadcast_cancel.clone());

    // Run all sessions concurrently; an interrupt fans SIGINT out to every
    // live session and lets the normal completion path unwind.
    let runs = join_all(sessions.iter().map(|(name, session)| {
        let session = Arc::clone(session);
        let name = name.clone();
        let command = command.clone();
        async move {
            if let Err(e) = session.run(&command).await {
                tracing::warn!("{name}: {e}");
            }
        }
    }));
    let mut runs = pin!(runs);

    let mut killed = false;
    tokio::select! {
        _ = ctx.kill.cancelled() => { killed = true; }
        _ = &mut runs => {}
    }
    if killed {
        for (name, session) in &sessions {
            if let Err(e) = session.interrupt().await {
                tracing::warn!("{name}: interrupt failed: {e}");
            }
            session.close().await;
        }
        runs.await;
    }

    // Let late output drain out of the transport before closing up.
    tokio::time::sleep(DRAIN_PAUSE).await;

    for (_, session) in &sessions {
        session.close().await;
    }

    // Cancel the terminal broadcast (a pipe broadcast ends at EOF) and
    // wait for it before declaring the stage complete.
    broadcast_cancel.cancel();
    let _ = broadcast.await;

    // Output tasks end at session stdout EOF; captures publish before the
    // stage reports done.
    join_all(output_tasks).await;

    // Last pipe handle dropped here → EOF downstream.
    drop(shared_pipe);

    outcome
}

/// Copy the stage's stdin to every session's stdin.
///
/// A pipe source runs to EOF, then closes every session stdin. A terminal
/// source runs until the stage cancels it; the stage awaits the task after
/// cancelling, so shutdown cannot race completion.
fn spawn_broadcast(
    source: Source,
    mut writers: Vec<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
    ctx: &StageCtx,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    match source {
        Source::Pipe(mut reader) => tokio::spawn(async move {
            while let Some(chunk) = reader.next_chunk().await {
                for writer in writers.iter_mut() {
                    let _ = writer.write_all(&chunk).await;
                }
            }
            for writer in writers.iter_mut() {
                let _ = writer.shutdown().await;
            }
        }),
        Source::Term => {
            let mut stdin = ctx.term.open_stdin();
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        read = stdin.read(&mut buf) => match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                for writer in writers.iter_mut() {
                                    let _ = writer.write_all(&buf[..n]).await;
                                }
                            }
                        }
                    }
                }
                for writer in writers.iter_mut() {
                    let _ = writer.shutdown().await;
                }
            })
        }
    }
}
