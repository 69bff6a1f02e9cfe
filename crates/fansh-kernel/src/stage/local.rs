//! Local stages: `!command` run by the host platform shell.
//!
//! The stripped argv is re-joined and handed to `sh -c` (or
//! `powershell -c`), so the host shell owns expansion, globbing, and
//! word-splitting of the remainder. Output to the terminal is tee'd into
//! the history store under the synthetic host name `localhost`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use fansh_types::Stage;

use super::builtin::platform_shell;
use super::{Sink, Source, StageCtx, StageOutcome};

/// Host name local captures are recorded under.
pub const LOCALHOST: &str = "localhost";

/// Run one local stage.
pub async fn run_local(stage: Stage, source: Source, mut sink: Sink, ctx: StageCtx) -> StageOutcome {
    let outcome = StageOutcome::default();

    let mut argv = stage.argv.clone();
    let first = argv[0].strip_prefix('!').unwrap_or(&argv[0]).to_string();
    argv[0] = first;
    let command = argv.join(" ");

    let mut cmd = platform_shell(&command);
    cmd.stderr(std::process::Stdio::inherit());
    match &source {
        Source::Term => {
            cmd.stdin(std::process::Stdio::inherit());
        }
        Source::Pipe(_) => {
            cmd.stdin(std::process::Stdio::piped());
        }
    }
    cmd.stdout(std::process::Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("failed to spawn local command {command:?}: {e}");
            let _ = ctx
                .term
                .write_err(format!("fansh: !{command}: {e}\n").as_bytes())
                .await;
            sink.close();
            return outcome;
        }
    };

    // Feed the upstream pipe into the child, closing its stdin at EOF.
    let stdin_feed = match source {
        Source::Pipe(mut reader) => {
            let mut child_stdin = child.stdin.take().expect("stdin was piped");
            Some(tokio::spawn(async move {
                while let Some(chunk) = reader.next_chunk().await {
                    if child_stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
                let _ = child_stdin.shutdown().await;
            }))
        }
        Source::Term => None,
    };

    // Tee terminal-bound output into the history store, unless the
    // record_local option is off.
    let record = sink.is_term() && ctx.options.read().expect("options lock poisoned").record_local;
    let (history_writer, history_done) = if record {
        let (w, handle) = ctx.history.writer(ctx.count, LOCALHOST, None);
        (Some(w), Some(handle))
    } else {
        (None, None)
    };

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut buf = [0u8; 8192];
    let mut killed = false;
    loop {
        tokio::select! {
            _ = ctx.kill.cancelled(), if !killed => {
                killed = true;
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to kill local command: {e}");
                }
            }
            read = stdout.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Some(w) = &history_writer {
                        let _ = w.write_all(&buf[..n]).await;
                    }
                    if sink.write_all(&ctx.term, &buf[..n]).await.is_err() {
                        // Downstream hung up; keep draining the child.
                    }
                }
            }
        }
    }

    let _ = child.wait().await;
    if let Some(handle) = stdin_feed {
        handle.abort();
    }
    if let Some(mut w) = history_writer {
        w.close();
    }
    if let Some(handle) = history_done {
        let _ = handle.await;
    }
    sink.close();
    outcome
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::connect::Connection;
    use crate::history::HistoryStore;
    use crate::pipe;
    use crate::testing::CaptureTerm;
    use fansh_types::Operator;
    use std::sync::{Arc, RwLock};
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    fn ctx(term: Arc<CaptureTerm>, history: Arc<HistoryStore>) -> StageCtx {
        history.begin_slot(0, "test");
        StageCtx {
            count: 0,
            term,
            history,
            connections: Arc::new(Vec::<Arc<Connection>>::new()),
            options: Arc::new(RwLock::new(Default::default())),
            kill: CancellationToken::new(),
        }
    }

    fn stage(argv: &[&str]) -> Stage {
        Stage::new(argv.iter().map(|s| s.to_string()).collect(), Operator::End)
    }

    #[tokio::test]
    async fn terminal_output_is_raw_and_captured() {
        let term = Arc::new(CaptureTerm::new(""));
        let history = Arc::new(HistoryStore::new(None));
        let ctx = ctx(term.clone(), history.clone());

        run_local(stage(&["!echo", "hello"]), Source::Term, Sink::Term, ctx).await;

        assert_eq!(term.out_string().await, "hello\n");
        let entry = history.snapshot(0).unwrap();
        assert_eq!(entry.hosts[LOCALHOST].result, "hello\n");
    }

    #[tokio::test]
    async fn record_local_off_skips_capture() {
        let term = Arc::new(CaptureTerm::new(""));
        let history = Arc::new(HistoryStore::new(None));
        let ctx = ctx(term.clone(), history.clone());
        ctx.options.write().unwrap().record_local = false;

        run_local(stage(&["!echo", "quiet"]), Source::Term, Sink::Term, ctx).await;

        assert_eq!(term.out_string().await, "quiet\n");
        assert!(history.snapshot(0).unwrap().hosts.is_empty());
    }

    #[tokio::test]
    async fn pipe_source_feeds_child_stdin() {
        let term = Arc::new(CaptureTerm::new(""));
        let history = Arc::new(HistoryStore::new(None));
        let ctx = ctx(term.clone(), history);

        let (up_w, up_r) = pipe::pipe();
        let feeder = tokio::spawn(async move {
            let mut w = up_w;
            w.write_all(b"linux\ndarwin\n").await.unwrap();
            w.close();
        });

        run_local(
            stage(&["!tr", "a-z", "A-Z"]),
            Source::Pipe(up_r),
            Sink::Term,
            ctx,
        )
        .await;
        feeder.await.unwrap();

        assert_eq!(term.out_string().await, "LINUX\nDARWIN\n");
    }

    #[tokio::test]
    async fn pipe_sink_receives_output_without_capture() {
        let term = Arc::new(CaptureTerm::new(""));
        let history = Arc::new(HistoryStore::new(None));
        let ctx = ctx(term.clone(), history.clone());

        let (down_w, mut down_r) = pipe::pipe();
        run_local(stage(&["!echo", "piped"]), Source::Term, Sink::Pipe(down_w), ctx).await;

        assert_eq!(down_r.read_to_end().await, b"piped\n");
        assert_eq!(term.out_string().await, "");
        // Mid-pipeline output is not attributed to localhost.
        assert!(history.snapshot(0).unwrap().hosts.is_empty());
    }

    #[tokio::test]
    async fn kill_terminates_the_child_promptly() {
        let term = Arc::new(CaptureTerm::new(""));
        let history = Arc::new(HistoryStore::new(None));
        let ctx = ctx(term.clone(), history);
        let kill = ctx.kill.clone();

        let start = Instant::now();
        let runner = tokio::spawn(run_local(stage(&["!sleep", "30"]), Source::Term, Sink::Term, ctx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        kill.cancel();
        runner.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn spawn_failure_reports_and_closes_sink() {
        let term = Arc::new(CaptureTerm::new(""));
        let history = Arc::new(HistoryStore::new(None));
        let ctx = ctx(term.clone(), history);

        // `sh` exists, so provoke failure through a nonexistent command's
        // non-zero exit instead: the stage itself must still complete and
        // close its sink.
        let (down_w, mut down_r) = pipe::pipe();
        run_local(
            stage(&["!definitely-not-a-command-xyz"]),
            Source::Term,
            Sink::Pipe(down_w),
            ctx,
        )
        .await;
        assert_eq!(down_r.read_to_end().await, b"");
    }
}
