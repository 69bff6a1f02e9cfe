//! Built-in stages: shell control and history replay.
//!
//! The set is closed; anything else is a local or remote command. Builtins
//! write to their sink like any other stage, close it on the way out, and
//! complete promptly — they do not observe the kill token (except
//! `%outexec`, which runs an arbitrary local command and forwards the
//! kill to it).

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use fansh_types::Stage;

use crate::config::expand_home;
use crate::history::HistoryEntry;

use super::{ShellOptions, Sink, Source, StageCtx, StageOutcome};

/// Run one builtin stage.
pub async fn run_builtin(stage: Stage, source: Source, mut sink: Sink, ctx: StageCtx) -> StageOutcome {
    let mut outcome = StageOutcome::default();
    let args = &stage.argv[1..];

    let result = match stage.argv[0].as_str() {
        "exit" | "quit" => {
            outcome.exit_requested = true;
            Ok(())
        }
        "clear" => ctx.term.write_out(b"\x1b[H\x1b[2J").await,
        "%history" => history(&mut sink, &ctx).await,
        "%outlist" => outlist(&mut sink, &ctx).await,
        "%out" => out(args, &mut sink, &ctx).await,
        "%outexec" => outexec(args, &mut sink, &ctx).await,
        "%save" => save(args, &ctx).await,
        "%set" => set(args, &ctx).await,
        other => {
            // Parse-time classification guarantees membership.
            panic!("not a builtin: {other}")
        }
    };

    if let Err(e) = result {
        let _ = ctx
            .term
            .write_err(format!("fansh: {}: {e}\n", stage.argv[0]).as_bytes())
            .await;
    }

    // An upstream stage may be piping at us; drain so it can finish.
    if let Source::Pipe(mut reader) = source {
        while reader.next_chunk().await.is_some() {}
    }

    sink.close();
    outcome
}

/// `%history` — stream the persisted command log.
async fn history(sink: &mut Sink, ctx: &StageCtx) -> io::Result<()> {
    for (timestamp, command) in ctx.history.load_log() {
        sink.write_all(&ctx.term, format!("{timestamp}: {command}\n").as_bytes())
            .await?;
    }
    Ok(())
}

/// `%outlist` — enumerate recorded serials with their command text.
async fn outlist(sink: &mut Sink, ctx: &StageCtx) -> io::Result<()> {
    for (count, command) in ctx.history.list() {
        sink.write_all(&ctx.term, format!("{count:3} : {command}\n").as_bytes())
            .await?;
    }
    Ok(())
}

/// Resolve an optional serial argument, defaulting to the latest recorded.
fn resolve_serial(arg: Option<&String>, ctx: &StageCtx) -> Result<usize, String> {
    match arg {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("invalid history number: {raw}")),
        None => ctx
            .history
            .latest_recorded()
            .ok_or_else(|| "no recorded output".to_string()),
    }
}

fn lookup(num: usize, ctx: &StageCtx) -> Result<HistoryEntry, String> {
    ctx.history
        .snapshot(num)
        .filter(|e| !e.hosts.is_empty())
        .ok_or_else(|| format!("no recorded output for {num}"))
}

/// `%out [N]` — replay the captured result of line N.
async fn out(args: &[String], sink: &mut Sink, ctx: &StageCtx) -> io::Result<()> {
    let entry = match resolve_serial(args.first(), ctx).and_then(|n| lookup(n, ctx).map(|e| (n, e))) {
        Ok(pair) => pair,
        Err(msg) => {
            return ctx.term.write_err(format!("fansh: %out: {msg}\n").as_bytes()).await;
        }
    };
    let (num, entry) = entry;

    ctx.term
        .write_err(format!("[History:{} ]\n", entry.command).as_bytes())
        .await?;

    if sink.is_term() && entry.hosts.len() > 1 {
        // Re-decorate so host origin survives the replay.
        for (host, capture) in &entry.hosts {
            let prefix = match &capture.decorator {
                Some(decorator) => decorator.prefix(num),
                None => format!("[{host}][{num}] > "),
            };
            for line in capture.result.lines() {
                ctx.term.write_out(format!("{prefix}{line}\n").as_bytes()).await?;
            }
        }
    } else {
        for capture in entry.hosts.values() {
            sink.write_all(&ctx.term, capture.result.as_bytes()).await?;
        }
    }
    Ok(())
}

/// Concatenate a slot's captures in host-name order.
fn concat_captures(entry: &HistoryEntry) -> String {
    entry.hosts.values().map(|c| c.result.as_str()).collect()
}

const OUTEXEC_USAGE: &str = "usage: %outexec [-n NUM] COMMAND...\n";

/// Split `[-n NUM] CMD...` with a dedicated parser; no positional sniffing.
fn parse_serial_flag<'a>(args: &'a [String]) -> Result<(Option<usize>, &'a [String]), String> {
    let mut num = None;
    let mut rest = args;
    loop {
        match rest.first().map(String::as_str) {
            Some("-n") => {
                let raw = rest.get(1).ok_or("-n requires a history number")?;
                num = Some(raw.parse().map_err(|_| format!("invalid history number: {raw}"))?);
                rest = &rest[2..];
            }
            Some("-h") | Some("--help") => return Err(String::new()),
            _ => return Ok((num, rest)),
        }
    }
}

/// `%outexec [-n N] CMD…` — run CMD locally with capture N on stdin and in
/// the `FANSH_RESULT` environment variable.
async fn outexec(args: &[String], sink: &mut Sink, ctx: &StageCtx) -> io::Result<()> {
    let (num, cmd_args) = match parse_serial_flag(args) {
        Ok(parsed) => parsed,
        Err(msg) if msg.is_empty() => {
            return ctx.term.write_err(OUTEXEC_USAGE.as_bytes()).await;
        }
        Err(msg) => {
            return ctx.term.write_err(format!("fansh: %outexec: {msg}\n").as_bytes()).await;
        }
    };
    if cmd_args.is_empty() {
        return ctx.term.write_err(OUTEXEC_USAGE.as_bytes()).await;
    }

    let entry = match num.map_or_else(|| resolve_serial(None, ctx), Ok).and_then(|n| lookup(n, ctx)) {
        Ok(entry) => entry,
        Err(msg) => {
            return ctx.term.write_err(format!("fansh: %outexec: {msg}\n").as_bytes()).await;
        }
    };
    let data = concat_captures(&entry);

    let mut child = match platform_shell(&cmd_args.join(" "))
        .env("FANSH_RESULT", &data)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ctx.term.write_err(format!("fansh: %outexec: {e}\n").as_bytes()).await;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(data.as_bytes()).await;
        // Dropping closes the child's stdin.
    }

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            _ = ctx.kill.cancelled() => {
                let _ = child.kill().await;
                break;
            }
            read = stdout.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if sink.write_all(&ctx.term, &buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    let _ = child.wait().await;
    Ok(())
}

/// `%save [-n N] PATH` — write capture N to a local file.
async fn save(args: &[String], ctx: &StageCtx) -> io::Result<()> {
    let parsed = match parse_serial_flag(args) {
        Ok((num, rest)) if rest.len() == 1 => Ok((num, rest[0].clone())),
        Ok(_) => Err("usage: %save [-n NUM] PATH".to_string()),
        Err(msg) if msg.is_empty() => Err("usage: %save [-n NUM] PATH".to_string()),
        Err(msg) => Err(msg),
    };
    let (num, path) = match parsed {
        Ok(pair) => pair,
        Err(msg) => {
            return ctx.term.write_err(format!("fansh: %save: {msg}\n").as_bytes()).await;
        }
    };

    let entry = match num.map_or_else(|| resolve_serial(None, ctx), Ok).and_then(|n| lookup(n, ctx)) {
        Ok(entry) => entry,
        Err(msg) => {
            return ctx.term.write_err(format!("fansh: %save: {msg}\n").as_bytes()).await;
        }
    };

    if let Err(e) = tokio::fs::write(expand_home(&path), concat_captures(&entry)).await {
        return ctx.term.write_err(format!("fansh: %save: {path}: {e}\n").as_bytes()).await;
    }
    Ok(())
}

/// `%set NAME VALUE` — flip a runtime option.
async fn set(args: &[String], ctx: &StageCtx) -> io::Result<()> {
    let err = |msg: String| format!("fansh: %set: {msg}\n");
    let (name, value) = match (args.first(), args.get(1)) {
        (Some(name), Some(value)) => (name.as_str(), value.as_str()),
        _ => {
            return ctx.term.write_err(err("usage: %set NAME on|off".to_string()).as_bytes()).await;
        }
    };

    let enabled = match value {
        "on" | "true" => true,
        "off" | "false" => false,
        other => {
            return ctx.term.write_err(err(format!("invalid value: {other}")).as_bytes()).await;
        }
    };

    match name {
        "record_local" => {
            let mut options = ctx.options.write().expect("options lock poisoned");
            *options = ShellOptions { record_local: enabled };
            Ok(())
        }
        other => ctx.term.write_err(err(format!("unknown option: {other}")).as_bytes()).await,
    }
}

/// The host platform shell, `sh -c` or `powershell -c`.
pub(crate) fn platform_shell(command: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("powershell");
        c.arg("-c");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    cmd.arg(command);
    cmd
}
