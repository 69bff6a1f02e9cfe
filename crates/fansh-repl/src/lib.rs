//! fansh interactive loop.
//!
//! Drives the kernel one line at a time from a rustyline editor: prompt
//! rendering, history seeding from the on-disk command log, the completer
//! adapter, word-wise key bindings, and the signal/supervisor wiring.

pub mod complete;

use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{At, Cmd, Editor, EventHandler, KeyCode, KeyEvent, Modifiers, Movement, Word};
use tokio::runtime::Runtime;

use fansh_kernel::catalog;
use fansh_kernel::supervisor::run_supervisor;
use fansh_kernel::{
    build_connections, exec_local_command, ExecSignal, Shell, ShellConfig, ShellExit, StdTerm,
    Term,
};
use fansh_types::SessionFactory;

use crate::complete::ShellHelper;

/// Run the interactive shell over the given endpoints until it exits.
/// Returns the process exit code.
pub fn run(config: ShellConfig, endpoints: Vec<(String, Arc<dyn SessionFactory>)>) -> Result<i32> {
    println!("Start parallel-shell...");
    for (name, _) in &endpoints {
        println!("  {name}");
    }

    exec_local_command(&config.pre_cmd);
    let exit = ShellExit {
        post_cmd: config.post_cmd.clone(),
    };

    if endpoints.is_empty() {
        exit.exit(1, "Error: No valid connections\n");
    }

    let runtime = Runtime::new().context("failed to create tokio runtime")?;
    let term: Arc<dyn Term> = Arc::new(StdTerm);
    let connections = build_connections(&config, endpoints);
    let shell = Arc::new(Shell::new(config.clone(), connections, term.clone()));

    // Editor with recall seeded from the persisted command log.
    let mut rl: Editor<ShellHelper, DefaultHistory> =
        Editor::new().context("failed to create editor")?;
    for (_, command) in shell.history().load_log() {
        let _ = rl.add_history_entry(command);
    }
    bind_word_keys(&mut rl);

    // Completion catalogue: local + every remote host, built once.
    let (command_catalog, local_commands) = runtime.block_on(async {
        let conns = shell.pool().snapshot().await;
        let catalog = catalog::build_command_catalog(&conns).await;
        let local = catalog::local_command_candidates().await;
        (catalog, local)
    });
    rl.set_helper(Some(ShellHelper::new(
        shell.clone(),
        runtime.handle().clone(),
        command_catalog,
        local_commands,
    )));

    // The shell's owned interrupt channel, fed from OS signals. Stages
    // only ever see tokens derived from it.
    let interrupt = shell.interrupt_sender();
    runtime.spawn(async move {
        loop {
            wait_for_signal().await;
            let _ = interrupt.send(());
        }
    });

    // Liveness supervisor; terminates the shell when nothing survives.
    let supervisor_exit = ShellExit {
        post_cmd: config.post_cmd.clone(),
    };
    runtime.spawn(run_supervisor(
        shell.pool().clone(),
        term.clone(),
        move || supervisor_exit.exit(1, "Error: No valid connections\n"),
    ));

    loop {
        if runtime.block_on(shell.pool().is_empty()) {
            exit.exit(1, "Error: No valid connections\n");
        }

        let prompt = shell.render_prompt();
        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match runtime.block_on(shell.execute(&line)) {
                    ExecSignal::Exit => break,
                    ExecSignal::Continue => {}
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    exec_local_command(&config.post_cmd);
    Ok(0)
}

/// Alt+Backspace deletes a word; Alt/Opt+Left/Right move word-wise.
fn bind_word_keys(rl: &mut Editor<ShellHelper, DefaultHistory>) {
    rl.bind_sequence(
        KeyEvent(KeyCode::Backspace, Modifiers::ALT),
        EventHandler::Simple(Cmd::Kill(Movement::BackwardWord(1, Word::Emacs))),
    );
    rl.bind_sequence(
        KeyEvent(KeyCode::Left, Modifiers::ALT),
        EventHandler::Simple(Cmd::Move(Movement::BackwardWord(1, Word::Emacs))),
    );
    rl.bind_sequence(
        KeyEvent(KeyCode::Right, Modifiers::ALT),
        EventHandler::Simple(Cmd::Move(Movement::ForwardWord(1, At::AfterEnd, Word::Emacs))),
    );
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
