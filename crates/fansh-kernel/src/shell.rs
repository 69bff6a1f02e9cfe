//! The shell: owns the configuration, serial counter, history, connection
//! pool, and the single interrupt channel every line derives its
//! cancellation from.
//!
//! The interactive loop lives in the REPL crate; this type is the
//! execution entry it drives, one line at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use fansh_types::SessionFactory;

use crate::config::{expand_home, ShellConfig};
use crate::connect::{Connection, ConnectionPool};
use crate::executor::{execute_line, LineCtx};
use crate::history::HistoryStore;
use crate::output::{render, Decorator};
use crate::parse::parse_line;
use crate::stage::ShellOptions;
use crate::term::Term;

/// What the caller should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecSignal {
    /// Keep reading lines.
    Continue,
    /// `exit`/`quit` ran; terminate cleanly.
    Exit,
}

pub struct Shell {
    config: ShellConfig,
    term: Arc<dyn Term>,
    history: Arc<HistoryStore>,
    pool: Arc<ConnectionPool>,
    options: Arc<RwLock<ShellOptions>>,
    count: AtomicUsize,
    interrupt: broadcast::Sender<()>,
}

impl Shell {
    pub fn new(config: ShellConfig, connections: Vec<Arc<Connection>>, term: Arc<dyn Term>) -> Self {
        let history_file =
            (!config.history_file.is_empty()).then(|| expand_home(&config.history_file));
        let (interrupt, _) = broadcast::channel(8);
        Self {
            config,
            term,
            history: Arc::new(HistoryStore::new(history_file)),
            pool: Arc::new(ConnectionPool::new(connections)),
            options: Arc::new(RwLock::new(ShellOptions::default())),
            count: AtomicUsize::new(0),
            interrupt,
        }
    }

    /// The owned signal channel. The binary forwards OS signals into it;
    /// stages only ever see tokens derived from it.
    pub fn interrupt_sender(&self) -> broadcast::Sender<()> {
        self.interrupt.clone()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Execute one input line to completion.
    pub async fn execute(&self, input: &str) -> ExecSignal {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return ExecSignal::Continue;
        }

        let line = match parse_line(trimmed) {
            Ok(line) => line,
            Err(e) => {
                let _ = self
                    .term
                    .write_err(format!("fansh: {e}\n").as_bytes())
                    .await;
                return ExecSignal::Continue;
            }
        };
        if line.is_empty() {
            return ExecSignal::Continue;
        }

        self.history.append_log(trimmed);

        let ctx = LineCtx {
            count: self.count(),
            command: trimmed.to_string(),
            term: self.term.clone(),
            history: self.history.clone(),
            connections: self.pool.snapshot().await,
            options: self.options.clone(),
            interrupt: self.interrupt.subscribe(),
        };
        let outcome = execute_line(line, ctx).await;

        if outcome.advanced {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
        if outcome.exit_requested {
            ExecSignal::Exit
        } else {
            ExecSignal::Continue
        }
    }

    /// Render the interactive prompt for the current serial.
    pub fn render_prompt(&self) -> String {
        let count = self.count().to_string();
        let hostname = read_hostname();
        let user = std::env::var("USER").unwrap_or_default();
        let pwd = std::env::var("PWD").unwrap_or_default();
        render(
            &self.config.prompt,
            &[
                ("COUNT", count.as_str()),
                ("HOSTNAME", hostname.as_str()),
                ("USER", user.as_str()),
                ("PWD", pwd.as_str()),
            ],
        )
    }
}

/// Build the connection list the shell starts with: one decorator per
/// endpoint, colored by index when auto-color is on.
pub fn build_connections(
    config: &ShellConfig,
    endpoints: Vec<(String, Arc<dyn SessionFactory>)>,
) -> Vec<Arc<Connection>> {
    endpoints
        .into_iter()
        .enumerate()
        .map(|(index, (name, factory))| {
            let decorator =
                Decorator::new(name.as_str(), config.oprompt.as_str(), config.auto_color, index);
            Arc::new(Connection::new(name, factory, decorator))
        })
        .collect()
}

/// The local host name, `${HOSTNAME}` in prompt templates.
pub fn read_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Run a local shell snippet and print its combined output. Used for the
/// configured pre/post commands; an empty snippet is a no-op.
pub fn exec_local_command(cmd: &str) {
    if cmd.is_empty() {
        return;
    }
    let output = if cfg!(windows) {
        std::process::Command::new("powershell").arg("-c").arg(cmd).output()
    } else {
        std::process::Command::new("sh").arg("-c").arg(cmd).output()
    };
    match output {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
        }
        Err(e) => tracing::warn!("failed to run {cmd:?}: {e}"),
    }
}

/// Terminates the shell process on every exit path, running the configured
/// post-command first.
pub struct ShellExit {
    pub post_cmd: String,
}

impl ShellExit {
    pub fn exit(&self, code: i32, message: &str) -> ! {
        if !message.is_empty() {
            eprint!("{message}");
        }
        exec_local_command(&self.post_cmd);
        std::process::exit(code)
    }
}
