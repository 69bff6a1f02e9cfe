//! Command-spawned transport.
//!
//! Sessions are external processes built from a configured connect argv
//! (the system `ssh` by default), so the handshake, authentication, and
//! multiplexing stay entirely outside the core — this module only wires
//! the process's stdio into the [`RemoteSession`] seam. A transport with
//! richer in-band signalling can replace it behind the same traits.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use fansh_types::{RemoteSession, SessionError, SessionFactory, SessionResult};

use crate::config::ServerConfig;

/// How long a liveness probe may take before the peer counts as dead.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds sessions by spawning a connect command per request.
pub struct CommandFactory {
    argv: Vec<String>,
    pty_flag: Option<String>,
}

impl CommandFactory {
    pub fn new(argv: Vec<String>) -> Self {
        // `ssh -tt` forces a remote PTY; other transports opt out.
        let pty_flag = argv
            .first()
            .filter(|program| program.ends_with("ssh"))
            .map(|_| "-tt".to_string());
        Self { argv, pty_flag }
    }

    /// Build the connect argv from a `[server.NAME]` table.
    pub fn from_server(server: &ServerConfig) -> Self {
        let argv = server.connect_command.clone().unwrap_or_else(|| {
            let mut argv = vec!["ssh".to_string()];
            if let Some(port) = server.port {
                argv.push("-p".to_string());
                argv.push(port.to_string());
            }
            argv.push(match &server.user {
                Some(user) => format!("{user}@{}", server.host),
                None => server.host.clone(),
            });
            argv
        });
        Self::new(argv)
    }
}

#[async_trait]
impl SessionFactory for CommandFactory {
    async fn open(&self) -> SessionResult<Box<dyn RemoteSession>> {
        if self.argv.is_empty() {
            return Err(SessionError::Open("empty connect command".to_string()));
        }
        Ok(Box::new(CommandSession::new(
            self.argv.clone(),
            self.pty_flag.clone(),
        )))
    }

    async fn check_alive(&self) -> SessionResult<()> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .arg("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = tokio::time::timeout(PROBE_TIMEOUT, async { cmd.status().await })
            .await
            .map_err(|_| SessionError::Probe("probe timed out".to_string()))?
            .map_err(|e| SessionError::Probe(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(SessionError::Probe(format!("probe exited with {status}")))
        }
    }
}

/// One spawned transport process.
pub struct CommandSession {
    argv: Vec<String>,
    pty_flag: Option<String>,
    want_pty: AtomicBool,
    stdin_handle: Mutex<Option<DuplexStream>>,
    stdin_internal: Mutex<Option<DuplexStream>>,
    stdout_handle: Mutex<Option<DuplexStream>>,
    stdout_internal: Mutex<Option<DuplexStream>>,
    interrupt_token: CancellationToken,
    close_token: CancellationToken,
}

impl CommandSession {
    fn new(argv: Vec<String>, pty_flag: Option<String>) -> Self {
        let (stdin_handle, stdin_internal) = duplex(64 * 1024);
        let (stdout_internal, stdout_handle) = duplex(64 * 1024);
        Self {
            argv,
            pty_flag,
            want_pty: AtomicBool::new(false),
            stdin_handle: Mutex::new(Some(stdin_handle)),
            stdin_internal: Mutex::new(Some(stdin_internal)),
            stdout_handle: Mutex::new(Some(stdout_handle)),
            stdout_internal: Mutex::new(Some(stdout_internal)),
            interrupt_token: CancellationToken::new(),
            close_token: CancellationToken::new(),
        }
    }
}

#[cfg(unix)]
fn deliver_signal(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    if let Some(pid) = pid {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::kill(pid, signal) {
            tracing::warn!("failed to signal transport process: {e}");
        }
    }
}

#[async_trait]
impl RemoteSession for CommandSession {
    async fn request_pty(&self) -> SessionResult<()> {
        if self.pty_flag.is_none() {
            return Err(SessionError::Pty(
                "transport command has no pty flag".to_string(),
            ));
        }
        self.want_pty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stdin(&self) -> Box<dyn AsyncWrite + Send + Unpin> {
        match self.stdin_handle.lock().unwrap().take() {
            Some(stream) => Box::new(stream),
            None => Box::new(tokio::io::sink()),
        }
    }

    fn stdout(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        match self.stdout_handle.lock().unwrap().take() {
            Some(stream) => Box::new(stream),
            None => Box::new(tokio::io::empty()),
        }
    }

    async fn run(&self, command: &str) -> SessionResult<i32> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        if self.want_pty.load(Ordering::SeqCst) {
            if let Some(flag) = &self.pty_flag {
                cmd.arg(flag);
            }
        }
        cmd.arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| SessionError::Open(e.to_string()))?;
        let pid = child.id();
        #[cfg(not(unix))]
        let _ = pid;

        // Bridge the handed-out duplex halves onto the child's stdio.
        let stdin_feed = self.stdin_internal.lock().unwrap().take();
        let feed_task = match (stdin_feed, child.stdin.take()) {
            (Some(mut feed), Some(mut child_stdin)) => Some(tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                loop {
                    match feed.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if child_stdin.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                // Dropping closes the child's stdin.
            })),
            _ => None,
        };

        let stdout_sink = self.stdout_internal.lock().unwrap().take();
        let out_task = match (stdout_sink, child.stdout.take()) {
            (Some(mut sink), Some(mut child_stdout)) => Some(tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                loop {
                    match child_stdout.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sink.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                // Dropping signals EOF to the handle side.
            })),
            _ => None,
        };

        let mut interrupted = false;
        let mut closed = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = self.interrupt_token.cancelled(), if !interrupted => {
                    interrupted = true;
                    #[cfg(unix)]
                    deliver_signal(pid, nix::sys::signal::Signal::SIGINT);
                }
                _ = self.close_token.cancelled(), if !closed => {
                    closed = true;
                    #[cfg(unix)]
                    deliver_signal(pid, nix::sys::signal::Signal::SIGTERM);
                }
            }
        };

        if let Some(task) = feed_task {
            task.abort();
        }
        if let Some(task) = out_task {
            let _ = task.await;
        }

        let status = status.map_err(|e| SessionError::Io(e.to_string()))?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn interrupt(&self) -> SessionResult<()> {
        self.interrupt_token.cancel();
        Ok(())
    }

    async fn close(&self) {
        self.close_token.cancel();
        // Unblock any reader still waiting on output.
        self.stdout_internal.lock().unwrap().take();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// `sh -c` stands in for a real connect command in these tests; the
    /// session contract is identical.
    fn local_sh() -> CommandFactory {
        CommandFactory::new(vec!["sh".to_string(), "-c".to_string()])
    }

    #[tokio::test]
    async fn run_captures_output_and_exit_code() {
        let factory = local_sh();
        let session = factory.open().await.unwrap();

        let mut stdout = session.stdout();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });

        let code = session.run("echo over-the-wire").await.unwrap();
        session.close().await;

        assert_eq!(code, 0);
        assert_eq!(reader.await.unwrap(), b"over-the-wire\n");
    }

    #[tokio::test]
    async fn stdin_reaches_the_remote_command() {
        let factory = local_sh();
        let session = factory.open().await.unwrap();

        let mut stdin = session.stdin();
        let mut stdout = session.stdout();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });

        let writer = tokio::spawn(async move {
            stdin.write_all(b"lower\n").await.unwrap();
            stdin.shutdown().await.unwrap();
        });

        let code = session.run("tr a-z A-Z").await.unwrap();
        writer.await.unwrap();
        session.close().await;

        assert_eq!(code, 0);
        assert_eq!(reader.await.unwrap(), b"LOWER\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let factory = local_sh();
        let session = factory.open().await.unwrap();
        let code = session.run("exit 3").await.unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn interrupt_terminates_a_long_run() {
        let factory = local_sh();
        let session: std::sync::Arc<dyn RemoteSession> =
            std::sync::Arc::from(factory.open().await.unwrap());

        let runner = {
            let session = std::sync::Arc::clone(&session);
            tokio::spawn(async move { session.run("sleep 30").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.interrupt().await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("interrupt must end the run")
            .unwrap()
            .unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn probe_reflects_command_health() {
        assert!(local_sh().check_alive().await.is_ok());

        let broken = CommandFactory::new(vec!["sh".to_string(), "-c".to_string(), "exit 1 #".to_string()]);
        assert!(broken.check_alive().await.is_err());
    }

    #[test]
    fn server_config_builds_ssh_argv() {
        let server = ServerConfig {
            host: "10.0.0.1".to_string(),
            user: Some("deploy".to_string()),
            port: Some(2222),
            connect_command: None,
        };
        let factory = CommandFactory::from_server(&server);
        assert_eq!(factory.argv, ["ssh", "-p", "2222", "deploy@10.0.0.1"]);
        assert_eq!(factory.pty_flag.as_deref(), Some("-tt"));
    }
}
