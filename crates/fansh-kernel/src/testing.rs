//! Test doubles for the transport seam and the terminal.
//!
//! `MockFactory` scripts one endpoint's behavior: what each command
//! outputs, whether opens fail, whether the transport dies mid-stream. It
//! records everything the shell does to it (commands run, stdin bytes
//! delivered, PTY requests, interrupts) so tests can assert on the fan-out
//! contract without a real transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use fansh_types::{RemoteSession, SessionError, SessionFactory, SessionResult};

use crate::term::Term;

type Respond = Box<dyn Fn(&str) -> Vec<u8> + Send + Sync>;

/// Scripted behavior plus recorded observations, shared by every session
/// the factory opens.
pub struct MockBehavior {
    respond: Respond,
    run_delay: Mutex<Option<Duration>>,
    die_after: Mutex<Option<usize>>,
    fail_open: AtomicBool,
    alive: AtomicBool,
    commands: Mutex<Vec<String>>,
    stdin_seen: Mutex<Vec<u8>>,
    pty_requests: AtomicUsize,
    interrupts: AtomicUsize,
}

/// Factory for scripted in-memory sessions.
pub struct MockFactory {
    server: String,
    behavior: Arc<MockBehavior>,
}

impl MockFactory {
    /// Sessions emit `output` for any command.
    pub fn with_output(server: &str, output: Vec<u8>) -> Self {
        Self::with_respond(server, move |_| output.clone())
    }

    /// Sessions compute their output from the command.
    pub fn with_respond(server: &str, respond: impl Fn(&str) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self {
            server: server.to_string(),
            behavior: Arc::new(MockBehavior {
                respond: Box::new(respond),
                run_delay: Mutex::new(None),
                die_after: Mutex::new(None),
                fail_open: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                commands: Mutex::new(Vec::new()),
                stdin_seen: Mutex::new(Vec::new()),
                pty_requests: AtomicUsize::new(0),
                interrupts: AtomicUsize::new(0),
            }),
        }
    }

    /// Sessions that behave like a remote `echo`: `echo a b` → `a b\n`,
    /// anything else → no output.
    pub fn echoing(server: &str) -> Self {
        Self::with_respond(server, |cmd| match cmd.strip_prefix("echo ") {
            Some(rest) => format!("{rest}\n").into_bytes(),
            None => Vec::new(),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Delay `run` completion; an interrupt cuts the delay short.
    pub fn set_run_delay(&self, delay: Duration) {
        *self.behavior.run_delay.lock().unwrap() = Some(delay);
    }

    /// Emit only the first `n` output bytes, then report the connection lost.
    pub fn set_die_after(&self, n: usize) {
        *self.behavior.die_after.lock().unwrap() = Some(n);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.behavior.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_alive(&self, alive: bool) {
        self.behavior.alive.store(alive, Ordering::SeqCst);
    }

    /// Commands passed to `run`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.behavior.commands.lock().unwrap().clone()
    }

    /// Every stdin byte delivered to this endpoint's sessions, in order.
    pub fn stdin_seen(&self) -> Vec<u8> {
        self.behavior.stdin_seen.lock().unwrap().clone()
    }

    pub fn pty_requests(&self) -> usize {
        self.behavior.pty_requests.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.behavior.interrupts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn open(&self) -> SessionResult<Box<dyn RemoteSession>> {
        if self.behavior.fail_open.load(Ordering::SeqCst) {
            return Err(SessionError::Open(format!("{}: scripted open failure", self.server)));
        }

        let (stdout_handle, stdout_feed) = duplex(64 * 1024);
        let (stdin_handle, mut stdin_drain) = duplex(64 * 1024);

        // Record everything written to the session's stdin.
        let behavior = Arc::clone(&self.behavior);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match stdin_drain.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => behavior.stdin_seen.lock().unwrap().extend_from_slice(&buf[..n]),
                }
            }
        });

        Ok(Box::new(MockSession {
            behavior: Arc::clone(&self.behavior),
            stdout_handle: Mutex::new(Some(stdout_handle)),
            stdout_feed: Mutex::new(Some(stdout_feed)),
            stdin_handle: Mutex::new(Some(stdin_handle)),
            cancel: CancellationToken::new(),
        }))
    }

    async fn check_alive(&self) -> SessionResult<()> {
        if self.behavior.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::Probe(format!("{}: peer unreachable", self.server)))
        }
    }
}

/// One scripted session.
pub struct MockSession {
    behavior: Arc<MockBehavior>,
    stdout_handle: Mutex<Option<DuplexStream>>,
    stdout_feed: Mutex<Option<DuplexStream>>,
    stdin_handle: Mutex<Option<DuplexStream>>,
    cancel: CancellationToken,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn request_pty(&self) -> SessionResult<()> {
        self.behavior.pty_requests.fetch_add(1, Ordering::SeqCst);
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
        self.behavior.commands.lock().unwrap().push(command.to_string());

        let delay = *self.behavior.run_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    self.stdout_feed.lock().unwrap().take();
                    return Ok(130);
                }
            }
        }

        let output = (self.behavior.respond)(command);
        let feed = self.stdout_feed.lock().unwrap().take();
        let Some(mut feed) = feed else { return Ok(0) };

        let die_after = *self.behavior.die_after.lock().unwrap();
        match die_after {
            Some(n) => {
                let n = n.min(output.len());
                let _ = feed.write_all(&output[..n]).await;
                drop(feed);
                Err(SessionError::Lost("scripted transport drop".to_string()))
            }
            None => {
                let _ = feed.write_all(&output).await;
                drop(feed);
                Ok(0)
            }
        }
    }

    async fn interrupt(&self) -> SessionResult<()> {
        self.behavior.interrupts.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.stdout_feed.lock().unwrap().take();
    }
}

/// Terminal double: collects stdout/stderr, serves scripted stdin.
pub struct CaptureTerm {
    out: Mutex<Vec<u8>>,
    err: Mutex<Vec<u8>>,
    stdin: Vec<u8>,
}

impl CaptureTerm {
    pub fn new(stdin: &str) -> Self {
        Self {
            out: Mutex::new(Vec::new()),
            err: Mutex::new(Vec::new()),
            stdin: stdin.as_bytes().to_vec(),
        }
    }

    pub async fn out_string(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().unwrap()).into_owned()
    }

    pub async fn err_string(&self) -> String {
        String::from_utf8_lossy(&self.err.lock().unwrap()).into_owned()
    }
}

#[async_trait]
impl Term for CaptureTerm {
    async fn write_out(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.out.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    async fn write_err(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.err.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn open_stdin(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(std::io::Cursor::new(self.stdin.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_session_round_trip() {
        let factory = MockFactory::echoing("h1");
        let session = factory.open().await.unwrap();

        let mut stdout = session.stdout();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let code = session.run("echo hi").await.unwrap();
        session.close().await;

        assert_eq!(code, 0);
        assert_eq!(reader.await.unwrap(), b"hi\n");
        assert_eq!(factory.commands(), ["echo hi"]);
    }

    #[tokio::test]
    async fn stdin_bytes_are_recorded() {
        let factory = MockFactory::with_output("h1", Vec::new());
        let session = factory.open().await.unwrap();

        let mut stdin = session.stdin();
        stdin.write_all(b"abc").await.unwrap();
        stdin.shutdown().await.unwrap();

        // Drain task runs on the same runtime; yield until it catches up.
        for _ in 0..50 {
            if factory.stdin_seen() == b"abc" {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.stdin_seen(), b"abc");
    }

    #[tokio::test]
    async fn die_after_truncates_output_and_reports_lost() {
        let factory = MockFactory::with_output("h1", b"0123456789".to_vec());
        factory.set_die_after(4);
        let session = factory.open().await.unwrap();

        let mut stdout = session.stdout();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });

        assert!(session.run("cat big").await.is_err());
        assert_eq!(reader.await.unwrap(), b"0123");
    }

    #[tokio::test]
    async fn interrupt_cuts_a_slow_run_short() {
        let factory = MockFactory::with_output("h1", b"never\n".to_vec());
        factory.set_run_delay(Duration::from_secs(30));
        let session: Arc<dyn RemoteSession> = Arc::from(factory.open().await.unwrap());

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run("sleep 30").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.interrupt().await.unwrap();

        let code = runner.await.unwrap().unwrap();
        assert_eq!(code, 130);
        assert_eq!(factory.interrupts(), 1);
    }
}
