//! Bounded byte pipes used to splice pipeline stages.
//!
//! Each adjacency in a pipeline gets exactly one `(PipeWriter, PipeReader)`
//! pair. The channel is bounded, so a fast upstream stage blocks when the
//! downstream stage stops draining — OS pipe semantics, chunk-granular.
//!
//! ```text
//!   PipeWriter ──▶ [bounded chunk channel] ──▶ PipeReader
//!                  ├── writer blocks when full (backpressure)
//!                  ├── close/drop writer → EOF (reader sees None)
//!                  └── drop reader → BrokenPipe on the next write
//! ```

use std::io;

use tokio::sync::mpsc;

/// Chunks in flight before the writer blocks.
pub const PIPE_CHUNK_CAPACITY: usize = 64;

/// Writing end of a pipe. Closing (or dropping) signals EOF downstream.
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

/// Reading end of a pipe. Yields chunks until the writer closes.
pub struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Create a one-shot pipe pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(PIPE_CHUNK_CAPACITY);
    (PipeWriter { tx: Some(tx) }, PipeReader { rx })
}

impl PipeWriter {
    /// Write a chunk, blocking while the pipe is full.
    ///
    /// Errors with `BrokenPipe` once the reader is gone, and with
    /// `NotConnected` after `close` — a stage writing to a pipe it already
    /// closed is an invariant violation upstream.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe writer closed"))?;
        tx.send(data.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))
    }

    /// Close the writing end, signalling EOF. Idempotent.
    pub fn close(&mut self) {
        self.tx.take();
    }
}

impl PipeReader {
    /// Next chunk, or `None` at EOF.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Drain the pipe to EOF.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("closed", &self.tx.is_none())
            .finish()
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let (mut w, mut r) = pipe();
        w.write_all(b"hello").await.unwrap();
        w.close();
        assert_eq!(r.read_to_end().await, b"hello");
    }

    #[tokio::test]
    async fn drop_writer_is_eof() {
        let (w, mut r) = pipe();
        w.write_all(b"data").await.unwrap();
        drop(w);
        assert_eq!(r.next_chunk().await.as_deref(), Some(&b"data"[..]));
        assert_eq!(r.next_chunk().await, None);
    }

    #[tokio::test]
    async fn broken_pipe_after_reader_drop() {
        let (w, r) = pipe();
        drop(r);
        let err = w.write_all(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (mut w, mut r) = pipe();
        w.write_all(b"x").await.unwrap();
        w.close();
        w.close();
        let err = w.write_all(b"y").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(r.read_to_end().await, b"x");
    }

    #[tokio::test]
    async fn backpressure_does_not_lose_data() {
        let (w, mut r) = pipe();
        let writer = tokio::spawn(async move {
            for i in 0..500u32 {
                w.write_all(format!("line {i}\n").as_bytes()).await.unwrap();
            }
        });
        let out = r.read_to_end().await;
        writer.await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("line 0\n"));
        assert!(text.contains("line 499\n"));
        assert_eq!(text.lines().count(), 500);
    }
}
