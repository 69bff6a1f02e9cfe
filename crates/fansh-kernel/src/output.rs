//! Per-host output decoration.
//!
//! Every connection carries a [`Decorator`]: a template renderer that
//! prefixes each output line with the host/serial label, optionally in a
//! per-server color. The serial count is an explicit render argument — the
//! decorator holds no reference back into the shell.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::term::Term;

/// Default per-host output prefix template.
pub const DEFAULT_OPROMPT: &str = "[${SERVER}][${COUNT}] > ";

/// ANSI 256-color codes cycled across servers when auto-color is on.
const SERVER_COLORS: &[u8] = &[2, 3, 4, 5, 6, 9, 10, 11, 12, 13, 14];

/// Substitute `${NAME}` placeholders in a template.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

/// Renders the host-prefixed label for one connection's output lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decorator {
    /// Server name substituted for `${SERVER}`.
    pub server: String,
    /// Prefix template, `[${SERVER}][${COUNT}] > ` by default.
    pub template: String,
    /// ANSI 256-color code, assigned by server index when auto-color is on.
    pub color: Option<u8>,
}

impl Decorator {
    pub fn new(server: impl Into<String>, template: impl Into<String>, auto_color: bool, index: usize) -> Self {
        let color = auto_color.then(|| SERVER_COLORS[index % SERVER_COLORS.len()]);
        Self {
            server: server.into(),
            template: template.into(),
            color,
        }
    }

    /// Render the line prefix for the given serial count.
    pub fn prefix(&self, count: usize) -> String {
        let rendered = render(
            &self.template,
            &[("SERVER", self.server.as_str()), ("COUNT", &count.to_string())],
        );
        match self.color {
            Some(c) => format!("\x1b[38;5;{c}m{rendered}\x1b[0m"),
            None => rendered,
        }
    }
}

/// Line-buffering writer that prefixes every line with a rendered label
/// before it reaches the terminal.
pub struct DecoratedWriter {
    term: Arc<dyn Term>,
    prefix: String,
    buf: Vec<u8>,
}

impl DecoratedWriter {
    /// The prefix is rendered once per line execution; the count cannot
    /// change while a stage is writing.
    pub fn new(term: Arc<dyn Term>, prefix: String) -> Self {
        Self {
            term,
            prefix,
            buf: Vec::new(),
        }
    }

    /// Buffer bytes and emit every completed line, prefixed.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(bytes);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let mut out = self.prefix.clone().into_bytes();
            out.extend_from_slice(&line);
            self.term.write_out(&out).await?;
        }
        Ok(())
    }

    /// Emit a trailing partial line, if any, with a closing newline.
    pub async fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut out = self.prefix.clone().into_bytes();
        out.append(&mut self.buf);
        out.push(b'\n');
        self.term.write_out(&out).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CaptureTerm;

    #[test]
    fn render_substitutes_all_occurrences() {
        let out = render("[${SERVER}][${COUNT}] ${SERVER}", &[("SERVER", "h1"), ("COUNT", "3")]);
        assert_eq!(out, "[h1][3] h1");
    }

    #[test]
    fn prefix_uses_explicit_count() {
        let d = Decorator::new("web01", DEFAULT_OPROMPT, false, 0);
        assert_eq!(d.prefix(0), "[web01][0] > ");
        assert_eq!(d.prefix(7), "[web01][7] > ");
    }

    #[test]
    fn auto_color_is_deterministic_per_index() {
        let a = Decorator::new("h1", DEFAULT_OPROMPT, true, 0);
        let b = Decorator::new("h2", DEFAULT_OPROMPT, true, 1);
        assert_ne!(a.color, b.color);
        assert!(a.prefix(0).starts_with("\x1b[38;5;"));
        assert!(a.prefix(0).ends_with("\x1b[0m"));
    }

    #[tokio::test]
    async fn decorated_writer_prefixes_each_line() {
        let term = Arc::new(CaptureTerm::new(""));
        let mut w = DecoratedWriter::new(term.clone(), "[h1][0] > ".to_string());
        w.write(b"hello\nwor").await.unwrap();
        w.write(b"ld\n").await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(term.out_string().await, "[h1][0] > hello\n[h1][0] > world\n");
    }

    #[tokio::test]
    async fn flush_terminates_partial_lines() {
        let term = Arc::new(CaptureTerm::new(""));
        let mut w = DecoratedWriter::new(term.clone(), "> ".to_string());
        w.write(b"no newline").await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(term.out_string().await, "> no newline\n");
    }
}
