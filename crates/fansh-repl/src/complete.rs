//! The completer adapter.
//!
//! Bridges the editor's cursor context onto the kernel's completion
//! sources: builtins plus the startup command catalogue on the first token
//! of a stage, builtin-specific suggestions (`%out` serials), and local or
//! remote path completion everywhere else. All of it is best-effort.

use std::sync::Arc;

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Helper;
use tokio::runtime::Handle;

use fansh_kernel::catalog::{self, builtin_candidates, Candidate};
use fansh_kernel::Shell;
use fansh_types::{StageKind, BUILTINS};

pub struct ShellHelper {
    shell: Arc<Shell>,
    runtime: Handle,
    /// Command catalogue built once at startup.
    catalog: Vec<Candidate>,
    /// Unprefixed local commands, for `%outexec` arguments.
    local_commands: Vec<Candidate>,
}

impl ShellHelper {
    pub fn new(
        shell: Arc<Shell>,
        runtime: Handle,
        catalog: Vec<Candidate>,
        local_commands: Vec<Candidate>,
    ) -> Self {
        Self {
            shell,
            runtime,
            catalog,
            local_commands,
        }
    }

    /// Recorded serials as suggestions, labelled with their command.
    fn serial_candidates(&self) -> Vec<Candidate> {
        self.shell
            .history()
            .list()
            .into_iter()
            .map(|(count, command)| Candidate {
                text: count.to_string(),
                description: command,
            })
            .collect()
    }
}

/// Byte offset where the word under the cursor starts.
fn word_start(before: &str) -> usize {
    before
        .rfind(|c| c == ' ' || c == '|')
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn to_pairs(candidates: Vec<Candidate>, prefix: &str) -> Vec<Pair> {
    candidates
        .into_iter()
        .filter(|c| c.text.starts_with(prefix))
        .map(|c| Pair {
            display: c.text.clone(),
            replacement: c.text,
        })
        .collect()
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let before = &line[..pos];
        if before.trim().is_empty() {
            return Ok((pos, Vec::new()));
        }

        let parsed = match fansh_kernel::parse_line(before) {
            Ok(parsed) => parsed,
            Err(fansh_kernel::ParseError::EmptyStage) => {
                // Cursor right after a pipe: a fresh stage is starting.
                let start = word_start(before);
                let mut candidates = builtin_candidates();
                candidates.extend(self.catalog.iter().cloned());
                return Ok((start, to_pairs(candidates, &before[start..])));
            }
            Err(_) => return Ok((pos, Vec::new())),
        };
        let Some(active) = parsed.stages.last() else {
            return Ok((pos, Vec::new()));
        };

        let start = word_start(before);
        let word = &before[start..];
        let last_char = before.chars().last().unwrap_or(' ');
        let first = active.argv[0].as_str();

        // First token of the active stage: builtins + command catalogue.
        if active.argv.len() <= 1 && !matches!(last_char, ' ' | '|') {
            let mut candidates = builtin_candidates();
            candidates.extend(self.catalog.iter().cloned());
            return Ok((start, to_pairs(candidates, word)));
        }

        // Builtin-specific suggestions.
        if BUILTINS.contains(&first) {
            let candidates = match first {
                "%out" => self.serial_candidates(),
                "%outexec" | "%save" => {
                    // The token before the word under the cursor.
                    let prev = if word.is_empty() {
                        active.argv.last().map(String::as_str)
                    } else {
                        active.argv.iter().rev().nth(1).map(String::as_str)
                    };
                    if word.starts_with('-') {
                        vec![
                            Candidate { text: "-n".into(), description: "set history number".into() },
                            Candidate { text: "-h".into(), description: "help message".into() },
                            Candidate { text: "--help".into(), description: "help message".into() },
                        ]
                    } else if prev == Some("-n") {
                        self.serial_candidates()
                    } else {
                        self.local_commands.clone()
                    }
                }
                _ => Vec::new(),
            };
            return Ok((start, to_pairs(candidates, word)));
        }

        // Path completion: remote for remote stages, local for `!` stages.
        let candidates = match active.kind {
            StageKind::Local => {
                let word = word.to_string();
                self.runtime
                    .block_on(async move { catalog::local_path_candidates(&word).await })
            }
            _ => {
                let shell = Arc::clone(&self.shell);
                let word = word.to_string();
                self.runtime.block_on(async move {
                    let conns = shell.pool().snapshot().await;
                    catalog::remote_path_candidates(&conns, &word).await
                })
            }
        };

        // Candidates are base names; complete the segment after the last
        // slash, the way the editor will insert it.
        let base_start = start + word.rfind('/').map(|i| i + 1).unwrap_or(0);
        let base = &before[base_start..];
        Ok((base_start, to_pairs(candidates, base)))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_start_splits_on_space_and_pipe() {
        assert_eq!(word_start("echo hi"), 5);
        assert_eq!(word_start("uname | !tr"), 8);
        assert_eq!(word_start("echo"), 0);
    }

    #[test]
    fn pairs_filter_by_prefix() {
        let candidates = vec![
            Candidate { text: "%out".into(), description: String::new() },
            Candidate { text: "%outlist".into(), description: String::new() },
            Candidate { text: "exit".into(), description: String::new() },
        ];
        let pairs = to_pairs(candidates, "%out");
        let texts: Vec<_> = pairs.iter().map(|p| p.replacement.as_str()).collect();
        assert_eq!(texts, ["%out", "%outlist"]);
    }
}
