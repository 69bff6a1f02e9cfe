//! Pipeline line data model.
//!
//! A command line is an ordered sequence of [`Stage`]s separated by pipe
//! operators. Each stage carries its argv, the operator that trails it, and
//! its [`StageKind`] — classified once, at parse time, so run sites never
//! re-sniff the first word.

use serde::{Deserialize, Serialize};

/// The closed set of built-in command names.
///
/// First tokens outside this set are either local (`!` prefix) or remote.
pub const BUILTINS: &[&str] = &[
    "exit", "quit", "clear", "%history", "%out", "%outlist", "%outexec", "%save", "%set",
];

/// Operator trailing a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Operator {
    /// `|` — stdout feeds the next stage.
    Pipe,
    /// End of line — stdout is the terminal.
    #[default]
    End,
}

/// How a stage is executed, decided by its first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    /// Member of [`BUILTINS`]: history replay, meta commands.
    Builtin,
    /// Leading `!`: run by the local platform shell.
    Local,
    /// Anything else: fanned out to every live remote connection.
    Remote,
}

/// One argv plus its trailing operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Ordered tokens; never empty for a parsed stage.
    pub argv: Vec<String>,
    /// Operator between this stage and the next.
    pub op: Operator,
    /// Execution kind, classified from `argv[0]`.
    pub kind: StageKind,
}

impl Stage {
    pub fn new(argv: Vec<String>, op: Operator) -> Self {
        let kind = classify(&argv[0]);
        Self { argv, op, kind }
    }

    /// The stage argv joined for display or remote dispatch.
    pub fn joined(&self) -> String {
        self.argv.join(" ")
    }
}

/// Classify a first token into a stage kind.
pub fn classify(first: &str) -> StageKind {
    if BUILTINS.contains(&first) {
        StageKind::Builtin
    } else if first.starts_with('!') {
        StageKind::Local
    } else {
        StageKind::Remote
    }
}

/// An ordered sequence of stages. A line with k pipes has k+1 stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLine {
    pub stages: Vec<Stage>,
}

impl PipelineLine {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of `|` operators in the line.
    pub fn pipe_count(&self) -> usize {
        self.stages.iter().filter(|s| s.op == Operator::Pipe).count()
    }

    /// A line advances the serial counter iff it has more than one stage or
    /// any stage that is not a builtin.
    pub fn advances_serial(&self) -> bool {
        self.stages.len() > 1 || self.stages.iter().any(|s| s.kind != StageKind::Builtin)
    }

    /// The line re-joined for the command header.
    pub fn display(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                out.push_str(" | ");
            }
            out.push_str(&stage.joined());
        }
        out
    }
}
