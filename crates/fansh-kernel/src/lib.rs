//! fansh core — the parallel shell kernel.
//!
//! One human-driven command line is multiplexed across every live remote
//! connection. The kernel owns the whole execution path:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Shell                               │
//! │  parse ──▶ executor ──▶ stage runners ──▶ history store      │
//! │              │             │  builtin (replay, meta)         │
//! │              │ pipes       │  local   (!cmd via sh -c)       │
//! │              │             │  remote  (fan-out + broadcast)  │
//! │  interrupt ──┴── line token ── child token per stage         │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                                   │
//!   supervisor (3 s liveness loop)      connection pool
//! ```
//!
//! The REPL crate drives [`Shell::execute`] one line at a time; everything
//! else (fan-out, capture, cancellation) happens behind it.

pub mod catalog;
pub mod config;
pub mod connect;
pub mod executor;
pub mod history;
pub mod lexer;
pub mod output;
pub mod parse;
pub mod pipe;
pub mod shell;
pub mod stage;
pub mod supervisor;
pub mod term;
pub mod testing;
pub mod transport;

pub use config::{Config, ServerConfig, ShellConfig};
pub use connect::{Connection, ConnectionPool};
pub use executor::{execute_line, ExecOutcome, LineCtx};
pub use history::{HistoryEntry, HistoryStore, HostCapture};
pub use output::{Decorator, DEFAULT_OPROMPT};
pub use parse::{parse_line, ParseError};
pub use shell::{build_connections, exec_local_command, ExecSignal, Shell, ShellExit};
pub use term::{StdTerm, Term};
pub use transport::CommandFactory;
