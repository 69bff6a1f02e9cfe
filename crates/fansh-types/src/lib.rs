//! Shared data types for fansh.
//!
//! This crate holds the data model that the kernel and the REPL both speak:
//! parsed pipeline stages, the transport trait seam, and history captures.
//! It stays small on purpose — anything that needs the runtime (pipes,
//! stage execution, the history store itself) lives in fansh-kernel.

pub mod line;
pub mod session;

pub use line::{Operator, PipelineLine, Stage, StageKind, BUILTINS};
pub use session::{RemoteSession, SessionError, SessionFactory, SessionResult};
