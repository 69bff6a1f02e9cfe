//! Grouping tokens into pipeline stages.
//!
//! Grammar: `LINE := STAGE ("|" STAGE)*`, `STAGE := token (WS token)*`.
//! The parser splits only; argv interpretation belongs to the stage runners
//! (the local stage re-feeds its argv to the host shell). Each stage's kind
//! is classified here, once.

use thiserror::Error;

use fansh_types::{Operator, PipelineLine, Stage};

use crate::lexer::{tokenize, LexError, Token};

/// A line that failed to parse. Nothing executes and the serial does not
/// advance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0}")]
    BadQuoting(#[from] LexError),
    #[error("empty pipeline stage")]
    EmptyStage,
}

/// Parse one input line into an ordered stage list.
///
/// Empty (or all-whitespace) input yields an empty line, which is a no-op.
pub fn parse_line(input: &str) -> Result<PipelineLine, ParseError> {
    let tokens = tokenize(input)?;

    let mut stages = Vec::new();
    let mut argv: Vec<String> = Vec::new();

    for token in tokens {
        match token {
            Token::Word(word) => argv.push(word),
            Token::Pipe => {
                if argv.is_empty() {
                    return Err(ParseError::EmptyStage);
                }
                stages.push(Stage::new(std::mem::take(&mut argv), Operator::Pipe));
            }
        }
    }

    if argv.is_empty() {
        // Either an empty line, or a trailing `|` with nothing after it.
        if !stages.is_empty() {
            return Err(ParseError::EmptyStage);
        }
    } else {
        stages.push(Stage::new(argv, Operator::End));
    }

    Ok(PipelineLine { stages })
}
