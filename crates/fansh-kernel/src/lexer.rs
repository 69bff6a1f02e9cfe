//! Token layer for command lines.
//!
//! A line lexes into two token kinds: quote-aware words and the pipe
//! operator. Single quotes preserve everything verbatim, double quotes
//! preserve whitespace with backslash escapes, and a bare backslash escapes
//! the next character. Unbalanced quotes and dangling escapes fail the
//! whole line.

use logos::{Lexer, Logos};
use std::fmt;
use std::ops::Range;

/// A lexing failure with the byte span of the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub span: Range<usize>,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bad quoting near byte {}: unterminated quote or dangling escape",
            self.span.start
        )
    }
}

impl std::error::Error for LexError {}

/// Tokens of the pipeline grammar.
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    /// Stage separator.
    #[token("|")]
    Pipe,

    /// One argv token. Quoted segments and escapes are resolved by the
    /// callback, so the carried value is the literal word.
    #[regex(r#"([^ \t\r\n|"'\\]|\\.|"([^"\\]|\\.)*"|'[^']*')+"#, unquote)]
    Word(String),
}

/// Resolve quoting and escapes in a matched word slice.
///
/// The regex only matches balanced quotes, so this cannot fail.
fn unquote(lex: &mut Lexer<Token>) -> String {
    let raw = lex.slice();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '\'' => {
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                    out.push(inner);
                }
            }
            '"' => {
                while let Some(inner) = chars.next() {
                    match inner {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        other => out.push(other),
                    }
                }
            }
            other => out.push(other),
        }
    }

    out
}

/// Lex a full line into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(token),
            Err(()) => return Err(LexError { span: lexer.span() }),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(input: &str) -> Vec<String> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| match t {
                Token::Word(w) => w,
                Token::Pipe => "|".to_string(),
            })
            .collect()
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(words("echo hi there"), ["echo", "hi", "there"]);
    }

    #[test]
    fn pipe_is_its_own_token() {
        assert_eq!(words("uname | !tr a-z A-Z"), ["uname", "|", "!tr", "a-z", "A-Z"]);
        // No whitespace needed around the operator.
        assert_eq!(words("a|b"), ["a", "|", "b"]);
    }

    #[test]
    fn quotes_preserve_spaces() {
        assert_eq!(words(r#"echo "hello world""#), ["echo", "hello world"]);
        assert_eq!(words("echo 'a  b'"), ["echo", "a  b"]);
    }

    #[test]
    fn quotes_glue_to_adjacent_text() {
        assert_eq!(words(r#"echo pre"mid dle"post"#), ["echo", "premid dlepost"]);
    }

    #[test]
    fn single_quotes_are_verbatim() {
        assert_eq!(words(r#"echo 'a \n "b"'"#), ["echo", r#"a \n "b""#]);
    }

    #[test]
    fn backslash_escapes_next_char() {
        assert_eq!(words(r"echo a\ b"), ["echo", "a b"]);
        assert_eq!(words(r#"echo \"x\""#), ["echo", "\"x\""]);
        // An escaped pipe is data, not an operator.
        assert_eq!(words(r"echo a\|b"), ["echo", "a|b"]);
    }

    #[test]
    fn quoted_pipe_is_data() {
        assert_eq!(words(r#"echo "a|b""#), ["echo", "a|b"]);
    }

    #[test]
    fn unterminated_quote_fails() {
        assert!(tokenize(r#"echo 'unterminated"#).is_err());
        assert!(tokenize(r#"echo "unterminated"#).is_err());
    }

    #[test]
    fn empty_input_is_no_tokens() {
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize("   ").unwrap().is_empty());
    }
}
