//! Error types for parsing and code generation.

use thiserror::Error;

/// A malformed token: unterminated literal or comment, or a character the
/// lexer does not recognize.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct LexError {
    pub offset: usize,
    pub message: String,
}

/// A grammar violation. Parsing never yields a partial tree alongside one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    /// Build an error located at `offset` within `source`.
    pub fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_column(source, offset);
        ParseError {
            offset,
            line,
            column,
            message: message.into(),
        }
    }

    pub(crate) fn from_lex(source: &str, err: LexError) -> Self {
        ParseError::at(source, err.offset, err.message)
    }
}

/// One-based line and column of a byte offset.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Lex error: {0}")]
    Lex(#[from] LexError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("No element query found")]
    NotFound,

    #[error("Unsupported SQL dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),
}

pub type Result<T> = std::result::Result<T, Error>;
