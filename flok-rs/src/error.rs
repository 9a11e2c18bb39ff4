//! Error types shared by the compiler, the interpreter and the engine.
//!
//! Compilation failures are [`ParseError`]s and abort only the script being
//! compiled.  Execution failures are [`RuntimeError`]s and abort only the
//! invocation that raised them.  A `wait` is not an error at all; see
//! [`crate::script::interp::Flow`].

use std::path::PathBuf;

use thiserror::Error;

/// What went wrong while lexing or parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxErrorKind {
    #[error("Inconsistent indentation")]
    Indentation,
    #[error("Unterminated string")]
    UnterminatedString,
    #[error("Unterminated %variable%")]
    UnterminatedRuntimeVar,
    #[error("Unterminated __variable__")]
    UnterminatedPersistVar,
    #[error("Unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("{0}")]
    Grammar(String),
}

/// A compile-time failure, located by file label and source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{file} line {line}] {kind}")]
pub struct ParseError {
    pub kind: SyntaxErrorKind,
    pub file: String,
    pub line: usize,
}

impl ParseError {
    pub fn new(kind: SyntaxErrorKind, file: &str, line: usize) -> Self {
        ParseError { kind, file: file.to_owned(), line }
    }

    pub fn grammar(message: impl Into<String>, file: &str, line: usize) -> Self {
        Self::new(SyntaxErrorKind::Grammar(message.into()), file, line)
    }

    /// The message without the `[file line N]` prefix.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

/// A failure that halts one script invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Unknown effect or function, failed effect, misuse of a construct.
    #[error("{message} (line {line})")]
    Script { message: String, line: usize },
    /// The invocation used up its operation budget.
    #[error("operation limit of {limit} exceeded")]
    OperationLimitExceeded { limit: u64 },
    /// Function calls nested deeper than the configured maximum.
    #[error("maximum call depth of {max} exceeded")]
    CallDepthExceeded { max: usize },
}

impl RuntimeError {
    pub fn script(message: impl Into<String>, line: usize) -> Self {
        RuntimeError::Script { message: message.into(), line }
    }
}

/// Loading or saving the persistent store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed data file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
