//! Runtime error types.

use marionette_compiler::tokens::Span;
use thiserror::Error;

/// A semantic failure during evaluation; carries the source location and the
/// call stack at the point of failure.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct EvaluationError {
    pub message: String,
    pub path: String,
    pub line: usize,
    pub offset: usize,
    pub backtrace: Vec<String>,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>, path: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
            line: span.start.line,
            offset: span.start.offset,
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }
}

/// A function or lambda argument shape mismatch; carries the offending
/// argument index.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct ArgumentError {
    pub message: String,
    pub index: usize,
}

impl ArgumentError {
    pub fn new(message: impl Into<String>, index: usize) -> Self {
        Self {
            message: message.into(),
            index,
        }
    }
}

/// A top-level compilation failure rolled up for the CLI boundary.
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error(transparent)]
    Frontend(#[from] marionette_compiler::CompileError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("{0}")]
    Settings(String),
}
