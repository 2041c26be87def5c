//! Marionette compiler — lexer, parser, AST, and diagnostics for the Puppet
//! language.
#![warn(clippy::all)]

pub mod compiler;
pub mod diagnostics;

use thiserror::Error;

pub use compiler::ast;
pub use compiler::lexer::{LexError, Lexer};
pub use compiler::parser::{ParseError, Parser};
pub use compiler::tokens;

/// A front-end failure: lexing or parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl CompileError {
    /// The byte offset the error is pinned to, if known.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CompileError::Lex(e) => Some(e.offset()),
            CompileError::Parse(e) => e.offset(),
        }
    }

    /// Builds a located diagnostic against the offending source.
    pub fn to_diagnostic(&self, path: &str, source: &str) -> diagnostics::Diagnostic {
        let diagnostic = diagnostics::Diagnostic::error(self.to_string());
        match self.offset() {
            Some(offset) => diagnostic.with_location(path, source, offset),
            None => diagnostic.with_location(path, source, source.len()),
        }
    }
}
