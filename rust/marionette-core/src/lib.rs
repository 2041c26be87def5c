//! Marionette core — the runtime value and type model shared by the
//! compiler, the evaluator, and the CLI.
#![warn(clippy::all)]

pub mod types;
pub mod values;

pub use types::{ConversionError, RecursionGuard, Type};
pub use values::{HashValue, RegexValue, Value};
