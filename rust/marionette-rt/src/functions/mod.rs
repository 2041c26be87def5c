//! Typed overload tables for built-in functions.
//!
//! Each function has a descriptor whose entries are `Callable` signatures;
//! dispatch picks the first entry whose argument tuple is an instance of the
//! signature and invokes its callback with a call context carrying the
//! arguments, their source ranges, and an optional lambda.

mod declaration;
mod iteration;
mod logging;
mod misc;
mod strings;

use crate::context::EvaluationContext;
use crate::errors::{ArgumentError, EvaluationError};
use crate::evaluator;
use marionette_compiler::ast::Lambda;
use marionette_compiler::tokens::Span;
use marionette_core::{RecursionGuard, Type, Value};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// The call context handed to function callbacks.
pub struct FunctionContext<'a, 'b> {
    pub context: &'a mut EvaluationContext,
    pub name: &'b str,
    pub name_span: Span,
    pub arguments: Vec<Value>,
    pub argument_spans: Vec<Span>,
    pub lambda: Option<&'b Lambda>,
}

impl FunctionContext<'_, '_> {
    pub fn argument(&self, index: usize) -> &Value {
        &self.arguments[index]
    }

    pub fn argument_span(&self, index: usize) -> Span {
        self.argument_spans
            .get(index)
            .copied()
            .unwrap_or(self.name_span)
    }

    pub fn error(&self, message: impl Into<String>, span: Span) -> EvaluationError {
        self.context.error(message, span)
    }

    pub fn has_lambda(&self) -> bool {
        self.lambda.is_some()
    }

    /// Executes the block under a fresh call frame, translating argument
    /// shape errors to the block's location.
    pub fn yield_lambda(&mut self, arguments: Vec<Value>) -> Result<Value, EvaluationError> {
        let Some(lambda) = self.lambda else {
            return Err(self.context.error(
                format!("the function '{}' requires a block.", self.name),
                self.name_span,
            ));
        };
        evaluator::invoke_lambda(self.context, lambda, arguments)
    }

    /// Identical to `yield_lambda` but lets argument-shape errors surface
    /// unchanged; iteration functions use it to control their own messages.
    pub fn yield_without_catch(&mut self, arguments: Vec<Value>) -> Result<Value, EvaluationError> {
        let Some(lambda) = self.lambda else {
            return Err(self.context.error(
                format!("the function '{}' requires a block.", self.name),
                self.name_span,
            ));
        };
        evaluator::invoke_lambda_unchecked(self.context, lambda, arguments)
    }
}

pub type FunctionCallback = fn(&mut FunctionContext) -> Result<Value, EvaluationError>;

/// An overload table for one built-in function.
pub struct FunctionDescriptor {
    name: &'static str,
    entries: Vec<(Type, FunctionCallback)>,
}

impl FunctionDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// Registers an overload with a `Callable` signature string.
    pub fn add(&mut self, signature: &str, callback: FunctionCallback) {
        let signature = Type::parse(signature).expect("function signature must parse");
        debug_assert!(matches!(signature, Type::Callable { .. }));
        self.entries.push((signature, callback));
    }

    pub fn dispatch(&self, mut call: FunctionContext) -> Result<Value, EvaluationError> {
        let mut guard = RecursionGuard::new();
        for (signature, callback) in &self.entries {
            if signature.accepts_arguments(&call.arguments, &mut guard) {
                return callback(&mut call);
            }
        }
        let error = self.mismatch(&call);
        let span = call.argument_span(error.index);
        Err(call.context.error(error.message, span))
    }

    /// Builds the argument error for a failed dispatch, pinned to the first
    /// argument the closest overload rejects.
    fn mismatch(&self, call: &FunctionContext) -> ArgumentError {
        let mut guard = RecursionGuard::new();
        // Prefer an overload whose arity matches so the error names the
        // offending argument rather than the count.
        for (signature, _) in &self.entries {
            let Type::Callable { types, min, max, .. } = signature else {
                continue;
            };
            let count = call.arguments.len() as i64;
            if count < *min || count > *max {
                continue;
            }
            for (index, argument) in call.arguments.iter().enumerate() {
                let Some(expected) = types.get(index).or_else(|| types.last()) else {
                    continue;
                };
                if !expected.is_instance(argument, &mut guard) {
                    return ArgumentError::new(
                        format!(
                            "the function '{}' expects {} for argument {} but was given {}.",
                            self.name,
                            expected,
                            index + 1,
                            Type::infer_reduced(argument)
                        ),
                        index,
                    );
                }
            }
        }
        let given: Vec<String> = call
            .arguments
            .iter()
            .map(|argument| Type::infer_reduced(argument).to_string())
            .collect();
        ArgumentError::new(
            format!(
                "the function '{}' does not accept the given arguments ({}).",
                self.name,
                given.join(", ")
            ),
            0,
        )
    }
}

static REGISTRY: Lazy<HashMap<&'static str, FunctionDescriptor>> = Lazy::new(|| {
    let mut table = HashMap::new();
    let mut add = |descriptor: FunctionDescriptor| {
        table.insert(descriptor.name, descriptor);
    };
    declaration::register(&mut add);
    iteration::register(&mut add);
    logging::register(&mut add);
    misc::register(&mut add);
    strings::register(&mut add);
    table
});

/// Looks up a built-in function descriptor by name.
pub fn find(name: &str) -> Option<&'static FunctionDescriptor> {
    REGISTRY.get(name)
}
