//! Typed overload tables for unary and binary operators.
//!
//! Each operator has a descriptor holding an ordered list of
//! `(operand type pattern, callback)` entries; dispatch picks the first
//! entry where every operand is an instance of the listed pattern. If none
//! match, the descriptor raises an evaluation error enumerating the accepted
//! operand types.

pub mod binary;
pub mod unary;

use crate::context::EvaluationContext;
use crate::errors::EvaluationError;
use marionette_compiler::tokens::Span;
use marionette_core::{RecursionGuard, Type, Value};

/// Mutable view of a binary operation: the evaluation context, both operand
/// values, and their source ranges.
pub struct BinaryCallContext<'a> {
    pub context: &'a mut EvaluationContext,
    pub left: Value,
    pub right: Value,
    pub left_span: Span,
    pub right_span: Span,
}

impl BinaryCallContext<'_> {
    pub fn error(&self, message: impl Into<String>, span: Span) -> EvaluationError {
        self.context.error(message, span)
    }
}

pub type BinaryCallback = fn(&mut BinaryCallContext) -> Result<Value, EvaluationError>;

/// Mutable view of a unary operation.
pub struct UnaryCallContext<'a> {
    pub context: &'a mut EvaluationContext,
    pub operand: Value,
    pub operand_span: Span,
}

impl UnaryCallContext<'_> {
    pub fn error(&self, message: impl Into<String>, span: Span) -> EvaluationError {
        self.context.error(message, span)
    }
}

pub type UnaryCallback = fn(&mut UnaryCallContext) -> Result<Value, EvaluationError>;

/// An overload table for one binary operator.
pub struct BinaryDescriptor {
    /// Human description used in dispatch failures, e.g. "arithmetic
    /// addition".
    description: &'static str,
    entries: Vec<(Type, Type, BinaryCallback)>,
}

impl BinaryDescriptor {
    pub fn new(description: &'static str) -> Self {
        Self {
            description,
            entries: Vec::new(),
        }
    }

    /// Registers an overload; signatures are type strings parsed by the type
    /// system. Order matters: the first matching entry wins.
    pub fn add(&mut self, left: &str, right: &str, callback: BinaryCallback) {
        let left = Type::parse(left).expect("operator signature must parse");
        let right = Type::parse(right).expect("operator signature must parse");
        self.entries.push((left, right, callback));
    }

    pub fn dispatch(&self, mut call: BinaryCallContext) -> Result<Value, EvaluationError> {
        let mut guard = RecursionGuard::new();
        let mut left_matched = false;
        for (left_type, right_type, callback) in &self.entries {
            if !left_type.is_instance(&call.left, &mut guard) {
                continue;
            }
            left_matched = true;
            if right_type.is_instance(&call.right, &mut guard) {
                return callback(&mut call);
            }
        }
        // Report against whichever operand failed to match.
        if left_matched {
            let accepted = self.accepted_right_types(&call.left);
            Err(call.error(
                format!(
                    "expected {} for {} but found {}.",
                    accepted,
                    self.description,
                    Type::infer_reduced(&call.right)
                ),
                call.right_span,
            ))
        } else {
            let accepted = self.accepted_left_types();
            Err(call.error(
                format!(
                    "expected {} for {} but found {}.",
                    accepted,
                    self.description,
                    Type::infer_reduced(&call.left)
                ),
                call.left_span,
            ))
        }
    }

    fn accepted_left_types(&self) -> String {
        let mut names: Vec<String> = Vec::new();
        for (left, _, _) in &self.entries {
            let name = left.to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        join_types(names)
    }

    fn accepted_right_types(&self, left: &Value) -> String {
        let mut guard = RecursionGuard::new();
        let mut names: Vec<String> = Vec::new();
        for (left_type, right, _) in &self.entries {
            if !left_type.is_instance(left, &mut guard) {
                continue;
            }
            let name = right.to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        join_types(names)
    }
}

/// An overload table for one unary operator.
pub struct UnaryDescriptor {
    description: &'static str,
    entries: Vec<(Type, UnaryCallback)>,
}

impl UnaryDescriptor {
    pub fn new(description: &'static str) -> Self {
        Self {
            description,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, operand: &str, callback: UnaryCallback) {
        let operand = Type::parse(operand).expect("operator signature must parse");
        self.entries.push((operand, callback));
    }

    pub fn dispatch(&self, mut call: UnaryCallContext) -> Result<Value, EvaluationError> {
        let mut guard = RecursionGuard::new();
        for (operand_type, callback) in &self.entries {
            if operand_type.is_instance(&call.operand, &mut guard) {
                return callback(&mut call);
            }
        }
        let mut names: Vec<String> = Vec::new();
        for (operand, _) in &self.entries {
            let name = operand.to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Err(call.error(
            format!(
                "expected {} for {} but found {}.",
                join_types(names),
                self.description,
                Type::infer_reduced(&call.operand)
            ),
            call.operand_span,
        ))
    }
}

fn join_types(names: Vec<String>) -> String {
    match names.len() {
        0 => "no operands".to_string(),
        1 => names.into_iter().next().unwrap_or_default(),
        2 => format!("{} or {}", names[0], names[1]),
        _ => {
            let (last, rest) = names.split_last().expect("nonempty");
            format!("{}, or {}", rest.join(", "), last)
        }
    }
}

/// Matches a subject against a regex, installing capture groups in the
/// innermost match scope on success.
pub fn match_regex(
    context: &mut EvaluationContext,
    regex: &marionette_core::RegexValue,
    subject: &str,
) -> bool {
    match regex.captures(subject) {
        Some(captures) => {
            context.set_match_captures(captures);
            true
        }
        None => false,
    }
}
