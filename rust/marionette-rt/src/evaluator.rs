//! The expression evaluator: walks the AST depth-first, produces values,
//! and declares catalog entries.

use crate::catalog::{Attribute, PendingOverride, PendingRelationship, RelationshipKind, Resource};
use crate::collectors::{Collector, CollectorQuery, QueryCollector};
use crate::context::{EvaluationContext, StackFrame};
use crate::errors::EvaluationError;
use crate::functions::{self, FunctionContext};
use crate::operators::{binary, match_regex, unary, BinaryCallContext, UnaryCallContext};
use crate::scope::{DefaultAttribute, Scope, SharedScope};
use indexmap::IndexMap;
use marionette_compiler::ast::*;
use marionette_compiler::tokens::Span;
use marionette_compiler::Parser;
use marionette_core::types::{normalize_class_name, normalize_type_name};
use marionette_core::values::{ControlTransfer, RuntimeValue, VariableValue};
use marionette_core::{HashValue, RecursionGuard, RegexValue, Type, Value};
use std::collections::HashSet;
use std::rc::Rc;

/// Metaparameters accepted on any resource and on class/defined-type
/// declarations alongside declared parameters.
const METAPARAMETERS: &[&str] = &[
    "alias",
    "audit",
    "before",
    "loglevel",
    "noop",
    "notify",
    "require",
    "schedule",
    "stage",
    "subscribe",
    "tag",
];

// ── Definition scanning ──

/// Registers every class, defined type, node, function, and type alias in
/// the tree, including ones nested in bodies, so declarations can precede
/// definitions in evaluation order.
pub fn scan_definitions(ctx: &mut EvaluationContext, tree: &SyntaxTree) {
    scan_statements(ctx, &tree.statements);
}

fn scan_statements(ctx: &mut EvaluationContext, statements: &[Statement]) {
    for statement in statements {
        match statement {
            Statement::Class(definition) => {
                let name = normalize_class_name(&definition.name);
                ctx.definitions
                    .classes
                    .entry(name)
                    .or_insert_with(|| Rc::new(definition.clone()));
                scan_statements(ctx, &definition.body);
            }
            Statement::DefinedType(definition) => {
                let name = normalize_class_name(&definition.name);
                ctx.definitions
                    .defined_types
                    .entry(name)
                    .or_insert_with(|| Rc::new(definition.clone()));
                scan_statements(ctx, &definition.body);
            }
            Statement::Node(definition) => {
                ctx.definitions.nodes.push(Rc::new(definition.clone()));
                scan_statements(ctx, &definition.body);
            }
            Statement::Function(definition) => {
                ctx.definitions
                    .functions
                    .entry(definition.name.clone())
                    .or_insert_with(|| Rc::new(definition.clone()));
            }
            Statement::TypeAlias(alias) => {
                ctx.definitions
                    .type_aliases
                    .entry(alias.name.clone())
                    .or_insert_with(|| alias.target.clone());
            }
            Statement::Expression(Expression::If(e)) => {
                for (_, body) in &e.branches {
                    scan_statements(ctx, body);
                }
                if let Some(body) = &e.else_body {
                    scan_statements(ctx, body);
                }
            }
            Statement::Expression(Expression::Unless(e)) => {
                scan_statements(ctx, &e.body);
                if let Some(body) = &e.else_body {
                    scan_statements(ctx, body);
                }
            }
            Statement::Expression(Expression::Case(e)) => {
                for option in &e.options {
                    scan_statements(ctx, &option.body);
                }
            }
            _ => {}
        }
    }
}

// ── Entry points ──

/// Evaluates a parsed source file's top-level statements.
pub fn evaluate_tree(ctx: &mut EvaluationContext, tree: &SyntaxTree) -> Result<(), EvaluationError> {
    ctx.push_source(Rc::new(tree.path.clone()), Rc::new(tree.source.clone()));
    let result = evaluate_statements(ctx, &tree.statements);
    ctx.pop_source();
    let value = result?;
    if value.is_control_transfer() {
        return Err(control_error(&value));
    }
    Ok(())
}

/// Evaluates a block, yielding the value of its last expression. A control
/// transfer short-circuits the block and is returned as-is.
pub fn evaluate_statements(
    ctx: &mut EvaluationContext,
    statements: &[Statement],
) -> Result<Value, EvaluationError> {
    let mut value = Value::Undef;
    for statement in statements {
        value = evaluate_statement(ctx, statement)?;
        if value.is_control_transfer() {
            break;
        }
    }
    Ok(value)
}

pub fn evaluate_statement(
    ctx: &mut EvaluationContext,
    statement: &Statement,
) -> Result<Value, EvaluationError> {
    ctx.update_frame_line(statement.span().start.line);
    match statement {
        Statement::Expression(expression) => evaluate_expression(ctx, expression),
        // Definitions were registered by the scanning pass; orchestration
        // statements are inert during catalog compilation.
        Statement::Class(_)
        | Statement::DefinedType(_)
        | Statement::Node(_)
        | Statement::Function(_)
        | Statement::TypeAlias(_)
        | Statement::Application(_)
        | Statement::Site(_, _)
        | Statement::CapabilityMapping(_) => Ok(Value::Undef),
        Statement::Relationship(relationship) => evaluate_relationship(ctx, relationship),
        Statement::Break(span) => Ok(Value::Break(Box::new(transfer(ctx, None, *span)))),
        Statement::Next(value, span) => {
            let payload = value
                .as_ref()
                .map(|e| evaluate_expression(ctx, e))
                .transpose()?;
            Ok(Value::Next(Box::new(transfer(ctx, payload, *span))))
        }
        Statement::Return(value, span) => {
            let payload = value
                .as_ref()
                .map(|e| evaluate_expression(ctx, e))
                .transpose()?;
            Ok(Value::Return(Box::new(transfer(ctx, payload, *span))))
        }
    }
}

fn transfer(ctx: &EvaluationContext, payload: Option<Value>, span: Span) -> ControlTransfer {
    ControlTransfer {
        value: payload,
        path: ctx.current_path().to_string(),
        line: span.start.line,
        stack: ctx.backtrace(),
    }
}

/// Turns an escaped control-transfer value into a located error.
pub fn control_error(value: &Value) -> EvaluationError {
    let (keyword, transfer) = match value {
        Value::Break(t) => ("break", t),
        Value::Next(t) => ("next", t),
        Value::Return(t) => ("return", t),
        _ => unreachable!("only control transfers escape"),
    };
    EvaluationError {
        message: format!("{keyword} statement is not applicable in this context."),
        path: transfer.path.clone(),
        line: transfer.line,
        offset: 0,
        backtrace: transfer.stack.clone(),
    }
}

// ── Expressions ──

pub fn evaluate_expression(
    ctx: &mut EvaluationContext,
    expression: &Expression,
) -> Result<Value, EvaluationError> {
    match expression {
        Expression::Undef(_) => Ok(Value::Undef),
        Expression::Default(_) => Ok(Value::Default),
        Expression::Boolean(b, _) => Ok(Value::Boolean(*b)),
        Expression::Integer(i, _) => Ok(Value::Integer(*i)),
        Expression::Float(f, _) => Ok(Value::Float(*f)),
        Expression::String(s, _) => Ok(Value::String(s.clone())),
        Expression::Interpolated(segments, span) => evaluate_interpolated(ctx, segments, *span),
        Expression::Regex(pattern, span) => RegexValue::new(pattern)
            .map(Value::Regex)
            .map_err(|e| ctx.error(format!("invalid regular expression: {e}"), *span)),
        Expression::Bareword(name, _) => Ok(Value::String(name.clone())),
        Expression::TypeName(name, span) => {
            let resolved = type_from_name(ctx, name, *span)?;
            Ok(Value::Type(Box::new(resolved)))
        }
        Expression::Variable(name, _) => evaluate_variable(ctx, name),
        Expression::Array(elements, _) => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                values.push(evaluate_expression(ctx, element)?);
            }
            Ok(Value::array(values))
        }
        Expression::Hash(entries, _) => {
            let mut hash = HashValue::new();
            for (key, value) in entries {
                let key = evaluate_expression(ctx, key)?.into_dereferenced();
                let value = evaluate_expression(ctx, value)?.into_dereferenced();
                hash.insert(key, value);
            }
            Ok(Value::hash(hash))
        }
        Expression::Unary(operator, operand, _) => {
            let value = evaluate_expression(ctx, operand)?;
            let call = UnaryCallContext {
                context: ctx,
                operand: value,
                operand_span: operand.span(),
            };
            unary::descriptor(*operator).dispatch(call)
        }
        Expression::Binary {
            operator,
            left,
            right,
            span,
        } => evaluate_binary(ctx, *operator, left, right, *span),
        Expression::If(e) => evaluate_if(ctx, e),
        Expression::Unless(e) => evaluate_unless(ctx, e),
        Expression::Case(e) => evaluate_case(ctx, e),
        Expression::Selector(e) => evaluate_selector(ctx, e),
        Expression::FunctionCall(call) => {
            let (arguments, spans) = evaluate_arguments(ctx, &call.arguments)?;
            call_function(
                ctx,
                &call.name,
                call.name_span,
                arguments,
                spans,
                call.lambda.as_ref(),
            )
        }
        Expression::MethodCall(call) => {
            let target = evaluate_expression(ctx, &call.target)?;
            let (mut arguments, mut spans) = evaluate_arguments(ctx, &call.arguments)?;
            arguments.insert(0, target);
            spans.insert(0, call.target.span());
            call_function(
                ctx,
                &call.name,
                call.name_span,
                arguments,
                spans,
                call.lambda.as_ref(),
            )
        }
        Expression::Access {
            target, arguments, ..
        } => evaluate_access(ctx, target, arguments),
        Expression::Resource(resource) => evaluate_resource(ctx, resource),
        Expression::ResourceDefaults(defaults) => evaluate_resource_defaults(ctx, defaults),
        Expression::ResourceOverride(over) => evaluate_resource_override(ctx, over),
        Expression::Collector(collector) => evaluate_collector(ctx, collector),
    }
}

fn evaluate_variable(ctx: &mut EvaluationContext, name: &str) -> Result<Value, EvaluationError> {
    if name.chars().all(|c| c.is_ascii_digit()) {
        let index: usize = name.parse().unwrap_or(0);
        return Ok(match ctx.match_variable(index) {
            Some(text) => Value::String(text),
            None => Value::Undef,
        });
    }
    let (scope, local) = ctx.variable_scope(name);
    Ok(match Scope::get(&scope, &local) {
        Some(variable) => Value::Variable(VariableValue::new(name.to_string(), variable.value)),
        None => Value::Undef,
    })
}

fn evaluate_interpolated(
    ctx: &mut EvaluationContext,
    segments: &[(bool, String)],
    span: Span,
) -> Result<Value, EvaluationError> {
    let mut result = String::new();
    for (is_expression, text) in segments {
        if !is_expression {
            result.push_str(text);
            continue;
        }
        let value = evaluate_interpolation(ctx, text, span)?;
        result.push_str(&value.dereference().to_string());
    }
    Ok(Value::String(result))
}

/// Evaluates the source between `${` and `}`. A leading bare word is treated
/// as a variable unless it is immediately called.
fn evaluate_interpolation(
    ctx: &mut EvaluationContext,
    text: &str,
    span: Span,
) -> Result<Value, EvaluationError> {
    let source = interpolation_source(text);
    if source.is_empty() {
        return Ok(Value::Undef);
    }
    let tree = Parser::parse_tree(ctx.current_path().as_str(), &source)
        .map_err(|e| ctx.error(format!("invalid interpolated expression: {e}"), span))?;
    evaluate_statements(ctx, &tree.statements)
}

fn interpolation_source(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('$') {
        return trimmed.to_string();
    }
    let Some(first) = trimmed.chars().next() else {
        return String::new();
    };
    if !(first.is_ascii_lowercase() || first == '_' || first.is_ascii_digit()) {
        return trimmed.to_string();
    }
    let name_length = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
        .count();
    // A call like `${split($s, ',')}` stays a call; anything else starting
    // with a bare word references a variable.
    if trimmed[name_length..].trim_start().starts_with('(') {
        return trimmed.to_string();
    }
    format!("${trimmed}")
}

// ── Binary operators & assignment ──

fn evaluate_binary(
    ctx: &mut EvaluationContext,
    operator: BinaryOperator,
    left: &Expression,
    right: &Expression,
    span: Span,
) -> Result<Value, EvaluationError> {
    if operator == BinaryOperator::Assign {
        return evaluate_assignment(ctx, left, right, span);
    }
    let left_value = evaluate_expression(ctx, left)?;
    let right_value = evaluate_expression(ctx, right)?;
    let descriptor = binary::descriptor(operator)
        .ok_or_else(|| ctx.error(format!("operator '{operator}' cannot be evaluated."), span))?;
    descriptor.dispatch(BinaryCallContext {
        context: ctx,
        left: left_value,
        right: right_value,
        left_span: left.span(),
        right_span: right.span(),
    })
}

fn evaluate_assignment(
    ctx: &mut EvaluationContext,
    left: &Expression,
    right: &Expression,
    _span: Span,
) -> Result<Value, EvaluationError> {
    let Expression::Variable(name, name_span) = left else {
        return Err(ctx.error(
            "cannot assign: assignment can only be performed on variables.",
            left.span(),
        ));
    };
    if name.chars().next().map(|c| c.is_ascii_digit()) == Some(true) {
        return Err(ctx.error(
            format!("cannot assign to ${name}: the name is reserved as a match variable."),
            *name_span,
        ));
    }
    if name.contains("::") {
        return Err(ctx.error(
            format!(
                "cannot assign to ${name}: assignment can only be performed on variables local to the current scope."
            ),
            *name_span,
        ));
    }
    let value = evaluate_expression(ctx, right)?;
    // Assigning from a variable shares the same immutable value.
    let shared = match &value {
        Value::Variable(variable) => variable.value.clone(),
        other => Rc::new(other.clone()),
    };
    let scope = ctx.current_scope();
    let path = ctx.current_path();
    let previous = Scope::set(&scope, name, shared.clone(), path, name_span.start.line);
    if let Some(previous) = previous {
        return Err(match &previous.path {
            Some(previous_path) => ctx.error(
                format!(
                    "cannot assign to ${name}: variable was previously assigned at {previous_path}:{}.",
                    previous.line
                ),
                *name_span,
            ),
            None => ctx.error(
                format!(
                    "cannot assign to ${name}: a fact or node parameter exists with the same name."
                ),
                *name_span,
            ),
        });
    }
    Ok(Value::Variable(VariableValue::new(name.clone(), shared)))
}

// ── Control flow ──

fn evaluate_if(ctx: &mut EvaluationContext, e: &IfExpression) -> Result<Value, EvaluationError> {
    ctx.push_match_scope();
    let result = (|| {
        for (condition, body) in &e.branches {
            if evaluate_expression(ctx, condition)?.is_truthy() {
                return evaluate_statements(ctx, body);
            }
        }
        match &e.else_body {
            Some(body) => evaluate_statements(ctx, body),
            None => Ok(Value::Undef),
        }
    })();
    ctx.pop_match_scope();
    result
}

fn evaluate_unless(
    ctx: &mut EvaluationContext,
    e: &UnlessExpression,
) -> Result<Value, EvaluationError> {
    ctx.push_match_scope();
    let result = (|| {
        if !evaluate_expression(ctx, &e.condition)?.is_truthy() {
            evaluate_statements(ctx, &e.body)
        } else {
            match &e.else_body {
                Some(body) => evaluate_statements(ctx, body),
                None => Ok(Value::Undef),
            }
        }
    })();
    ctx.pop_match_scope();
    result
}

/// Evaluates a subject expression, unfolding a `*`-splat into its elements.
fn evaluate_subjects(
    ctx: &mut EvaluationContext,
    expression: &Expression,
) -> Result<Vec<Value>, EvaluationError> {
    if let Expression::Unary(UnaryOperator::Splat, operand, _) = expression {
        let value = evaluate_expression(ctx, operand)?;
        if let Some(elements) = value.as_array() {
            return Ok(elements.clone());
        }
        return Ok(vec![value]);
    }
    Ok(vec![evaluate_expression(ctx, expression)?])
}

/// Tests one case/selector option against a subject: regexes match with
/// capture installation, types check instances, anything else compares with
/// `==`.
fn option_matches(ctx: &mut EvaluationContext, subject: &Value, option: &Value) -> bool {
    match option.dereference() {
        Value::Regex(regex) => subject
            .as_string()
            .map(|s| match_regex(ctx, regex, s))
            .unwrap_or(false),
        Value::Type(t) => {
            let mut guard = RecursionGuard::new();
            t.is_instance(subject, &mut guard)
        }
        other => other.equals(subject),
    }
}

fn evaluate_case(ctx: &mut EvaluationContext, e: &CaseExpression) -> Result<Value, EvaluationError> {
    ctx.push_match_scope();
    let result = (|| {
        let subjects = evaluate_subjects(ctx, &e.subject)?;
        let mut default_body: Option<&Vec<Statement>> = None;
        for option in &e.options {
            for pattern in &option.patterns {
                if matches!(pattern, Expression::Default(_)) {
                    default_body = Some(&option.body);
                    continue;
                }
                // A splat pattern unfolds into multiple options.
                let option_values = evaluate_subjects(ctx, pattern)?;
                for option_value in &option_values {
                    for subject in &subjects {
                        if option_matches(ctx, subject, option_value) {
                            return evaluate_statements(ctx, &option.body);
                        }
                    }
                }
            }
        }
        match default_body {
            Some(body) => evaluate_statements(ctx, body),
            None => Ok(Value::Undef),
        }
    })();
    ctx.pop_match_scope();
    result
}

fn evaluate_selector(
    ctx: &mut EvaluationContext,
    e: &SelectorExpression,
) -> Result<Value, EvaluationError> {
    ctx.push_match_scope();
    let result = (|| {
        let subjects = evaluate_subjects(ctx, &e.target)?;
        let mut default_value: Option<&Expression> = None;
        for (option, value) in &e.cases {
            if matches!(option, Expression::Default(_)) {
                default_value = Some(value);
                continue;
            }
            let option_values = evaluate_subjects(ctx, option)?;
            for option_value in &option_values {
                for subject in &subjects {
                    if option_matches(ctx, subject, option_value) {
                        return evaluate_expression(ctx, value);
                    }
                }
            }
        }
        match default_value {
            Some(value) => evaluate_expression(ctx, value),
            None => Err(ctx.error(
                format!(
                    "no matching entry for selector parameter with value '{}'.",
                    subjects.first().cloned().unwrap_or_default()
                ),
                e.span,
            )),
        }
    })();
    ctx.pop_match_scope();
    result
}

// ── Calls ──

/// Evaluates call arguments, expanding `*`-splat arrays into multiple
/// arguments.
fn evaluate_arguments(
    ctx: &mut EvaluationContext,
    expressions: &[Expression],
) -> Result<(Vec<Value>, Vec<Span>), EvaluationError> {
    let mut arguments = Vec::with_capacity(expressions.len());
    let mut spans = Vec::with_capacity(expressions.len());
    for expression in expressions {
        if let Expression::Unary(UnaryOperator::Splat, operand, _) = expression {
            let value = evaluate_expression(ctx, operand)?;
            match value.as_array() {
                Some(elements) => {
                    for element in elements {
                        arguments.push(element.clone());
                        spans.push(operand.span());
                    }
                }
                None => {
                    arguments.push(value);
                    spans.push(operand.span());
                }
            }
            continue;
        }
        arguments.push(evaluate_expression(ctx, expression)?);
        spans.push(expression.span());
    }
    Ok((arguments, spans))
}

/// Dispatches a function call: built-ins first, then user-defined functions,
/// then capitalized names as type conversions.
pub fn call_function(
    ctx: &mut EvaluationContext,
    name: &str,
    name_span: Span,
    arguments: Vec<Value>,
    argument_spans: Vec<Span>,
    lambda: Option<&Lambda>,
) -> Result<Value, EvaluationError> {
    if let Some(descriptor) = functions::find(name) {
        return descriptor.dispatch(FunctionContext {
            context: ctx,
            name,
            name_span,
            arguments,
            argument_spans,
            lambda,
        });
    }
    if let Some(definition) = ctx.definitions.functions.get(name).cloned() {
        return invoke_function(ctx, &definition, arguments, name_span);
    }
    // `Integer("0x1f")` dispatches to the type's conversion hook.
    if name.chars().next().map(char::is_uppercase) == Some(true) {
        let target = type_from_name(ctx, name, name_span)?;
        let mut conversion_arguments = vec![Value::Type(Box::new(target))];
        conversion_arguments.extend(arguments);
        let mut conversion_spans = vec![name_span];
        conversion_spans.extend(argument_spans);
        let descriptor = functions::find("new").expect("new is always registered");
        return descriptor.dispatch(FunctionContext {
            context: ctx,
            name: "new",
            name_span,
            arguments: conversion_arguments,
            argument_spans: conversion_spans,
            lambda,
        });
    }
    Err(ctx.error(format!("unknown function '{name}'."), name_span))
}

/// Invokes a user-defined function: parameters bind in a fresh child of the
/// top scope, and a `return` unwinds to the call site.
fn invoke_function(
    ctx: &mut EvaluationContext,
    definition: &FunctionDefinition,
    arguments: Vec<Value>,
    name_span: Span,
) -> Result<Value, EvaluationError> {
    let scope = Scope::child(ctx.top_scope(), None);
    bind_parameters(
        ctx,
        &definition.parameters,
        arguments,
        &scope,
        &format!("function '{}'", definition.name),
        name_span,
    )?;
    ctx.push_frame(StackFrame {
        name: format!("function {}", definition.name),
        scope: ctx.current_scope(),
        path: ctx.current_path(),
        line: name_span.start.line,
    });
    ctx.push_scope(scope);
    let result = evaluate_statements(ctx, &definition.body);
    ctx.pop_scope();
    ctx.pop_frame();
    match result? {
        Value::Return(transfer) => Ok(transfer.value.unwrap_or(Value::Undef)),
        value @ (Value::Break(_) | Value::Next(_)) => Err(control_error(&value)),
        value => Ok(value),
    }
}

/// Binds positional arguments to a parameter list: defaults evaluate in the
/// callee's scope, a trailing `*` capture takes the excess as an array.
fn bind_parameters(
    ctx: &mut EvaluationContext,
    parameters: &[Parameter],
    arguments: Vec<Value>,
    scope: &SharedScope,
    callee: &str,
    span: Span,
) -> Result<(), EvaluationError> {
    let has_captures = parameters.last().map(|p| p.captures).unwrap_or(false);
    let positional = if has_captures {
        parameters.len() - 1
    } else {
        parameters.len()
    };
    if !has_captures && arguments.len() > positional {
        return Err(ctx.error(
            format!(
                "{callee} expects at most {positional} arguments but was given {}.",
                arguments.len()
            ),
            span,
        ));
    }
    let path = ctx.current_path();
    let mut arguments = arguments.into_iter();
    for (index, parameter) in parameters.iter().enumerate() {
        let value = if parameter.captures {
            let rest: Vec<Value> = arguments.by_ref().collect();
            Value::array(rest)
        } else if index < positional {
            match arguments.next() {
                Some(value) => value,
                None => match &parameter.default {
                    Some(default) => {
                        ctx.push_scope(scope.clone());
                        let value = evaluate_expression(ctx, default);
                        ctx.pop_scope();
                        value?
                    }
                    None => {
                        return Err(ctx.error(
                            format!("{callee} expects a value for parameter ${}.", parameter.name),
                            span,
                        ))
                    }
                },
            }
        } else {
            Value::Undef
        };
        check_parameter_type(ctx, parameter, &value)?;
        let shared = match &value {
            Value::Variable(variable) => variable.value.clone(),
            other => Rc::new(other.clone()),
        };
        Scope::set(
            scope,
            &parameter.name,
            shared,
            path.clone(),
            parameter.span.start.line,
        );
    }
    Ok(())
}

fn check_parameter_type(
    ctx: &mut EvaluationContext,
    parameter: &Parameter,
    value: &Value,
) -> Result<(), EvaluationError> {
    let Some(type_expression) = &parameter.type_expression else {
        return Ok(());
    };
    let declared = evaluate_expression(ctx, type_expression)?;
    let Some(declared) = declared.as_type().cloned() else {
        return Err(ctx.error(
            "parameter type must evaluate to a Type.",
            type_expression.span(),
        ));
    };
    let mut guard = RecursionGuard::new();
    if !declared.is_instance(value, &mut guard) {
        return Err(ctx.error(
            format!(
                "parameter ${} expects {} but was given {}.",
                parameter.name,
                declared,
                Type::infer_reduced(value)
            ),
            parameter.span,
        ));
    }
    Ok(())
}

/// Invokes a lambda: parameters bind in a child of the current scope (the
/// closure scope), under a fresh call frame.
pub fn invoke_lambda(
    ctx: &mut EvaluationContext,
    lambda: &Lambda,
    arguments: Vec<Value>,
) -> Result<Value, EvaluationError> {
    invoke_lambda_unchecked(ctx, lambda, arguments)
}

pub fn invoke_lambda_unchecked(
    ctx: &mut EvaluationContext,
    lambda: &Lambda,
    arguments: Vec<Value>,
) -> Result<Value, EvaluationError> {
    let scope = Scope::child(ctx.current_scope(), None);
    bind_parameters(ctx, &lambda.parameters, arguments, &scope, "lambda", lambda.span)?;
    ctx.push_frame(StackFrame {
        name: "<lambda>".to_string(),
        scope: ctx.current_scope(),
        path: ctx.current_path(),
        line: lambda.span.start.line,
    });
    ctx.push_scope(scope);
    let result = evaluate_statements(ctx, &lambda.body);
    ctx.pop_scope();
    ctx.pop_frame();
    result
}

// ── Access ──

fn evaluate_access(
    ctx: &mut EvaluationContext,
    target: &Expression,
    argument_expressions: &[Expression],
) -> Result<Value, EvaluationError> {
    let target_value = evaluate_expression(ctx, target)?;
    let mut arguments = Vec::with_capacity(argument_expressions.len());
    for expression in argument_expressions {
        arguments.push(evaluate_expression(ctx, expression)?);
    }
    let span = target.span();
    if arguments.is_empty() {
        return Err(ctx.error("expected at least one argument for access expression.", span));
    }
    match target_value.dereference() {
        Value::String(s) => access_string(ctx, s, &arguments, span),
        Value::Array(elements) => access_array(ctx, elements, &arguments, span),
        Value::Hash(hash) => {
            if arguments.len() == 1 {
                Ok(hash.get(&arguments[0]).cloned().unwrap_or(Value::Undef))
            } else {
                Ok(Value::array(
                    arguments
                        .iter()
                        .filter_map(|key| hash.get(key).cloned())
                        .collect(),
                ))
            }
        }
        Value::Type(t) => parameterize_type(ctx, t, &arguments, span),
        other => Err(ctx.error(
            format!(
                "access is not supported for {}.",
                Type::infer_reduced(other)
            ),
            span,
        )),
    }
}

fn index_from(ctx: &EvaluationContext, value: &Value, span: Span) -> Result<i64, EvaluationError> {
    value.as_integer().ok_or_else(|| {
        ctx.error(
            format!(
                "expected Integer for index but found {}.",
                Type::infer_reduced(value)
            ),
            span,
        )
    })
}

fn access_string(
    ctx: &EvaluationContext,
    subject: &str,
    arguments: &[Value],
    span: Span,
) -> Result<Value, EvaluationError> {
    let chars: Vec<char> = subject.chars().collect();
    let length = chars.len() as i64;
    let index = index_from(ctx, &arguments[0], span)?;
    let start = if index < 0 { length + index } else { index };
    if arguments.len() == 1 {
        if start < 0 || start >= length {
            return Ok(Value::String(String::new()));
        }
        return Ok(Value::String(chars[start as usize].to_string()));
    }
    let count = index_from(ctx, &arguments[1], span)?;
    let start = start.clamp(0, length);
    let end = if count < 0 {
        // A negative count extends to that many characters from the end.
        (length + count + 1).clamp(start, length)
    } else {
        (start + count).clamp(start, length)
    };
    Ok(Value::String(
        chars[start as usize..end as usize].iter().collect(),
    ))
}

fn access_array(
    ctx: &EvaluationContext,
    elements: &[Value],
    arguments: &[Value],
    span: Span,
) -> Result<Value, EvaluationError> {
    let length = elements.len() as i64;
    let index = index_from(ctx, &arguments[0], span)?;
    let start = if index < 0 { length + index } else { index };
    if arguments.len() == 1 {
        if start < 0 || start >= length {
            return Ok(Value::Undef);
        }
        return Ok(elements[start as usize].clone());
    }
    let count = index_from(ctx, &arguments[1], span)?;
    let start = start.clamp(0, length);
    let end = if count < 0 {
        (length + count + 1).clamp(start, length)
    } else {
        (start + count).clamp(start, length)
    };
    Ok(Value::array(
        elements[start as usize..end as usize].to_vec(),
    ))
}

// ── Type references ──

/// Resolves a type name: built-in types first, then declared aliases, then
/// resource types.
pub fn type_from_name(
    ctx: &mut EvaluationContext,
    name: &str,
    span: Span,
) -> Result<Type, EvaluationError> {
    if let Ok(builtin) = Type::parse(name) {
        return Ok(builtin);
    }
    if let Some(resolved) = ctx.resolved_alias(name) {
        return Ok(resolved);
    }
    if let Some(target) = ctx.definitions.type_aliases.get(name).cloned() {
        let value = evaluate_expression(ctx, &target)?;
        let resolved = value.as_type().cloned().ok_or_else(|| {
            ctx.error(
                format!("type alias '{name}' does not resolve to a type."),
                span,
            )
        })?;
        ctx.cache_alias(name.to_string(), resolved.clone());
        return Ok(resolved);
    }
    Ok(Type::Resource {
        type_name: Some(normalize_type_name(name)),
        title: None,
    })
}

fn bound_from(value: &Value, default: i64) -> Option<i64> {
    match value.dereference() {
        Value::Integer(i) => Some(*i),
        Value::Default => Some(default),
        _ => None,
    }
}

fn type_argument(ctx: &mut EvaluationContext, value: &Value, span: Span) -> Result<Type, EvaluationError> {
    value.as_type().cloned().ok_or_else(|| {
        ctx.error(
            format!(
                "expected Type for type parameter but found {}.",
                Type::infer_reduced(value)
            ),
            span,
        )
    })
}

/// Applies `[...]` parameters to a type reference, e.g. `Integer[0, 10]` or
/// `File['/tmp/x']`.
fn parameterize_type(
    ctx: &mut EvaluationContext,
    base: &Type,
    arguments: &[Value],
    span: Span,
) -> Result<Value, EvaluationError> {
    if arguments.is_empty() {
        return Err(ctx.error("expected at least one type parameter.", span));
    }
    let invalid = |ctx: &EvaluationContext, expected: &str, found: &Value| {
        ctx.error(
            format!(
                "invalid type parameter: expected {expected} but found {}.",
                Type::infer_reduced(found)
            ),
            span,
        )
    };
    let bounds = |ctx: &EvaluationContext,
                  arguments: &[Value],
                  default_from: i64,
                  default_to: i64|
     -> Result<(i64, i64), EvaluationError> {
        let from = match arguments.first() {
            Some(value) => bound_from(value, default_from)
                .ok_or_else(|| invalid(ctx, "Integer", value))?,
            None => default_from,
        };
        let to = match arguments.get(1) {
            Some(value) => {
                bound_from(value, default_to).ok_or_else(|| invalid(ctx, "Integer", value))?
            }
            None => default_to,
        };
        Ok((from, to))
    };

    let result = match base {
        Type::Integer { .. } => {
            let (from, to) = bounds(ctx, arguments, i64::MIN, i64::MAX)?;
            Type::Integer { from, to }
        }
        Type::Float { .. } => {
            let float_bound = |value: &Value, default: f64| -> Option<f64> {
                match value.dereference() {
                    Value::Float(f) => Some(*f),
                    Value::Integer(i) => Some(*i as f64),
                    Value::Default => Some(default),
                    _ => None,
                }
            };
            let from = float_bound(&arguments[0], f64::NEG_INFINITY)
                .ok_or_else(|| invalid(ctx, "Numeric", &arguments[0]))?;
            let to = match arguments.get(1) {
                Some(value) => {
                    float_bound(value, f64::INFINITY).ok_or_else(|| invalid(ctx, "Numeric", value))?
                }
                None => f64::INFINITY,
            };
            Type::Float { from, to }
        }
        Type::String { .. } => {
            let (from, to) = bounds(ctx, arguments, 0, i64::MAX)?;
            Type::String { from, to }
        }
        Type::Array { .. } => {
            let element = type_argument(ctx, &arguments[0], span)?;
            let (from, to) = bounds(ctx, &arguments[1..], 0, i64::MAX)?;
            Type::Array {
                element: Box::new(element),
                from,
                to,
            }
        }
        Type::Hash { .. } => {
            if arguments.len() < 2 {
                return Err(ctx.error("Hash[K, V] requires two type parameters.", span));
            }
            let key = type_argument(ctx, &arguments[0], span)?;
            let value = type_argument(ctx, &arguments[1], span)?;
            let (from, to) = bounds(ctx, &arguments[2..], 0, i64::MAX)?;
            Type::Hash {
                key: Box::new(key),
                value: Box::new(value),
                from,
                to,
            }
        }
        Type::Collection { .. } => {
            let (from, to) = bounds(ctx, arguments, 0, i64::MAX)?;
            Type::Collection { from, to }
        }
        Type::Enum(_) => {
            let mut strings = Vec::new();
            for value in arguments {
                match value.as_string() {
                    Some(s) => strings.push(s.to_string()),
                    None => return Err(invalid(ctx, "String", value)),
                }
            }
            Type::Enum(strings)
        }
        Type::Pattern(_) => {
            let mut patterns = Vec::new();
            for value in arguments {
                let pattern = match value.dereference() {
                    Value::String(s) => RegexValue::new(s)
                        .map_err(|e| ctx.error(format!("invalid regular expression: {e}"), span))?,
                    Value::Regex(r) => r.clone(),
                    other => return Err(invalid(ctx, "String or Regexp", other)),
                };
                patterns.push(pattern);
            }
            Type::Pattern(patterns)
        }
        Type::Regexp(_) => match arguments[0].dereference() {
            Value::String(s) => Type::Regexp(Some(s.clone())),
            Value::Regex(r) => Type::Regexp(Some(r.pattern.clone())),
            other => return Err(invalid(ctx, "String or Regexp", other)),
        },
        Type::Variant(_) => {
            let mut types = Vec::new();
            for value in arguments {
                types.push(type_argument(ctx, value, span)?);
            }
            Type::Variant(types)
        }
        Type::Tuple { .. } => {
            let mut types = Vec::new();
            let mut index = 0;
            while index < arguments.len() {
                match arguments[index].dereference() {
                    Value::Type(t) => {
                        types.push((**t).clone());
                        index += 1;
                    }
                    _ => break,
                }
            }
            let count = types.len() as i64;
            let (from, to) = bounds(ctx, &arguments[index..], count, i64::MAX)?;
            let (from, to) = if index == arguments.len() {
                (count, count)
            } else {
                (from, to)
            };
            Type::Tuple { types, from, to }
        }
        Type::Struct(_) => {
            let Some(hash) = arguments[0].as_hash() else {
                return Err(invalid(ctx, "Hash", &arguments[0]));
            };
            let mut members = Vec::new();
            for (key, value) in hash.iter() {
                let Some(name) = key.as_string() else {
                    return Err(invalid(ctx, "String", key));
                };
                let Some(member) = value.as_type() else {
                    return Err(invalid(ctx, "Type", value));
                };
                members.push((name.to_string(), member.clone()));
            }
            Type::Struct(members)
        }
        Type::Optional(_) => Type::Optional(Some(Box::new(type_argument(ctx, &arguments[0], span)?))),
        Type::NotUndef(_) => Type::NotUndef(Some(Box::new(type_argument(ctx, &arguments[0], span)?))),
        Type::Iterator(_) => Type::Iterator(Some(Box::new(type_argument(ctx, &arguments[0], span)?))),
        Type::Iterable(_) => Type::Iterable(Some(Box::new(type_argument(ctx, &arguments[0], span)?))),
        Type::TypeReference(_) => {
            Type::TypeReference(Some(Box::new(type_argument(ctx, &arguments[0], span)?)))
        }
        Type::Class(None) => {
            let mut classes = Vec::new();
            for value in arguments {
                match value.as_string() {
                    Some(title) => classes.push(Value::Type(Box::new(Type::class(title)))),
                    None => return Err(invalid(ctx, "String", value)),
                }
            }
            if classes.len() == 1 {
                return Ok(classes.into_iter().next().unwrap_or(Value::Undef));
            }
            return Ok(Value::array(classes));
        }
        Type::Resource {
            type_name: None, ..
        } => {
            let Some(name) = arguments[0].as_string() else {
                return Err(invalid(ctx, "String", &arguments[0]));
            };
            let base = Type::Resource {
                type_name: Some(normalize_type_name(name)),
                title: None,
            };
            if arguments.len() == 1 {
                base
            } else {
                return parameterize_type(ctx, &base, &arguments[1..], span);
            }
        }
        Type::Resource {
            type_name: Some(type_name),
            title: None,
        } => {
            let mut references = Vec::new();
            for value in arguments {
                collect_titles(value, &mut references);
            }
            let references: Vec<Value> = references
                .into_iter()
                .map(|title| {
                    Value::Type(Box::new(Type::Resource {
                        type_name: Some(type_name.clone()),
                        title: Some(title),
                    }))
                })
                .collect();
            if references.len() == 1 {
                return Ok(references.into_iter().next().unwrap_or(Value::Undef));
            }
            return Ok(Value::array(references));
        }
        other => {
            return Err(ctx.error(
                format!("type {} cannot be parameterized.", other.name()),
                span,
            ))
        }
    };
    Ok(Value::Type(Box::new(result)))
}

fn collect_titles(value: &Value, out: &mut Vec<String>) {
    match value.dereference() {
        Value::Array(elements) => {
            for element in elements.iter() {
                collect_titles(element, out);
            }
        }
        other => out.push(other.to_string()),
    }
}

// ── Relationships ──

fn evaluate_relationship(
    ctx: &mut EvaluationContext,
    relationship: &Relationship,
) -> Result<Value, EvaluationError> {
    let mut previous = evaluate_expression(ctx, &relationship.first)?;
    let path = ctx.current_path();
    for (operator, operand) in &relationship.rest {
        let next = evaluate_expression(ctx, operand)?;
        let (kind, source, target) = match operator {
            RelationshipOperator::Before => {
                (RelationshipKind::Before, previous.clone(), next.clone())
            }
            RelationshipOperator::Notify => {
                (RelationshipKind::Notify, previous.clone(), next.clone())
            }
            RelationshipOperator::After => {
                (RelationshipKind::Require, next.clone(), previous.clone())
            }
            RelationshipOperator::Subscribe => {
                (RelationshipKind::Subscribe, next.clone(), previous.clone())
            }
        };
        ctx.catalog.relate(PendingRelationship {
            kind,
            source,
            target,
            path: path.clone(),
            span: operand.span(),
        });
        previous = next;
    }
    Ok(previous)
}

// ── Resource expressions ──

/// An evaluated attribute operation from a resource body.
#[derive(Clone)]
pub(crate) struct EvaluatedAttribute {
    name: String,
    operator: AttributeOperator,
    value: Value,
    name_span: Span,
    value_span: Span,
}

fn evaluate_attribute_operations(
    ctx: &mut EvaluationContext,
    operations: &[AttributeOperation],
) -> Result<Vec<EvaluatedAttribute>, EvaluationError> {
    let mut evaluated = Vec::with_capacity(operations.len());
    for operation in operations {
        let value = evaluate_expression(ctx, &operation.value)?.into_dereferenced();
        if operation.name == "*" {
            // The splat attribute expands a hash into individual attributes.
            let Some(hash) = value.as_hash() else {
                return Err(ctx.error(
                    format!(
                        "expected Hash for splat attribute but found {}.",
                        Type::infer_reduced(&value)
                    ),
                    operation.value.span(),
                ));
            };
            for (key, entry_value) in hash.iter() {
                let Some(name) = key.as_string() else {
                    return Err(ctx.error(
                        "splat attribute keys must be strings.",
                        operation.value.span(),
                    ));
                };
                evaluated.push(EvaluatedAttribute {
                    name: name.to_string(),
                    operator: operation.operator,
                    value: entry_value.clone(),
                    name_span: operation.name_span,
                    value_span: operation.value.span(),
                });
            }
            continue;
        }
        evaluated.push(EvaluatedAttribute {
            name: operation.name.clone(),
            operator: operation.operator,
            value,
            name_span: operation.name_span,
            value_span: operation.value.span(),
        });
    }
    Ok(evaluated)
}

fn evaluate_resource(
    ctx: &mut EvaluationContext,
    resource: &ResourceExpression,
) -> Result<Value, EvaluationError> {
    // A `default:` body supplies attributes merged after explicit ones.
    let mut body_defaults: Vec<EvaluatedAttribute> = Vec::new();
    for body in &resource.bodies {
        if matches!(body.title, Expression::Default(_)) {
            body_defaults = evaluate_attribute_operations(ctx, &body.operations)?;
        }
    }

    let is_class = resource.type_name.eq_ignore_ascii_case("class");
    let defined_name = normalize_class_name(&resource.type_name);
    if !is_class && !ctx.definitions.defined_types.contains_key(&defined_name) {
        crate::loader::load_definition(ctx, &defined_name, resource.type_span)?;
    }
    let defined_type = ctx.definitions.defined_types.get(&defined_name).cloned();

    if is_class && resource.status != ResourceStatus::Realized {
        return Err(ctx.error(
            "classes cannot be virtual or exported.",
            resource.type_span,
        ));
    }

    let mut references = Vec::new();
    for body in &resource.bodies {
        if matches!(body.title, Expression::Default(_)) {
            continue;
        }
        let mut attributes = evaluate_attribute_operations(ctx, &body.operations)?;
        for default in &body_defaults {
            if !attributes.iter().any(|a| a.name == default.name) {
                attributes.push(default.clone());
            }
        }
        let title_value = evaluate_expression(ctx, &body.title)?;
        let mut titles = Vec::new();
        collect_resource_titles(ctx, &title_value, &mut titles, body.title.span())?;
        for title in titles {
            let reference = if is_class {
                let index = declare_class(ctx, &title, Some(attributes.clone()), body.title.span())?;
                ctx.catalog.resource(index).reference()
            } else if let Some(definition) = &defined_type {
                declare_defined_resource(ctx, definition, &title, &attributes, resource, body)?
            } else {
                declare_plain_resource(ctx, resource, &title, &attributes, body.title.span())?
            };
            references.push(Value::Type(Box::new(reference)));
        }
    }
    Ok(Value::array(references))
}

fn collect_resource_titles(
    ctx: &EvaluationContext,
    value: &Value,
    out: &mut Vec<String>,
    span: Span,
) -> Result<(), EvaluationError> {
    match value.dereference() {
        Value::Array(elements) => {
            for element in elements.iter() {
                collect_resource_titles(ctx, element, out, span)?;
            }
            Ok(())
        }
        Value::String(title) => {
            if title.is_empty() {
                return Err(ctx.error("resource title cannot be empty.", span));
            }
            out.push(title.clone());
            Ok(())
        }
        other => Err(ctx.error(
            format!(
                "expected String for resource title but found {}.",
                Type::infer_reduced(other)
            ),
            span,
        )),
    }
}

fn duplicate_error(ctx: &EvaluationContext, existing: usize, span: Span) -> EvaluationError {
    let existing = ctx.catalog.resource(existing);
    ctx.error(
        format!(
            "resource {existing} was previously declared at {}:{}.",
            existing.path, existing.line
        ),
        span,
    )
}

fn attribute_record(ctx: &EvaluationContext, attribute: &EvaluatedAttribute) -> Attribute {
    Attribute {
        name: attribute.name.clone(),
        value: attribute.value.clone(),
        name_span: attribute.name_span,
        value_span: attribute.value_span,
        path: ctx.current_path(),
    }
}

fn declare_plain_resource(
    ctx: &mut EvaluationContext,
    expression: &ResourceExpression,
    title: &str,
    attributes: &[EvaluatedAttribute],
    span: Span,
) -> Result<Type, EvaluationError> {
    let scope = ctx.current_scope();
    let mut resource = Resource {
        type_name: expression.type_name.clone(),
        title: title.to_string(),
        attributes: IndexMap::new(),
        virtual_: expression.status != ResourceStatus::Realized,
        exported: expression.status == ResourceStatus::Exported,
        realized: false,
        tags: Vec::new(),
        scope: Some(scope.clone()),
        path: ctx.current_path(),
        line: span.start.line,
    };
    for attribute in attributes {
        if attribute.name == "tag" {
            add_tag_values(&mut resource, &attribute.value);
            continue;
        }
        let value = match attribute.operator {
            AttributeOperator::Assign => attribute.value.clone(),
            AttributeOperator::Append => {
                // `+>` appends to the value a scope default would supply.
                let defaults =
                    Scope::visible_defaults(&scope, &normalize_type_name(&expression.type_name));
                let mut elements = match defaults.iter().find(|d| d.name == attribute.name) {
                    Some(default) => match default.value.dereference() {
                        Value::Array(items) => items.as_ref().clone(),
                        other => vec![other.clone()],
                    },
                    None => Vec::new(),
                };
                match attribute.value.dereference() {
                    Value::Array(items) => elements.extend(items.iter().cloned()),
                    other => elements.push(other.clone()),
                }
                Value::array(elements)
            }
        };
        resource.set_attribute(Attribute {
            value,
            ..attribute_record(ctx, attribute)
        });
    }
    match ctx.catalog.add(resource) {
        Ok(index) => Ok(ctx.catalog.resource(index).reference()),
        Err(existing) => Err(duplicate_error(ctx, existing, span)),
    }
}

fn add_tag_values(resource: &mut Resource, value: &Value) {
    match value.dereference() {
        Value::Array(elements) => {
            for element in elements.iter() {
                add_tag_values(resource, element);
            }
        }
        other => resource.add_tag(&other.to_string()),
    }
}

/// Declares a class resource and evaluates its body once per catalog.
pub(crate) fn declare_class(
    ctx: &mut EvaluationContext,
    title: &str,
    arguments: Option<Vec<EvaluatedAttribute>>,
    span: Span,
) -> Result<usize, EvaluationError> {
    let title = normalize_class_name(title);
    let has_arguments = arguments
        .as_ref()
        .map(|args| !args.is_empty())
        .unwrap_or(false);
    if let Some(existing) = ctx.class_declared(&title) {
        if has_arguments {
            return Err(ctx.error(
                format!("class '{title}' is already declared."),
                span,
            ));
        }
        return Ok(existing);
    }
    // Fall back to the module loader before giving up on the definition.
    if !ctx.definitions.classes.contains_key(&title) {
        crate::loader::load_definition(ctx, &title, span)?;
    }
    let Some(definition) = ctx.definitions.classes.get(&title).cloned() else {
        return Err(ctx.error(format!("class '{title}' has not been defined."), span));
    };

    // Declare the parent first; the class scope hangs from the parent's.
    let parent_scope = match &definition.parent {
        Some(parent) => {
            let parent_title = normalize_class_name(parent);
            declare_class(ctx, &parent_title, None, span)?;
            ctx.class_scope(&parent_title)
                .unwrap_or_else(|| ctx.top_scope())
        }
        None => ctx.top_scope(),
    };

    let resource = Resource {
        type_name: "Class".to_string(),
        title: title.clone(),
        attributes: IndexMap::new(),
        virtual_: false,
        exported: false,
        realized: true,
        tags: Vec::new(),
        scope: None,
        path: ctx.current_path(),
        line: span.start.line,
    };
    let index = match ctx.catalog.add(resource) {
        Ok(index) => index,
        Err(existing) => return Err(duplicate_error(ctx, existing, span)),
    };

    let scope = Scope::child(parent_scope, Some(index));
    scope.borrow_mut().set_resource(index);
    ctx.catalog.resource_mut(index).scope = Some(scope.clone());
    ctx.mark_class_declared(title.clone(), index, scope.clone());

    evaluate_parameterized_body(
        ctx,
        &scope,
        index,
        &definition.parameters,
        arguments.unwrap_or_default(),
        &definition.body,
        &title,
        &format!("class {title}"),
        span,
    )?;
    Ok(index)
}

fn declare_defined_resource(
    ctx: &mut EvaluationContext,
    definition: &DefinedTypeDefinition,
    title: &str,
    attributes: &[EvaluatedAttribute],
    expression: &ResourceExpression,
    body: &ResourceBody,
) -> Result<Type, EvaluationError> {
    let span = body.title.span();
    let resource = Resource {
        type_name: definition.name.clone(),
        title: title.to_string(),
        attributes: IndexMap::new(),
        virtual_: expression.status != ResourceStatus::Realized,
        exported: expression.status == ResourceStatus::Exported,
        realized: false,
        tags: Vec::new(),
        scope: None,
        path: ctx.current_path(),
        line: span.start.line,
    };
    let index = match ctx.catalog.add(resource) {
        Ok(index) => index,
        Err(existing) => return Err(duplicate_error(ctx, existing, span)),
    };
    let scope = Scope::child(ctx.top_scope(), Some(index));
    ctx.catalog.resource_mut(index).scope = Some(scope.clone());
    evaluate_parameterized_body(
        ctx,
        &scope,
        index,
        &definition.parameters,
        attributes.to_vec(),
        &definition.body,
        title,
        &format!("{}[{title}]", normalize_type_name(&definition.name)),
        span,
    )?;
    Ok(ctx.catalog.resource(index).reference())
}

/// Binds declaration arguments against declared parameters, records them as
/// resource attributes, and evaluates the body under the new scope.
#[allow(clippy::too_many_arguments)]
fn evaluate_parameterized_body(
    ctx: &mut EvaluationContext,
    scope: &SharedScope,
    index: usize,
    parameters: &[Parameter],
    arguments: Vec<EvaluatedAttribute>,
    body: &[Statement],
    title: &str,
    frame_name: &str,
    span: Span,
) -> Result<(), EvaluationError> {
    let path = ctx.current_path();

    // Split the arguments into declared parameters and metaparameters.
    let mut provided: Vec<EvaluatedAttribute> = Vec::new();
    for attribute in arguments {
        if parameters.iter().any(|p| p.name == attribute.name) {
            provided.push(attribute);
            continue;
        }
        if attribute.name == "tag" {
            let mut tags = Vec::new();
            collect_titles(&attribute.value, &mut tags);
            for tag in tags {
                ctx.catalog.tag_resource(index, &tag);
            }
            continue;
        }
        if METAPARAMETERS.contains(&attribute.name.as_str()) {
            let record = attribute_record(ctx, &attribute);
            ctx.catalog.resource_mut(index).set_attribute(record);
            continue;
        }
        return Err(ctx.error(
            format!(
                "'{}' is not a valid parameter for {frame_name}.",
                attribute.name
            ),
            attribute.name_span,
        ));
    }

    // $title and $name are implicitly bound.
    for implicit in ["title", "name"] {
        Scope::set(
            scope,
            implicit,
            Rc::new(Value::string(title.to_string())),
            path.clone(),
            span.start.line,
        );
    }

    for parameter in parameters {
        let attribute = provided.iter().find(|a| a.name == parameter.name);
        let value = match attribute {
            Some(attribute) => attribute.value.clone(),
            None => match &parameter.default {
                // Defaults evaluate in the body's scope, not the caller's.
                Some(default) => {
                    ctx.push_scope(scope.clone());
                    let value = evaluate_expression(ctx, default);
                    ctx.pop_scope();
                    value?.into_dereferenced()
                }
                None => {
                    return Err(ctx.error(
                        format!("expected a value for parameter ${}.", parameter.name),
                        span,
                    ))
                }
            },
        };
        check_parameter_type(ctx, parameter, &value)?;
        Scope::set(
            scope,
            &parameter.name,
            Rc::new(value.clone()),
            path.clone(),
            parameter.span.start.line,
        );
        let record = Attribute {
            name: parameter.name.clone(),
            value,
            name_span: attribute.map(|a| a.name_span).unwrap_or(parameter.span),
            value_span: attribute.map(|a| a.value_span).unwrap_or(parameter.span),
            path: path.clone(),
        };
        ctx.catalog.resource_mut(index).set_attribute(record);
    }

    ctx.push_frame(StackFrame {
        name: frame_name.to_string(),
        scope: ctx.current_scope(),
        path: path.clone(),
        line: span.start.line,
    });
    ctx.push_scope(scope.clone());
    let result = evaluate_statements(ctx, body);
    ctx.pop_scope();
    ctx.pop_frame();
    let value = result?;
    if value.is_control_transfer() {
        return Err(control_error(&value));
    }
    Ok(())
}

// ── Defaults, overrides, collectors ──

fn evaluate_resource_defaults(
    ctx: &mut EvaluationContext,
    defaults: &ResourceDefaultsExpression,
) -> Result<Value, EvaluationError> {
    let attributes = evaluate_attribute_operations(ctx, &defaults.operations)?;
    let type_name = normalize_type_name(&defaults.type_name);
    let path = ctx.current_path();
    let scope = ctx.current_scope();
    for attribute in attributes {
        scope.borrow_mut().add_default(
            type_name.clone(),
            DefaultAttribute {
                name: attribute.name,
                value: attribute.value,
                path: path.clone(),
                line: attribute.name_span.start.line,
            },
        );
    }
    Ok(Value::Undef)
}

fn evaluate_resource_override(
    ctx: &mut EvaluationContext,
    over: &ResourceOverrideExpression,
) -> Result<Value, EvaluationError> {
    let reference_value = evaluate_expression(ctx, &over.reference)?;
    let attributes = evaluate_attribute_operations(ctx, &over.operations)?;
    let appends: HashSet<String> = attributes
        .iter()
        .filter(|a| a.operator == AttributeOperator::Append)
        .map(|a| a.name.clone())
        .collect();
    let records: Vec<Attribute> = attributes
        .iter()
        .map(|attribute| attribute_record(ctx, attribute))
        .collect();
    let mut references = Vec::new();
    crate::catalog::each_resource(&reference_value, &mut references)
        .map_err(|message| ctx.error(message, over.reference.span()))?;
    let path = ctx.current_path();
    for reference in references {
        ctx.catalog.add_override(PendingOverride {
            reference,
            attributes: records.clone(),
            appends: appends.clone(),
            path: path.clone(),
            span: over.span,
        });
    }
    Ok(reference_value)
}

fn evaluate_collector(
    ctx: &mut EvaluationContext,
    collector: &CollectorExpression,
) -> Result<Value, EvaluationError> {
    let query = collector
        .query
        .as_ref()
        .map(|query| evaluate_query(ctx, query))
        .transpose()?;
    ctx.catalog.add_collector(Collector::Query(QueryCollector::new(
        normalize_type_name(&collector.type_name),
        query,
        collector.exported,
    )));
    Ok(Value::Runtime(RuntimeValue::new("Collector", Rc::new(()))))
}

fn evaluate_query(
    ctx: &mut EvaluationContext,
    query: &Query,
) -> Result<CollectorQuery, EvaluationError> {
    Ok(match query {
        Query::Condition {
            attribute,
            negated,
            value,
            ..
        } => CollectorQuery::Condition {
            attribute: attribute.clone(),
            negated: *negated,
            value: evaluate_expression(ctx, value)?.into_dereferenced(),
        },
        Query::And(left, right) => CollectorQuery::And(
            Box::new(evaluate_query(ctx, left)?),
            Box::new(evaluate_query(ctx, right)?),
        ),
        Query::Or(left, right) => CollectorQuery::Or(
            Box::new(evaluate_query(ctx, left)?),
            Box::new(evaluate_query(ctx, right)?),
        ),
    })
}
