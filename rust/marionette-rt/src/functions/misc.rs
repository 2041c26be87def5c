//! `assert_type`, `new`, `type`, and the template functions.

use super::{FunctionContext, FunctionDescriptor};
use crate::epp;
use crate::errors::EvaluationError;
use marionette_core::{RecursionGuard, Type, Value};

pub(super) fn register(add: &mut impl FnMut(FunctionDescriptor)) {
    add(assert_type_descriptor());
    add(new_descriptor());
    add(type_descriptor());
    add(epp_descriptor());
    add(inline_epp_descriptor());
}

fn expected_type(call: &FunctionContext) -> Result<Type, EvaluationError> {
    match call.argument(0).dereference() {
        Value::Type(t) => Ok((**t).clone()),
        Value::String(s) => Type::parse(s).map_err(|e| call.error(e.to_string(), call.argument_span(0))),
        other => Err(call.error(
            format!(
                "expected Type or String for first argument but found {}.",
                Type::infer_reduced(other)
            ),
            call.argument_span(0),
        )),
    }
}

fn assert_type_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("assert_type");
    d.add("Callable[Variant[Type, String], Any, 2, 2]", |call| {
        let expected = expected_type(call)?;
        let value = call.argument(1).clone();
        let mut guard = RecursionGuard::new();
        if expected.is_instance(&value, &mut guard) {
            return Ok(value);
        }
        let actual = Type::infer_reduced(&value);
        if call.has_lambda() {
            return call.yield_lambda(vec![
                Value::Type(Box::new(expected)),
                Value::Type(Box::new(actual)),
            ]);
        }
        Err(call.error(
            format!("type assertion failure: expected {expected} but found {actual}."),
            call.argument_span(1),
        ))
    });
    d
}

fn new_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("new");
    d.add("Callable[Type, Any, 2, default]", |call| {
        let target = match call.argument(0).dereference() {
            Value::Type(t) => (**t).clone(),
            _ => unreachable!("signature guarantees a type"),
        };
        let from = call.argument(1).clone();
        let extras: Vec<Value> = call.arguments.iter().skip(2).cloned().collect();
        let converted = target.instantiate(from, &extras).map_err(|e| {
            // The failing value is argument 1 of the call.
            call.error(e.to_string(), call.argument_span(1))
        })?;
        if call.has_lambda() {
            return call.yield_lambda(vec![converted]);
        }
        Ok(converted)
    });
    d
}

fn type_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("type");
    d.add("Callable[Any, 1, 1]", |call| {
        Ok(Value::Type(Box::new(Type::infer(call.argument(0)))))
    });
    d
}

fn epp_arguments(call: &FunctionContext, index: usize) -> Result<Vec<(String, Value)>, EvaluationError> {
    let Some(argument) = call.arguments.get(index) else {
        return Ok(Vec::new());
    };
    let Some(hash) = argument.as_hash() else {
        return Ok(Vec::new());
    };
    let mut pairs = Vec::new();
    for (key, value) in hash.iter() {
        let Some(name) = key.as_string() else {
            return Err(call.error(
                "template argument keys must be strings.",
                call.argument_span(index),
            ));
        };
        pairs.push((name.to_string(), value.clone()));
    }
    Ok(pairs)
}

fn epp_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("epp");
    d.add("Callable[String, Variant[Hash[Any, Any], Undef], 1, 2]", |call| {
        let path = call.argument(0).as_string().unwrap_or_default().to_string();
        let arguments = epp_arguments(call, 1)?;
        let source = std::fs::read_to_string(&path).map_err(|e| {
            call.error(
                format!("cannot read template '{path}': {e}."),
                call.argument_span(0),
            )
        })?;
        epp::evaluate(call.context, &path, &source, arguments, call.name_span)
            .map(Value::String)
    });
    d
}

fn inline_epp_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("inline_epp");
    d.add("Callable[String, Variant[Hash[Any, Any], Undef], 1, 2]", |call| {
        let source = call.argument(0).as_string().unwrap_or_default().to_string();
        let arguments = epp_arguments(call, 1)?;
        epp::evaluate(call.context, "<inline-epp>", &source, arguments, call.name_span)
            .map(Value::String)
    });
    d
}
