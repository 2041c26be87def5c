//! Iteration functions: `each`, `map`, `filter`, `reduce`, `step`,
//! `reverse_each`, and `with`.
//!
//! Iterators observe control-transfer values after each lambda invocation:
//! `break` halts iteration, `next` supplies the iteration's value, and
//! `return` propagates out through the iterator.

use super::{FunctionContext, FunctionDescriptor};
use crate::errors::EvaluationError;
use marionette_compiler::tokens::Span;
use marionette_core::values::{HashValue, IteratorKind, IteratorValue};
use marionette_core::{Type, Value};

pub(super) fn register(add: &mut impl FnMut(FunctionDescriptor)) {
    add(each_descriptor());
    add(map_descriptor());
    add(filter_descriptor());
    add(reduce_descriptor());
    add(step_descriptor());
    add(reverse_each_descriptor());
    add(with_descriptor());
}

/// The items an iterable yields: the single-parameter form and the
/// two-parameter form (index/value or key/value).
struct Items {
    single: Vec<Value>,
    pairs: Vec<(Value, Value)>,
    from_hash: bool,
}

fn items_of(call: &FunctionContext, value: &Value, span: Span) -> Result<Items, EvaluationError> {
    match value.dereference() {
        Value::Array(elements) => Ok(Items {
            single: elements.as_ref().clone(),
            pairs: elements
                .iter()
                .enumerate()
                .map(|(i, e)| (Value::Integer(i as i64), e.clone()))
                .collect(),
            from_hash: false,
        }),
        Value::Hash(hash) => Ok(Items {
            single: hash
                .iter()
                .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                .collect(),
            pairs: hash.iter().cloned().collect(),
            from_hash: true,
        }),
        Value::String(s) => {
            let chars: Vec<Value> = s.chars().map(|c| Value::String(c.to_string())).collect();
            let pairs = chars
                .iter()
                .enumerate()
                .map(|(i, c)| (Value::Integer(i as i64), c.clone()))
                .collect();
            Ok(Items {
                single: chars,
                pairs,
                from_hash: false,
            })
        }
        Value::Integer(count) if *count >= 0 => {
            let values: Vec<Value> = (0..*count).map(Value::Integer).collect();
            let pairs = values
                .iter()
                .map(|v| (v.clone(), v.clone()))
                .collect();
            Ok(Items {
                single: values,
                pairs,
                from_hash: false,
            })
        }
        Value::Iterator(iterator) => match iterator.elements() {
            Some(values) => {
                let pairs = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (Value::Integer(i as i64), v.clone()))
                    .collect();
                Ok(Items {
                    single: values,
                    pairs,
                    from_hash: false,
                })
            }
            None => Err(call.error("iterator cannot be materialized.", span)),
        },
        other => Err(call.error(
            format!(
                "expected Iterable for first argument but found {}.",
                Type::infer_reduced(other)
            ),
            span,
        )),
    }
}

fn lambda_arity(call: &FunctionContext) -> usize {
    call.lambda
        .map(|lambda| {
            if lambda.parameters.iter().any(|p| p.captures) {
                1
            } else {
                lambda.parameters.len()
            }
        })
        .unwrap_or(1)
}

/// Builds the lambda argument list for one item.
fn item_arguments(items: &Items, index: usize, arity: usize) -> Vec<Value> {
    if arity >= 2 {
        let (a, b) = items.pairs[index].clone();
        vec![a, b]
    } else {
        vec![items.single[index].clone()]
    }
}

enum Outcome {
    Value(Value),
    Break,
    Propagate(Value),
}

fn run_lambda(call: &mut FunctionContext, arguments: Vec<Value>) -> Result<Outcome, EvaluationError> {
    match call.yield_lambda(arguments)? {
        Value::Break(_) => Ok(Outcome::Break),
        Value::Next(transfer) => Ok(Outcome::Value(transfer.value.unwrap_or(Value::Undef))),
        value @ Value::Return(_) => Ok(Outcome::Propagate(value)),
        value => Ok(Outcome::Value(value)),
    }
}

fn each_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("each");
    d.add("Callable[Iterable, 1, 1]", |call| {
        let receiver = call.argument(0).clone();
        let items = items_of(call, &receiver, call.argument_span(0))?;
        let arity = lambda_arity(call);
        for index in 0..items.single.len() {
            match run_lambda(call, item_arguments(&items, index, arity))? {
                Outcome::Break => break,
                Outcome::Propagate(value) => return Ok(value),
                Outcome::Value(_) => {}
            }
        }
        Ok(receiver)
    });
    d
}

fn map_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("map");
    d.add("Callable[Iterable, 1, 1]", |call| {
        let receiver = call.argument(0).clone();
        let items = items_of(call, &receiver, call.argument_span(0))?;
        let arity = lambda_arity(call);
        let mut results = Vec::new();
        for index in 0..items.single.len() {
            match run_lambda(call, item_arguments(&items, index, arity))? {
                Outcome::Break => break,
                Outcome::Propagate(value) => return Ok(value),
                Outcome::Value(value) => results.push(value),
            }
        }
        Ok(Value::array(results))
    });
    d
}

fn filter_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("filter");
    d.add("Callable[Iterable, 1, 1]", |call| {
        let receiver = call.argument(0).clone();
        let items = items_of(call, &receiver, call.argument_span(0))?;
        let arity = lambda_arity(call);
        let mut kept = Vec::new();
        for index in 0..items.single.len() {
            match run_lambda(call, item_arguments(&items, index, arity))? {
                Outcome::Break => break,
                Outcome::Propagate(value) => return Ok(value),
                Outcome::Value(value) => {
                    if value.is_truthy() {
                        kept.push(index);
                    }
                }
            }
        }
        if items.from_hash {
            let hash: HashValue = kept
                .into_iter()
                .map(|index| items.pairs[index].clone())
                .collect();
            Ok(Value::hash(hash))
        } else {
            Ok(Value::array(
                kept.into_iter().map(|index| items.single[index].clone()).collect(),
            ))
        }
    });
    d
}

fn reduce_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("reduce");
    d.add("Callable[Iterable, 1, 2]", |call| {
        let receiver = call.argument(0).clone();
        let items = items_of(call, &receiver, call.argument_span(0))?;
        let mut iterator = items.single.into_iter();
        let mut memo = match call.arguments.get(1) {
            Some(initial) => initial.clone(),
            None => match iterator.next() {
                Some(first) => first,
                None => return Ok(Value::Undef),
            },
        };
        for item in iterator {
            match run_lambda(call, vec![memo.clone(), item])? {
                Outcome::Break => break,
                Outcome::Propagate(value) => return Ok(value),
                Outcome::Value(value) => memo = value,
            }
        }
        Ok(memo)
    });
    d
}

fn step_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("step");
    d.add("Callable[Iterable, Integer, 2, 2]", |call| {
        let step = call.argument(1).as_integer().unwrap_or_default();
        if step <= 0 {
            return Err(call.error(
                "step size must be a positive integer.",
                call.argument_span(1),
            ));
        }
        let receiver = call.argument(0).clone();
        if !call.has_lambda() {
            return Ok(Value::Iterator(Box::new(IteratorValue {
                source: receiver.dereference().clone(),
                kind: IteratorKind::Step(step),
            })));
        }
        let items = items_of(call, &receiver, call.argument_span(0))?;
        let arity = lambda_arity(call);
        for index in (0..items.single.len()).step_by(step as usize) {
            match run_lambda(call, item_arguments(&items, index, arity))? {
                Outcome::Break => break,
                Outcome::Propagate(value) => return Ok(value),
                Outcome::Value(_) => {}
            }
        }
        Ok(receiver)
    });
    d
}

fn reverse_each_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("reverse_each");
    d.add("Callable[Iterable, 1, 1]", |call| {
        let receiver = call.argument(0).clone();
        if !call.has_lambda() {
            return Ok(Value::Iterator(Box::new(IteratorValue {
                source: receiver.dereference().clone(),
                kind: IteratorKind::Reverse,
            })));
        }
        let items = items_of(call, &receiver, call.argument_span(0))?;
        let arity = lambda_arity(call);
        for index in (0..items.single.len()).rev() {
            match run_lambda(call, item_arguments(&items, index, arity))? {
                Outcome::Break => break,
                Outcome::Propagate(value) => return Ok(value),
                Outcome::Value(_) => {}
            }
        }
        Ok(receiver)
    });
    d
}

fn with_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("with");
    d.add("Callable[Any, 0, default]", |call| {
        let arguments = call.arguments.clone();
        call.yield_lambda(arguments)
    });
    d
}
