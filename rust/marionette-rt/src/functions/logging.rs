//! Logging functions and `fail`.
//!
//! Arguments are formatted with a single space between them. The error-class
//! functions (`err`, `crit`, `alert`, `emerg`) record against the calling
//! scope; the rest use the current scope.

use super::{FunctionContext, FunctionDescriptor};
use crate::errors::EvaluationError;
use crate::logging::Level;
use marionette_core::Value;

pub(super) fn register(add: &mut impl FnMut(FunctionDescriptor)) {
    for name in [
        "debug", "info", "notice", "warning", "err", "crit", "alert", "emerg",
    ] {
        add(log_descriptor(name));
    }
    add(fail_descriptor());
}

pub(super) fn join_arguments(arguments: &[Value]) -> String {
    arguments
        .iter()
        .map(|argument| argument.dereference().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn emit(call: &mut FunctionContext, level: Level) -> Result<Value, EvaluationError> {
    let scope = if level >= Level::Err {
        call.context.calling_scope()
    } else {
        call.context.current_scope()
    };
    let message = format!(
        "{}: {}",
        call.context.scope_display(&scope),
        join_arguments(&call.arguments)
    );
    call.context.log(level, &message);
    Ok(Value::Undef)
}

fn log_descriptor(name: &'static str) -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new(name);
    // The level is recovered from the call name so the callbacks stay plain
    // fn pointers.
    d.add("Callable[Any, 0, default]", |call| {
        let level = Level::from_name(call.name).unwrap_or(Level::Notice);
        emit(call, level)
    });
    d
}

fn fail_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("fail");
    d.add("Callable[Any, 0, default]", |call| {
        Err(call.error(join_arguments(&call.arguments), call.name_span))
    });
    d
}
