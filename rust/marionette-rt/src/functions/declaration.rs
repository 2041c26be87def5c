//! Catalog declaration functions: `include`, `require`, `contain`,
//! `realize`, `tag`, and `tagged`.

use super::{FunctionContext, FunctionDescriptor};
use crate::catalog::{PendingRelationship, RelationshipKind};
use crate::collectors::{Collector, ListCollector};
use crate::errors::EvaluationError;
use crate::evaluator;
use crate::scope::Scope;
use marionette_compiler::tokens::Span;
use marionette_core::{Type, Value};

pub(super) fn register(add: &mut impl FnMut(FunctionDescriptor)) {
    add(include_descriptor());
    add(require_descriptor());
    add(contain_descriptor());
    add(realize_descriptor());
    add(tag_descriptor());
    add(tagged_descriptor());
}

/// The relationship `require` and `contain` install between the declaring
/// resource and the declared class.
fn declare_classes(
    call: &mut FunctionContext,
    relationship: Option<RelationshipKind>,
) -> Result<Value, EvaluationError> {
    for index in 0..call.arguments.len() {
        let argument = call.arguments[index].clone();
        let span = call.argument_span(index);
        declare_one(call, &argument, span, relationship)?;
    }
    Ok(Value::Undef)
}

fn declare_one(
    call: &mut FunctionContext,
    argument: &Value,
    span: Span,
    relationship: Option<RelationshipKind>,
) -> Result<(), EvaluationError> {
    match argument.dereference() {
        Value::String(name) => {
            declare_titled(call, name.clone(), span, relationship)?;
        }
        Value::Array(elements) => {
            for element in elements.iter() {
                declare_one(call, element, span, relationship)?;
            }
        }
        Value::Type(t) => match &**t {
            Type::Class(Some(title)) => {
                declare_titled(call, title.clone(), span, relationship)?;
            }
            Type::Resource {
                type_name: Some(type_name),
                title: Some(title),
            } if type_name == "Class" => {
                declare_titled(call, title.clone(), span, relationship)?;
            }
            Type::Resource { .. } => {
                return Err(call.error("resource type must be class.", span));
            }
            _ => {
                return Err(call.error(
                    format!(
                        "cannot declare class with argument type {}.",
                        Type::infer_reduced(argument)
                    ),
                    span,
                ));
            }
        },
        other => {
            return Err(call.error(
                format!(
                    "cannot declare class with argument type {}.",
                    Type::infer_reduced(other)
                ),
                span,
            ));
        }
    }
    Ok(())
}

fn declare_titled(
    call: &mut FunctionContext,
    title: String,
    span: Span,
    relationship: Option<RelationshipKind>,
) -> Result<(), EvaluationError> {
    if title.trim_start_matches(':').is_empty() {
        return Err(call.error("cannot declare a class with an unspecified title.", span));
    }
    let index = evaluator::declare_class(call.context, &title, None, span)?;
    if let Some(kind) = relationship {
        let current = Scope::resource(&call.context.current_scope()).ok_or_else(|| {
            call.context.error(
                "the current scope has no associated resource to form a relationship with.",
                span,
            )
        })?;
        let class_reference = Value::Type(Box::new(call.context.catalog.resource(index).reference()));
        let current_reference =
            Value::Type(Box::new(call.context.catalog.resource(current).reference()));
        // `require` orders the class before the declaring resource;
        // `contains` runs from the container to the contained class.
        let (source, target) = match kind {
            RelationshipKind::Contains => (current_reference, class_reference),
            _ => (class_reference, current_reference),
        };
        let path = call.context.current_path();
        call.context.catalog.relate(PendingRelationship {
            kind,
            source,
            target,
            path,
            span,
        });
    }
    Ok(())
}

fn include_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("include");
    d.add(
        "Callable[Variant[String, Array[Any], Class, Resource], 1]",
        |call| declare_classes(call, None),
    );
    d
}

fn require_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("require");
    d.add(
        "Callable[Variant[String, Array[Any], Class, Resource], 1]",
        |call| declare_classes(call, Some(RelationshipKind::Require)),
    );
    d
}

fn contain_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("contain");
    d.add(
        "Callable[Variant[String, Array[Any], Class, Resource], 1]",
        |call| declare_classes(call, Some(RelationshipKind::Contains)),
    );
    d
}

fn realize_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("realize");
    d.add(
        "Callable[Variant[String, Array[Any], Resource], 1]",
        |call| {
            let mut list = Vec::new();
            for index in 0..call.arguments.len() {
                let argument = call.arguments[index].clone();
                let span = call.argument_span(index);
                add_reference(call, &mut list, &argument, span)?;
            }
            let result = Value::array(
                list.iter()
                    .map(|(reference, _, _)| Value::Type(Box::new(reference.clone())))
                    .collect(),
            );
            if !list.is_empty() {
                call.context
                    .catalog
                    .add_collector(Collector::List(ListCollector::new(list)));
            }
            Ok(result)
        },
    );
    d
}

fn add_reference(
    call: &FunctionContext,
    list: &mut Vec<(Type, std::rc::Rc<String>, Span)>,
    argument: &Value,
    span: Span,
) -> Result<(), EvaluationError> {
    match argument.dereference() {
        Value::String(text) => match Type::parse_resource(text) {
            Some(reference) => push_reference(call, list, reference, span),
            None => Err(call.error(
                format!("expected a qualified resource string but found \"{text}\"."),
                span,
            )),
        },
        Value::Array(elements) => {
            for element in elements.iter() {
                add_reference(call, list, element, span)?;
            }
            Ok(())
        }
        Value::Type(t) => match &**t {
            Type::Resource { .. } | Type::Class(_) => {
                push_reference(call, list, (**t).clone(), span)
            }
            _ => Err(call.error(
                format!(
                    "expected String, Array, or qualified Resource for argument but found {}.",
                    Type::infer_reduced(argument)
                ),
                span,
            )),
        },
        other => Err(call.error(
            format!(
                "expected String, Array, or qualified Resource for argument but found {}.",
                Type::infer_reduced(other)
            ),
            span,
        )),
    }
}

fn push_reference(
    call: &FunctionContext,
    list: &mut Vec<(Type, std::rc::Rc<String>, Span)>,
    reference: Type,
    span: Span,
) -> Result<(), EvaluationError> {
    if reference.is_class() || matches!(reference, Type::Class(_)) {
        return Err(call.error("classes cannot be realized.", span));
    }
    if !matches!(
        reference,
        Type::Resource {
            type_name: Some(_),
            title: Some(_),
        }
    ) {
        return Err(call.error("expected a fully-qualified resource to realize.", span));
    }
    list.push((reference, call.context.current_path(), span));
    Ok(())
}

fn tag_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("tag");
    d.add("Callable[Variant[String, Array[Any]], 1]", |call| {
        let Some(resource) = Scope::resource(&call.context.current_scope()) else {
            return Err(call.error(
                "the current scope has no associated resource to tag.",
                call.name_span,
            ));
        };
        for index in 0..call.arguments.len() {
            let argument = call.arguments[index].clone();
            let span = call.argument_span(index);
            add_tags(call, resource, &argument, span)?;
        }
        Ok(Value::Undef)
    });
    d
}

fn add_tags(
    call: &mut FunctionContext,
    resource: usize,
    argument: &Value,
    span: Span,
) -> Result<(), EvaluationError> {
    match argument.dereference() {
        Value::String(tag) => {
            call.context.catalog.tag_resource(resource, tag);
            Ok(())
        }
        Value::Array(elements) => {
            for element in elements.iter() {
                add_tags(call, resource, element, span)?;
            }
            Ok(())
        }
        other => Err(call.error(
            format!("expected String for tag but found {}.", Type::infer_reduced(other)),
            span,
        )),
    }
}

fn tagged_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("tagged");
    d.add("Callable[Variant[String, Array[Any]], 1]", |call| {
        let Some(resource) = Scope::resource(&call.context.current_scope()) else {
            return Ok(Value::Boolean(false));
        };
        fn all_tagged(call: &FunctionContext, resource: usize, argument: &Value) -> bool {
            match argument.dereference() {
                Value::String(tag) => call.context.catalog.resource(resource).tagged(tag),
                Value::Array(elements) => {
                    elements.iter().all(|e| all_tagged(call, resource, e))
                }
                _ => false,
            }
        }
        let tagged = call
            .arguments
            .clone()
            .iter()
            .all(|argument| all_tagged(call, resource, argument));
        Ok(Value::Boolean(tagged))
    });
    d
}
