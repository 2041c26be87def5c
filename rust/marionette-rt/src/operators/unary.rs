//! Unary operator overload tables.

use super::{UnaryCallContext, UnaryDescriptor};
use marionette_compiler::ast::UnaryOperator;
use marionette_core::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::rc::Rc;

static DESCRIPTORS: Lazy<HashMap<UnaryOperator, UnaryDescriptor>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(UnaryOperator::Not, logical_not_descriptor());
    table.insert(UnaryOperator::Negate, negate_descriptor());
    table.insert(UnaryOperator::Splat, splat_descriptor());
    table
});

pub fn descriptor(operator: UnaryOperator) -> &'static UnaryDescriptor {
    DESCRIPTORS
        .get(&operator)
        .expect("all unary operators have descriptors")
}

fn logical_not_descriptor() -> UnaryDescriptor {
    let mut d = UnaryDescriptor::new("logical 'not'");
    d.add("Any", |call| Ok(Value::Boolean(!call.operand.is_truthy())));
    d
}

fn negate_descriptor() -> UnaryDescriptor {
    let mut d = UnaryDescriptor::new("arithmetic negation");
    d.add("Integer", |call| {
        let value = call.operand.as_integer().unwrap_or_default();
        match value.checked_neg() {
            Some(negated) => Ok(Value::Integer(negated)),
            None => Err(call.error(
                format!("negation of {value} results in an arithmetic overflow."),
                call.operand_span,
            )),
        }
    });
    d.add("Float", |call| {
        Ok(Value::Float(-call.operand.as_float().unwrap_or_default()))
    });
    d
}

/// Splat converts the operand to an array; unfolding into surrounding
/// argument or option lists is positional and handled by the evaluator.
fn splat_descriptor() -> UnaryDescriptor {
    let mut d = UnaryDescriptor::new("splat");
    d.add("Any", |call| {
        Ok(match call.operand.dereference() {
            Value::Array(_) => call.operand.dereference().clone(),
            Value::Hash(hash) => Value::array(
                hash.iter()
                    .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            other => Value::Array(Rc::new(vec![other.clone()])),
        })
    });
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use crate::logging::CaptureLogger;
    use crate::operators::UnaryCallContext;
    use marionette_compiler::tokens::Span;

    fn run(operator: UnaryOperator, operand: Value) -> Result<Value, crate::errors::EvaluationError> {
        let mut context = EvaluationContext::new(None, Box::new(CaptureLogger::new()), "test");
        let call = UnaryCallContext {
            context: &mut context,
            operand,
            operand_span: Span::dummy(),
        };
        descriptor(operator).dispatch(call)
    }

    #[test]
    fn test_logical_not() {
        assert_eq!(run(UnaryOperator::Not, Value::Undef).unwrap(), Value::Boolean(true));
        assert_eq!(
            run(UnaryOperator::Not, Value::Integer(0)).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_negate() {
        assert_eq!(
            run(UnaryOperator::Negate, Value::Integer(5)).unwrap(),
            Value::Integer(-5)
        );
        assert_eq!(
            run(UnaryOperator::Negate, Value::Float(1.5)).unwrap(),
            Value::Float(-1.5)
        );
        let err = run(UnaryOperator::Negate, Value::Integer(i64::MIN)).unwrap_err();
        assert!(err.message.contains("arithmetic overflow"));
        let err = run(UnaryOperator::Negate, Value::string("x")).unwrap_err();
        assert!(err.message.contains("expected Integer or Float"), "{}", err.message);
    }

    #[test]
    fn test_splat_converts_to_array() {
        assert_eq!(
            run(UnaryOperator::Splat, Value::Integer(1)).unwrap(),
            Value::array(vec![Value::Integer(1)])
        );
        let array = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(run(UnaryOperator::Splat, array.clone()).unwrap(), array);
    }
}
