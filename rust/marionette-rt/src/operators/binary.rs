//! Binary operator overload tables.
//!
//! The order of overloads within a descriptor is load-bearing: dispatch is
//! first-match-wins, most specific first.

use super::{match_regex, BinaryCallContext, BinaryDescriptor};
use crate::errors::EvaluationError;
use marionette_compiler::ast::BinaryOperator;
use marionette_core::values::compare_ci;
use marionette_core::{RecursionGuard, RegexValue, Type, Value};
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

static DESCRIPTORS: Lazy<HashMap<BinaryOperator, BinaryDescriptor>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(BinaryOperator::Plus, add_descriptor());
    table.insert(BinaryOperator::Minus, subtract_descriptor());
    table.insert(BinaryOperator::Multiply, multiply_descriptor());
    table.insert(BinaryOperator::Divide, divide_descriptor());
    table.insert(BinaryOperator::Modulo, modulo_descriptor());
    table.insert(BinaryOperator::LeftShift, left_shift_descriptor());
    table.insert(BinaryOperator::RightShift, right_shift_descriptor());
    table.insert(BinaryOperator::Equals, equals_descriptor());
    table.insert(BinaryOperator::NotEquals, not_equals_descriptor());
    table.insert(BinaryOperator::Less, less_descriptor());
    table.insert(BinaryOperator::LessEqual, less_equal_descriptor());
    table.insert(BinaryOperator::Greater, greater_descriptor());
    table.insert(BinaryOperator::GreaterEqual, greater_equal_descriptor());
    table.insert(BinaryOperator::Match, match_descriptor());
    table.insert(BinaryOperator::NotMatch, not_match_descriptor());
    table.insert(BinaryOperator::In, in_descriptor());
    table.insert(BinaryOperator::And, logical_and_descriptor());
    table.insert(BinaryOperator::Or, logical_or_descriptor());
    table
});

/// The descriptor for a binary operator; assignment and the relationship
/// operators are handled by the evaluator directly.
pub fn descriptor(operator: BinaryOperator) -> Option<&'static BinaryDescriptor> {
    DESCRIPTORS.get(&operator)
}

fn left_integer(call: &BinaryCallContext) -> i64 {
    call.left.as_integer().unwrap_or_default()
}

fn right_integer(call: &BinaryCallContext) -> i64 {
    call.right.as_integer().unwrap_or_default()
}

fn left_float(call: &BinaryCallContext) -> f64 {
    call.left
        .as_float()
        .or_else(|| call.left.as_integer().map(|i| i as f64))
        .unwrap_or_default()
}

fn right_float(call: &BinaryCallContext) -> f64 {
    call.right
        .as_float()
        .or_else(|| call.right.as_integer().map(|i| i as f64))
        .unwrap_or_default()
}

/// Inspects a float result in place of floating-exception flags: infinite
/// from finite operands is overflow; for multiplication and division, an
/// exact zero from nonzero operands is underflow. Addition and subtraction
/// may cancel to zero legitimately.
fn check_float(
    call: &BinaryCallContext,
    operation: &str,
    left: f64,
    right: f64,
    result: f64,
    underflows: bool,
) -> Result<Value, EvaluationError> {
    if result.is_infinite() && left.is_finite() && right.is_finite() {
        return Err(call.error(
            format!("{operation} of {left} and {right} results in an arithmetic overflow."),
            call.left_span,
        ));
    }
    if underflows && result == 0.0 && left != 0.0 && right != 0.0 {
        return Err(call.error(
            format!("{operation} of {left} and {right} results in an arithmetic underflow."),
            call.left_span,
        ));
    }
    Ok(Value::Float(result))
}

fn checked(
    call: &BinaryCallContext,
    operation: &str,
    result: Option<i64>,
    overflow: bool,
) -> Result<Value, EvaluationError> {
    match result {
        Some(value) => Ok(Value::Integer(value)),
        None => Err(call.error(
            format!(
                "{operation} of {} and {} results in an arithmetic {}.",
                call.left,
                call.right,
                if overflow { "overflow" } else { "underflow" }
            ),
            call.right_span,
        )),
    }
}

fn add_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("arithmetic addition");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        checked(
            call,
            "addition",
            left.checked_add(right),
            right >= 0,
        )
    });
    d.add("Numeric", "Numeric", |call| {
        let (left, right) = (left_float(call), right_float(call));
        check_float(call, "addition", left, right, left + right, false)
    });
    d
}

fn subtract_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("arithmetic subtraction");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        checked(
            call,
            "subtraction",
            left.checked_sub(right),
            right < 0,
        )
    });
    d.add("Numeric", "Numeric", |call| {
        let (left, right) = (left_float(call), right_float(call));
        check_float(call, "subtraction", left, right, left - right, false)
    });
    d
}

fn multiply_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("arithmetic multiplication");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        let overflow = (left > 0) == (right > 0);
        checked(call, "multiplication", left.checked_mul(right), overflow)
    });
    d.add("Numeric", "Numeric", |call| {
        let (left, right) = (left_float(call), right_float(call));
        check_float(call, "multiplication", left, right, left * right, true)
    });
    d
}

fn divide_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("arithmetic division");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        if right == 0 {
            return Err(call.error("cannot divide by zero.", call.right_span));
        }
        if left == i64::MIN && right == -1 {
            return Err(call.error(
                format!("division of {left} by {right} results in an arithmetic overflow."),
                call.left_span,
            ));
        }
        Ok(Value::Integer(left / right))
    });
    d.add("Numeric", "Numeric", |call| {
        let (left, right) = (left_float(call), right_float(call));
        if right == 0.0 {
            return Err(call.error("cannot divide by zero.", call.right_span));
        }
        check_float(call, "division", left, right, left / right, true)
    });
    d
}

fn modulo_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("arithmetic modulo");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        if right == 0 {
            return Err(call.error("cannot divide by zero.", call.right_span));
        }
        Ok(Value::Integer(left.wrapping_rem(right)))
    });
    d
}

/// Shifts a magnitude left, keeping the sign of the left operand.
fn shift_left_by(call: &BinaryCallContext, left: i64, amount: u64) -> Result<Value, EvaluationError> {
    if left == 0 || amount == 0 {
        return Ok(Value::Integer(left));
    }
    let magnitude = left.unsigned_abs();
    let limit = if left < 0 {
        i64::MIN.unsigned_abs()
    } else {
        i64::MAX as u64
    };
    let shifted = if amount > 62 {
        None
    } else {
        magnitude
            .checked_shl(amount as u32)
            .filter(|result| (result >> amount) == magnitude && *result <= limit)
    };
    match shifted {
        Some(result) => Ok(Value::Integer(if left < 0 {
            result.wrapping_neg() as i64
        } else {
            result as i64
        })),
        None => Err(call.error(
            format!("bitwise left shift of {left} by {amount} results in an arithmetic overflow."),
            call.left_span,
        )),
    }
}

fn shift_right_by(left: i64, amount: u64) -> Value {
    let result = left.unsigned_abs() >> amount.min(63);
    Value::Integer(if left < 0 {
        result.wrapping_neg() as i64
    } else {
        result as i64
    })
}

fn left_shift_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("bitwise left shift");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        // A negative shift count reverses direction.
        if right < 0 {
            Ok(shift_right_by(left, right.unsigned_abs()))
        } else {
            shift_left_by(call, left, right as u64)
        }
    });
    // `<<` on an array appends the right operand.
    d.add("Array[Any]", "Any", |call| {
        let mut elements = call
            .left
            .as_array()
            .cloned()
            .unwrap_or_default();
        elements.push(call.right.dereference().clone());
        Ok(Value::Array(Rc::new(elements)))
    });
    d
}

fn right_shift_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("bitwise right shift");
    d.add("Integer", "Integer", |call| {
        let (left, right) = (left_integer(call), right_integer(call));
        if right < 0 {
            shift_left_by(call, left, right.unsigned_abs())
        } else {
            Ok(shift_right_by(left, right as u64))
        }
    });
    d
}

fn equals_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("equality");
    d.add("Any", "Any", |call| {
        Ok(Value::Boolean(call.left.equals(&call.right)))
    });
    d
}

fn not_equals_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("inequality");
    d.add("Any", "Any", |call| {
        Ok(Value::Boolean(!call.left.equals(&call.right)))
    });
    d
}

/// Orders two values for the comparison operators; types order by
/// specificity (a type is "less" than the types it is assignable to).
fn compare(call: &BinaryCallContext) -> Option<Ordering> {
    match (call.left.dereference(), call.right.dereference()) {
        (Value::String(left), Value::String(right)) => Some(compare_ci(left, right)),
        (Value::Type(left), Value::Type(right)) => {
            let mut guard = RecursionGuard::new();
            if left == right {
                Some(Ordering::Equal)
            } else if right.is_assignable(left, &mut guard) {
                Some(Ordering::Less)
            } else if left.is_assignable(right, &mut guard) {
                Some(Ordering::Greater)
            } else {
                None
            }
        }
        _ => call.left.compare(&call.right),
    }
}

macro_rules! ordering_descriptor {
    ($description:literal, $test:expr) => {{
        let mut d = BinaryDescriptor::new($description);
        d.add("Numeric", "Numeric", |call| match compare(call) {
            Some(ordering) => Ok(Value::Boolean($test(ordering))),
            None => Err(call.error("values are not comparable.", call.left_span)),
        });
        d.add("String", "String", |call| match compare(call) {
            Some(ordering) => Ok(Value::Boolean($test(ordering))),
            None => Err(call.error("values are not comparable.", call.left_span)),
        });
        d.add("Type", "Type", |call| match compare(call) {
            Some(ordering) => Ok(Value::Boolean($test(ordering))),
            None => Ok(Value::Boolean(false)),
        });
        d
    }};
}

fn less_descriptor() -> BinaryDescriptor {
    ordering_descriptor!("comparison", |o| o == Ordering::Less)
}

fn less_equal_descriptor() -> BinaryDescriptor {
    ordering_descriptor!("comparison", |o| o != Ordering::Greater)
}

fn greater_descriptor() -> BinaryDescriptor {
    ordering_descriptor!("comparison", |o| o == Ordering::Greater)
}

fn greater_equal_descriptor() -> BinaryDescriptor {
    ordering_descriptor!("comparison", |o| o != Ordering::Less)
}

fn compile_regex(call: &BinaryCallContext, pattern: &str) -> Result<RegexValue, EvaluationError> {
    RegexValue::new(pattern).map_err(|e| {
        call.context.error(
            format!("invalid regular expression: {e}"),
            call.right_span,
        )
    })
}

fn match_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("match");
    d.add("String", "String", |call| {
        let regex = compile_regex(call, &call.right.as_string().unwrap_or_default().to_string())?;
        let subject = call.left.as_string().unwrap_or_default().to_string();
        Ok(Value::Boolean(match_regex(call.context, &regex, &subject)))
    });
    d.add("String", "Regexp", |call| {
        let regex = call.right.as_regex().cloned().unwrap_or_else(|| {
            RegexValue::new("").expect("empty pattern compiles")
        });
        let subject = call.left.as_string().unwrap_or_default().to_string();
        Ok(Value::Boolean(match_regex(call.context, &regex, &subject)))
    });
    d.add("Any", "Type", |call| {
        let mut guard = RecursionGuard::new();
        let matched = call
            .right
            .as_type()
            .map(|t| t.is_instance(&call.left, &mut guard))
            .unwrap_or(false);
        Ok(Value::Boolean(matched))
    });
    d
}

fn not_match_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("match");
    d.add("String", "String", |call| {
        let regex = compile_regex(call, &call.right.as_string().unwrap_or_default().to_string())?;
        let subject = call.left.as_string().unwrap_or_default().to_string();
        Ok(Value::Boolean(!match_regex(call.context, &regex, &subject)))
    });
    d.add("String", "Regexp", |call| {
        let regex = call.right.as_regex().cloned().unwrap_or_else(|| {
            RegexValue::new("").expect("empty pattern compiles")
        });
        let subject = call.left.as_string().unwrap_or_default().to_string();
        Ok(Value::Boolean(!match_regex(call.context, &regex, &subject)))
    });
    d.add("Any", "Type", |call| {
        let mut guard = RecursionGuard::new();
        let matched = call
            .right
            .as_type()
            .map(|t| t.is_instance(&call.left, &mut guard))
            .unwrap_or(false);
        Ok(Value::Boolean(!matched))
    });
    d
}

fn in_descriptor() -> BinaryDescriptor {
    // The order of these overloads is important (most specific to least
    // specific).
    let mut d = BinaryDescriptor::new("'in'");
    d.add("String", "String", |call| {
        let needle = call.left.as_string().unwrap_or_default().to_lowercase();
        let haystack = call.right.as_string().unwrap_or_default().to_lowercase();
        Ok(Value::Boolean(haystack.contains(&needle)))
    });
    d.add("Regexp", "String", |call| {
        let regex = call.left.as_regex().cloned().unwrap_or_else(|| {
            RegexValue::new("").expect("empty pattern compiles")
        });
        let subject = call.right.as_string().unwrap_or_default().to_string();
        Ok(Value::Boolean(match_regex(call.context, &regex, &subject)))
    });
    d.add("Type", "Array[Any]", |call| {
        let mut guard = RecursionGuard::new();
        let found = match (call.left.as_type(), call.right.as_array()) {
            (Some(t), Some(elements)) => {
                elements.iter().any(|e| t.is_instance(e, &mut guard))
            }
            _ => false,
        };
        Ok(Value::Boolean(found))
    });
    d.add("Regexp", "Array[Any]", |call| {
        let regex = call.left.as_regex().cloned().unwrap_or_else(|| {
            RegexValue::new("").expect("empty pattern compiles")
        });
        let elements: Vec<String> = call
            .right
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|e| e.as_string().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let found = elements
            .iter()
            .any(|subject| match_regex(call.context, &regex, subject));
        Ok(Value::Boolean(found))
    });
    d.add("Any", "Array[Any]", |call| {
        let found = call
            .right
            .as_array()
            .map(|elements| elements.iter().any(|e| call.left.equals(e)))
            .unwrap_or(false);
        Ok(Value::Boolean(found))
    });
    d.add("Type", "Hash[Any, Any]", |call| {
        let mut guard = RecursionGuard::new();
        let found = match (call.left.as_type(), call.right.as_hash()) {
            (Some(t), Some(hash)) => hash.keys().any(|k| t.is_instance(k, &mut guard)),
            _ => false,
        };
        Ok(Value::Boolean(found))
    });
    d.add("Any", "Hash[Any, Any]", |call| {
        let found = call
            .right
            .as_hash()
            .map(|hash| hash.keys().any(|k| call.left.equals(k)))
            .unwrap_or(false);
        Ok(Value::Boolean(found))
    });
    d.add("Any", "Any", |_| Ok(Value::Boolean(false)));
    d
}

fn logical_and_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("logical 'and'");
    d.add("Any", "Any", |call| {
        Ok(Value::Boolean(
            call.left.is_truthy() && call.right.is_truthy(),
        ))
    });
    d
}

fn logical_or_descriptor() -> BinaryDescriptor {
    let mut d = BinaryDescriptor::new("logical 'or'");
    d.add("Any", "Any", |call| {
        Ok(Value::Boolean(
            call.left.is_truthy() || call.right.is_truthy(),
        ))
    });
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use crate::logging::CaptureLogger;
    use marionette_compiler::tokens::Span;

    fn run(operator: BinaryOperator, left: Value, right: Value) -> Result<Value, EvaluationError> {
        let mut context = EvaluationContext::new(None, Box::new(CaptureLogger::new()), "test");
        let call = BinaryCallContext {
            context: &mut context,
            left,
            right,
            left_span: Span::dummy(),
            right_span: Span::dummy(),
        };
        descriptor(operator).expect("descriptor exists").dispatch(call)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(
            run(BinaryOperator::Plus, Value::Integer(2), Value::Integer(3)).unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            run(BinaryOperator::Multiply, Value::Integer(3), Value::Integer(4)).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            run(BinaryOperator::Modulo, Value::Integer(7), Value::Integer(3)).unwrap(),
            Value::Integer(1)
        );
    }

    #[test]
    fn test_overflow_errors() {
        let err = run(
            BinaryOperator::Multiply,
            Value::Integer(i64::MAX),
            Value::Integer(2),
        )
        .unwrap_err();
        assert!(err.message.contains("arithmetic overflow"), "{}", err.message);

        let err = run(
            BinaryOperator::Divide,
            Value::Integer(i64::MIN),
            Value::Integer(-1),
        )
        .unwrap_err();
        assert!(err.message.contains("arithmetic overflow"));
    }

    #[test]
    fn test_division_by_zero() {
        let err = run(BinaryOperator::Divide, Value::Integer(1), Value::Integer(0)).unwrap_err();
        assert_eq!(err.message, "cannot divide by zero.");
        let err = run(BinaryOperator::Modulo, Value::Integer(1), Value::Integer(0)).unwrap_err();
        assert_eq!(err.message, "cannot divide by zero.");
    }

    #[test]
    fn test_mixed_numeric_promotes_to_float() {
        assert_eq!(
            run(BinaryOperator::Plus, Value::Integer(1), Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_shift_direction_reversal() {
        assert_eq!(
            run(BinaryOperator::LeftShift, Value::Integer(1), Value::Integer(3)).unwrap(),
            Value::Integer(8)
        );
        // Negative shift count reverses direction.
        assert_eq!(
            run(BinaryOperator::LeftShift, Value::Integer(8), Value::Integer(-2)).unwrap(),
            Value::Integer(2)
        );
        // A negative left operand keeps its sign.
        assert_eq!(
            run(BinaryOperator::LeftShift, Value::Integer(-2), Value::Integer(2)).unwrap(),
            Value::Integer(-8)
        );
        assert_eq!(
            run(BinaryOperator::RightShift, Value::Integer(-8), Value::Integer(2)).unwrap(),
            Value::Integer(-2)
        );
    }

    #[test]
    fn test_array_append() {
        let result = run(
            BinaryOperator::LeftShift,
            Value::array(vec![Value::Integer(1)]),
            Value::Integer(2),
        )
        .unwrap();
        assert_eq!(
            result,
            Value::array(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn test_string_comparison_case_insensitive() {
        assert_eq!(
            run(
                BinaryOperator::Equals,
                Value::string("ABC"),
                Value::string("abc")
            )
            .unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            run(
                BinaryOperator::Less,
                Value::string("Apple"),
                Value::string("banana")
            )
            .unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_type_comparison_by_specificity() {
        let integer = Value::Type(Box::new(Type::default_integer()));
        let numeric = Value::Type(Box::new(Type::Numeric));
        assert_eq!(
            run(BinaryOperator::Less, integer.clone(), numeric.clone()).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            run(BinaryOperator::Greater, numeric, integer).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_in_overloads() {
        assert_eq!(
            run(BinaryOperator::In, Value::string("lo"), Value::string("HELLO")).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            run(
                BinaryOperator::In,
                Value::Integer(2),
                Value::array(vec![Value::Integer(1), Value::Integer(2)])
            )
            .unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            run(
                BinaryOperator::In,
                Value::Type(Box::new(Type::default_integer())),
                Value::array(vec![Value::string("a"), Value::Integer(9)])
            )
            .unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            run(BinaryOperator::In, Value::Integer(1), Value::Boolean(true)).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_dispatch_error_lists_accepted_types() {
        let err = run(
            BinaryOperator::Multiply,
            Value::string("x"),
            Value::Integer(1),
        )
        .unwrap_err();
        assert!(
            err.message.contains("arithmetic multiplication"),
            "{}",
            err.message
        );
        assert!(err.message.contains("found String"), "{}", err.message);
    }
}
