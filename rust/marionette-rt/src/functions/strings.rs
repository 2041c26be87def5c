//! String functions: `split`, `versioncmp`, and `shellquote`.

use super::{FunctionContext, FunctionDescriptor};
use crate::errors::EvaluationError;
use marionette_core::{RegexValue, Type, Value};

pub(super) fn register(add: &mut impl FnMut(FunctionDescriptor)) {
    add(split_descriptor());
    add(versioncmp_descriptor());
    add(shellquote_descriptor());
}

fn explode(subject: &str) -> Value {
    Value::array(
        subject
            .chars()
            .map(|c| Value::String(c.to_string()))
            .collect(),
    )
}

fn split_with_regex(
    call: &FunctionContext,
    subject: &str,
    pattern: &str,
) -> Result<Value, EvaluationError> {
    if pattern.is_empty() {
        return Ok(explode(subject));
    }
    let regex = RegexValue::new(pattern)
        .map_err(|e| call.error(format!("invalid regular expression: {e}"), call.argument_span(1)))?;
    Ok(Value::array(
        regex
            .regex()
            .split(subject)
            .map(|part| Value::string(part.to_string()))
            .collect(),
    ))
}

fn split_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("split");
    d.add("Callable[String, String, 2, 2]", |call| {
        let subject = call.argument(0).as_string().unwrap_or_default().to_string();
        let separator = call.argument(1).as_string().unwrap_or_default().to_string();
        if separator.is_empty() {
            return Ok(explode(&subject));
        }
        Ok(Value::array(
            subject
                .split(&separator)
                .map(|part| Value::string(part.to_string()))
                .collect(),
        ))
    });
    d.add("Callable[String, Regexp, 2, 2]", |call| {
        let subject = call.argument(0).as_string().unwrap_or_default().to_string();
        let pattern = call
            .argument(1)
            .as_regex()
            .map(|r| r.pattern.clone())
            .unwrap_or_default();
        split_with_regex(call, &subject, &pattern)
    });
    d.add("Callable[String, Type[Regexp], 2, 2]", |call| {
        let subject = call.argument(0).as_string().unwrap_or_default().to_string();
        let pattern = match call.argument(1).as_type() {
            Some(Type::Regexp(Some(pattern))) => pattern.clone(),
            _ => String::new(),
        };
        split_with_regex(call, &subject, &pattern)
    });
    d
}

/// Compares two version strings: numeric segments compare numerically,
/// alphabetic segments lexically, and a `-` suffix orders before release.
fn version_compare(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn segments(version: &str) -> Vec<(bool, String)> {
        let mut result = Vec::new();
        let mut current = String::new();
        let mut numeric = false;
        for c in version.chars() {
            let is_digit = c.is_ascii_digit();
            if c == '.' || c == '-' || c == '_' {
                if !current.is_empty() {
                    result.push((numeric, std::mem::take(&mut current)));
                }
                if c == '-' {
                    result.push((false, "-".to_string()));
                }
                continue;
            }
            if !current.is_empty() && is_digit != numeric {
                result.push((numeric, std::mem::take(&mut current)));
            }
            numeric = is_digit;
            current.push(c);
        }
        if !current.is_empty() {
            result.push((numeric, current));
        }
        result
    }

    let left = segments(a);
    let right = segments(b);
    let mut i = 0;
    loop {
        match (left.get(i), right.get(i)) {
            (None, None) => return Ordering::Equal,
            // A pre-release marker orders before the shorter version.
            (Some((_, s)), None) => {
                return if s == "-" { Ordering::Less } else { Ordering::Greater }
            }
            (None, Some((_, s))) => {
                return if s == "-" { Ordering::Greater } else { Ordering::Less }
            }
            (Some((left_numeric, left_text)), Some((right_numeric, right_text))) => {
                let ordering = match (left_numeric, right_numeric) {
                    (true, true) => {
                        let left_value = left_text.parse::<u64>().unwrap_or(0);
                        let right_value = right_text.parse::<u64>().unwrap_or(0);
                        left_value.cmp(&right_value)
                    }
                    // Numeric segments order after alphabetic ones.
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => left_text.cmp(right_text),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
        i += 1;
    }
}

fn versioncmp_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("versioncmp");
    d.add("Callable[String, String, 2, 2]", |call| {
        let a = call.argument(0).as_string().unwrap_or_default();
        let b = call.argument(1).as_string().unwrap_or_default();
        Ok(Value::Integer(match version_compare(a, b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }))
    });
    d
}

/// Quotes each argument for a POSIX shell; single quotes are spliced as
/// `'\''` and the empty string renders as `""`.
fn shell_quote(word: &str) -> String {
    if word.is_empty() {
        return "\"\"".to_string();
    }
    if !word.contains(|c: char| !c.is_ascii_alphanumeric() && !"_-./:=@%^+,~".contains(c)) {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for c in word.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn shellquote_descriptor() -> FunctionDescriptor {
    let mut d = FunctionDescriptor::new("shellquote");
    d.add("Callable[Any, 0, default]", |call| {
        let mut words = Vec::new();
        fn collect(words: &mut Vec<String>, value: &Value) {
            match value.dereference() {
                Value::Array(elements) => {
                    for element in elements.iter() {
                        collect(words, element);
                    }
                }
                other => words.push(other.to_string()),
            }
        }
        for argument in &call.arguments {
            collect(&mut words, argument);
        }
        Ok(Value::String(
            words
                .iter()
                .map(|word| shell_quote(word))
                .collect::<Vec<_>>()
                .join(" "),
        ))
    });
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_version_compare() {
        assert_eq!(version_compare("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(version_compare("1.2.3", "1.2.10"), Ordering::Less);
        assert_eq!(version_compare("1.10", "1.9"), Ordering::Greater);
        assert_eq!(version_compare("1.0-rc1", "1.0"), Ordering::Less);
        assert_eq!(version_compare("1.0a", "1.0"), Ordering::Less);
        assert_eq!(version_compare("2.0", "10.0"), Ordering::Less);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("simple"), "simple");
        assert_eq!(shell_quote(""), "\"\"");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
