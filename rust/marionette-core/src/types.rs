//! The Puppet type system: parameterized types with instance and
//! assignability checks.
//!
//! Every variant supports three operations: `is_instance` (does a value
//! belong to the type), `is_assignable` (is every instance of another type
//! also an instance of this one), and `generalize` (drop parameters to the
//! least specific matching form). Recursive checks thread a
//! [`RecursionGuard`] so self-referential structures terminate.

use crate::values::{HashValue, RegexValue, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raised when a `new T(...)` conversion fails.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Raised when a type signature string cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid type specification: {message}")]
pub struct TypeParseError {
    pub message: String,
}

/// An identity set of in-progress `(type, other)` checks.
///
/// Re-entry on a pair already being checked returns `true` (coinductive
/// closure), which terminates instance and assignability checks over
/// self-referential values and types.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    seen: Vec<(usize, usize)>,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `check` unless the pair is already being checked, in which case
    /// the check is presumed to hold.
    fn with(
        &mut self,
        this: &Type,
        other: usize,
        check: impl FnOnce(&mut Self) -> bool,
    ) -> bool {
        let pair = (this as *const Type as usize, other);
        if self.seen.contains(&pair) {
            return true;
        }
        self.seen.push(pair);
        let result = check(self);
        self.seen.pop();
        result
    }
}

fn addr_of_value(value: &Value) -> usize {
    value as *const Value as usize
}

fn addr_of_type(t: &Type) -> usize {
    t as *const Type as usize
}

/// A runtime type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Type {
    Any,
    Undef,
    Default,
    NotUndef(Option<Box<Type>>),
    Scalar,
    Data,
    Numeric,
    Integer {
        from: i64,
        to: i64,
    },
    Float {
        from: f64,
        to: f64,
    },
    String {
        from: i64,
        to: i64,
    },
    Pattern(Vec<RegexValue>),
    Enum(Vec<String>),
    Regexp(Option<String>),
    Boolean,
    Array {
        element: Box<Type>,
        from: i64,
        to: i64,
    },
    Hash {
        key: Box<Type>,
        value: Box<Type>,
        from: i64,
        to: i64,
    },
    Tuple {
        types: Vec<Type>,
        from: i64,
        to: i64,
    },
    Struct(Vec<(String, Type)>),
    Collection {
        from: i64,
        to: i64,
    },
    Iterator(Option<Box<Type>>),
    Iterable(Option<Box<Type>>),
    Optional(Option<Box<Type>>),
    Variant(Vec<Type>),
    /// The type of types: `Type[T]`.
    TypeReference(Option<Box<Type>>),
    CatalogEntry,
    Class(Option<String>),
    Resource {
        type_name: Option<String>,
        title: Option<String>,
    },
    Runtime {
        runtime: Option<String>,
        name: Option<String>,
    },
    Callable {
        types: Vec<Type>,
        min: i64,
        max: i64,
        block: Option<Box<Type>>,
    },
}

/// Capitalizes each `::`-separated segment: `foo::bar` becomes `Foo::Bar`.
pub fn normalize_type_name(name: &str) -> String {
    name.trim_start_matches("::")
        .split("::")
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("::")
}

/// Lowercases a class title and strips any leading `::`.
pub fn normalize_class_name(name: &str) -> String {
    name.trim_start_matches("::").to_lowercase()
}

impl Type {
    pub fn default_integer() -> Type {
        Type::Integer {
            from: i64::MIN,
            to: i64::MAX,
        }
    }

    pub fn default_float() -> Type {
        Type::Float {
            from: f64::NEG_INFINITY,
            to: f64::INFINITY,
        }
    }

    pub fn default_string() -> Type {
        Type::String {
            from: 0,
            to: i64::MAX,
        }
    }

    pub fn default_array() -> Type {
        Type::Array {
            element: Box::new(Type::Any),
            from: 0,
            to: i64::MAX,
        }
    }

    pub fn default_hash() -> Type {
        Type::Hash {
            key: Box::new(Type::Any),
            value: Box::new(Type::Any),
            from: 0,
            to: i64::MAX,
        }
    }

    pub fn default_collection() -> Type {
        Type::Collection {
            from: 0,
            to: i64::MAX,
        }
    }

    pub fn resource(type_name: &str, title: &str) -> Type {
        Type::Resource {
            type_name: Some(normalize_type_name(type_name)),
            title: Some(title.to_string()),
        }
    }

    pub fn class(title: &str) -> Type {
        Type::Class(Some(normalize_class_name(title)))
    }

    /// Parses a qualified resource reference string such as `File[/tmp/x]`
    /// or `Class[foo]`.
    pub fn parse_resource(reference: &str) -> Option<Type> {
        let open = reference.find('[')?;
        if !reference.ends_with(']') {
            return None;
        }
        let name = reference[..open].trim();
        let title = reference[open + 1..reference.len() - 1].trim();
        if name.is_empty() || title.is_empty() {
            return None;
        }
        let title = title.trim_matches('\'').trim_matches('"');
        if normalize_type_name(name) == "Class" {
            Some(Type::class(title))
        } else {
            Some(Type::resource(name, title))
        }
    }

    /// The unparameterized name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            Type::Any => "Any",
            Type::Undef => "Undef",
            Type::Default => "Default",
            Type::NotUndef(_) => "NotUndef",
            Type::Scalar => "Scalar",
            Type::Data => "Data",
            Type::Numeric => "Numeric",
            Type::Integer { .. } => "Integer",
            Type::Float { .. } => "Float",
            Type::String { .. } => "String",
            Type::Pattern(_) => "Pattern",
            Type::Enum(_) => "Enum",
            Type::Regexp(_) => "Regexp",
            Type::Boolean => "Boolean",
            Type::Array { .. } => "Array",
            Type::Hash { .. } => "Hash",
            Type::Tuple { .. } => "Tuple",
            Type::Struct(_) => "Struct",
            Type::Collection { .. } => "Collection",
            Type::Iterator(_) => "Iterator",
            Type::Iterable(_) => "Iterable",
            Type::Optional(_) => "Optional",
            Type::Variant(_) => "Variant",
            Type::TypeReference(_) => "Type",
            Type::CatalogEntry => "CatalogEntry",
            Type::Class(_) => "Class",
            Type::Resource { .. } => "Resource",
            Type::Runtime { .. } => "Runtime",
            Type::Callable { .. } => "Callable",
        }
    }

    pub fn is_class(&self) -> bool {
        match self {
            Type::Class(_) => true,
            Type::Resource { type_name, .. } => {
                type_name.as_deref().map(|n| n.eq_ignore_ascii_case("class")) == Some(true)
            }
            _ => false,
        }
    }

    /// Drops all parameter specifications, yielding the least specific
    /// matching form.
    pub fn generalize(&self) -> Type {
        match self {
            Type::NotUndef(inner) => {
                Type::NotUndef(inner.as_ref().map(|t| Box::new(t.generalize())))
            }
            Type::Integer { .. } => Type::default_integer(),
            Type::Float { .. } => Type::default_float(),
            Type::String { .. } => Type::default_string(),
            Type::Pattern(_) => Type::Pattern(Vec::new()),
            Type::Enum(_) => Type::Enum(Vec::new()),
            Type::Regexp(_) => Type::Regexp(None),
            Type::Array { element, .. } => Type::Array {
                element: Box::new(element.generalize()),
                from: 0,
                to: i64::MAX,
            },
            Type::Hash { key, value, .. } => Type::Hash {
                key: Box::new(key.generalize()),
                value: Box::new(value.generalize()),
                from: 0,
                to: i64::MAX,
            },
            Type::Tuple { types, .. } => Type::Tuple {
                types: types.iter().map(Type::generalize).collect(),
                from: 0,
                to: i64::MAX,
            },
            Type::Struct(members) => Type::Struct(
                members
                    .iter()
                    .map(|(k, t)| (k.clone(), t.generalize()))
                    .collect(),
            ),
            Type::Collection { .. } => Type::default_collection(),
            Type::Iterator(inner) => {
                Type::Iterator(inner.as_ref().map(|t| Box::new(t.generalize())))
            }
            Type::Iterable(inner) => {
                Type::Iterable(inner.as_ref().map(|t| Box::new(t.generalize())))
            }
            Type::Optional(inner) => {
                Type::Optional(inner.as_ref().map(|t| Box::new(t.generalize())))
            }
            Type::Variant(types) => Type::Variant(types.iter().map(Type::generalize).collect()),
            Type::TypeReference(inner) => {
                Type::TypeReference(inner.as_ref().map(|t| Box::new(t.generalize())))
            }
            Type::Class(_) => Type::Class(None),
            Type::Resource { .. } => Type::Resource {
                type_name: None,
                title: None,
            },
            other => other.clone(),
        }
    }

    /// Infers the fully specific type of a value, used in diagnostics.
    pub fn infer(value: &Value) -> Type {
        match value.dereference() {
            Value::Undef => Type::Undef,
            Value::Default => Type::Default,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(i) => Type::Integer { from: *i, to: *i },
            Value::Float(f) => Type::Float { from: *f, to: *f },
            Value::String(s) => Type::String {
                from: s.len() as i64,
                to: s.len() as i64,
            },
            Value::Regex(r) => Type::Regexp(Some(r.pattern.clone())),
            Value::Type(t) => Type::TypeReference(Some(t.clone())),
            Value::Array(elements) => {
                let size = elements.len() as i64;
                Type::Array {
                    element: Box::new(Self::unify(
                        elements.iter().map(Type::infer).collect::<Vec<_>>(),
                    )),
                    from: size,
                    to: size,
                }
            }
            Value::Hash(hash) => {
                let size = hash.len() as i64;
                Type::Hash {
                    key: Box::new(Self::unify(hash.keys().map(Type::infer).collect::<Vec<_>>())),
                    value: Box::new(Self::unify(
                        hash.values().map(Type::infer).collect::<Vec<_>>(),
                    )),
                    from: size,
                    to: size,
                }
            }
            Value::Iterator(_) => Type::Iterator(Some(Box::new(Type::Any))),
            Value::Runtime(r) => Type::Runtime {
                runtime: Some("rust".to_string()),
                name: Some(r.type_name.clone()),
            },
            Value::Break(_) | Value::Next(_) | Value::Return(_) => Type::Any,
            Value::Variable(_) => unreachable!("dereference removed variables"),
        }
    }

    /// Infers a reduced type with no parameters on composites.
    pub fn infer_reduced(value: &Value) -> Type {
        match value.dereference() {
            Value::Array(_) => Type::default_array(),
            Value::Hash(_) => Type::default_hash(),
            other => Self::infer(other).generalize(),
        }
    }

    fn unify(mut types: Vec<Type>) -> Type {
        types.dedup();
        match types.len() {
            0 => Type::Any,
            1 => types.pop().unwrap_or(Type::Any),
            _ => {
                let mut distinct: Vec<Type> = Vec::new();
                for t in types {
                    if !distinct.contains(&t) {
                        distinct.push(t);
                    }
                }
                if distinct.len() == 1 {
                    distinct.pop().unwrap_or(Type::Any)
                } else {
                    Type::Variant(distinct)
                }
            }
        }
    }

    fn size_in_range(size: i64, from: i64, to: i64) -> bool {
        if to < from {
            size >= to && size <= from
        } else {
            size >= from && size <= to
        }
    }

    fn range_contained(from: i64, to: i64, outer_from: i64, outer_to: i64) -> bool {
        from.min(to) >= outer_from.min(outer_to) && from.max(to) <= outer_from.max(outer_to)
    }

    /// Whether the value is an instance of this type.
    pub fn is_instance(&self, value: &Value, guard: &mut RecursionGuard) -> bool {
        let value = value.dereference();
        match self {
            Type::Any => true,
            Type::Undef => value.is_undef(),
            Type::Default => value.is_default(),
            Type::NotUndef(inner) => {
                if value.is_undef() {
                    return false;
                }
                match inner {
                    Some(t) => t.is_instance(value, guard),
                    None => true,
                }
            }
            Type::Scalar => {
                Type::Numeric.is_instance(value, guard)
                    || Type::default_string().is_instance(value, guard)
                    || Type::Boolean.is_instance(value, guard)
                    || Type::Regexp(None).is_instance(value, guard)
            }
            Type::Data => guard.with(self, addr_of_value(value), |guard| {
                Type::Scalar.is_instance(value, guard)
                    || value.is_undef()
                    || match value {
                        Value::Array(elements) => elements
                            .iter()
                            .all(|element| Type::Data.is_instance(element, guard)),
                        Value::Hash(hash) => hash.iter().all(|(k, v)| {
                            Type::Scalar.is_instance(k, guard) && Type::Data.is_instance(v, guard)
                        }),
                        _ => false,
                    }
            }),
            Type::Numeric => matches!(value, Value::Integer(_) | Value::Float(_)),
            Type::Integer { from, to } => match value {
                Value::Integer(i) => Self::size_in_range(*i, *from, *to),
                _ => false,
            },
            Type::Float { from, to } => match value {
                Value::Float(f) => {
                    if to < from {
                        *f >= *to && *f <= *from
                    } else {
                        *f >= *from && *f <= *to
                    }
                }
                _ => false,
            },
            Type::String { from, to } => match value {
                Value::String(s) => Self::size_in_range(s.len() as i64, *from, *to),
                _ => false,
            },
            Type::Pattern(patterns) => match value {
                Value::String(s) => {
                    patterns.is_empty() || patterns.iter().any(|p| p.regex().is_match(s))
                }
                _ => false,
            },
            Type::Enum(strings) => match value {
                Value::String(s) => strings.is_empty() || strings.iter().any(|e| e == s),
                _ => false,
            },
            Type::Regexp(pattern) => match value {
                Value::Regex(r) => pattern.as_ref().map(|p| *p == r.pattern).unwrap_or(true),
                _ => false,
            },
            Type::Boolean => matches!(value, Value::Boolean(_)),
            Type::Array { element, from, to } => match value {
                Value::Array(elements) => {
                    Self::size_in_range(elements.len() as i64, *from, *to)
                        && guard.with(self, addr_of_value(value), |guard| {
                            elements.iter().all(|e| element.is_instance(e, guard))
                        })
                }
                _ => false,
            },
            Type::Hash {
                key,
                value: value_type,
                from,
                to,
            } => match value {
                Value::Hash(hash) => {
                    Self::size_in_range(hash.len() as i64, *from, *to)
                        && guard.with(self, addr_of_value(value), |guard| {
                            hash.iter().all(|(k, v)| {
                                key.is_instance(k, guard) && value_type.is_instance(v, guard)
                            })
                        })
                }
                _ => false,
            },
            Type::Tuple { types, from, to } => match value {
                Value::Array(elements) => {
                    if !Self::size_in_range(elements.len() as i64, *from, *to) {
                        return false;
                    }
                    guard.with(self, addr_of_value(value), |guard| {
                        elements.iter().enumerate().all(|(i, element)| {
                            match types.get(i).or_else(|| types.last()) {
                                Some(t) => t.is_instance(element, guard),
                                None => true,
                            }
                        })
                    })
                }
                _ => false,
            },
            Type::Struct(members) => match value {
                Value::Hash(hash) => guard.with(self, addr_of_value(value), |guard| {
                    // Every present key must be declared and every declared
                    // member must match (missing keys must accept undef).
                    hash.iter().all(|(k, _)| {
                        k.as_string()
                            .map(|name| members.iter().any(|(member, _)| member == name))
                            .unwrap_or(false)
                    }) && members.iter().all(|(name, t)| {
                        match hash.get(&Value::string(name.clone())) {
                            Some(v) => t.is_instance(v, guard),
                            None => t.is_instance(&Value::Undef, guard),
                        }
                    })
                }),
                _ => false,
            },
            Type::Collection { from, to } => {
                let size = match value {
                    Value::Array(elements) => elements.len() as i64,
                    Value::Hash(hash) => hash.len() as i64,
                    _ => return false,
                };
                Self::size_in_range(size, *from, *to)
            }
            Type::Iterator(inner) => match value {
                Value::Iterator(it) => match inner {
                    Some(t) => it
                        .elements()
                        .map(|elements| {
                            elements.iter().all(|e| t.is_instance(e, guard))
                        })
                        .unwrap_or(false),
                    None => true,
                },
                _ => false,
            },
            Type::Iterable(inner) => {
                let elements = match value {
                    Value::Array(elements) => elements.as_ref().clone(),
                    Value::Hash(hash) => hash
                        .iter()
                        .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                        .collect(),
                    Value::String(s) => {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    }
                    Value::Integer(i) if *i >= 0 => (0..*i).map(Value::Integer).collect(),
                    Value::Iterator(it) => match it.elements() {
                        Some(elements) => elements,
                        None => return false,
                    },
                    _ => return false,
                };
                match inner {
                    Some(t) => elements.iter().all(|e| t.is_instance(e, guard)),
                    None => true,
                }
            }
            Type::Optional(inner) => {
                if value.is_undef() {
                    return true;
                }
                match inner {
                    Some(t) => t.is_instance(value, guard),
                    None => false,
                }
            }
            Type::Variant(types) => types.iter().any(|t| t.is_instance(value, guard)),
            Type::TypeReference(inner) => match value {
                Value::Type(t) => match inner {
                    Some(parameter) => parameter.is_assignable(t, guard),
                    None => true,
                },
                _ => false,
            },
            Type::CatalogEntry => match value {
                Value::Type(t) => matches!(**t, Type::Class(_) | Type::Resource { .. }),
                _ => false,
            },
            Type::Class(title) => match value {
                Value::Type(t) => match &**t {
                    Type::Class(other) => match title {
                        Some(title) => other.as_deref() == Some(title.as_str()),
                        None => true,
                    },
                    _ => false,
                },
                _ => false,
            },
            Type::Resource { type_name, title } => match value {
                Value::Type(t) => match &**t {
                    Type::Resource {
                        type_name: other_name,
                        title: other_title,
                    } => {
                        (type_name.is_none() || *type_name == *other_name)
                            && (title.is_none() || *title == *other_title)
                    }
                    _ => false,
                },
                _ => false,
            },
            Type::Runtime { name, .. } => match value {
                Value::Runtime(r) => name.as_ref().map(|n| *n == r.type_name).unwrap_or(true),
                _ => false,
            },
            // Callable instances are lambdas, which only exist as AST; no
            // runtime value is an instance.
            Type::Callable { .. } => false,
        }
    }

    /// Whether every instance of `other` is also an instance of this type.
    pub fn is_assignable(&self, other: &Type, guard: &mut RecursionGuard) -> bool {
        // Variant and Optional on the right-hand side expand first.
        match other {
            Type::Variant(types) if !matches!(self, Type::Variant(_)) => {
                return !types.is_empty()
                    && types.iter().all(|t| self.is_assignable(t, guard));
            }
            Type::NotUndef(Some(inner)) if !matches!(self, Type::NotUndef(_)) => {
                if self.is_assignable(inner, guard) {
                    return true;
                }
            }
            _ => {}
        }
        match self {
            Type::Any => true,
            Type::Undef => matches!(other, Type::Undef),
            Type::Default => matches!(other, Type::Default),
            Type::NotUndef(inner) => {
                if matches!(other, Type::Undef) {
                    return false;
                }
                if let Type::Optional(_) = other {
                    return false;
                }
                match inner {
                    Some(t) => match other {
                        Type::NotUndef(Some(other_inner)) => {
                            t.is_assignable(other_inner, guard)
                        }
                        Type::NotUndef(None) => false,
                        _ => t.is_assignable(other, guard),
                    },
                    None => true,
                }
            }
            Type::Scalar => {
                matches!(other, Type::Scalar)
                    || Type::Numeric.is_assignable(other, guard)
                    || Type::default_string().is_assignable(other, guard)
                    || Type::Boolean.is_assignable(other, guard)
                    || Type::Regexp(None).is_assignable(other, guard)
            }
            Type::Data => guard.with(self, addr_of_type(other), |guard| {
                matches!(other, Type::Data)
                    || Type::Scalar.is_assignable(other, guard)
                    || Type::Undef.is_assignable(other, guard)
                    || match other {
                        Type::Array { element, .. } => Type::Data.is_assignable(element, guard),
                        Type::Hash { key, value, .. } => {
                            Type::Scalar.is_assignable(key, guard)
                                && Type::Data.is_assignable(value, guard)
                        }
                        Type::Tuple { types, .. } => {
                            types.iter().all(|t| Type::Data.is_assignable(t, guard))
                        }
                        _ => false,
                    }
            }),
            Type::Numeric => matches!(
                other,
                Type::Numeric | Type::Integer { .. } | Type::Float { .. }
            ),
            Type::Integer { from, to } => match other {
                Type::Integer {
                    from: other_from,
                    to: other_to,
                } => Self::range_contained(*other_from, *other_to, *from, *to),
                _ => false,
            },
            Type::Float { from, to } => match other {
                Type::Float {
                    from: other_from,
                    to: other_to,
                } => {
                    other_from.min(*other_to) >= from.min(*to)
                        && other_from.max(*other_to) <= from.max(*to)
                }
                _ => false,
            },
            Type::String { from, to } => {
                let (other_from, other_to) = match other {
                    Type::String {
                        from: other_from,
                        to: other_to,
                    } => (*other_from, *other_to),
                    Type::Pattern(_) => return *from >= 0 && *to >= 0,
                    Type::Enum(strings) => {
                        if strings.is_empty() {
                            return *from >= 0 && *to >= 0;
                        }
                        let min = strings.iter().map(|s| s.len() as i64).min().unwrap_or(0);
                        let max = strings.iter().map(|s| s.len() as i64).max().unwrap_or(0);
                        (min, max)
                    }
                    _ => return false,
                };
                Self::range_contained(other_from, other_to, *from, *to)
            }
            Type::Pattern(patterns) => match other {
                Type::String { .. } => patterns.is_empty(),
                Type::Enum(strings) => {
                    if patterns.is_empty() {
                        return true;
                    }
                    if strings.is_empty() {
                        return false;
                    }
                    strings
                        .iter()
                        .all(|s| patterns.iter().any(|p| p.regex().is_match(s)))
                }
                Type::Pattern(_) => patterns.is_empty(),
                _ => false,
            },
            Type::Enum(strings) => match other {
                Type::Enum(other_strings) => {
                    if strings.is_empty() {
                        return true;
                    }
                    !other_strings.is_empty()
                        && other_strings.iter().all(|s| strings.contains(s))
                }
                Type::String { .. } => strings.is_empty(),
                _ => false,
            },
            Type::Regexp(pattern) => match other {
                Type::Regexp(other_pattern) => match pattern {
                    Some(p) => other_pattern.as_deref() == Some(p.as_str()),
                    None => true,
                },
                _ => false,
            },
            Type::Boolean => matches!(other, Type::Boolean),
            Type::Array { element, from, to } => match other {
                Type::Array {
                    element: other_element,
                    from: other_from,
                    to: other_to,
                } => {
                    Self::range_contained(*other_from, *other_to, *from, *to)
                        && guard.with(self, addr_of_type(other), |guard| {
                            element.is_assignable(other_element, guard)
                        })
                }
                Type::Tuple {
                    types,
                    from: other_from,
                    to: other_to,
                } => {
                    Self::range_contained(*other_from, *other_to, *from, *to)
                        && guard.with(self, addr_of_type(other), |guard| {
                            types.iter().all(|t| element.is_assignable(t, guard))
                        })
                }
                _ => false,
            },
            Type::Hash {
                key,
                value,
                from,
                to,
            } => match other {
                Type::Hash {
                    key: other_key,
                    value: other_value,
                    from: other_from,
                    to: other_to,
                } => {
                    Self::range_contained(*other_from, *other_to, *from, *to)
                        && guard.with(self, addr_of_type(other), |guard| {
                            key.is_assignable(other_key, guard)
                                && value.is_assignable(other_value, guard)
                        })
                }
                Type::Struct(members) => {
                    Self::range_contained(members.len() as i64, members.len() as i64, *from, *to)
                        && guard.with(self, addr_of_type(other), |guard| {
                            key.is_assignable(&Type::default_string(), guard)
                                && members.iter().all(|(_, t)| value.is_assignable(t, guard))
                        })
                }
                _ => false,
            },
            Type::Tuple { types, from, to } => match other {
                Type::Tuple {
                    types: other_types,
                    from: other_from,
                    to: other_to,
                } => {
                    Self::range_contained(*other_from, *other_to, *from, *to)
                        && guard.with(self, addr_of_type(other), |guard| {
                            other_types.iter().enumerate().all(|(i, other_type)| {
                                match types.get(i).or_else(|| types.last()) {
                                    Some(t) => t.is_assignable(other_type, guard),
                                    None => true,
                                }
                            })
                        })
                }
                Type::Array {
                    element,
                    from: other_from,
                    to: other_to,
                } => {
                    Self::range_contained(*other_from, *other_to, *from, *to)
                        && guard.with(self, addr_of_type(other), |guard| {
                            types.iter().all(|t| t.is_assignable(element, guard))
                        })
                }
                _ => false,
            },
            Type::Struct(members) => match other {
                Type::Struct(other_members) => {
                    guard.with(self, addr_of_type(other), |guard| {
                        members.len() == other_members.len()
                            && members.iter().all(|(name, t)| {
                                other_members
                                    .iter()
                                    .find(|(other_name, _)| other_name == name)
                                    .map(|(_, other_type)| t.is_assignable(other_type, guard))
                                    .unwrap_or(false)
                            })
                    })
                }
                _ => false,
            },
            Type::Collection { from, to } => {
                let (other_from, other_to) = match other {
                    Type::Array {
                        from: other_from,
                        to: other_to,
                        ..
                    }
                    | Type::Hash {
                        from: other_from,
                        to: other_to,
                        ..
                    }
                    | Type::Tuple {
                        from: other_from,
                        to: other_to,
                        ..
                    }
                    | Type::Collection {
                        from: other_from,
                        to: other_to,
                    } => (*other_from, *other_to),
                    _ => return false,
                };
                Self::range_contained(other_from, other_to, *from, *to)
            }
            Type::Iterator(inner) => match other {
                Type::Iterator(other_inner) => match (inner, other_inner) {
                    (None, _) => true,
                    (Some(_), None) => false,
                    (Some(t), Some(other_t)) => t.is_assignable(other_t, guard),
                },
                _ => false,
            },
            Type::Iterable(inner) => {
                let other_element = match other {
                    Type::Iterable(other_inner) | Type::Iterator(other_inner) => {
                        other_inner.as_ref().map(|t| (**t).clone())
                    }
                    Type::Array { element, .. } => Some((**element).clone()),
                    Type::Hash { key, value, .. } => Some(Type::Tuple {
                        types: vec![(**key).clone(), (**value).clone()],
                        from: 2,
                        to: 2,
                    }),
                    Type::String { .. } | Type::Enum(_) | Type::Pattern(_) => {
                        Some(Type::default_string())
                    }
                    Type::Integer { .. } => Some(Type::default_integer()),
                    _ => return false,
                };
                match inner {
                    Some(t) => match other_element {
                        Some(other_t) => t.is_assignable(&other_t, guard),
                        None => false,
                    },
                    None => true,
                }
            }
            Type::Optional(inner) => {
                if matches!(other, Type::Undef) {
                    return true;
                }
                if let Type::Optional(other_inner) = other {
                    return match (inner, other_inner) {
                        (None, None) => true,
                        (None, Some(other_t)) => matches!(**other_t, Type::Undef),
                        (Some(t), Some(other_t)) => t.is_assignable(other_t, guard),
                        (Some(_), None) => false,
                    };
                }
                match inner {
                    Some(t) => t.is_assignable(other, guard),
                    None => false,
                }
            }
            Type::Variant(types) => match other {
                Type::Variant(other_types) => {
                    !other_types.is_empty()
                        && other_types.iter().all(|other_t| {
                            types.iter().any(|t| t.is_assignable(other_t, guard))
                        })
                }
                _ => types.iter().any(|t| t.is_assignable(other, guard)),
            },
            Type::TypeReference(inner) => match other {
                Type::TypeReference(other_inner) => match inner {
                    None => true,
                    Some(t) => match other_inner {
                        Some(other_t) => t.is_assignable(other_t, guard),
                        None => false,
                    },
                },
                _ => false,
            },
            Type::CatalogEntry => matches!(
                other,
                Type::CatalogEntry | Type::Class(_) | Type::Resource { .. }
            ),
            Type::Class(title) => match other {
                Type::Class(other_title) => match title {
                    Some(title) => other_title.as_deref() == Some(title.as_str()),
                    None => true,
                },
                _ => false,
            },
            Type::Resource { type_name, title } => match other {
                Type::Resource {
                    type_name: other_name,
                    title: other_title,
                } => {
                    (match type_name {
                        Some(name) => other_name.as_deref() == Some(name.as_str()),
                        None => true,
                    }) && (match title {
                        Some(title) => other_title.as_deref() == Some(title.as_str()),
                        None => true,
                    })
                }
                _ => false,
            },
            // Runtime assignability requires equality; transitivity through
            // Runtime is not supported.
            Type::Runtime { .. } => self == other,
            Type::Callable {
                types,
                min,
                max,
                block,
            } => match other {
                Type::Callable {
                    types: other_types,
                    min: other_min,
                    max: other_max,
                    block: other_block,
                } => {
                    // Callable contravariance on parameters.
                    *min <= *other_min
                        && *max >= *other_max
                        && other_types.len() == types.len()
                        && types
                            .iter()
                            .zip(other_types.iter())
                            .all(|(t, other_t)| other_t.is_assignable(t, guard))
                        && match (block, other_block) {
                            (None, None) => true,
                            (Some(b), Some(other_b)) => other_b.is_assignable(b, guard),
                            _ => false,
                        }
                }
                _ => false,
            },
        }
    }

    /// Checks an argument list against a `Callable` shape; the last declared
    /// parameter type repeats for excess arguments.
    pub fn accepts_arguments(&self, arguments: &[Value], guard: &mut RecursionGuard) -> bool {
        let Type::Callable {
            types, min, max, ..
        } = self
        else {
            return false;
        };
        let count = arguments.len() as i64;
        if count < *min || count > *max {
            return false;
        }
        arguments.iter().enumerate().all(|(i, argument)| {
            match types.get(i).or_else(|| types.last()) {
                Some(t) => t.is_instance(argument, guard),
                None => true,
            }
        })
    }

    /// Converts a value to this type, per the `new T(...)` rules.
    pub fn instantiate(&self, from: Value, extras: &[Value]) -> Result<Value, ConversionError> {
        match self {
            Type::Integer { .. } => instantiate_integer(from, extras),
            Type::Float { .. } => instantiate_float(from),
            Type::Numeric => {
                if let Some(s) = from.as_string() {
                    if s.contains(['.', 'e', 'E']) && !s.starts_with("0x") && !s.starts_with("0X")
                    {
                        return instantiate_float(from);
                    }
                } else if from.as_float().is_some() {
                    return instantiate_float(from);
                }
                instantiate_integer(from, extras)
            }
            Type::Boolean => instantiate_boolean(from),
            Type::String { .. } => Ok(Value::String(from.dereference().to_string())),
            Type::Array { .. } | Type::Tuple { .. } => Ok(instantiate_array(from)),
            Type::Regexp(_) => match from.dereference() {
                Value::String(s) => RegexValue::new(s)
                    .map(Value::Regex)
                    .map_err(|e| ConversionError::new(format!("invalid regular expression: {e}"))),
                Value::Regex(r) => Ok(Value::Regex(r.clone())),
                other => Err(ConversionError::new(format!(
                    "cannot convert {} to {}.",
                    Type::infer_reduced(other),
                    self.name()
                ))),
            },
            Type::Optional(Some(inner)) | Type::NotUndef(Some(inner)) => {
                inner.instantiate(from, extras)
            }
            _ => Err(ConversionError::new(format!(
                "cannot create an instance of {}.",
                self.name()
            ))),
        }
    }

    /// Parses a type signature string such as
    /// `Callable[Variant[String, Array[Any]], 1]` or `Hash[Any, Any]`.
    pub fn parse(signature: &str) -> Result<Type, TypeParseError> {
        let mut parser = SignatureParser {
            input: signature,
            pos: 0,
        };
        let parameter = parser.parse_parameter()?;
        parser.skip_whitespace();
        if parser.pos != parser.input.len() {
            return Err(TypeParseError {
                message: format!("unexpected trailing input in '{signature}'"),
            });
        }
        match parameter {
            Parameter::Type(t) => Ok(t),
            Parameter::Number(_) => Err(TypeParseError {
                message: format!("expected a type but found a number in '{signature}'"),
            }),
        }
    }
}

fn instantiate_integer(from: Value, extras: &[Value]) -> Result<Value, ConversionError> {
    match from.dereference() {
        Value::Integer(i) => Ok(Value::Integer(*i)),
        Value::Float(f) => Ok(Value::Integer(*f as i64)),
        Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
        Value::String(s) => {
            let radix = match extras.first() {
                Some(extra) => extra.as_integer().ok_or_else(|| {
                    ConversionError::new("conversion radix must be an integer.".to_string())
                })? as u32,
                None => 0,
            };
            parse_integer(s, radix)
                .ok_or_else(|| ConversionError::new(format!("string '{s}' cannot be converted to Integer.")))
                .map(Value::Integer)
        }
        other => Err(ConversionError::new(format!(
            "cannot convert {} to Integer.",
            Type::infer_reduced(other)
        ))),
    }
}

/// Parses an integer string with an optional sign and radix prefix
/// (`0x`/`0X` hexadecimal, leading `0` octal, otherwise decimal). A radix of
/// zero means detect from the prefix.
pub fn parse_integer(s: &str, radix: u32) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let digits = digits.trim();
    let (radix, digits) = if radix == 16 || radix == 0 {
        if let Some(rest) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            (16, rest)
        } else if radix == 16 {
            (16, digits)
        } else if digits.len() > 1 && digits.starts_with('0') {
            (8, &digits[1..])
        } else {
            (10, digits)
        }
    } else {
        (radix, digits)
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

fn instantiate_float(from: Value) -> Result<Value, ConversionError> {
    match from.dereference() {
        Value::Integer(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ConversionError::new(format!("string '{s}' cannot be converted to Float."))),
        other => Err(ConversionError::new(format!(
            "cannot convert {} to Float.",
            Type::infer_reduced(other)
        ))),
    }
}

fn instantiate_boolean(from: Value) -> Result<Value, ConversionError> {
    match from.dereference() {
        Value::Boolean(b) => Ok(Value::Boolean(*b)),
        Value::Integer(i) => Ok(Value::Boolean(*i != 0)),
        Value::Float(f) => Ok(Value::Boolean(*f != 0.0)),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(Value::Boolean(true)),
            "false" | "no" | "n" => Ok(Value::Boolean(false)),
            _ => Err(ConversionError::new(format!(
                "string '{s}' cannot be converted to Boolean."
            ))),
        },
        other => Err(ConversionError::new(format!(
            "cannot convert {} to Boolean.",
            Type::infer_reduced(other)
        ))),
    }
}

fn instantiate_array(from: Value) -> Value {
    match from.dereference() {
        Value::Array(_) => from.dereference().clone(),
        Value::Hash(hash) => Value::array(
            hash.iter()
                .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                .collect(),
        ),
        Value::Iterator(it) => match it.elements() {
            Some(elements) => Value::array(elements),
            None => Value::array(vec![]),
        },
        Value::Undef => Value::array(vec![]),
        other => Value::array(vec![other.clone()]),
    }
}

enum Parameter {
    Type(Type),
    Number(i64),
}

struct SignatureParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> SignatureParser<'a> {
    fn skip_whitespace(&mut self) {
        while self.input[self.pos..].starts_with([' ', '\t']) {
            self.pos += 1;
        }
    }

    fn parse_parameter(&mut self) -> Result<Parameter, TypeParseError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_digit() || c == '-' => {
                let end = rest
                    .char_indices()
                    .skip(1)
                    .find(|(_, c)| !c.is_ascii_digit())
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let number = rest[..end].parse::<i64>().map_err(|_| TypeParseError {
                    message: format!("invalid number in '{}'", self.input),
                })?;
                self.pos += end;
                Ok(Parameter::Number(number))
            }
            Some((_, c)) if c.is_ascii_uppercase() => self.parse_type().map(Parameter::Type),
            // In signature strings `default` stands for the default (open)
            // numeric bound.
            Some((_, 'd')) if rest.starts_with("default") => {
                self.pos += "default".len();
                Ok(Parameter::Number(i64::MAX))
            }
            _ => Err(TypeParseError {
                message: format!("unexpected character in '{}'", self.input),
            }),
        }
    }

    fn parse_type(&mut self) -> Result<Type, TypeParseError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != ':')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let name = &rest[..end];
        self.pos += end;
        self.skip_whitespace();

        let mut parameters = Vec::new();
        if self.input[self.pos..].starts_with('[') {
            self.pos += 1;
            loop {
                parameters.push(self.parse_parameter()?);
                self.skip_whitespace();
                if self.input[self.pos..].starts_with(',') {
                    self.pos += 1;
                    continue;
                }
                if self.input[self.pos..].starts_with(']') {
                    self.pos += 1;
                    break;
                }
                return Err(TypeParseError {
                    message: format!("expected ',' or ']' in '{}'", self.input),
                });
            }
        }
        build_type(name, parameters)
    }
}

fn build_type(name: &str, parameters: Vec<Parameter>) -> Result<Type, TypeParseError> {
    let mut types = Vec::new();
    let mut numbers = Vec::new();
    for parameter in parameters {
        match parameter {
            Parameter::Type(t) => {
                if !numbers.is_empty() {
                    return Err(TypeParseError {
                        message: format!("type parameter after numeric bound in {name}"),
                    });
                }
                types.push(t);
            }
            Parameter::Number(n) => numbers.push(n),
        }
    }
    let range = |default_from: i64, default_to: i64| -> (i64, i64) {
        (
            numbers.first().copied().unwrap_or(default_from),
            numbers.get(1).copied().unwrap_or(default_to),
        )
    };
    let single = |mut types: Vec<Type>| -> Option<Box<Type>> { types.pop().map(Box::new) };
    Ok(match name {
        "Any" => Type::Any,
        "Undef" => Type::Undef,
        "Default" => Type::Default,
        "NotUndef" => Type::NotUndef(single(types)),
        "Scalar" => Type::Scalar,
        "Data" => Type::Data,
        "Numeric" => Type::Numeric,
        "Integer" => {
            let (from, to) = range(i64::MIN, i64::MAX);
            Type::Integer { from, to }
        }
        "Float" => Type::default_float(),
        "String" => {
            let (from, to) = range(0, i64::MAX);
            Type::String { from, to }
        }
        "Pattern" => Type::Pattern(Vec::new()),
        "Enum" => Type::Enum(Vec::new()),
        "Regexp" => Type::Regexp(None),
        "Boolean" => Type::Boolean,
        "Array" => {
            let (from, to) = range(0, i64::MAX);
            Type::Array {
                element: single(types).unwrap_or_else(|| Box::new(Type::Any)),
                from,
                to,
            }
        }
        "Hash" => {
            let (from, to) = range(0, i64::MAX);
            let mut iter = types.into_iter();
            let key = iter.next().unwrap_or(Type::Any);
            let value = iter.next().unwrap_or(Type::Any);
            Type::Hash {
                key: Box::new(key),
                value: Box::new(value),
                from,
                to,
            }
        }
        "Tuple" => {
            let count = types.len() as i64;
            let (from, to) = range(count, i64::MAX);
            Type::Tuple { types, from, to }
        }
        "Collection" => {
            let (from, to) = range(0, i64::MAX);
            Type::Collection { from, to }
        }
        "Iterator" => Type::Iterator(single(types)),
        "Iterable" => Type::Iterable(single(types)),
        "Optional" => Type::Optional(single(types)),
        "Variant" => Type::Variant(types),
        "Type" => Type::TypeReference(single(types)),
        "CatalogEntry" => Type::CatalogEntry,
        "Class" => Type::Class(None),
        "Resource" => Type::Resource {
            type_name: None,
            title: None,
        },
        "Callable" => {
            let (min, max) = if numbers.is_empty() {
                (types.len() as i64, types.len() as i64)
            } else {
                (
                    numbers[0],
                    numbers.get(1).copied().unwrap_or(i64::MAX),
                )
            };
            Type::Callable {
                types,
                min,
                max,
                block: None,
            }
        }
        other => {
            return Err(TypeParseError {
                message: format!("unknown type name '{other}'"),
            })
        }
    })
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_range(
            f: &mut fmt::Formatter<'_>,
            prefix: bool,
            from: i64,
            to: i64,
            default_from: i64,
            default_to: i64,
        ) -> fmt::Result {
            if from == default_from && to == default_to {
                return Ok(());
            }
            write!(f, "{}", if prefix { ", " } else { "[" })?;
            if from == default_from {
                write!(f, "default")?;
            } else {
                write!(f, "{from}")?;
            }
            write!(f, ", ")?;
            if to == default_to {
                write!(f, "default")?;
            } else {
                write!(f, "{to}")?;
            }
            if !prefix {
                write!(f, "]")?;
            }
            Ok(())
        }

        match self {
            Type::NotUndef(Some(t)) => write!(f, "NotUndef[{t}]"),
            Type::Optional(Some(t)) => write!(f, "Optional[{t}]"),
            // An Optional with no parameter behaves as Undef.
            Type::Optional(None) => write!(f, "Undef"),
            Type::Iterator(Some(t)) => write!(f, "Iterator[{t}]"),
            Type::Iterable(Some(t)) => write!(f, "Iterable[{t}]"),
            Type::TypeReference(Some(t)) => write!(f, "Type[{t}]"),
            Type::Integer { from, to } => {
                write!(f, "Integer")?;
                write_range(f, false, *from, *to, i64::MIN, i64::MAX)
            }
            Type::Float { from, to } => {
                if from.is_infinite() && to.is_infinite() {
                    write!(f, "Float")
                } else {
                    write!(f, "Float[{from}, {to}]")
                }
            }
            Type::String { from, to } => {
                write!(f, "String")?;
                write_range(f, false, *from, *to, 0, i64::MAX)
            }
            Type::Pattern(patterns) if !patterns.is_empty() => {
                write!(f, "Pattern[")?;
                for (i, p) in patterns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "/{}/", p.pattern)?;
                }
                write!(f, "]")
            }
            Type::Enum(strings) if !strings.is_empty() => {
                write!(f, "Enum[")?;
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{s}'")?;
                }
                write!(f, "]")
            }
            Type::Regexp(Some(pattern)) => write!(f, "Regexp[/{pattern}/]"),
            Type::Array { element, from, to } => {
                write!(f, "Array")?;
                let parameterized = !matches!(**element, Type::Any);
                let default_range = *from == 0 && *to == i64::MAX;
                if !parameterized && default_range {
                    return Ok(());
                }
                write!(f, "[{element}")?;
                write_range(f, true, *from, *to, 0, i64::MAX)?;
                write!(f, "]")
            }
            Type::Hash {
                key,
                value,
                from,
                to,
            } => {
                write!(f, "Hash")?;
                let parameterized =
                    !matches!(**key, Type::Any) || !matches!(**value, Type::Any);
                let default_range = *from == 0 && *to == i64::MAX;
                if !parameterized && default_range {
                    return Ok(());
                }
                write!(f, "[{key}, {value}")?;
                write_range(f, true, *from, *to, 0, i64::MAX)?;
                write!(f, "]")
            }
            Type::Tuple { types, from, to } => {
                write!(f, "Tuple[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                let count = types.len() as i64;
                write_range(f, true, *from, *to, count, count)?;
                write!(f, "]")
            }
            Type::Struct(members) => {
                write!(f, "Struct[{{")?;
                for (i, (name, t)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{name}' => {t}")?;
                }
                write!(f, "}}]")
            }
            Type::Collection { from, to } => {
                write!(f, "Collection")?;
                write_range(f, false, *from, *to, 0, i64::MAX)
            }
            Type::Variant(types) => {
                write!(f, "Variant[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            Type::Class(Some(title)) => write!(f, "Class[{title}]"),
            Type::Resource {
                type_name: Some(name),
                title,
            } => match title {
                Some(title) => write!(f, "{name}[{title}]"),
                None => write!(f, "Resource[{name}]"),
            },
            Type::Runtime { runtime, name } => {
                write!(f, "Runtime")?;
                if let Some(runtime) = runtime {
                    write!(f, "['{runtime}'")?;
                    if let Some(name) = name {
                        write!(f, ", '{name}'")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            Type::Callable { types, min, max, .. } => {
                write!(f, "Callable")?;
                if types.is_empty() && *min == 0 && *max == 0 {
                    return Ok(());
                }
                write!(f, "[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                let count = types.len() as i64;
                if *min != count || *max != count {
                    if !types.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "{min}, ")?;
                    if *max == i64::MAX {
                        write!(f, "default")?;
                    } else {
                        write!(f, "{max}")?;
                    }
                }
                write!(f, "]")
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Creates a hash value; used by struct-building code and tests.
pub fn hash_of(entries: Vec<(Value, Value)>) -> HashValue {
    entries.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(t: &Type, v: &Value) -> bool {
        t.is_instance(v, &mut RecursionGuard::new())
    }

    fn assignable(t: &Type, other: &Type) -> bool {
        t.is_assignable(other, &mut RecursionGuard::new())
    }

    #[test]
    fn test_basic_instances() {
        assert!(instance(&Type::Any, &Value::Undef));
        assert!(instance(&Type::Undef, &Value::Undef));
        assert!(!instance(&Type::Undef, &Value::Boolean(false)));
        assert!(instance(&Type::Boolean, &Value::Boolean(true)));
        assert!(instance(&Type::Numeric, &Value::Float(1.5)));
        assert!(instance(&Type::Scalar, &Value::string("x")));
        assert!(!instance(&Type::Scalar, &Value::array(vec![])));
    }

    #[test]
    fn test_integer_range() {
        let t = Type::Integer { from: 0, to: 10 };
        assert!(instance(&t, &Value::Integer(5)));
        assert!(!instance(&t, &Value::Integer(11)));
        // Reversed bounds normalize.
        let reversed = Type::Integer { from: 10, to: 0 };
        assert!(instance(&reversed, &Value::Integer(5)));
    }

    #[test]
    fn test_string_assignability() {
        let wide = Type::String { from: 0, to: 20 };
        let narrow = Type::String { from: 1, to: 10 };
        assert!(assignable(&wide, &narrow));
        assert!(!assignable(&narrow, &wide));
        // Pattern/Enum only assign to strings with non-negative bounds.
        assert!(assignable(&wide, &Type::Pattern(Vec::new())));
        assert!(assignable(
            &wide,
            &Type::Enum(vec!["on".to_string(), "off".to_string()])
        ));
    }

    #[test]
    fn test_enum_subset() {
        let big = Type::Enum(vec!["a".into(), "b".into(), "c".into()]);
        let small = Type::Enum(vec!["a".into(), "b".into()]);
        assert!(assignable(&big, &small));
        assert!(!assignable(&small, &big));
    }

    #[test]
    fn test_optional_and_not_undef() {
        let opt = Type::Optional(Some(Box::new(Type::default_integer())));
        assert!(instance(&opt, &Value::Undef));
        assert!(instance(&opt, &Value::Integer(1)));
        assert!(!instance(&opt, &Value::string("1")));
        assert!(assignable(&opt, &Type::Undef));

        let nu = Type::NotUndef(None);
        assert!(!instance(&nu, &Value::Undef));
        assert!(instance(&nu, &Value::Integer(1)));
        assert!(!assignable(&nu, &Type::Undef));
    }

    #[test]
    fn test_collection_accepts_sized_composites() {
        let c = Type::Collection { from: 0, to: 3 };
        assert!(instance(&c, &Value::array(vec![Value::Integer(1)])));
        assert!(!instance(
            &c,
            &Value::array(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
                Value::Integer(4)
            ])
        ));
        assert!(assignable(
            &c,
            &Type::Array {
                element: Box::new(Type::Any),
                from: 0,
                to: 2
            }
        ));
        assert!(!assignable(&c, &Type::default_array()));
    }

    #[test]
    fn test_variant_expansion() {
        let v = Type::Variant(vec![Type::default_string(), Type::default_integer()]);
        assert!(instance(&v, &Value::Integer(1)));
        assert!(instance(&v, &Value::string("x")));
        assert!(!instance(&v, &Value::Boolean(true)));
        // A variant assigns to a wider type when every member does.
        assert!(assignable(&Type::Scalar, &v));
    }

    #[test]
    fn test_type_reference_covariance() {
        let t1 = Type::TypeReference(Some(Box::new(Type::Numeric)));
        let t2 = Type::TypeReference(Some(Box::new(Type::default_integer())));
        assert!(assignable(&t1, &t2));
        assert!(!assignable(&t2, &t1));
        assert!(instance(
            &t1,
            &Value::Type(Box::new(Type::default_integer()))
        ));
    }

    #[test]
    fn test_tuple_last_type_repeats() {
        let t = Type::Tuple {
            types: vec![Type::default_string(), Type::default_integer()],
            from: 2,
            to: 4,
        };
        let ok = Value::array(vec![
            Value::string("a"),
            Value::Integer(1),
            Value::Integer(2),
        ]);
        assert!(instance(&t, &ok));
        let bad = Value::array(vec![
            Value::string("a"),
            Value::Integer(1),
            Value::string("b"),
        ]);
        assert!(!instance(&t, &bad));
    }

    #[test]
    fn test_struct_members() {
        let t = Type::Struct(vec![
            ("mode".to_string(), Type::default_string()),
            (
                "owner".to_string(),
                Type::Optional(Some(Box::new(Type::default_string()))),
            ),
        ]);
        let ok = Value::hash(hash_of(vec![(
            Value::string("mode"),
            Value::string("0644"),
        )]));
        assert!(instance(&t, &ok));
        let extra = Value::hash(hash_of(vec![
            (Value::string("mode"), Value::string("0644")),
            (Value::string("group"), Value::string("root")),
        ]));
        assert!(!instance(&t, &extra));
    }

    #[test]
    fn test_instance_iff_assignable_from_inferred() {
        let values = vec![
            Value::Integer(5),
            Value::string("hello"),
            Value::Float(2.5),
            Value::Boolean(true),
            Value::array(vec![Value::Integer(1), Value::string("a")]),
            Value::hash(hash_of(vec![(Value::string("k"), Value::Integer(1))])),
            Value::Undef,
        ];
        let types = vec![
            Type::Any,
            Type::Data,
            Type::Scalar,
            Type::Numeric,
            Type::default_integer(),
            Type::default_string(),
            Type::Boolean,
            Type::default_array(),
            Type::default_hash(),
            Type::Undef,
            Type::Optional(Some(Box::new(Type::Numeric))),
        ];
        for t in &types {
            for v in &values {
                let inferred = Type::infer(v);
                assert_eq!(
                    t.is_instance(v, &mut RecursionGuard::new()),
                    t.is_assignable(&inferred, &mut RecursionGuard::new()),
                    "mismatch for {t} and value {v:?} (inferred {inferred})"
                );
            }
        }
    }

    #[test]
    fn test_assignability_reflexive() {
        let types = vec![
            Type::Any,
            Type::Undef,
            Type::Data,
            Type::Scalar,
            Type::Integer { from: 0, to: 5 },
            Type::String { from: 1, to: 3 },
            Type::Enum(vec!["a".into()]),
            Type::default_array(),
            Type::Variant(vec![Type::Boolean, Type::default_string()]),
            Type::Optional(Some(Box::new(Type::Numeric))),
            Type::TypeReference(Some(Box::new(Type::Data))),
            Type::class("foo"),
            Type::resource("file", "/tmp/x"),
        ];
        for t in &types {
            assert!(assignable(t, t), "{t} not assignable to itself");
        }
    }

    #[test]
    fn test_generalize_drops_parameters() {
        assert_eq!(
            Type::Integer { from: 1, to: 2 }.generalize(),
            Type::default_integer()
        );
        assert_eq!(
            Type::String { from: 5, to: 5 }.generalize(),
            Type::default_string()
        );
        let array = Type::Array {
            element: Box::new(Type::Integer { from: 0, to: 9 }),
            from: 2,
            to: 2,
        };
        assert_eq!(
            array.generalize(),
            Type::Array {
                element: Box::new(Type::default_integer()),
                from: 0,
                to: i64::MAX
            }
        );
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Type::default_integer().to_string(), "Integer");
        assert_eq!(
            Type::Integer { from: 0, to: 10 }.to_string(),
            "Integer[0, 10]"
        );
        assert_eq!(
            Type::Integer {
                from: 0,
                to: i64::MAX
            }
            .to_string(),
            "Integer[0, default]"
        );
        assert_eq!(Type::class("foo").to_string(), "Class[foo]");
        assert_eq!(
            Type::resource("file", "/tmp/x").to_string(),
            "File[/tmp/x]"
        );
        assert_eq!(
            Type::Variant(vec![Type::Boolean, Type::default_string()]).to_string(),
            "Variant[Boolean, String]"
        );
    }

    #[test]
    fn test_signature_parsing() {
        let t = Type::parse("Callable[Variant[String, Array[Any]], 1]").unwrap();
        match &t {
            Type::Callable { types, min, max, .. } => {
                assert_eq!(types.len(), 1);
                assert_eq!(*min, 1);
                assert_eq!(*max, i64::MAX);
            }
            other => panic!("expected callable, got {other}"),
        }
        assert_eq!(Type::parse("Hash[Any, Any]").unwrap(), Type::default_hash());
        assert_eq!(
            Type::parse("Integer[0, 10]").unwrap(),
            Type::Integer { from: 0, to: 10 }
        );
    }

    #[test]
    fn test_callable_argument_matching() {
        let sig = Type::parse("Callable[Variant[String, Array[Any]], 1]").unwrap();
        let mut guard = RecursionGuard::new();
        assert!(sig.accepts_arguments(&[Value::string("foo")], &mut guard));
        assert!(sig.accepts_arguments(
            &[Value::string("foo"), Value::array(vec![])],
            &mut guard
        ));
        assert!(!sig.accepts_arguments(&[], &mut guard));
        assert!(!sig.accepts_arguments(&[Value::Integer(1)], &mut guard));
    }

    #[test]
    fn test_conversions() {
        let integer = Type::default_integer();
        assert_eq!(
            integer.instantiate(Value::string("0x1f"), &[]).unwrap(),
            Value::Integer(31)
        );
        assert_eq!(
            integer.instantiate(Value::string("017"), &[]).unwrap(),
            Value::Integer(15)
        );
        assert_eq!(
            integer.instantiate(Value::string("-42"), &[]).unwrap(),
            Value::Integer(-42)
        );
        assert!(integer.instantiate(Value::string("abc"), &[]).is_err());

        assert_eq!(
            Type::Boolean.instantiate(Value::string("yes"), &[]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            Type::Numeric
                .instantiate(Value::string("3.14"), &[])
                .unwrap(),
            Value::Float(3.14)
        );
        assert_eq!(
            Type::Numeric.instantiate(Value::string("10"), &[]).unwrap(),
            Value::Integer(10)
        );
    }

    #[test]
    fn test_recursion_guard_terminates() {
        // Data is self-referential through Array[Data]; a deeply nested value
        // exercises the guard.
        let mut v = Value::array(vec![Value::Integer(1)]);
        for _ in 0..50 {
            v = Value::array(vec![v]);
        }
        assert!(instance(&Type::Data, &v));
    }

    #[test]
    fn test_resource_parsing() {
        assert_eq!(
            Type::parse_resource("File[/tmp/x]"),
            Some(Type::resource("file", "/tmp/x"))
        );
        assert_eq!(
            Type::parse_resource("Class[Foo::Bar]"),
            Some(Type::Class(Some("foo::bar".to_string())))
        );
        assert_eq!(Type::parse_resource("File"), None);
    }
}
