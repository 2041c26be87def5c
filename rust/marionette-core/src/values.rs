//! Runtime value representation for the Puppet language.

use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Runtime values produced by evaluation.
///
/// Collection variants (Array, Hash) are wrapped in `Rc` for cheap cloning via
/// reference counting. Mutation uses `Rc::make_mut()` which provides
/// copy-on-write semantics — the inner data is only cloned when the reference
/// count is greater than one. `Variable` carries a shared immutable handle so
/// that reads through a binding observe the value assigned at binding time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Undef,
    /// The `default` sentinel used in case options and resource bodies.
    Default,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Regex(RegexValue),
    Type(Box<Type>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<HashValue>),
    Variable(VariableValue),
    Iterator(Box<IteratorValue>),
    /// An opaque handle to a native runtime object (e.g. a collector).
    #[serde(skip)]
    Runtime(RuntimeValue),
    /// Control transfer produced by a `break` statement.
    Break(Box<ControlTransfer>),
    /// Control transfer produced by a `next` statement.
    Next(Box<ControlTransfer>),
    /// Control transfer produced by a `return` statement.
    Return(Box<ControlTransfer>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Undef
    }
}

/// A compiled regex along with its source pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexValue {
    pub pattern: String,
    #[serde(skip)]
    compiled: Option<Arc<regex::Regex>>,
}

impl RegexValue {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let compiled = regex::Regex::new(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            compiled: Some(Arc::new(compiled)),
        })
    }

    /// The compiled pattern; recompiles after deserialization.
    pub fn regex(&self) -> Arc<regex::Regex> {
        match &self.compiled {
            Some(re) => re.clone(),
            // Deserialized values lost the compiled form; the pattern was
            // valid when constructed.
            None => Arc::new(regex::Regex::new(&self.pattern).unwrap_or_else(|_| {
                regex::Regex::new(&regex::escape(&self.pattern)).unwrap()
            })),
        }
    }

    /// Matches against a string, returning the capture groups on success.
    pub fn captures(&self, subject: &str) -> Option<Vec<Option<String>>> {
        self.regex().captures(subject).map(|caps| {
            (0..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect()
        })
    }
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// A variable reference: the name and a shared handle to the immutable value
/// that was bound when the variable was assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableValue {
    pub name: String,
    pub value: Rc<Value>,
}

impl VariableValue {
    pub fn new(name: String, value: Rc<Value>) -> Self {
        Self { name, value }
    }
}

/// An insertion-ordered mapping from value to value with unique keys.
///
/// Keys are compared with language equality (`Value::equals`), so `"A"` and
/// `"a"` collide while `1` and `"1"` do not. Entries keep insertion order for
/// deterministic iteration and output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HashValue {
    entries: Vec<(Value, Value)>,
}

impl HashValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k.equals(key)).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| k.equals(key))
    }

    /// Inserts a key, replacing the value of an equal existing key in place.
    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k.equals(&key)) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl FromIterator<(Value, Value)> for HashValue {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut hash = HashValue::new();
        for (k, v) in iter {
            hash.insert(k, v);
        }
        hash
    }
}

/// A lazy adapter over an iterable value, produced by `step` and
/// `reverse_each` when called without a lambda.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IteratorValue {
    pub source: Value,
    pub kind: IteratorKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IteratorKind {
    Forward,
    Reverse,
    Step(i64),
}

impl IteratorValue {
    /// Materializes the iterated elements. Hash sources yield `[key, value]`
    /// pairs; integer sources count from zero.
    pub fn elements(&self) -> Option<Vec<Value>> {
        let base = match self.source.dereference() {
            Value::Array(elements) => elements.as_ref().clone(),
            Value::Hash(hash) => hash
                .iter()
                .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                .collect(),
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            Value::Integer(count) if *count >= 0 => (0..*count).map(Value::Integer).collect(),
            Value::Iterator(inner) => inner.elements()?,
            _ => return None,
        };
        Some(match self.kind {
            IteratorKind::Forward => base,
            IteratorKind::Reverse => base.into_iter().rev().collect(),
            IteratorKind::Step(step) if step > 0 => base
                .into_iter()
                .step_by(step as usize)
                .collect(),
            IteratorKind::Step(_) => return None,
        })
    }
}

/// An opaque handle to a native object owned by the runtime.
#[derive(Clone)]
pub struct RuntimeValue {
    pub type_name: String,
    pub handle: Rc<dyn std::any::Any>,
}

impl fmt::Debug for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl RuntimeValue {
    pub fn new(type_name: impl Into<String>, handle: Rc<dyn std::any::Any>) -> Self {
        Self {
            type_name: type_name.into(),
            handle,
        }
    }
}

impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.handle, &other.handle)
    }
}

/// Payload of a `break`/`next`/`return` control-transfer value.
///
/// Carries where it was created and a snapshot of the call stack so that a
/// transfer escaping its legal context can report a well-located error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlTransfer {
    pub value: Option<Value>,
    pub path: String,
    pub line: usize,
    pub stack: Vec<String>,
}

impl Value {
    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(elements))
    }

    pub fn hash(hash: HashValue) -> Self {
        Value::Hash(Rc::new(hash))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Follows a variable reference to the value it was bound to.
    pub fn dereference(&self) -> &Value {
        let mut current = self;
        while let Value::Variable(variable) = current {
            current = &variable.value;
        }
        current
    }

    /// Consumes the value, unwrapping variable references by cloning the
    /// shared value when necessary.
    pub fn into_dereferenced(self) -> Value {
        match self {
            Value::Variable(variable) => {
                Rc::try_unwrap(variable.value).unwrap_or_else(|rc| (*rc).clone())
            }
            other => other,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.dereference(), Value::Undef)
    }

    pub fn is_default(&self) -> bool {
        matches!(self.dereference(), Value::Default)
    }

    /// Only `undef` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.dereference(), Value::Undef | Value::Boolean(false))
    }

    pub fn is_control_transfer(&self) -> bool {
        matches!(self, Value::Break(_) | Value::Next(_) | Value::Return(_))
    }

    pub fn as_string(&self) -> Option<&str> {
        match self.dereference() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.dereference() {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.dereference() {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.dereference() {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self.dereference() {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashValue> {
        match self.dereference() {
            Value::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self.dereference() {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&RegexValue> {
        match self.dereference() {
            Value::Regex(r) => Some(r),
            _ => None,
        }
    }

    /// Language equality (the `==` operator): strings compare
    /// case-insensitively, everything else structurally. Variables compare
    /// through to their bound values.
    pub fn equals(&self, other: &Value) -> bool {
        match (self.dereference(), other.dereference()) {
            (Value::Undef, Value::Undef) => true,
            (Value::Default, Value::Default) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => unicode_ci_eq(a, b),
            (Value::Regex(a), Value::Regex(b)) => a.pattern == b.pattern,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|other| v.equals(other)).unwrap_or(false))
            }
            (Value::Iterator(a), Value::Iterator(b)) => a == b,
            (Value::Runtime(a), Value::Runtime(b)) => a == b,
            _ => false,
        }
    }

    /// Case-insensitive lexicographic comparison for strings and numeric
    /// comparison for numbers; `None` when the values are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self.dereference(), other.dereference()) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(compare_ci(a, b)),
            _ => None,
        }
    }
}

fn unicode_ci_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Locale-independent case-insensitive ordering.
pub fn compare_ci(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Structural equality used by tests and hash-free containers; delegates to
/// language equality except that strings compare case-sensitively.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.dereference(), other.dereference()) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Value::Hash(a), Value::Hash(b)) => a == b,
            _ => self.equals(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dereference() {
            Value::Undef => Ok(()),
            Value::Default => write!(f, "default"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Regex(r) => write!(f, "/{}/", r.pattern),
            Value::Type(t) => write!(f, "{t}"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Value::Hash(hash) => {
                write!(f, "{{")?;
                for (i, (key, value)) in hash.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} => {value}")?;
                }
                write!(f, "}}")
            }
            Value::Iterator(it) => write!(f, "{}", it.source),
            Value::Runtime(r) => write!(f, "{}", r.type_name),
            Value::Break(_) => write!(f, "break"),
            Value::Next(_) => write!(f, "next"),
            Value::Return(_) => write!(f, "return"),
            Value::Variable(_) => unreachable!("dereference removed variables"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undef.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_string_equality_case_insensitive() {
        assert!(Value::string("Hello").equals(&Value::string("hELLO")));
        assert!(!Value::string("hello").equals(&Value::string("world")));
        // Structural equality stays case-sensitive.
        assert_ne!(Value::string("Hello"), Value::string("hELLO"));
    }

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert!(Value::Integer(1).equals(&Value::Float(1.0)));
        assert!(!Value::Integer(1).equals(&Value::string("1")));
    }

    #[test]
    fn test_array_equality_pairwise() {
        let a = Value::array(vec![Value::Integer(1), Value::string("A")]);
        let b = Value::array(vec![Value::Integer(1), Value::string("a")]);
        assert!(a.equals(&b));
        let c = Value::array(vec![Value::Integer(1)]);
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_hash_keys_unique_by_language_equality() {
        let mut hash = HashValue::new();
        hash.insert(Value::string("Key"), Value::Integer(1));
        hash.insert(Value::string("key"), Value::Integer(2));
        assert_eq!(hash.len(), 1);
        assert_eq!(hash.get(&Value::string("KEY")), Some(&Value::Integer(2)));

        hash.insert(Value::Integer(1), Value::Integer(3));
        assert_eq!(hash.len(), 2);
        assert!(hash.get(&Value::string("1")).is_none());
    }

    #[test]
    fn test_variable_shares_value() {
        let shared = Rc::new(Value::Integer(42));
        let var = Value::Variable(VariableValue::new("x".into(), shared.clone()));
        assert_eq!(var.dereference(), &Value::Integer(42));
        assert!(var.equals(&Value::Integer(42)));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Undef.to_string(), "");
        assert_eq!(Value::Default.to_string(), "default");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(
            Value::array(vec![Value::Integer(1), Value::string("a")]).to_string(),
            "[1, a]"
        );
    }

    #[test]
    fn test_iterator_reverse_and_step() {
        let source = Value::array(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3),
            Value::Integer(4),
        ]);
        let reversed = IteratorValue {
            source: source.clone(),
            kind: IteratorKind::Reverse,
        };
        assert_eq!(
            reversed.elements().unwrap(),
            vec![
                Value::Integer(4),
                Value::Integer(3),
                Value::Integer(2),
                Value::Integer(1)
            ]
        );
        let stepped = IteratorValue {
            source,
            kind: IteratorKind::Step(2),
        };
        assert_eq!(
            stepped.elements().unwrap(),
            vec![Value::Integer(1), Value::Integer(3)]
        );
    }
}
