//! Fact providers: read-only host attributes surfaced as top-scope
//! variables.

use marionette_core::values::HashValue;
use marionette_core::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Delivers facts on demand. Lookups are cached by the top scope on first
/// access, so providers are only consulted once per name.
pub trait FactProvider: std::fmt::Debug {
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Enumerates every known fact.
    fn each(&self, callback: &mut dyn FnMut(&str, &Value) -> bool);
}

/// An in-memory fact map, typically loaded from a facts file.
#[derive(Debug, Default)]
pub struct MapFacts {
    facts: HashMap<String, Value>,
}

impl MapFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.facts.insert(name.into(), value);
    }

    /// Builds a provider from a JSON document of fact name to value.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let document: serde_json::Value = serde_json::from_str(text)?;
        let mut facts = MapFacts::new();
        if let serde_json::Value::Object(map) = document {
            for (name, value) in map {
                facts.set(name, json_to_value(&value));
            }
        }
        Ok(facts)
    }
}

impl FactProvider for MapFacts {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.facts.get(name).cloned()
    }

    fn each(&self, callback: &mut dyn FnMut(&str, &Value) -> bool) {
        for (name, value) in &self.facts {
            if !callback(name, value) {
                break;
            }
        }
    }
}

/// Converts a JSON document into a runtime value.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Undef,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(elements) => {
            Value::Array(Rc::new(elements.iter().map(json_to_value).collect()))
        }
        serde_json::Value::Object(map) => {
            let mut hash = HashValue::new();
            for (k, v) in map {
                hash.insert(Value::String(k.clone()), json_to_value(v));
            }
            Value::hash(hash)
        }
    }
}

/// Converts a runtime value into a JSON document; used for catalog output.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value.dereference() {
        Value::Undef => serde_json::Value::Null,
        Value::Default => serde_json::Value::String("default".to_string()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Array(elements) => {
            serde_json::Value::Array(elements.iter().map(value_to_json).collect())
        }
        Value::Hash(hash) => {
            let mut map = serde_json::Map::new();
            for (k, v) in hash.iter() {
                map.insert(k.to_string(), value_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        other => serde_json::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facts_from_json() {
        let facts = MapFacts::from_json(
            r#"{"os": "linux", "processors": 8, "is_virtual": false, "mounts": ["/", "/home"]}"#,
        )
        .unwrap();
        assert_eq!(facts.lookup("os"), Some(Value::string("linux")));
        assert_eq!(facts.lookup("processors"), Some(Value::Integer(8)));
        assert_eq!(facts.lookup("is_virtual"), Some(Value::Boolean(false)));
        assert!(facts.lookup("missing").is_none());
        match facts.lookup("mounts") {
            Some(Value::Array(elements)) => assert_eq!(elements.len(), 2),
            other => panic!("expected array fact, got {other:?}"),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let value = json_to_value(&serde_json::json!({"a": [1, 2.5, null], "b": "x"}));
        let json = value_to_json(&value);
        assert_eq!(json, serde_json::json!({"a": [1, 2.5, null], "b": "x"}));
    }
}
