//! Lexical variable scopes.

use crate::facts::FactProvider;
use marionette_core::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// A variable binding: the shared immutable value plus the location that
/// first bound it. Facts surface as bindings with no location.
#[derive(Debug, Clone)]
pub struct AssignedVariable {
    pub value: Rc<Value>,
    pub path: Option<Rc<String>>,
    pub line: usize,
}

impl AssignedVariable {
    fn fact(value: Rc<Value>) -> Self {
        Self {
            value,
            path: None,
            line: 0,
        }
    }
}

/// Default attribute values captured from a `Type { ... }` expression,
/// stored on the scope that evaluated it.
#[derive(Debug, Clone)]
pub struct DefaultAttribute {
    pub name: String,
    pub value: Value,
    pub path: Rc<String>,
    pub line: usize,
}

/// A lexical frame of variable bindings.
///
/// The top scope has no parent and owns the fact provider; facts act as a
/// read-only layer under it. Class and defined-type scopes carry the catalog
/// index of the resource they evaluate.
#[derive(Debug)]
pub struct Scope {
    parent: Option<SharedScope>,
    variables: HashMap<String, AssignedVariable>,
    facts: Option<Rc<dyn FactProvider>>,
    /// Catalog index of the resource this scope represents.
    resource: Option<usize>,
    /// Resource defaults declared in this scope, keyed by normalized type
    /// name.
    defaults: HashMap<String, Vec<DefaultAttribute>>,
}

pub type SharedScope = Rc<std::cell::RefCell<Scope>>;

impl Scope {
    /// Creates a top scope backed by a fact provider.
    pub fn top(facts: Option<Rc<dyn FactProvider>>) -> SharedScope {
        Rc::new(std::cell::RefCell::new(Scope {
            parent: None,
            variables: HashMap::new(),
            facts,
            resource: None,
            defaults: HashMap::new(),
        }))
    }

    /// Creates a child scope, optionally associated with a resource.
    pub fn child(parent: SharedScope, resource: Option<usize>) -> SharedScope {
        Rc::new(std::cell::RefCell::new(Scope {
            parent: Some(parent),
            variables: HashMap::new(),
            facts: None,
            resource,
            defaults: HashMap::new(),
        }))
    }

    pub fn parent(&self) -> Option<SharedScope> {
        self.parent.clone()
    }

    /// The resource this scope (or the nearest ancestor) represents.
    pub fn resource(scope: &SharedScope) -> Option<usize> {
        let mut current = scope.clone();
        loop {
            let next = {
                let borrowed = current.borrow();
                if let Some(resource) = borrowed.resource {
                    return Some(resource);
                }
                borrowed.parent.clone()?
            };
            current = next;
        }
    }

    pub fn set_resource(&mut self, resource: usize) {
        self.resource = Some(resource);
    }

    /// Sets a variable. Returns the existing binding if the name is already
    /// bound in this scope (or shadowed by a fact at top scope); once set, a
    /// name is never overwritten.
    pub fn set(
        scope: &SharedScope,
        name: &str,
        value: Rc<Value>,
        path: Rc<String>,
        line: usize,
    ) -> Option<AssignedVariable> {
        {
            let borrowed = scope.borrow();
            if let Some(existing) = borrowed.variables.get(name) {
                return Some(existing.clone());
            }
        }
        if scope.borrow().facts.is_some() {
            if let Some(existing) = Scope::get(scope, name) {
                return Some(existing);
            }
        }
        scope.borrow_mut().variables.insert(
            name.to_string(),
            AssignedVariable {
                value,
                path: Some(path),
                line,
            },
        );
        None
    }

    /// Looks a name up through the parent chain, consulting facts at the top
    /// scope and caching the result there.
    pub fn get(scope: &SharedScope, name: &str) -> Option<AssignedVariable> {
        let mut current = scope.clone();
        loop {
            let next = {
                let borrowed = current.borrow();
                if let Some(variable) = borrowed.variables.get(name) {
                    return Some(variable.clone());
                }
                borrowed.parent.clone()
            };
            match next {
                Some(parent) => current = parent,
                None => break,
            }
        }
        // `current` is now the top scope.
        let fact = {
            let borrowed = current.borrow();
            borrowed.facts.as_ref().and_then(|facts| facts.lookup(name))
        }?;
        let variable = AssignedVariable::fact(Rc::new(fact));
        current
            .borrow_mut()
            .variables
            .insert(name.to_string(), variable.clone());
        Some(variable)
    }

    /// Adds a resource default; later defaults for the same attribute win
    /// within a scope.
    pub fn add_default(&mut self, type_name: String, attribute: DefaultAttribute) {
        let defaults = self.defaults.entry(type_name).or_default();
        if let Some(existing) = defaults.iter_mut().find(|d| d.name == attribute.name) {
            *existing = attribute;
        } else {
            defaults.push(attribute);
        }
    }

    /// Collects the defaults visible from this scope for a resource type,
    /// nearest scope first.
    pub fn visible_defaults(scope: &SharedScope, type_name: &str) -> Vec<DefaultAttribute> {
        let mut result: Vec<DefaultAttribute> = Vec::new();
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            {
                let borrowed = s.borrow();
                if let Some(defaults) = borrowed.defaults.get(type_name) {
                    for default in defaults {
                        if !result.iter().any(|d| d.name == default.name) {
                            result.push(default.clone());
                        }
                    }
                }
            }
            current = s.borrow().parent.clone();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::MapFacts;

    fn top_with_facts() -> SharedScope {
        let mut facts = MapFacts::new();
        facts.set("os", Value::string("linux"));
        Scope::top(Some(Rc::new(facts)))
    }

    #[test]
    fn test_set_once() {
        let top = Scope::top(None);
        let path = Rc::new("test.pp".to_string());
        assert!(Scope::set(&top, "x", Rc::new(Value::Integer(1)), path.clone(), 1).is_none());
        let previous = Scope::set(&top, "x", Rc::new(Value::Integer(2)), path, 2);
        assert!(previous.is_some());
        assert_eq!(previous.unwrap().line, 1);
        // The original binding is unchanged.
        assert_eq!(
            *Scope::get(&top, "x").unwrap().value,
            Value::Integer(1)
        );
    }

    #[test]
    fn test_lookup_walks_parents() {
        let top = Scope::top(None);
        let path = Rc::new("test.pp".to_string());
        Scope::set(&top, "x", Rc::new(Value::Integer(1)), path, 1);
        let child = Scope::child(top, None);
        assert_eq!(*Scope::get(&child, "x").unwrap().value, Value::Integer(1));
        assert!(Scope::get(&child, "y").is_none());
    }

    #[test]
    fn test_fact_lookup_and_conflict() {
        let top = top_with_facts();
        assert_eq!(
            *Scope::get(&top, "os").unwrap().value,
            Value::string("linux")
        );
        // Assigning over a fact reports a conflict with no location.
        let previous = Scope::set(
            &top,
            "os",
            Rc::new(Value::string("bsd")),
            Rc::new("test.pp".to_string()),
            1,
        );
        assert!(previous.is_some());
        assert!(previous.unwrap().path.is_none());
    }

    #[test]
    fn test_child_can_shadow() {
        let top = top_with_facts();
        let child = Scope::child(top, None);
        let path = Rc::new("test.pp".to_string());
        // Local scopes may bind names that exist as facts.
        assert!(Scope::set(&child, "os", Rc::new(Value::string("bsd")), path, 1).is_none());
        assert_eq!(*Scope::get(&child, "os").unwrap().value, Value::string("bsd"));
    }

    #[test]
    fn test_defaults_nearest_scope_wins() {
        let top = Scope::top(None);
        let path = Rc::new("test.pp".to_string());
        top.borrow_mut().add_default(
            "File".to_string(),
            DefaultAttribute {
                name: "mode".to_string(),
                value: Value::string("0644"),
                path: path.clone(),
                line: 1,
            },
        );
        let child = Scope::child(top, None);
        child.borrow_mut().add_default(
            "File".to_string(),
            DefaultAttribute {
                name: "mode".to_string(),
                value: Value::string("0600"),
                path,
                line: 2,
            },
        );
        let visible = Scope::visible_defaults(&child, "File");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].value, Value::string("0600"));
    }
}
