//! The catalog: a store of declared resources plus the relationship graph,
//! sealed by finalization.

use crate::collectors::Collector;
use crate::errors::EvaluationError;
use crate::facts::value_to_json;
use crate::scope::{Scope, SharedScope};
use indexmap::IndexMap;
use marionette_compiler::tokens::Span;
use marionette_core::types::{normalize_class_name, normalize_type_name};
use marionette_core::{Type, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// The relationship kinds between resources: the four ordering/notification
/// kinds plus containment, which `contain` installs between a class and the
/// resource that declared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    Before,
    Notify,
    Require,
    Subscribe,
    Contains,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationshipKind::Before => "before",
            RelationshipKind::Notify => "notify",
            RelationshipKind::Require => "require",
            RelationshipKind::Subscribe => "subscribe",
            RelationshipKind::Contains => "contains",
        })
    }
}

/// An attribute on a resource: the value plus where the name and value
/// appeared in source.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
    pub name_span: Span,
    pub value_span: Span,
    pub path: Rc<String>,
}

/// A typed, titled, attributed unit in the catalog.
pub struct Resource {
    /// Normalized type name (`File`, `Class`, `Foo::Bar`).
    pub type_name: String,
    pub title: String,
    pub attributes: IndexMap<String, Attribute>,
    pub virtual_: bool,
    pub exported: bool,
    pub realized: bool,
    /// Lowercased tags in insertion order.
    pub tags: Vec<String>,
    pub scope: Option<SharedScope>,
    pub path: Rc<String>,
    pub line: usize,
}

impl Resource {
    pub fn is_class(&self) -> bool {
        self.type_name == "Class"
    }

    /// The resource's reference type, e.g. `File[/tmp/x]` or `Class[foo]`.
    pub fn reference(&self) -> Type {
        if self.is_class() {
            Type::Class(Some(self.title.clone()))
        } else {
            Type::Resource {
                type_name: Some(self.type_name.clone()),
                title: Some(self.title.clone()),
            }
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.to_lowercase();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn tagged(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.contains(&tag)
    }

    pub fn set_attribute(&mut self, attribute: Attribute) {
        self.attributes.insert(attribute.name.clone(), attribute);
    }

    /// Whether the resource appears in catalog output.
    pub fn effective(&self) -> bool {
        !self.virtual_ || self.realized
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.title)
    }
}

/// A relationship recorded during evaluation, resolved against concrete
/// resources at finalization.
pub struct PendingRelationship {
    pub kind: RelationshipKind,
    pub source: Value,
    pub target: Value,
    pub path: Rc<String>,
    pub span: Span,
}

/// An override queued against a resource that may not exist yet.
pub struct PendingOverride {
    pub reference: Type,
    pub attributes: Vec<Attribute>,
    /// `+>` appends to an existing array value instead of replacing.
    pub appends: HashSet<String>,
    pub path: Rc<String>,
    pub span: Span,
}

/// A resolved edge between two resources by catalog index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub kind: RelationshipKind,
}

/// The catalog under construction: mutated during evaluation, sealed by
/// `finalize`, then read-only.
#[derive(Default)]
pub struct Catalog {
    resources: Vec<Resource>,
    index: HashMap<(String, String), usize>,
    tag_index: HashMap<String, Vec<usize>>,
    edges: Vec<Edge>,
    pending_relationships: Vec<PendingRelationship>,
    pending_overrides: Vec<PendingOverride>,
    collectors: Vec<Collector>,
    finalized: bool,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, index: usize) -> &Resource {
        &self.resources[index]
    }

    pub fn resource_mut(&mut self, index: usize) -> &mut Resource {
        &mut self.resources[index]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Finds a resource index by normalized type name and title.
    pub fn find(&self, type_name: &str, title: &str) -> Option<usize> {
        self.index
            .get(&(type_name.to_string(), title.to_string()))
            .copied()
    }

    /// Finds a resource by reference type (`File[/tmp/x]`, `Class[foo]`).
    pub fn find_by_reference(&self, reference: &Type) -> Option<usize> {
        match reference {
            Type::Class(Some(title)) => self.find("Class", &normalize_class_name(title)),
            Type::Resource {
                type_name: Some(type_name),
                title: Some(title),
            } => self.find(type_name, title),
            _ => None,
        }
    }

    /// Adds a resource, enforcing `(type, title)` uniqueness. Returns the new
    /// index, or the index of the conflicting resource on duplicates.
    pub fn add(&mut self, mut resource: Resource) -> Result<usize, usize> {
        let type_name = normalize_type_name(&resource.type_name);
        let title = if type_name == "Class" {
            normalize_class_name(&resource.title)
        } else {
            resource.title.clone()
        };
        resource.type_name = type_name.clone();
        resource.title = title.clone();
        let key = (type_name.clone(), title);
        if let Some(&existing) = self.index.get(&key) {
            return Err(existing);
        }
        // Resources are automatically tagged with their type name and the
        // segments of qualified names.
        for segment in type_name.split("::") {
            resource.add_tag(segment);
        }
        if resource.is_class() {
            resource.add_tag("class");
            for segment in resource.title.clone().split("::") {
                resource.add_tag(segment);
            }
        }
        let index = self.resources.len();
        for tag in resource.tags.clone() {
            self.tag_index.entry(tag).or_default().push(index);
        }
        self.resources.push(resource);
        self.index.insert(key, index);
        Ok(index)
    }

    pub fn tag_resource(&mut self, index: usize, tag: &str) {
        self.resources[index].add_tag(tag);
        self.tag_index
            .entry(tag.to_lowercase())
            .or_default()
            .push(index);
    }

    pub fn relate(&mut self, relationship: PendingRelationship) {
        self.pending_relationships.push(relationship);
    }

    pub fn add_override(&mut self, pending: PendingOverride) {
        self.pending_overrides.push(pending);
    }

    pub fn add_collector(&mut self, collector: Collector) {
        self.collectors.push(collector);
    }

    /// Seals the catalog: a multi-pass fixed point of collection, followed by
    /// defaults, overrides, relationship resolution, cycle detection, and
    /// uncollected detection.
    pub fn finalize(&mut self) -> Result<(), EvaluationError> {
        self.run_collectors()?;
        self.apply_defaults();
        self.apply_overrides()?;
        self.resolve_relationships()?;
        self.detect_cycles()?;
        self.detect_uncollected()?;
        self.finalized = true;
        Ok(())
    }

    /// Runs every collector until a pass realizes nothing; realizing one
    /// resource may bring others into a query's view.
    fn run_collectors(&mut self) -> Result<(), EvaluationError> {
        loop {
            let mut realized = false;
            let mut collectors = std::mem::take(&mut self.collectors);
            for collector in &mut collectors {
                if collector.collect(self)? {
                    realized = true;
                }
            }
            self.collectors = collectors;
            if !realized {
                break;
            }
        }
        Ok(())
    }

    /// Marks a resource realized; reports whether it was a virtual resource
    /// that had not been realized before.
    pub fn realize(&mut self, index: usize) -> bool {
        let resource = &mut self.resources[index];
        let newly = resource.virtual_ && !resource.realized;
        resource.realized = true;
        newly
    }

    /// Merges scope-chain defaults into every resource lacking an explicit
    /// value.
    fn apply_defaults(&mut self) {
        for resource in &mut self.resources {
            let Some(scope) = resource.scope.clone() else {
                continue;
            };
            for default in Scope::visible_defaults(&scope, &resource.type_name) {
                if !resource.attributes.contains_key(&default.name) {
                    resource.set_attribute(Attribute {
                        name: default.name.clone(),
                        value: default.value.clone(),
                        name_span: Span::dummy(),
                        value_span: Span::dummy(),
                        path: default.path.clone(),
                    });
                }
            }
        }
    }

    fn apply_overrides(&mut self) -> Result<(), EvaluationError> {
        let pending = std::mem::take(&mut self.pending_overrides);
        for over in pending {
            let Some(index) = self.find_by_reference(&over.reference) else {
                return Err(EvaluationError::new(
                    format!("resource {} does not exist in the catalog.", over.reference),
                    over.path.as_str(),
                    over.span,
                ));
            };
            let resource = &mut self.resources[index];
            for attribute in over.attributes {
                if over.appends.contains(&attribute.name) {
                    let mut elements = match resource.attributes.get(&attribute.name) {
                        Some(existing) => match existing.value.dereference() {
                            Value::Array(items) => items.as_ref().clone(),
                            other => vec![other.clone()],
                        },
                        None => Vec::new(),
                    };
                    match attribute.value.dereference() {
                        Value::Array(items) => elements.extend(items.iter().cloned()),
                        other => elements.push(other.clone()),
                    }
                    resource.set_attribute(Attribute {
                        value: Value::array(elements),
                        ..attribute
                    });
                } else {
                    resource.set_attribute(attribute);
                }
            }
        }
        Ok(())
    }

    fn resolve_relationships(&mut self) -> Result<(), EvaluationError> {
        // Metaparameters produce edges first, in resource order.
        let mut meta_edges = Vec::new();
        for (index, resource) in self.resources.iter().enumerate() {
            if !resource.effective() {
                continue;
            }
            for (name, kind, forward) in [
                ("before", RelationshipKind::Before, true),
                ("notify", RelationshipKind::Notify, true),
                ("require", RelationshipKind::Require, false),
                ("subscribe", RelationshipKind::Subscribe, false),
            ] {
                let Some(attribute) = resource.attributes.get(name) else {
                    continue;
                };
                let mut references = Vec::new();
                each_resource(&attribute.value, &mut references).map_err(|message| {
                    EvaluationError::new(message, resource.path.as_str(), attribute.value_span)
                })?;
                for reference in references {
                    let Some(other) = self.find_by_reference(&reference) else {
                        return Err(EvaluationError::new(
                            format!("resource {reference} does not exist in the catalog."),
                            resource.path.as_str(),
                            attribute.value_span,
                        ));
                    };
                    let (source, target) = if forward {
                        (index, other)
                    } else {
                        (other, index)
                    };
                    meta_edges.push(Edge {
                        source,
                        target,
                        kind,
                    });
                }
            }
        }
        self.edges.extend(meta_edges);

        let pending = std::mem::take(&mut self.pending_relationships);
        for relationship in pending {
            let mut sources = Vec::new();
            each_resource(&relationship.source, &mut sources).map_err(|message| {
                EvaluationError::new(message, relationship.path.as_str(), relationship.span)
            })?;
            let mut targets = Vec::new();
            each_resource(&relationship.target, &mut targets).map_err(|message| {
                EvaluationError::new(message, relationship.path.as_str(), relationship.span)
            })?;
            for source_ref in &sources {
                let Some(source) = self.find_by_reference(source_ref) else {
                    return Err(EvaluationError::new(
                        format!("resource {source_ref} does not exist in the catalog."),
                        relationship.path.as_str(),
                        relationship.span,
                    ));
                };
                for target_ref in &targets {
                    let Some(target) = self.find_by_reference(target_ref) else {
                        return Err(EvaluationError::new(
                            format!("resource {target_ref} does not exist in the catalog."),
                            relationship.path.as_str(),
                            relationship.span,
                        ));
                    };
                    self.edges.push(Edge {
                        source,
                        target,
                        kind: relationship.kind,
                    });
                }
            }
        }
        Ok(())
    }

    /// Depth-first search for cycles over all relationship edges.
    fn detect_cycles(&self) -> Result<(), EvaluationError> {
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
        for edge in &self.edges {
            adjacency.entry(edge.source).or_default().push(edge.target);
        }
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.resources.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for start in 0..self.resources.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            stack.push((start, 0));
            marks[start] = Mark::InProgress;
            while let Some(&(node, next)) = stack.last() {
                let neighbors = adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]);
                if next < neighbors.len() {
                    if let Some(entry) = stack.last_mut() {
                        entry.1 += 1;
                    }
                    let neighbor = neighbors[next];
                    match marks[neighbor] {
                        Mark::InProgress => {
                            // Reconstruct the cycle path for the report.
                            let mut names: Vec<String> = stack
                                .iter()
                                .skip_while(|(n, _)| *n != neighbor)
                                .map(|(n, _)| self.resources[*n].to_string())
                                .collect();
                            names.push(self.resources[neighbor].to_string());
                            let resource = &self.resources[neighbor];
                            return Err(EvaluationError::new(
                                format!(
                                    "found a dependency cycle: {}.",
                                    names.join(" => ")
                                ),
                                resource.path.as_str(),
                                Span::dummy(),
                            ));
                        }
                        Mark::Unvisited => {
                            marks[neighbor] = Mark::InProgress;
                            stack.push((neighbor, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    fn detect_uncollected(&self) -> Result<(), EvaluationError> {
        for collector in &self.collectors {
            collector.detect_uncollected()?;
        }
        Ok(())
    }

    /// Emits the finalized catalog as a deterministic JSON document.
    pub fn to_json(&self, node_name: &str) -> serde_json::Value {
        let mut resources = Vec::new();
        let mut emitted_index = HashMap::new();
        for (index, resource) in self.resources.iter().enumerate() {
            if !resource.effective() {
                continue;
            }
            emitted_index.insert(index, ());
            let mut attributes = serde_json::Map::new();
            for (name, attribute) in &resource.attributes {
                attributes.insert(name.clone(), value_to_json(&attribute.value));
            }
            resources.push(serde_json::json!({
                "type": resource.type_name,
                "title": resource.title,
                "tags": resource.tags,
                "exported": resource.exported,
                "parameters": attributes,
                "file": resource.path.as_str(),
                "line": resource.line,
            }));
        }
        let edges: Vec<serde_json::Value> = self
            .edges
            .iter()
            .filter(|e| emitted_index.contains_key(&e.source) && emitted_index.contains_key(&e.target))
            .map(|e| {
                serde_json::json!({
                    "from": self.resources[e.source].to_string(),
                    "to": self.resources[e.target].to_string(),
                    "kind": e.kind.to_string(),
                })
            })
            .collect();
        serde_json::json!({
            "name": node_name,
            "resources": resources,
            "edges": edges,
        })
    }
}

/// Expands a relationship operand into resource references: arrays recurse,
/// `Resource`/`Class` type values and qualified reference strings are
/// accepted, anything else is malformed.
pub fn each_resource(value: &Value, out: &mut Vec<Type>) -> Result<(), String> {
    match value.dereference() {
        Value::Array(elements) => {
            for element in elements.iter() {
                each_resource(element, out)?;
            }
            Ok(())
        }
        Value::Type(t) => match &**t {
            Type::Resource {
                type_name: Some(_),
                title: Some(_),
            } => {
                out.push((**t).clone());
                Ok(())
            }
            Type::Class(Some(_)) => {
                out.push((**t).clone());
                Ok(())
            }
            other => Err(format!(
                "expected a fully-qualified resource reference but found {other}."
            )),
        },
        Value::String(s) => match Type::parse_resource(s) {
            Some(reference) => {
                out.push(reference);
                Ok(())
            }
            None => Err(format!(
                "expected a qualified resource string but found \"{s}\"."
            )),
        },
        other => Err(format!(
            "cannot form a relationship with {}: expected a resource reference.",
            Type::infer_reduced(other)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(type_name: &str, title: &str) -> Resource {
        Resource {
            type_name: type_name.to_string(),
            title: title.to_string(),
            attributes: IndexMap::new(),
            virtual_: false,
            exported: false,
            realized: false,
            tags: Vec::new(),
            scope: None,
            path: Rc::new("test.pp".to_string()),
            line: 1,
        }
    }

    #[test]
    fn test_uniqueness() {
        let mut catalog = Catalog::new();
        assert!(catalog.add(resource("file", "/tmp/x")).is_ok());
        assert!(catalog.add(resource("File", "/tmp/x")).is_err());
        assert!(catalog.add(resource("file", "/tmp/y")).is_ok());
    }

    #[test]
    fn test_class_title_normalization() {
        let mut catalog = Catalog::new();
        catalog.add(resource("class", "::Foo::Bar")).unwrap();
        assert!(catalog.find("Class", "foo::bar").is_some());
        assert!(catalog
            .find_by_reference(&Type::Class(Some("foo::bar".to_string())))
            .is_some());
    }

    #[test]
    fn test_declaration_order_preserved() {
        let mut catalog = Catalog::new();
        for title in ["/a", "/b", "/c"] {
            catalog.add(resource("file", title)).unwrap();
        }
        let titles: Vec<&str> = catalog.resources().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_automatic_tags() {
        let mut catalog = Catalog::new();
        let index = catalog.add(resource("foo::bar", "x")).unwrap();
        let tags = &catalog.resource(index).tags;
        assert!(tags.contains(&"foo".to_string()));
        assert!(tags.contains(&"bar".to_string()));
    }

    #[test]
    fn test_cycle_detection() {
        let mut catalog = Catalog::new();
        let a = catalog.add(resource("file", "/a")).unwrap();
        let b = catalog.add(resource("file", "/b")).unwrap();
        catalog.edges.push(Edge {
            source: a,
            target: b,
            kind: RelationshipKind::Before,
        });
        catalog.edges.push(Edge {
            source: b,
            target: a,
            kind: RelationshipKind::Require,
        });
        let err = catalog.finalize().unwrap_err();
        assert!(err.message.contains("dependency cycle"), "{}", err.message);
    }

    #[test]
    fn test_each_resource_expansion() {
        let mut out = Vec::new();
        let value = Value::array(vec![
            Value::Type(Box::new(Type::resource("file", "/a"))),
            Value::string("File[/b]"),
        ]);
        each_resource(&value, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert!(each_resource(&Value::Integer(1), &mut out).is_err());
    }

    #[test]
    fn test_virtual_excluded_until_realized() {
        let mut catalog = Catalog::new();
        let mut r = resource("file", "/a");
        r.virtual_ = true;
        let index = catalog.add(r).unwrap();
        assert!(!catalog.resource(index).effective());
        assert!(catalog.realize(index));
        assert!(catalog.resource(index).effective());
        assert!(!catalog.realize(index));
    }
}
