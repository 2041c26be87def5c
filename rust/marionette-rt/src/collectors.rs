//! Collectors: registered queries that realize resources at finalization.

use crate::catalog::Catalog;
use crate::errors::EvaluationError;
use marionette_compiler::tokens::Span;
use marionette_core::{Type, Value};
use std::rc::Rc;

/// A query predicate with values already evaluated at registration time.
#[derive(Debug, Clone)]
pub enum CollectorQuery {
    Condition {
        attribute: String,
        negated: bool,
        value: Value,
    },
    And(Box<CollectorQuery>, Box<CollectorQuery>),
    Or(Box<CollectorQuery>, Box<CollectorQuery>),
}

impl CollectorQuery {
    /// Evaluates the predicate against a resource. The `tag` and `title`
    /// attributes query the tag set and title; everything else compares the
    /// named attribute's value with language equality.
    pub fn matches(&self, catalog: &Catalog, index: usize) -> bool {
        match self {
            CollectorQuery::Condition {
                attribute,
                negated,
                value,
            } => {
                let resource = catalog.resource(index);
                let result = match attribute.as_str() {
                    "tag" => value
                        .as_string()
                        .map(|tag| resource.tagged(tag))
                        .unwrap_or(false),
                    "title" => Value::string(resource.title.clone()).equals(value),
                    name => resource
                        .attributes
                        .get(name)
                        .map(|attribute| attribute.value.equals(value))
                        .unwrap_or(false),
                };
                result != *negated
            }
            CollectorQuery::And(left, right) => {
                left.matches(catalog, index) && right.matches(catalog, index)
            }
            CollectorQuery::Or(left, right) => {
                left.matches(catalog, index) || right.matches(catalog, index)
            }
        }
    }
}

/// A collector created by `realize`: explicit references that must all be
/// found by the time the catalog is sealed.
pub struct ListCollector {
    remaining: Vec<(Type, Rc<String>, Span)>,
}

impl ListCollector {
    pub fn new(references: Vec<(Type, Rc<String>, Span)>) -> Self {
        Self {
            remaining: references,
        }
    }

    fn collect(&mut self, catalog: &mut Catalog) -> Result<bool, EvaluationError> {
        let mut realized = false;
        self.remaining.retain(|(reference, _, _)| {
            match catalog.find_by_reference(reference) {
                Some(index) => {
                    if catalog.realize(index) {
                        realized = true;
                    }
                    false
                }
                None => true,
            }
        });
        Ok(realized)
    }

    fn detect_uncollected(&self) -> Result<(), EvaluationError> {
        match self.remaining.first() {
            Some((reference, path, span)) => Err(EvaluationError::new(
                format!("resource {reference} does not exist in the catalog."),
                path.as_str(),
                *span,
            )),
            None => Ok(()),
        }
    }
}

/// A collector created by `<| |>` / `<<| |>>`: a predicate over declared
/// resources of a type.
pub struct QueryCollector {
    /// Normalized resource type name.
    pub type_name: String,
    pub query: Option<CollectorQuery>,
    pub exported: bool,
    /// Resources below this index have already been examined.
    next_index: usize,
}

impl QueryCollector {
    pub fn new(type_name: String, query: Option<CollectorQuery>, exported: bool) -> Self {
        Self {
            type_name,
            query,
            exported,
            next_index: 0,
        }
    }

    fn collect(&mut self, catalog: &mut Catalog) -> Result<bool, EvaluationError> {
        let mut matched = Vec::new();
        let total = catalog.resources().len();
        for index in self.next_index..total {
            let resource = catalog.resource(index);
            if resource.type_name != self.type_name {
                continue;
            }
            let matches = self
                .query
                .as_ref()
                .map(|query| query.matches(catalog, index))
                .unwrap_or(true);
            if matches {
                matched.push(index);
            }
        }
        self.next_index = total;
        let mut realized = false;
        for index in matched {
            if catalog.realize(index) {
                realized = true;
            }
        }
        Ok(realized)
    }
}

/// Either collector form; run in registration order during finalization.
pub enum Collector {
    List(ListCollector),
    Query(QueryCollector),
}

impl Collector {
    /// Runs one pass; reports whether any resource became newly realized.
    pub fn collect(&mut self, catalog: &mut Catalog) -> Result<bool, EvaluationError> {
        match self {
            Collector::List(collector) => collector.collect(catalog),
            Collector::Query(collector) => collector.collect(catalog),
        }
    }

    /// A list collector that never matched a reference is a hard error;
    /// query collectors are silent.
    pub fn detect_uncollected(&self) -> Result<(), EvaluationError> {
        match self {
            Collector::List(collector) => collector.detect_uncollected(),
            Collector::Query(_) => Ok(()),
        }
    }
}
