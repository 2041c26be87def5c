//! The evaluation context: scopes, call frames, match scopes, the catalog
//! under construction, and the definition registry.

use crate::catalog::Catalog;
use crate::errors::EvaluationError;
use crate::facts::FactProvider;
use crate::logging::{Level, Logger};
use crate::scope::{Scope, SharedScope};
use marionette_compiler::ast::{
    ClassDefinition, DefinedTypeDefinition, Expression, FunctionDefinition, NodeDefinition,
};
use marionette_compiler::tokens::Span;
use marionette_core::Type;
use std::collections::HashMap;
use std::rc::Rc;

/// A call-stack frame: the name being evaluated and the scope captured at
/// entry. The span tracks the sub-range currently under evaluation for
/// diagnostics.
#[derive(Debug)]
pub struct StackFrame {
    pub name: String,
    pub scope: SharedScope,
    pub path: Rc<String>,
    pub line: usize,
}

impl StackFrame {
    pub fn describe(&self) -> String {
        format!("in '{}' ({}:{})", self.name, self.path, self.line)
    }
}

/// Named definitions registered by scanning syntax trees before evaluation.
#[derive(Debug, Default)]
pub struct Definitions {
    pub classes: HashMap<String, Rc<ClassDefinition>>,
    pub defined_types: HashMap<String, Rc<DefinedTypeDefinition>>,
    pub nodes: Vec<Rc<NodeDefinition>>,
    pub functions: HashMap<String, Rc<FunctionDefinition>>,
    pub type_aliases: HashMap<String, Expression>,
}

/// Per-compilation aggregate of all evaluation state.
#[derive(Debug)]
pub struct EvaluationContext {
    pub catalog: Catalog,
    pub logger: Box<dyn Logger>,
    pub definitions: Definitions,
    pub node_name: String,
    top_scope: SharedScope,
    scope_stack: Vec<SharedScope>,
    /// Match scopes pushed by `=~`, case, and selector expressions; each is
    /// `None` until a match installs captures.
    match_scopes: Vec<Option<Vec<Option<String>>>>,
    frames: Vec<StackFrame>,
    /// Output buffers for template rendering redirection.
    output: Vec<String>,
    /// Class title -> catalog index and body scope, enforcing declare-once
    /// semantics and giving `inherits` a parent scope to hang from.
    declared_classes: HashMap<String, (usize, SharedScope)>,
    resolved_aliases: HashMap<String, Type>,
    source_stack: Vec<(Rc<String>, Rc<String>)>,
    /// Module roots searched when a class or defined type is not yet
    /// registered.
    pub module_paths: Vec<std::path::PathBuf>,
    loaded_manifests: std::collections::HashSet<String>,
}

impl EvaluationContext {
    pub fn new(
        facts: Option<Rc<dyn FactProvider>>,
        logger: Box<dyn Logger>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog: Catalog::new(),
            logger,
            definitions: Definitions::default(),
            node_name: node_name.into(),
            top_scope: Scope::top(facts),
            scope_stack: Vec::new(),
            // A base match scope so `=~` outside any conditional still has
            // somewhere to install captures.
            match_scopes: vec![None],
            frames: Vec::new(),
            output: Vec::new(),
            declared_classes: HashMap::new(),
            resolved_aliases: HashMap::new(),
            source_stack: Vec::new(),
            module_paths: Vec::new(),
            loaded_manifests: std::collections::HashSet::new(),
        }
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        self.loaded_manifests.contains(path)
    }

    pub fn mark_loaded(&mut self, path: String) {
        self.loaded_manifests.insert(path);
    }

    // ── Scopes ──

    pub fn top_scope(&self) -> SharedScope {
        self.top_scope.clone()
    }

    pub fn current_scope(&self) -> SharedScope {
        self.scope_stack
            .last()
            .cloned()
            .unwrap_or_else(|| self.top_scope.clone())
    }

    /// The scope in force at the current call site (the caller's scope).
    pub fn calling_scope(&self) -> SharedScope {
        self.frames
            .last()
            .map(|frame| frame.scope.clone())
            .unwrap_or_else(|| self.top_scope.clone())
    }

    pub fn push_scope(&mut self, scope: SharedScope) {
        self.scope_stack.push(scope);
    }

    pub fn pop_scope(&mut self) {
        self.scope_stack.pop();
    }

    /// Resolves a possibly-qualified variable name to its scope and local
    /// name: `::a::b::c` and `a::b` resolve against the top scope.
    pub fn variable_scope(&self, name: &str) -> (SharedScope, String) {
        if let Some(stripped) = name.strip_prefix("::") {
            return (self.top_scope.clone(), stripped.to_string());
        }
        if name.contains("::") {
            (self.top_scope.clone(), name.to_string())
        } else {
            (self.current_scope(), name.to_string())
        }
    }

    /// Displays a scope for log attribution.
    pub fn scope_display(&self, scope: &SharedScope) -> String {
        match Scope::resource(scope) {
            Some(index) => format!("Scope({})", self.catalog.resource(index)),
            None => "Scope(Class[main])".to_string(),
        }
    }

    // ── Match scopes ──

    pub fn push_match_scope(&mut self) {
        self.match_scopes.push(None);
    }

    pub fn pop_match_scope(&mut self) {
        self.match_scopes.pop();
    }

    /// Installs regex captures into the innermost match scope.
    pub fn set_match_captures(&mut self, captures: Vec<Option<String>>) {
        if let Some(top) = self.match_scopes.last_mut() {
            *top = Some(captures);
        }
    }

    /// Looks up `$0`..`$n` through the match scope stack, innermost set
    /// scope first.
    pub fn match_variable(&self, index: usize) -> Option<String> {
        for scope in self.match_scopes.iter().rev() {
            if let Some(captures) = scope {
                return captures.get(index).cloned().flatten();
            }
        }
        None
    }

    // ── Call frames ──

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn update_frame_line(&mut self, line: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    pub fn backtrace(&self) -> Vec<String> {
        self.frames.iter().rev().map(StackFrame::describe).collect()
    }

    // ── Source files ──

    pub fn push_source(&mut self, path: Rc<String>, source: Rc<String>) {
        self.source_stack.push((path, source));
    }

    pub fn pop_source(&mut self) {
        self.source_stack.pop();
    }

    pub fn current_path(&self) -> Rc<String> {
        self.source_stack
            .last()
            .map(|(path, _)| path.clone())
            .unwrap_or_else(|| Rc::new("<unknown>".to_string()))
    }

    pub fn current_source(&self) -> Option<Rc<String>> {
        self.source_stack.last().map(|(_, source)| source.clone())
    }

    /// Builds an evaluation error at a span in the current file, capturing
    /// the stack trace.
    pub fn error(&self, message: impl Into<String>, span: Span) -> EvaluationError {
        EvaluationError::new(message, self.current_path().as_str(), span)
            .with_backtrace(self.backtrace())
    }

    // ── Output redirection ──

    pub fn push_output(&mut self) {
        self.output.push(String::new());
    }

    pub fn write_output(&mut self, text: &str) {
        if let Some(buffer) = self.output.last_mut() {
            buffer.push_str(text);
        }
    }

    pub fn pop_output(&mut self) -> String {
        self.output.pop().unwrap_or_default()
    }

    // ── Logging ──

    pub fn log(&mut self, level: Level, message: &str) {
        self.logger.log(level, message);
    }

    // ── Classes ──

    pub fn class_declared(&self, title: &str) -> Option<usize> {
        self.declared_classes.get(title).map(|(index, _)| *index)
    }

    pub fn class_scope(&self, title: &str) -> Option<SharedScope> {
        self.declared_classes.get(title).map(|(_, scope)| scope.clone())
    }

    pub fn mark_class_declared(&mut self, title: String, index: usize, scope: SharedScope) {
        self.declared_classes.insert(title, (index, scope));
    }

    // ── Type aliases ──

    pub fn resolved_alias(&self, name: &str) -> Option<Type> {
        self.resolved_aliases.get(name).cloned()
    }

    pub fn cache_alias(&mut self, name: String, resolved: Type) {
        self.resolved_aliases.insert(name, resolved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::CaptureLogger;

    fn context() -> EvaluationContext {
        EvaluationContext::new(None, Box::new(CaptureLogger::new()), "test.node")
    }

    #[test]
    fn test_match_scope_stack() {
        let mut ctx = context();
        ctx.push_match_scope();
        ctx.set_match_captures(vec![Some("abc".to_string()), Some("a".to_string())]);
        ctx.push_match_scope();
        // The inner scope has no captures yet, so lookups reach the outer.
        assert_eq!(ctx.match_variable(1), Some("a".to_string()));
        ctx.set_match_captures(vec![Some("xyz".to_string())]);
        assert_eq!(ctx.match_variable(0), Some("xyz".to_string()));
        assert_eq!(ctx.match_variable(3), None);
        ctx.pop_match_scope();
        assert_eq!(ctx.match_variable(0), Some("abc".to_string()));
        ctx.pop_match_scope();
        assert_eq!(ctx.match_variable(0), None);
    }

    #[test]
    fn test_qualified_variable_resolution() {
        let ctx = context();
        let (_, name) = ctx.variable_scope("::foo");
        assert_eq!(name, "foo");
        let (_, name) = ctx.variable_scope("foo::bar");
        assert_eq!(name, "foo::bar");
    }

    #[test]
    fn test_output_redirection() {
        let mut ctx = context();
        ctx.push_output();
        ctx.write_output("hello ");
        ctx.push_output();
        ctx.write_output("inner");
        assert_eq!(ctx.pop_output(), "inner");
        ctx.write_output("world");
        assert_eq!(ctx.pop_output(), "hello world");
    }
}
