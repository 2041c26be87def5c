//! Node resolution and the compile pipeline: parse, scan, evaluate, select
//! the node definition, and finalize the catalog.

use crate::context::{EvaluationContext, StackFrame};
use crate::errors::CompilationError;
use crate::evaluator;
use crate::scope::Scope;
use indexmap::IndexMap;
use marionette_compiler::ast::{Hostname, NodeDefinition, SyntaxTree};
use marionette_compiler::Parser;
use std::rc::Rc;

/// A node's name set: `foo.bar.baz` yields the progressively-qualified
/// subnames `foo`, `foo.bar`, and `foo.bar.baz`, lowercased. The longest
/// subname is the most specific.
pub fn subnames(node_name: &str) -> Vec<String> {
    let lowered = node_name.to_lowercase();
    let mut names = Vec::new();
    let mut end = 0;
    for part in lowered.split('.') {
        if part.is_empty() {
            continue;
        }
        end += part.len() + usize::from(end > 0);
        names.push(lowered[..end].to_string());
    }
    if names.is_empty() {
        names.push(lowered);
    }
    names
}

/// Selects the node definition for a node name: the most specific exact name
/// wins, then the first matching regex, then `default`.
pub fn select_node(
    definitions: &[Rc<NodeDefinition>],
    node_name: &str,
) -> Option<Rc<NodeDefinition>> {
    let names = subnames(node_name);
    let mut best: Option<(usize, Rc<NodeDefinition>)> = None;
    for definition in definitions {
        for hostname in &definition.hostnames {
            let matched = match hostname {
                Hostname::Name(name) | Hostname::Literal(name) => {
                    let lowered = name.to_lowercase();
                    names.iter().position(|n| *n == lowered)
                }
                _ => None,
            };
            if let Some(specificity) = matched {
                if best
                    .as_ref()
                    .map(|(existing, _)| specificity > *existing)
                    .unwrap_or(true)
                {
                    best = Some((specificity, definition.clone()));
                }
            }
        }
    }
    if let Some((_, definition)) = best {
        return Some(definition);
    }
    for definition in definitions {
        for hostname in &definition.hostnames {
            if let Hostname::Regex(pattern) = hostname {
                if let Ok(regex) = regex::Regex::new(pattern) {
                    if regex.is_match(node_name) {
                        return Some(definition.clone());
                    }
                }
            }
        }
    }
    definitions
        .iter()
        .find(|definition| definition.hostnames.contains(&Hostname::Default))
        .cloned()
}

/// Declares the implicit `Class[main]` resource that top-level code
/// evaluates under.
fn declare_main(ctx: &mut EvaluationContext) {
    let top = ctx.top_scope();
    let main = crate::catalog::Resource {
        type_name: "Class".to_string(),
        title: "main".to_string(),
        attributes: IndexMap::new(),
        virtual_: false,
        exported: false,
        realized: true,
        tags: Vec::new(),
        scope: Some(top.clone()),
        path: Rc::new("<compiler>".to_string()),
        line: 0,
    };
    if let Ok(index) = ctx.catalog.add(main) {
        top.borrow_mut().set_resource(index);
        ctx.mark_class_declared("main".to_string(), index, top);
    }
}

/// Compiles manifests into the context's catalog: parses every source, scans
/// definitions, evaluates the manifests in order, evaluates the matching
/// node definition, and finalizes.
pub fn compile_into(
    ctx: &mut EvaluationContext,
    sources: &[(String, String)],
) -> Result<(), CompilationError> {
    declare_main(ctx);

    // Parse everything first so definitions can be scanned before any
    // evaluation happens.
    let mut trees: Vec<SyntaxTree> = Vec::new();
    for (path, source) in sources {
        trees.push(Parser::parse_tree(path.clone(), source)?);
    }
    for tree in &trees {
        evaluator::scan_definitions(ctx, tree);
    }
    for tree in &trees {
        evaluator::evaluate_tree(ctx, tree)?;
    }

    // Evaluate the node definition, if any are defined.
    if !ctx.definitions.nodes.is_empty() {
        let node_name = ctx.node_name.clone();
        let Some(definition) = select_node(&ctx.definitions.nodes, &node_name) else {
            return Err(CompilationError::Evaluation(crate::errors::EvaluationError {
                message: format!(
                    "could not find a default node or a node matching '{node_name}'."
                ),
                path: sources
                    .first()
                    .map(|(path, _)| path.clone())
                    .unwrap_or_default(),
                line: 0,
                offset: 0,
                backtrace: Vec::new(),
            }));
        };
        evaluate_node(ctx, &definition)?;
    }

    ctx.catalog.finalize()?;
    Ok(())
}

fn evaluate_node(
    ctx: &mut EvaluationContext,
    definition: &NodeDefinition,
) -> Result<(), CompilationError> {
    let scope = Scope::child(ctx.top_scope(), None);
    ctx.push_frame(StackFrame {
        name: format!("node {}", ctx.node_name),
        scope: ctx.current_scope(),
        path: ctx.current_path(),
        line: definition.span.start.line,
    });
    ctx.push_scope(scope);
    let result = evaluator::evaluate_statements(ctx, &definition.body);
    ctx.pop_scope();
    ctx.pop_frame();
    let value = result?;
    if value.is_control_transfer() {
        return Err(evaluator::control_error(&value).into());
    }
    Ok(())
}

/// One-shot convenience over `compile_into`: builds a context, compiles, and
/// hands the context (catalog, logger, definitions) back.
pub fn compile(
    sources: &[(String, String)],
    facts: Option<Rc<dyn crate::facts::FactProvider>>,
    logger: Box<dyn crate::logging::Logger>,
    node_name: &str,
) -> Result<EvaluationContext, CompilationError> {
    let mut ctx = EvaluationContext::new(facts, logger, node_name);
    compile_into(&mut ctx, sources)?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_compiler::tokens::Span;

    fn node(hostnames: Vec<Hostname>) -> Rc<NodeDefinition> {
        Rc::new(NodeDefinition {
            hostnames,
            body: Vec::new(),
            span: Span::dummy(),
        })
    }

    #[test]
    fn test_subnames_progressive() {
        assert_eq!(
            subnames("Web01.Example.Com"),
            vec!["web01", "web01.example", "web01.example.com"]
        );
        assert_eq!(subnames("single"), vec!["single"]);
    }

    #[test]
    fn test_most_specific_name_wins() {
        let general = node(vec![Hostname::Name("web01".to_string())]);
        let specific = node(vec![Hostname::Name("web01.example.com".to_string())]);
        let selected = select_node(
            &[general.clone(), specific.clone()],
            "web01.example.com",
        )
        .unwrap();
        assert!(Rc::ptr_eq(&selected, &specific));
    }

    #[test]
    fn test_regex_after_exact() {
        let exact = node(vec![Hostname::Name("db1".to_string())]);
        let pattern = node(vec![Hostname::Regex("^db\\d+$".to_string())]);
        let selected = select_node(&[pattern.clone(), exact.clone()], "db1").unwrap();
        assert!(Rc::ptr_eq(&selected, &exact));
        let selected = select_node(&[pattern.clone(), exact], "db2").unwrap();
        assert!(Rc::ptr_eq(&selected, &pattern));
    }

    #[test]
    fn test_default_last_resort() {
        let fallback = node(vec![Hostname::Default]);
        let named = node(vec![Hostname::Name("other".to_string())]);
        let selected = select_node(&[named, fallback.clone()], "unmatched").unwrap();
        assert!(Rc::ptr_eq(&selected, &fallback));
        assert!(select_node(&[], "unmatched").is_none());
    }
}
