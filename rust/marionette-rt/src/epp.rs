//! Embedded Puppet templates.
//!
//! EPP interleaves literal text with `<%= %>` expression tags and `<% %>`
//! statement tags; `<%# %>` comments are dropped, `<%%` escapes a literal
//! `<%`, and `-` variants trim surrounding whitespace. A leading
//! `<%- |$params| -%>` tag declares template parameters. Rendering happens
//! under a local output redirection and an isolated scope seeded from the
//! argument hash.

use crate::context::{EvaluationContext, StackFrame};
use crate::errors::EvaluationError;
use crate::evaluator;
use crate::scope::Scope;
use marionette_compiler::ast::Parameter;
use marionette_compiler::tokens::Span;
use marionette_compiler::Parser;
use marionette_core::{RecursionGuard, Type, Value};
use std::rc::Rc;

#[derive(Debug, PartialEq)]
enum Part {
    Text(String),
    Expression(String),
    Code(String),
}

/// Scans template source into parts plus an optional parameter tag.
fn scan(source: &str) -> Result<(Option<String>, Vec<Part>), String> {
    let chars: Vec<char> = source.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut parameters: Option<String> = None;
    let mut seen_code = false;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '<' && i + 1 < chars.len() && chars[i + 1] == '%' {
            // `<%%` renders a literal `<%`.
            if i + 2 < chars.len() && chars[i + 2] == '%' {
                text.push_str("<%");
                i += 3;
                continue;
            }
            let mut j = i + 2;
            let mut kind = ' ';
            if j < chars.len() && matches!(chars[j], '=' | '#' | '-') {
                kind = chars[j];
                j += 1;
            }
            if kind == '-' {
                // Trim trailing spaces on the current line of text.
                while text.ends_with(' ') || text.ends_with('\t') {
                    text.pop();
                }
            }
            // Find the closing tag.
            let mut body = String::new();
            let mut closed = false;
            let mut trim_after = false;
            while j < chars.len() {
                if chars[j] == '%' && j + 1 < chars.len() && chars[j + 1] == '>' {
                    closed = true;
                    trim_after = body.ends_with('-');
                    if trim_after {
                        body.pop();
                    }
                    j += 2;
                    break;
                }
                body.push(chars[j]);
                j += 1;
            }
            if !closed {
                return Err("unterminated template tag.".to_string());
            }
            if !text.is_empty() {
                parts.push(Part::Text(std::mem::take(&mut text)));
            }
            let trimmed = body.trim().to_string();
            match kind {
                '=' => {
                    parts.push(Part::Expression(trimmed));
                    seen_code = true;
                }
                '#' => {}
                _ => {
                    if trimmed.starts_with('|') {
                        // The parameter tag must precede all other tags.
                        if parameters.is_some() || seen_code || parts.iter().any(|p| matches!(p, Part::Text(t) if !t.trim().is_empty())) {
                            return Err(
                                "the template parameter tag must be the first tag.".to_string()
                            );
                        }
                        parameters = Some(trimmed);
                    } else if !trimmed.is_empty() {
                        parts.push(Part::Code(trimmed));
                        seen_code = true;
                    }
                }
            }
            i = j;
            if trim_after {
                // `-%>` consumes the immediately-following line break.
                if i < chars.len() && chars[i] == '\r' {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '\n' {
                    i += 1;
                }
            }
            continue;
        }
        if chars[i] == '%' && i + 2 < chars.len() && chars[i + 1] == '%' && chars[i + 2] == '>' {
            // `%%>` renders a literal `%>`.
            text.push_str("%>");
            i += 3;
            continue;
        }
        text.push(chars[i]);
        i += 1;
    }
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    Ok((parameters, parts))
}

/// Renders a template under a local output redirection and a scope seeded
/// with the argument hash. Argument keys must name declared parameters when
/// a parameter tag is present.
pub fn evaluate(
    ctx: &mut EvaluationContext,
    path: &str,
    source: &str,
    arguments: Vec<(String, Value)>,
    span: Span,
) -> Result<String, EvaluationError> {
    let (parameter_tag, parts) =
        scan(source).map_err(|message| ctx.error(message, span))?;
    let parameters: Vec<Parameter> = match &parameter_tag {
        Some(tag) => Parser::parse_parameter_list(tag)
            .map_err(|e| ctx.error(format!("invalid template parameters: {e}"), span))?,
        None => Vec::new(),
    };

    let scope = Scope::child(ctx.top_scope(), None);
    let scope_path = Rc::new(path.to_string());
    if parameter_tag.is_some() {
        for (name, _) in &arguments {
            if !parameters.iter().any(|p| p.name == *name) {
                return Err(ctx.error(
                    format!("the template has no parameter named '{name}'."),
                    span,
                ));
            }
        }
        for parameter in &parameters {
            let provided = arguments
                .iter()
                .find(|(name, _)| *name == parameter.name)
                .map(|(_, value)| value.clone());
            let value = match provided {
                Some(value) => value,
                None => match &parameter.default {
                    Some(default) => {
                        ctx.push_scope(scope.clone());
                        let value = evaluator::evaluate_expression(ctx, default);
                        ctx.pop_scope();
                        value?.into_dereferenced()
                    }
                    None => {
                        return Err(ctx.error(
                            format!(
                                "the template expects a value for parameter ${}.",
                                parameter.name
                            ),
                            span,
                        ))
                    }
                },
            };
            if let Some(type_expression) = &parameter.type_expression {
                ctx.push_scope(scope.clone());
                let declared = evaluator::evaluate_expression(ctx, type_expression);
                ctx.pop_scope();
                let declared = declared?;
                if let Some(declared) = declared.as_type() {
                    let mut guard = RecursionGuard::new();
                    if !declared.is_instance(&value, &mut guard) {
                        return Err(ctx.error(
                            format!(
                                "template parameter ${} expects {} but was given {}.",
                                parameter.name,
                                declared,
                                Type::infer_reduced(&value)
                            ),
                            span,
                        ));
                    }
                }
            }
            Scope::set(
                &scope,
                &parameter.name,
                Rc::new(value),
                scope_path.clone(),
                parameter.span.start.line,
            );
        }
    } else {
        for (name, value) in &arguments {
            Scope::set(
                &scope,
                name,
                Rc::new(value.clone()),
                scope_path.clone(),
                span.start.line,
            );
        }
    }

    ctx.push_frame(StackFrame {
        name: format!("template {path}"),
        scope: ctx.current_scope(),
        path: ctx.current_path(),
        line: span.start.line,
    });
    ctx.push_scope(scope);
    ctx.push_output();
    let result = render(ctx, path, &parts);
    let output = ctx.pop_output();
    ctx.pop_scope();
    ctx.pop_frame();
    result?;
    Ok(output)
}

fn render(
    ctx: &mut EvaluationContext,
    path: &str,
    parts: &[Part],
) -> Result<(), EvaluationError> {
    for part in parts {
        match part {
            Part::Text(text) => ctx.write_output(text),
            Part::Expression(source) => {
                let tree = Parser::parse_tree(path, source).map_err(|e| {
                    ctx.error(format!("invalid template expression: {e}"), Span::dummy())
                })?;
                let value = evaluator::evaluate_statements(ctx, &tree.statements)?;
                if value.is_control_transfer() {
                    return Err(evaluator::control_error(&value));
                }
                let rendered = value.dereference().to_string();
                ctx.write_output(&rendered);
            }
            Part::Code(source) => {
                let tree = Parser::parse_tree(path, source).map_err(|e| {
                    ctx.error(format!("invalid template code: {e}"), Span::dummy())
                })?;
                let value = evaluator::evaluate_statements(ctx, &tree.statements)?;
                if value.is_control_transfer() {
                    return Err(evaluator::control_error(&value));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_parts() {
        let (parameters, parts) =
            scan("Hello <%= $name %>!\n<%# comment %><% $x %>").unwrap();
        assert!(parameters.is_none());
        assert_eq!(
            parts,
            vec![
                Part::Text("Hello ".to_string()),
                Part::Expression("$name".to_string()),
                Part::Text("!\n".to_string()),
                Part::Code("$x".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_escapes_and_trim() {
        let (_, parts) = scan("a <%% b\nline  <%- $x -%>\nnext").unwrap();
        assert_eq!(
            parts,
            vec![
                Part::Text("a <% b\nline".to_string()),
                Part::Code("$x".to_string()),
                Part::Text("next".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_parameter_tag() {
        let (parameters, parts) = scan("<%- |$greeting = 'hi'| -%>\n<%= $greeting %>").unwrap();
        assert_eq!(parameters, Some("|$greeting = 'hi'|".to_string()));
        assert_eq!(parts, vec![Part::Expression("$greeting".to_string())]);
    }

    #[test]
    fn test_parameter_tag_must_lead() {
        assert!(scan("text <% notice('x') %> <%- |$p| -%>").is_err());
    }
}
