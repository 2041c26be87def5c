//! On-demand loading of classes and defined types from module paths.
//!
//! A qualified name like `apache::vhost` resolves to
//! `<module root>/apache/manifests/vhost.pp`; the bare module name resolves
//! to `init.pp`. Located files are parsed and their definitions registered;
//! the caller re-checks the registry afterwards.

use crate::context::EvaluationContext;
use crate::errors::EvaluationError;
use crate::evaluator;
use marionette_compiler::tokens::Span;
use marionette_compiler::Parser;
use std::path::PathBuf;

/// The manifest file a definition name maps to, relative to a module root.
pub fn manifest_path(name: &str) -> (String, PathBuf) {
    let mut segments = name.split("::");
    let module = segments.next().unwrap_or(name).to_string();
    let rest: Vec<&str> = segments.collect();
    let relative = if rest.is_empty() {
        PathBuf::from("init.pp")
    } else {
        PathBuf::from(format!("{}.pp", rest.join("/")))
    };
    (module, relative)
}

/// Attempts to locate and scan the manifest defining `name`. Returns whether
/// a manifest was loaded; the definition registry may still lack the name if
/// the file did not define it.
pub fn load_definition(
    ctx: &mut EvaluationContext,
    name: &str,
    span: Span,
) -> Result<bool, EvaluationError> {
    let (module, relative) = manifest_path(name);
    if module.is_empty() {
        return Ok(false);
    }
    for root in ctx.module_paths.clone() {
        let candidate = root.join(&module).join("manifests").join(&relative);
        if !candidate.is_file() {
            continue;
        }
        let path = candidate.display().to_string();
        if ctx.is_loaded(&path) {
            return Ok(false);
        }
        let source = std::fs::read_to_string(&candidate)
            .map_err(|e| ctx.error(format!("cannot read manifest '{path}': {e}."), span))?;
        let tree = Parser::parse_tree(path.clone(), &source).map_err(|e| {
            ctx.error(format!("cannot parse manifest '{path}': {e}"), span)
        })?;
        ctx.mark_loaded(path);
        evaluator::scan_definitions(ctx, &tree);
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_path_mapping() {
        let (module, relative) = manifest_path("apache");
        assert_eq!(module, "apache");
        assert_eq!(relative, PathBuf::from("init.pp"));

        let (module, relative) = manifest_path("apache::vhost::ssl");
        assert_eq!(module, "apache");
        assert_eq!(relative, PathBuf::from("vhost/ssl.pp"));
    }
}
