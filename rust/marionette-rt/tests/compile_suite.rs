//! End-to-end compilation tests: source text in, catalog and log lines out.

use marionette_rt::logging::{CaptureLogger, Level};
use marionette_rt::{compile, CompilationError, EvaluationContext};
use std::cell::RefCell;
use std::rc::Rc;

type SharedLog = Rc<RefCell<CaptureLogger>>;

fn compile_source(source: &str) -> (EvaluationContext, SharedLog) {
    let logger: SharedLog = Rc::new(RefCell::new(CaptureLogger::new()));
    let context = compile(
        &[("site.pp".to_string(), source.to_string())],
        None,
        Box::new(logger.clone()),
        "test.example.com",
    )
    .unwrap_or_else(|e| panic!("compilation failed: {e}"));
    (context, logger)
}

fn compile_error(source: &str) -> CompilationError {
    let logger: SharedLog = Rc::new(RefCell::new(CaptureLogger::new()));
    match compile(
        &[("site.pp".to_string(), source.to_string())],
        None,
        Box::new(logger),
        "test.example.com",
    ) {
        Ok(_) => panic!("expected compilation to fail"),
        Err(e) => e,
    }
}

fn effective_refs(context: &EvaluationContext) -> Vec<String> {
    context
        .catalog
        .resources()
        .iter()
        .filter(|r| r.effective())
        .map(|r| r.to_string())
        .collect()
}

#[test]
fn test_assignment_and_arithmetic() {
    let (context, logger) = compile_source("$a = 2 + 3 * 4 notice($a)");
    let entries = &logger.borrow().entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::Notice);
    assert_eq!(entries[0].1, "Scope(Class[main]): 14");
    assert_eq!(effective_refs(&context), vec!["Class[main]"]);
    assert!(context.catalog.edges().is_empty());
}

#[test]
fn test_class_declaration_via_include() {
    let (context, _) = compile_source(
        "class foo { file { '/tmp/x': ensure => present } } include foo",
    );
    assert_eq!(
        effective_refs(&context),
        vec!["Class[main]", "Class[foo]", "File[/tmp/x]"]
    );
    let file = context
        .catalog
        .find("File", "/tmp/x")
        .map(|i| context.catalog.resource(i))
        .expect("file resource exists");
    assert_eq!(
        file.attributes.get("ensure").map(|a| a.value.to_string()),
        Some("present".to_string())
    );
    assert!(context.catalog.edges().is_empty());
}

#[test]
fn test_relationship_operator() {
    let (context, _) = compile_source("file { 'a': } -> file { 'b': }");
    assert_eq!(
        effective_refs(&context),
        vec!["Class[main]", "File[a]", "File[b]"]
    );
    let edges = context.catalog.edges();
    assert_eq!(edges.len(), 1);
    let edge = edges[0];
    assert_eq!(context.catalog.resource(edge.source).to_string(), "File[a]");
    assert_eq!(context.catalog.resource(edge.target).to_string(), "File[b]");
    assert_eq!(edge.kind.to_string(), "before");
}

#[test]
fn test_collector_realizes_virtual() {
    let (context, _) = compile_source("@file { 'a': tag => 'x' } File <| tag == 'x' |>");
    let index = context.catalog.find("File", "a").expect("resource exists");
    let resource = context.catalog.resource(index);
    assert!(resource.realized);
    assert!(resource.effective());
}

#[test]
fn test_unmatched_collector_leaves_virtual() {
    let (context, _) = compile_source("@file { 'a': tag => 'x' } File <| tag == 'other' |>");
    let index = context.catalog.find("File", "a").expect("resource exists");
    assert!(!context.catalog.resource(index).effective());
}

#[test]
fn test_assignment_to_match_variable_fails() {
    let error = compile_error("$1 = 5");
    assert_eq!(
        error.to_string(),
        "cannot assign to $1: the name is reserved as a match variable."
    );
}

#[test]
fn test_assert_type() {
    let (_, logger) = compile_source("notice(assert_type(Integer, 5))");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): 5");

    let error = compile_error("assert_type(Integer, 'x')");
    assert_eq!(
        error.to_string(),
        "type assertion failure: expected Integer but found String."
    );

    let (_, logger) = compile_source("notice(assert_type(Integer, 'x') |$expected, $actual| { 0 })");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): 0");
}

#[test]
fn test_variable_immutability() {
    let error = compile_error("$x = 1 $x = 2");
    let message = error.to_string();
    assert!(
        message.contains("cannot assign to $x: variable was previously assigned at site.pp:1"),
        "got: {message}"
    );
}

#[test]
fn test_child_scope_reads_parent_variable() {
    let (_, logger) = compile_source("$x = 1 class foo { notice($x) } include foo");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[foo]): 1");
}

#[test]
fn test_resource_uniqueness() {
    let error = compile_error("file { '/a': } file { '/a': }");
    assert!(
        error.to_string().contains("was previously declared at site.pp:1"),
        "got: {error}"
    );
}

#[test]
fn test_declaration_order_preserved() {
    let (context, _) = compile_source("file { '/c': } file { '/a': } file { '/b': }");
    assert_eq!(
        effective_refs(&context),
        vec!["Class[main]", "File[/c]", "File[/a]", "File[/b]"]
    );
}

#[test]
fn test_multiple_titles_and_default_body() {
    let (context, _) = compile_source(
        "file { ['/a', '/b']: ensure => file; default: mode => '0644'; '/c': mode => '0600' }",
    );
    let mode = |title: &str| {
        context
            .catalog
            .find("File", title)
            .map(|i| context.catalog.resource(i))
            .and_then(|r| r.attributes.get("mode"))
            .map(|a| a.value.to_string())
    };
    assert_eq!(mode("/a"), Some("0644".to_string()));
    assert_eq!(mode("/b"), Some("0644".to_string()));
    // An explicit attribute wins over the default body.
    assert_eq!(mode("/c"), Some("0600".to_string()));
}

#[test]
fn test_scope_defaults_merged_at_finalize() {
    let (context, _) = compile_source("File { owner => 'root' } file { '/a': } file { '/b': owner => 'web' }");
    let owner = |title: &str| {
        context
            .catalog
            .find("File", title)
            .map(|i| context.catalog.resource(i))
            .and_then(|r| r.attributes.get("owner"))
            .map(|a| a.value.to_string())
    };
    assert_eq!(owner("/a"), Some("root".to_string()));
    assert_eq!(owner("/b"), Some("web".to_string()));
}

#[test]
fn test_override_applied_at_finalize() {
    let (context, _) = compile_source("file { '/a': mode => '0644' } File['/a'] { mode => '0600' }");
    let index = context.catalog.find("File", "/a").unwrap();
    assert_eq!(
        context.catalog.resource(index).attributes["mode"].value.to_string(),
        "0600"
    );
}

#[test]
fn test_override_of_missing_resource_fails() {
    let error = compile_error("File['/missing'] { mode => '0600' }");
    assert!(
        error.to_string().contains("does not exist in the catalog"),
        "got: {error}"
    );
}

#[test]
fn test_defined_type_expansion() {
    let (context, _) = compile_source(
        "define web::vhost(String $port = '80') { file { \"/etc/vhosts/${title}\": ensure => present } } \
         web::vhost { 'example': port => '8080' }",
    );
    let refs = effective_refs(&context);
    assert!(refs.contains(&"Web::Vhost[example]".to_string()), "{refs:?}");
    assert!(refs.contains(&"File[/etc/vhosts/example]".to_string()), "{refs:?}");
    let index = context.catalog.find("Web::Vhost", "example").unwrap();
    assert_eq!(
        context.catalog.resource(index).attributes["port"].value.to_string(),
        "8080"
    );
}

#[test]
fn test_class_parameters_and_defaults() {
    let (context, _) = compile_source(
        "class ntp(String $server = 'pool.ntp.org') { file { '/etc/ntp.conf': content => $server } } \
         class { 'ntp': }",
    );
    let index = context.catalog.find("File", "/etc/ntp.conf").unwrap();
    assert_eq!(
        context.catalog.resource(index).attributes["content"].value.to_string(),
        "pool.ntp.org"
    );
}

#[test]
fn test_class_redeclaration_idempotent_without_arguments() {
    let (context, _) = compile_source("class foo { } include foo include foo class { 'foo': }");
    assert_eq!(effective_refs(&context), vec!["Class[main]", "Class[foo]"]);
}

#[test]
fn test_class_redeclaration_with_arguments_fails() {
    let error = compile_error(
        "class foo(String $x = 'a') { } include foo class { 'foo': x => 'b' }",
    );
    assert!(
        error.to_string().contains("already declared"),
        "got: {error}"
    );
}

#[test]
fn test_parameter_type_enforced() {
    let error = compile_error("class foo(Integer $n) { } class { 'foo': n => 'nope' }");
    let message = error.to_string();
    assert!(
        message.contains("parameter $n expects Integer but was given String"),
        "got: {message}"
    );
}

#[test]
fn test_case_with_regex_captures() {
    let (_, logger) = compile_source(
        "case 'db-west-1' { /^db-(\\w+)-\\d$/: { notice($1) } default: { notice('none') } }",
    );
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): west");
}

#[test]
fn test_case_with_type_and_default_options() {
    let (_, logger) = compile_source(
        "case 42 { String: { notice('string') } Integer[0, 50]: { notice('small') } default: { notice('other') } }",
    );
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): small");
}

#[test]
fn test_selector_expression() {
    let (_, logger) = compile_source(
        "$mode = 'ro' $flag = $mode ? { 'rw' => 1, 'ro' => 0, default => -1 } notice($flag)",
    );
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): 0");
}

#[test]
fn test_selector_without_match_fails() {
    let error = compile_error("$x = 'z' ? { 'a' => 1 }");
    assert!(
        error.to_string().contains("no matching entry for selector"),
        "got: {error}"
    );
}

#[test]
fn test_unless_and_logical_operators() {
    let (_, logger) = compile_source("unless false and true { notice('taken') }");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): taken");
}

#[test]
fn test_string_interpolation() {
    let (_, logger) = compile_source(
        "$name = 'world' $count = 2 notice(\"hello ${name} x${count + 1}\")",
    );
    assert_eq!(
        logger.borrow().entries[0].1,
        "Scope(Class[main]): hello world x3"
    );
}

#[test]
fn test_heredoc_value() {
    let (context, _) = compile_source(
        "file { '/etc/motd': content => @(EOT) }\nwelcome\nEOT\n",
    );
    let index = context.catalog.find("File", "/etc/motd").unwrap();
    assert_eq!(
        context.catalog.resource(index).attributes["content"].value.to_string(),
        "welcome\n"
    );
}

#[test]
fn test_iteration_functions() {
    let (_, logger) = compile_source("[1, 2, 3].each |$n| { notice($n) }");
    let entries: Vec<String> = logger.borrow().entries.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        entries,
        vec![
            "Scope(Class[main]): 1",
            "Scope(Class[main]): 2",
            "Scope(Class[main]): 3"
        ]
    );

    let (_, logger) = compile_source("notice([1, 2, 3].map |$n| { $n * 2 })");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): [2, 4, 6]");

    let (_, logger) = compile_source("notice([1, 2, 3, 4].filter |$n| { $n % 2 == 0 })");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): [2, 4]");

    let (_, logger) = compile_source("notice([1, 2, 3].reduce(10) |$memo, $n| { $memo + $n })");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): 16");
}

#[test]
fn test_break_halts_iteration() {
    let (_, logger) = compile_source(
        "[1, 2, 3].each |$n| { if $n == 2 { break } notice($n) } notice('after')",
    );
    let entries: Vec<String> = logger.borrow().entries.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        entries,
        vec!["Scope(Class[main]): 1", "Scope(Class[main]): after"]
    );
}

#[test]
fn test_break_outside_iteration_fails() {
    let error = compile_error("break");
    assert!(
        error.to_string().contains("break statement is not applicable"),
        "got: {error}"
    );
}

#[test]
fn test_user_function_with_return() {
    let (_, logger) = compile_source(
        "function double(Integer $n) { if $n > 10 { return(0) } $n * 2 } notice(double(4)) notice(double(40))",
    );
    let entries: Vec<String> = logger.borrow().entries.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        entries,
        vec!["Scope(Class[main]): 8", "Scope(Class[main]): 0"]
    );
}

#[test]
fn test_node_selection() {
    let source = "node 'test.example.com' { notice('exact') } node default { notice('default') }";
    let (_, logger) = compile_source(source);
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): exact");

    let logger: SharedLog = Rc::new(RefCell::new(CaptureLogger::new()));
    compile(
        &[("site.pp".to_string(), source.to_string())],
        None,
        Box::new(logger.clone()),
        "other.host",
    )
    .unwrap();
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): default");
}

#[test]
fn test_contain_differs_from_require() {
    // contain: a containment edge from the containing class to the
    // contained class.
    let (context, _) =
        compile_source("class inner { } class outer { contain inner } include outer");
    let edges = context.catalog.edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(
        context.catalog.resource(edges[0].source).to_string(),
        "Class[outer]"
    );
    assert_eq!(
        context.catalog.resource(edges[0].target).to_string(),
        "Class[inner]"
    );
    assert_eq!(edges[0].kind.to_string(), "contains");

    // require: the declared class is ordered before the declaring resource.
    let (context, _) =
        compile_source("class inner { } class outer { require inner } include outer");
    let edges = context.catalog.edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(
        context.catalog.resource(edges[0].source).to_string(),
        "Class[inner]"
    );
    assert_eq!(
        context.catalog.resource(edges[0].target).to_string(),
        "Class[outer]"
    );
    assert_eq!(edges[0].kind.to_string(), "require");
}

#[test]
fn test_metaparameter_relationship() {
    let (context, _) = compile_source(
        "file { '/a': } service { 'web': require => File['/a'] }",
    );
    let edges = context.catalog.edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(
        context.catalog.resource(edges[0].source).to_string(),
        "File[/a]"
    );
    assert_eq!(
        context.catalog.resource(edges[0].target).to_string(),
        "Service[web]"
    );
    assert_eq!(edges[0].kind.to_string(), "require");
}

#[test]
fn test_dependency_cycle_detected() {
    let error = compile_error("file { 'a': } -> file { 'b': } file { 'b2': } File['b'] -> File['a']");
    assert!(
        error.to_string().contains("dependency cycle"),
        "got: {error}"
    );
}

#[test]
fn test_realize_function_and_uncollected_error() {
    let (context, _) = compile_source("@file { '/a': } realize(File['/a'])");
    let index = context.catalog.find("File", "/a").unwrap();
    assert!(context.catalog.resource(index).effective());

    let error = compile_error("realize(File['/missing'])");
    assert!(
        error.to_string().contains("does not exist in the catalog"),
        "got: {error}"
    );
}

#[test]
fn test_exported_collector_treated_locally() {
    let (context, _) = compile_source("@@sshkey { 'host': tag => 'keys' } Sshkey <<| tag == 'keys' |>>");
    let index = context.catalog.find("Sshkey", "host").unwrap();
    let resource = context.catalog.resource(index);
    assert!(resource.exported);
    assert!(resource.effective());
}

#[test]
fn test_in_operator_and_splat_arguments() {
    let (_, logger) = compile_source("notice('b' in ['a', 'b'])");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): true");

    let (_, logger) = compile_source("$args = ['x', 'y'] notice(*$args)");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): x y");
}

#[test]
fn test_match_installs_captures() {
    let (_, logger) = compile_source(
        "if 'version-1.2' =~ /version-(\\d+)\\.(\\d+)/ { notice($1) notice($2) }",
    );
    let entries: Vec<String> = logger.borrow().entries.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        entries,
        vec!["Scope(Class[main]): 1", "Scope(Class[main]): 2"]
    );
}

#[test]
fn test_facts_visible_as_top_scope_variables() {
    let mut facts = marionette_rt::facts::MapFacts::new();
    facts.set("os", marionette_core::Value::string("linux"));
    let logger: SharedLog = Rc::new(RefCell::new(CaptureLogger::new()));
    compile(
        &[("site.pp".to_string(), "notice($os) notice($missing_fact)".to_string())],
        Some(Rc::new(facts)),
        Box::new(logger.clone()),
        "test",
    )
    .unwrap();
    let entries: Vec<String> = logger.borrow().entries.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        entries,
        vec!["Scope(Class[main]): linux", "Scope(Class[main]): "]
    );
}

#[test]
fn test_fact_assignment_conflict() {
    let mut facts = marionette_rt::facts::MapFacts::new();
    facts.set("os", marionette_core::Value::string("linux"));
    let logger: SharedLog = Rc::new(RefCell::new(CaptureLogger::new()));
    let error = compile(
        &[("site.pp".to_string(), "$os = 'bsd'".to_string())],
        Some(Rc::new(facts)),
        Box::new(logger),
        "test",
    )
    .unwrap_err();
    assert!(
        error
            .to_string()
            .contains("a fact or node parameter exists with the same name"),
        "got: {error}"
    );
}

#[test]
fn test_inline_epp() {
    let (_, logger) = compile_source(
        "notice(inline_epp('port=<%= $port %>', { 'port' => 8080 }))",
    );
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): port=8080");
}

#[test]
fn test_inline_epp_with_parameter_tag() {
    let (_, logger) = compile_source(
        "notice(inline_epp('<%- |Integer $port = 80| -%>port=<%= $port %>'))",
    );
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): port=80");
}

#[test]
fn test_type_conversion_calls() {
    let (_, logger) = compile_source("notice(Integer('0x1f')) notice(Boolean('yes'))");
    let entries: Vec<String> = logger.borrow().entries.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        entries,
        vec!["Scope(Class[main]): 31", "Scope(Class[main]): true"]
    );
}

#[test]
fn test_split_and_versioncmp() {
    let (_, logger) = compile_source("notice(split('a,b,c', ','))");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): [a, b, c]");

    let (_, logger) = compile_source("notice(versioncmp('1.10', '1.9'))");
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): 1");
}

#[test]
fn test_error_scope_attribution() {
    let (_, logger) = compile_source("class foo { err('boom') } include foo");
    let entries = &logger.borrow().entries;
    assert_eq!(entries[0].0, Level::Err);
    // err() reports against the calling scope, not Class[foo].
    assert_eq!(entries[0].1, "Scope(Class[main]): boom");
}

#[test]
fn test_catalog_json_shape() {
    let (context, _) = compile_source("file { '/a': mode => '0644' } -> file { '/b': }");
    let document = context.catalog.to_json("test.example.com");
    assert_eq!(document["name"], "test.example.com");
    let resources = document["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 3);
    assert_eq!(resources[1]["type"], "File");
    assert_eq!(resources[1]["title"], "/a");
    assert_eq!(resources[1]["parameters"]["mode"], "0644");
    let edges = document["edges"].as_array().unwrap();
    assert_eq!(edges[0]["from"], "File[/a]");
    assert_eq!(edges[0]["to"], "File[/b]");
    assert_eq!(edges[0]["kind"], "before");
    // Emission is deterministic.
    assert_eq!(document, context.catalog.to_json("test.example.com"));
}

#[test]
fn test_tag_function_and_collector_fixed_point() {
    let (context, _) = compile_source(
        "@file { '/a': tag => 'wanted' } @file { '/b': tag => 'wanted' } File <| tag == 'wanted' |>",
    );
    for title in ["/a", "/b"] {
        let index = context.catalog.find("File", title).unwrap();
        assert!(context.catalog.resource(index).effective(), "{title} not realized");
    }
}

#[test]
fn test_class_loaded_from_module_path() {
    let root = std::env::temp_dir().join(format!("marionette-loader-{}", std::process::id()));
    let manifests = root.join("apache").join("manifests");
    std::fs::create_dir_all(&manifests).unwrap();
    std::fs::write(
        manifests.join("init.pp"),
        "class apache { file { '/etc/apache': ensure => directory } }",
    )
    .unwrap();

    let logger: SharedLog = Rc::new(RefCell::new(CaptureLogger::new()));
    let mut context = EvaluationContext::new(None, Box::new(logger), "test");
    context.module_paths.push(root.clone());
    marionette_rt::compile_into(
        &mut context,
        &[("site.pp".to_string(), "include apache".to_string())],
    )
    .unwrap();
    assert!(context.catalog.find("Class", "apache").is_some());
    assert!(context.catalog.find("File", "/etc/apache").is_some());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn test_type_alias() {
    let (_, logger) = compile_source(
        "type Port = Integer[1, 65535] notice(assert_type(Port, 8080))",
    );
    assert_eq!(logger.borrow().entries[0].1, "Scope(Class[main]): 8080");
}
