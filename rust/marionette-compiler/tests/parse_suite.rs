//! Parser integration tests: determinism, pretty-print round-trips, and
//! error positioning over realistic manifests.

use marionette_compiler::diagnostics::line_and_column;
use marionette_compiler::Parser;

const CORPUS: &[&str] = &[
    "$a = 2 + 3 * 4 notice($a)",
    "class base { file { '/etc/motd': content => 'hello' } } include base",
    "class ntp(String $server = 'pool.ntp.org', Boolean $enable = true) inherits base { }",
    "define vhost(Integer $port) { file { \"/etc/vhosts/${title}\": } }",
    "node 'web01.example.com', /^db\\d+/, default { include base }",
    "@file { '/a': tag => ['x', 'y'] } File <| tag == 'x' or tag == 'y' |>",
    "@@sshkey { 'host': type => 'rsa' } Sshkey <<| |>>",
    "file { ['/a', '/b']: ensure => file; default: mode => '0644' }",
    "File['/a'] { mode +> '0600' } File { backup => false }",
    "file { 'a': } -> file { 'b': } ~> service { 'c': }",
    "Service['c'] <- File['b'] Service['c'] <~ File['a']",
    "case $facts['os'] { 'linux': { 1 } /bsd/: { 2 } Integer: { 3 } default: { 4 } }",
    "$x = $mode ? { 'ro' => 0, 'rw' => 1, default => -1 }",
    "if $n > 10 { notice('big') } elsif $n > 5 { notice('mid') } else { notice('small') }",
    "unless $enabled { warning('disabled') }",
    "[1, 2, 3].map |$n| { $n * 2 }.each |$n| { notice($n) }",
    "$h = {'a' => 1, 'b' => [2, 3]} notice($h['b'][0])",
    "function pick_first(Array $values) { return($values[0]) }",
    "type Port = Integer[1, 65535]",
    "$matched = 'abc' =~ /a(b)c/ and $1 == 'b'",
    "notice(assert_type(Optional[Integer], undef))",
    "include foo, bar realize(File['/a'], File['/b'])",
    "$s = \"literal ${var} and ${1 + 2} end\"",
    "application lamp(String $db_user) { }",
    "site { }",
    "Mysql produces Sql { user => $db_user }",
];

#[test]
fn test_parser_determinism() {
    for source in CORPUS {
        let first = Parser::parse_tree("corpus.pp", source)
            .unwrap_or_else(|e| panic!("failed to parse {source:?}: {e}"));
        let second = Parser::parse_tree("corpus.pp", source).unwrap();
        assert_eq!(first, second, "non-deterministic parse for {source:?}");
    }
}

#[test]
fn test_pretty_print_round_trip() {
    for source in CORPUS {
        let tree = Parser::parse_tree("corpus.pp", source)
            .unwrap_or_else(|e| panic!("failed to parse {source:?}: {e}"));
        let printed = tree.to_string();
        let reparsed = Parser::parse_tree("corpus.pp", &printed)
            .unwrap_or_else(|e| panic!("failed to reparse {printed:?}: {e}"));
        assert_eq!(
            printed,
            reparsed.to_string(),
            "round trip diverged for {source:?}"
        );
    }
}

#[test]
fn test_parse_error_is_located() {
    let source = "file { '/a':\n  ensure => }\n";
    let error = Parser::parse_tree("bad.pp", source).unwrap_err();
    let diagnostic = error.to_diagnostic("bad.pp", source);
    assert_eq!(diagnostic.file.as_deref(), Some("bad.pp"));
    assert_eq!(diagnostic.line, Some(2));
    assert!(diagnostic.message.contains("expected"));
}

#[test]
fn test_lex_error_is_located() {
    let source = "$x = 'unterminated";
    let error = Parser::parse_tree("bad.pp", source).unwrap_err();
    let offset = error.offset().expect("lex errors carry an offset");
    let (line, column) = line_and_column(source, offset);
    assert_eq!(line, 1);
    assert_eq!(column, 6);
}

#[test]
fn test_empty_and_comment_only_sources() {
    assert!(Parser::parse_tree("empty.pp", "").unwrap().statements.is_empty());
    assert!(Parser::parse_tree("comments.pp", "# just a comment\n/* and a block */")
        .unwrap()
        .statements
        .is_empty());
}
