//! Abstract syntax tree for Puppet manifests.
//!
//! Every node carries the source range it came from. Each node has a
//! deterministic printable form via `Display`; printing and re-parsing an
//! expression yields an equivalent tree (up to whitespace and ranges).

use crate::compiler::tokens::{InterpolationSegment, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed source file: its path, full text, and top-level statements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntaxTree {
    pub path: String,
    pub source: String,
    pub statements: Vec<Statement>,
}

impl SyntaxTree {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            statements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Statement {
    Expression(Expression),
    Class(ClassDefinition),
    DefinedType(DefinedTypeDefinition),
    Node(NodeDefinition),
    Function(FunctionDefinition),
    TypeAlias(TypeAlias),
    /// An orchestration application definition; parsed but inert during
    /// catalog compilation.
    Application(ApplicationDefinition),
    /// An orchestration site block; parsed but inert during catalog
    /// compilation.
    Site(Vec<Statement>, Span),
    /// A `produces`/`consumes` capability mapping.
    CapabilityMapping(CapabilityMapping),
    /// A chain of relationship operators between resource expressions.
    Relationship(Relationship),
    Break(Span),
    Next(Option<Expression>, Span),
    Return(Option<Expression>, Span),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Expression(e) => e.span(),
            Statement::Class(c) => c.span,
            Statement::DefinedType(d) => d.span,
            Statement::Node(n) => n.span,
            Statement::Function(f) => f.span,
            Statement::TypeAlias(t) => t.span,
            Statement::Application(a) => a.span,
            Statement::Site(_, span) => *span,
            Statement::CapabilityMapping(m) => m.span,
            Statement::Relationship(r) => r.span,
            Statement::Break(span) | Statement::Next(_, span) | Statement::Return(_, span) => {
                *span
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassDefinition {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub parent: Option<String>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefinedTypeDefinition {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Hostname {
    Name(String),
    Literal(String),
    Regex(String),
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDefinition {
    pub hostnames: Vec<Hostname>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeAlias {
    pub name: String,
    pub target: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationDefinition {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CapabilityKind {
    Produces,
    Consumes,
}

/// `Mysql produces Sql { user => $user }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityMapping {
    pub kind: CapabilityKind,
    pub resource_type: String,
    pub capability: String,
    pub operations: Vec<AttributeOperation>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelationshipOperator {
    /// `->`
    Before,
    /// `~>`
    Notify,
    /// `<-`
    After,
    /// `<~`
    Subscribe,
}

impl fmt::Display for RelationshipOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationshipOperator::Before => "->",
            RelationshipOperator::Notify => "~>",
            RelationshipOperator::After => "<-",
            RelationshipOperator::Subscribe => "<~",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub first: Expression,
    pub rest: Vec<(RelationshipOperator, Expression)>,
    pub span: Span,
}

/// A class, defined-type, function, or lambda parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub type_expression: Option<Expression>,
    /// `*$captures` takes all remaining arguments as an array.
    pub captures: bool,
    pub name: String,
    pub default: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lambda {
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    Splat,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOperator::Not => "!",
            UnaryOperator::Negate => "-",
            UnaryOperator::Splat => "*",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Or,
    And,
    Equals,
    NotEquals,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    Match,
    NotMatch,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    LeftShift,
    RightShift,
    Assign,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Equals => "==",
            BinaryOperator::NotEquals => "!=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::In => "in",
            BinaryOperator::Match => "=~",
            BinaryOperator::NotMatch => "!~",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::LeftShift => "<<",
            BinaryOperator::RightShift => ">>",
            BinaryOperator::Assign => "=",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Expression {
    Undef(Span),
    Default(Span),
    Boolean(bool, Span),
    Integer(i64, Span),
    Float(f64, Span),
    String(String, Span),
    /// A double-quoted string or interpolated heredoc; expression segments
    /// hold unparsed source text.
    Interpolated(Vec<InterpolationSegment>, Span),
    Regex(String, Span),
    /// A bare lowercase word used as a value (`present`, `file`).
    Bareword(String, Span),
    /// A capitalized type reference (`File`, `Integer`).
    TypeName(String, Span),
    Variable(String, Span),
    Array(Vec<Expression>, Span),
    Hash(Vec<(Expression, Expression)>, Span),
    Unary(UnaryOperator, Box<Expression>, Span),
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        span: Span,
    },
    If(Box<IfExpression>),
    Unless(Box<UnlessExpression>),
    Case(Box<CaseExpression>),
    FunctionCall(Box<FunctionCall>),
    /// Postfix indexing: `target[args]`.
    Access {
        target: Box<Expression>,
        arguments: Vec<Expression>,
        span: Span,
    },
    /// Postfix method call: `target.name(args) |...| { ... }`.
    MethodCall(Box<MethodCall>),
    /// Postfix selector: `target ? { option => value, ... }`.
    Selector(Box<SelectorExpression>),
    Resource(Box<ResourceExpression>),
    ResourceDefaults(Box<ResourceDefaultsExpression>),
    ResourceOverride(Box<ResourceOverrideExpression>),
    Collector(Box<CollectorExpression>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IfExpression {
    /// Condition/body pairs: the `if` branch followed by any `elsif` branches.
    pub branches: Vec<(Expression, Vec<Statement>)>,
    pub else_body: Option<Vec<Statement>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnlessExpression {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub else_body: Option<Vec<Statement>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseExpression {
    pub subject: Expression,
    pub options: Vec<CaseOption>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseOption {
    pub patterns: Vec<Expression>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub name_span: Span,
    pub arguments: Vec<Expression>,
    pub lambda: Option<Lambda>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodCall {
    pub target: Expression,
    pub name: String,
    pub name_span: Span,
    pub arguments: Vec<Expression>,
    pub lambda: Option<Lambda>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorExpression {
    pub target: Expression,
    pub cases: Vec<(Expression, Expression)>,
    pub span: Span,
}

/// Whether a resource is declared realized, virtual (`@`), or exported
/// (`@@`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceStatus {
    Realized,
    Virtual,
    Exported,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttributeOperator {
    /// `=>`
    Assign,
    /// `+>`
    Append,
}

impl fmt::Display for AttributeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttributeOperator::Assign => "=>",
            AttributeOperator::Append => "+>",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeOperation {
    pub name: String,
    pub name_span: Span,
    pub operator: AttributeOperator,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceBody {
    pub title: Expression,
    pub operations: Vec<AttributeOperation>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceExpression {
    pub status: ResourceStatus,
    /// The resource type name as written (`file`, `class`, `Foo::Bar`).
    pub type_name: String,
    pub type_span: Span,
    pub bodies: Vec<ResourceBody>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDefaultsExpression {
    pub type_name: String,
    pub type_span: Span,
    pub operations: Vec<AttributeOperation>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceOverrideExpression {
    /// The resource reference being overridden, e.g. `File['/tmp/x']`.
    pub reference: Expression,
    pub operations: Vec<AttributeOperation>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Query {
    Condition {
        attribute: String,
        negated: bool,
        value: Expression,
        span: Span,
    },
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Condition {
                attribute,
                negated,
                value,
                ..
            } => write!(
                f,
                "{attribute} {} {value}",
                if *negated { "!=" } else { "==" }
            ),
            Query::And(left, right) => write!(f, "({left} and {right})"),
            Query::Or(left, right) => write!(f, "({left} or {right})"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorExpression {
    pub type_name: String,
    pub type_span: Span,
    pub exported: bool,
    pub query: Option<Query>,
    pub span: Span,
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Undef(span)
            | Expression::Default(span)
            | Expression::Boolean(_, span)
            | Expression::Integer(_, span)
            | Expression::Float(_, span)
            | Expression::String(_, span)
            | Expression::Interpolated(_, span)
            | Expression::Regex(_, span)
            | Expression::Bareword(_, span)
            | Expression::TypeName(_, span)
            | Expression::Variable(_, span)
            | Expression::Array(_, span)
            | Expression::Hash(_, span)
            | Expression::Unary(_, _, span)
            | Expression::Binary { span, .. }
            | Expression::Access { span, .. } => *span,
            Expression::If(e) => e.span,
            Expression::Unless(e) => e.span,
            Expression::Case(e) => e.span,
            Expression::FunctionCall(e) => e.span,
            Expression::MethodCall(e) => e.span,
            Expression::Selector(e) => e.span,
            Expression::Resource(e) => e.span,
            Expression::ResourceDefaults(e) => e.span,
            Expression::ResourceOverride(e) => e.span,
            Expression::Collector(e) => e.span,
        }
    }
}

fn quote_single(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &[Statement]) -> fmt::Result {
    write!(f, "{{ ")?;
    for statement in body {
        write!(f, "{statement} ")?;
    }
    write!(f, "}}")
}

fn write_parameters(f: &mut fmt::Formatter<'_>, parameters: &[Parameter]) -> fmt::Result {
    for (i, parameter) in parameters.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{parameter}")?;
    }
    Ok(())
}

fn write_operations(f: &mut fmt::Formatter<'_>, operations: &[AttributeOperation]) -> fmt::Result {
    for (i, operation) in operations.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{} {} {}", operation.name, operation.operator, operation.value)?;
    }
    Ok(())
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = &self.type_expression {
            write!(f, "{t} ")?;
        }
        if self.captures {
            write!(f, "*")?;
        }
        write!(f, "${}", self.name)?;
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Expression(e) => write!(f, "{e}"),
            Statement::Class(c) => {
                write!(f, "class {}", c.name)?;
                if !c.parameters.is_empty() {
                    write!(f, " (")?;
                    write_parameters(f, &c.parameters)?;
                    write!(f, ")")?;
                }
                if let Some(parent) = &c.parent {
                    write!(f, " inherits {parent}")?;
                }
                write!(f, " ")?;
                write_body(f, &c.body)
            }
            Statement::DefinedType(d) => {
                write!(f, "define {}", d.name)?;
                if !d.parameters.is_empty() {
                    write!(f, " (")?;
                    write_parameters(f, &d.parameters)?;
                    write!(f, ")")?;
                }
                write!(f, " ")?;
                write_body(f, &d.body)
            }
            Statement::Node(n) => {
                write!(f, "node ")?;
                for (i, hostname) in n.hostnames.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match hostname {
                        Hostname::Name(name) => write!(f, "{name}")?,
                        Hostname::Literal(name) => write!(f, "{}", quote_single(name))?,
                        Hostname::Regex(pattern) => write!(f, "/{pattern}/")?,
                        Hostname::Default => write!(f, "default")?,
                    }
                }
                write!(f, " ")?;
                write_body(f, &n.body)
            }
            Statement::Function(d) => {
                write!(f, "function {}", d.name)?;
                if !d.parameters.is_empty() {
                    write!(f, " (")?;
                    write_parameters(f, &d.parameters)?;
                    write!(f, ")")?;
                }
                write!(f, " ")?;
                write_body(f, &d.body)
            }
            Statement::TypeAlias(t) => write!(f, "type {} = {}", t.name, t.target),
            Statement::Application(a) => {
                write!(f, "application {}", a.name)?;
                if !a.parameters.is_empty() {
                    write!(f, " (")?;
                    write_parameters(f, &a.parameters)?;
                    write!(f, ")")?;
                }
                write!(f, " ")?;
                write_body(f, &a.body)
            }
            Statement::Site(body, _) => {
                write!(f, "site ")?;
                write_body(f, body)
            }
            Statement::CapabilityMapping(m) => {
                write!(
                    f,
                    "{} {} {} {{ ",
                    m.resource_type,
                    match m.kind {
                        CapabilityKind::Produces => "produces",
                        CapabilityKind::Consumes => "consumes",
                    },
                    m.capability
                )?;
                write_operations(f, &m.operations)?;
                write!(f, " }}")
            }
            Statement::Relationship(r) => {
                write!(f, "{}", r.first)?;
                for (operator, operand) in &r.rest {
                    write!(f, " {operator} {operand}")?;
                }
                Ok(())
            }
            Statement::Break(_) => write!(f, "break"),
            Statement::Next(value, _) => match value {
                Some(value) => write!(f, "next({value})"),
                None => write!(f, "next"),
            },
            Statement::Return(value, _) => match value {
                Some(value) => write!(f, "return({value})"),
                None => write!(f, "return"),
            },
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Undef(_) => write!(f, "undef"),
            Expression::Default(_) => write!(f, "default"),
            Expression::Boolean(b, _) => write!(f, "{b}"),
            Expression::Integer(i, _) => write!(f, "{i}"),
            Expression::Float(x, _) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Expression::String(s, _) => write!(f, "{}", quote_single(s)),
            Expression::Interpolated(segments, _) => {
                write!(f, "\"")?;
                for (is_expression, text) in segments {
                    if *is_expression {
                        write!(f, "${{{text}}}")?;
                    } else {
                        for c in text.chars() {
                            match c {
                                '"' => write!(f, "\\\"")?,
                                '\\' => write!(f, "\\\\")?,
                                '$' => write!(f, "\\$")?,
                                '\n' => write!(f, "\\n")?,
                                '\t' => write!(f, "\\t")?,
                                '\r' => write!(f, "\\r")?,
                                other => write!(f, "{other}")?,
                            }
                        }
                    }
                }
                write!(f, "\"")
            }
            Expression::Regex(pattern, _) => {
                write!(f, "/")?;
                for c in pattern.chars() {
                    if c == '/' {
                        write!(f, "\\/")?;
                    } else {
                        write!(f, "{c}")?;
                    }
                }
                write!(f, "/")
            }
            Expression::Bareword(name, _) | Expression::TypeName(name, _) => {
                write!(f, "{name}")
            }
            Expression::Variable(name, _) => write!(f, "${name}"),
            Expression::Array(elements, _) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Expression::Hash(entries, _) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} => {value}")?;
                }
                write!(f, "}}")
            }
            Expression::Unary(operator, operand, _) => write!(f, "{operator}{operand}"),
            Expression::Binary {
                operator,
                left,
                right,
                ..
            } => write!(f, "({left} {operator} {right})"),
            Expression::If(e) => {
                for (i, (condition, body)) in e.branches.iter().enumerate() {
                    if i == 0 {
                        write!(f, "if {condition} ")?;
                    } else {
                        write!(f, " elsif {condition} ")?;
                    }
                    write_body(f, body)?;
                }
                if let Some(else_body) = &e.else_body {
                    write!(f, " else ")?;
                    write_body(f, else_body)?;
                }
                Ok(())
            }
            Expression::Unless(e) => {
                write!(f, "unless {} ", e.condition)?;
                write_body(f, &e.body)?;
                if let Some(else_body) = &e.else_body {
                    write!(f, " else ")?;
                    write_body(f, else_body)?;
                }
                Ok(())
            }
            Expression::Case(e) => {
                write!(f, "case {} {{ ", e.subject)?;
                for option in &e.options {
                    for (i, pattern) in option.patterns.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{pattern}")?;
                    }
                    write!(f, ": ")?;
                    write_body(f, &option.body)?;
                    write!(f, " ")?;
                }
                write!(f, "}}")
            }
            Expression::FunctionCall(call) => {
                write!(f, "{}(", call.name)?;
                for (i, argument) in call.arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, ")")?;
                if let Some(lambda) = &call.lambda {
                    write!(f, " {lambda}")?;
                }
                Ok(())
            }
            Expression::Access {
                target, arguments, ..
            } => {
                write!(f, "{target}[")?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, "]")
            }
            Expression::MethodCall(call) => {
                write!(f, "{}.{}(", call.target, call.name)?;
                for (i, argument) in call.arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, ")")?;
                if let Some(lambda) = &call.lambda {
                    write!(f, " {lambda}")?;
                }
                Ok(())
            }
            Expression::Selector(selector) => {
                write!(f, "{} ? {{ ", selector.target)?;
                for (i, (option, value)) in selector.cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{option} => {value}")?;
                }
                write!(f, " }}")
            }
            Expression::Resource(resource) => {
                match resource.status {
                    ResourceStatus::Realized => {}
                    ResourceStatus::Virtual => write!(f, "@")?,
                    ResourceStatus::Exported => write!(f, "@@")?,
                }
                write!(f, "{} {{ ", resource.type_name)?;
                for (i, body) in resource.bodies.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: ", body.title)?;
                    write_operations(f, &body.operations)?;
                }
                write!(f, " }}")
            }
            Expression::ResourceDefaults(defaults) => {
                write!(f, "{} {{ ", defaults.type_name)?;
                write_operations(f, &defaults.operations)?;
                write!(f, " }}")
            }
            Expression::ResourceOverride(over) => {
                write!(f, "{} {{ ", over.reference)?;
                write_operations(f, &over.operations)?;
                write!(f, " }}")
            }
            Expression::Collector(collector) => {
                write!(f, "{} ", collector.type_name)?;
                if collector.exported {
                    write!(f, "<<| ")?;
                } else {
                    write!(f, "<| ")?;
                }
                if let Some(query) = &collector.query {
                    write!(f, "{query} ")?;
                }
                if collector.exported {
                    write!(f, "|>>")
                } else {
                    write!(f, "|>")
                }
            }
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|")?;
        write_parameters(f, &self.parameters)?;
        write!(f, "| ")?;
        write_body(f, &self.body)
    }
}

impl fmt::Display for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{statement}")?;
        }
        Ok(())
    }
}
