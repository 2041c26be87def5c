//! Recursive descent parser with precedence climbing for expressions.

use crate::compiler::ast::*;
use crate::compiler::lexer::Lexer;
use crate::compiler::tokens::{Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected {found} at line {line}; expected {expected}")]
    Unexpected {
        found: String,
        expected: String,
        line: usize,
        offset: usize,
    },
    #[error("unexpected end of input; expected {expected}")]
    UnexpectedEof { expected: String },
    #[error("invalid parameter name '{name}' at line {line}")]
    InvalidParameterName {
        name: String,
        line: usize,
        offset: usize,
    },
}

impl ParseError {
    pub fn offset(&self) -> Option<usize> {
        match self {
            ParseError::Unexpected { offset, .. }
            | ParseError::InvalidParameterName { offset, .. } => Some(*offset),
            ParseError::UnexpectedEof { .. } => None,
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Unexpected { line, .. }
            | ParseError::InvalidParameterName { line, .. } => Some(*line),
            ParseError::UnexpectedEof { .. } => None,
        }
    }
}

/// Functions that may be called statement-style without parentheses.
const STATEMENT_FUNCTIONS: &[&str] = &[
    "include", "require", "contain", "realize", "tag", "fail", "debug", "info", "notice",
    "warning", "err", "alert", "crit", "emerg",
];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parses a standalone `|...|` parameter list, as used by template
    /// parameter tags.
    pub fn parse_parameter_list(source: &str) -> Result<Vec<Parameter>, crate::CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser::new(tokens);
        parser.expect(TokenKind::Pipe, "|")?;
        let mut parameters = Vec::new();
        while !parser.check(&TokenKind::Pipe) {
            parameters.push(parser.parse_parameter()?);
            if !parser.eat(&TokenKind::Comma) {
                break;
            }
        }
        parser.expect(TokenKind::Pipe, "|")?;
        parser.expect(TokenKind::Eof, "end of input")?;
        Ok(parameters)
    }

    /// Parses a full source file into a syntax tree.
    pub fn parse_tree(
        path: impl Into<String>,
        source: &str,
    ) -> Result<SyntaxTree, crate::CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser::new(tokens);
        let statements = parser.parse_statements(TokenKind::Eof)?;
        let mut tree = SyntaxTree::new(path, source);
        tree.statements = statements;
        Ok(tree)
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with EOF"))
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.at_end() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        if matches!(token.kind, TokenKind::Eof) {
            ParseError::UnexpectedEof {
                expected: expected.to_string(),
            }
        } else {
            ParseError::Unexpected {
                found: token.kind.to_string(),
                expected: expected.to_string(),
                line: token.span.start.line,
                offset: token.span.start.offset,
            }
        }
    }

    // ── Statements ──

    pub fn parse_statements(&mut self, terminator: TokenKind) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        while !self.check(&terminator) && !self.at_end() {
            statements.push(self.parse_statement()?);
            // Statement separators are optional.
            while self.eat(&TokenKind::Semicolon) {}
        }
        if !self.check(&terminator) {
            return Err(self.unexpected(&terminator.to_string()));
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek_kind() {
            TokenKind::Class if matches!(self.peek_kind_at(1), TokenKind::Name(_)) => {
                self.parse_class_definition()
            }
            TokenKind::Define => self.parse_defined_type(),
            TokenKind::Node => self.parse_node_definition(),
            TokenKind::Function => self.parse_function_definition(),
            TokenKind::Type
                if matches!(self.peek_kind_at(1), TokenKind::TypeName(_))
                    && matches!(self.peek_kind_at(2), TokenKind::Assign) =>
            {
                self.parse_type_alias()
            }
            TokenKind::Application => self.parse_application(),
            TokenKind::Site => self.parse_site(),
            TokenKind::TypeName(_)
                if matches!(
                    self.peek_kind_at(1),
                    TokenKind::Produces | TokenKind::Consumes
                ) =>
            {
                self.parse_capability_mapping()
            }
            TokenKind::Break => {
                let span = self.advance().span;
                Ok(Statement::Break(span))
            }
            TokenKind::Next => {
                let span = self.advance().span;
                let value = self.parse_transfer_value()?;
                Ok(Statement::Next(value, span))
            }
            TokenKind::Return => {
                let span = self.advance().span;
                let value = self.parse_transfer_value()?;
                Ok(Statement::Return(value, span))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_transfer_value(&mut self) -> Result<Option<Expression>, ParseError> {
        if self.eat(&TokenKind::LeftParen) {
            if self.eat(&TokenKind::RightParen) {
                return Ok(None);
            }
            let value = self.parse_expression()?;
            self.expect(TokenKind::RightParen, ")")?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    /// An expression statement, possibly extended into a relationship chain.
    fn parse_expression_statement(&mut self) -> Result<Statement, ParseError> {
        let first = self.parse_expression()?;
        let mut rest = Vec::new();
        loop {
            let operator = match self.peek_kind() {
                TokenKind::InEdge => RelationshipOperator::Before,
                TokenKind::InEdgeSubscribe => RelationshipOperator::Notify,
                TokenKind::OutEdge => RelationshipOperator::After,
                TokenKind::OutEdgeSubscribe => RelationshipOperator::Subscribe,
                _ => break,
            };
            self.advance();
            let operand = self.parse_expression()?;
            rest.push((operator, operand));
        }
        if rest.is_empty() {
            Ok(Statement::Expression(first))
        } else {
            let span = first
                .span()
                .merge(rest.last().map(|(_, e)| e.span()).unwrap_or_else(Span::dummy));
            Ok(Statement::Relationship(Relationship { first, rest, span }))
        }
    }

    fn parse_class_definition(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `class`
        let name = match self.advance() {
            Token {
                kind: TokenKind::Name(name),
                ..
            } => name,
            _ => return Err(self.unexpected("class name")),
        };
        let parameters = self.parse_optional_parameters()?;
        let parent = if self.eat(&TokenKind::Inherits) {
            match self.advance() {
                Token {
                    kind: TokenKind::Name(name),
                    ..
                } => Some(name),
                _ => return Err(self.unexpected("parent class name")),
            }
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::Class(ClassDefinition {
            name,
            parameters,
            parent,
            body,
            span: start.merge(end),
        }))
    }

    fn parse_defined_type(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `define`
        let name = match self.advance() {
            Token {
                kind: TokenKind::Name(name),
                ..
            } => name,
            _ => return Err(self.unexpected("defined type name")),
        };
        let parameters = self.parse_optional_parameters()?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::DefinedType(DefinedTypeDefinition {
            name,
            parameters,
            body,
            span: start.merge(end),
        }))
    }

    fn parse_node_definition(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `node`
        let mut hostnames = Vec::new();
        loop {
            let hostname = match self.peek_kind().clone() {
                TokenKind::Default => {
                    self.advance();
                    Hostname::Default
                }
                TokenKind::Regex(pattern) => {
                    self.advance();
                    Hostname::Regex(pattern)
                }
                TokenKind::String(text) => {
                    self.advance();
                    Hostname::Literal(text)
                }
                TokenKind::Name(_) | TokenKind::Integer(_) => {
                    Hostname::Name(self.parse_dotted_name()?)
                }
                _ => return Err(self.unexpected("node name, regex, or 'default'")),
            };
            hostnames.push(hostname);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::Node(NodeDefinition {
            hostnames,
            body,
            span: start.merge(end),
        }))
    }

    /// Node names may contain dots and digits: `web01.example.com`.
    fn parse_dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = String::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Name(part) => {
                    self.advance();
                    name.push_str(&part);
                }
                TokenKind::Integer(i) => {
                    self.advance();
                    name.push_str(&i.to_string());
                }
                _ => return Err(self.unexpected("node name")),
            }
            if self.check(&TokenKind::Dot) {
                self.advance();
                name.push('.');
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn parse_function_definition(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `function`
        let name = match self.advance() {
            Token {
                kind: TokenKind::Name(name),
                ..
            } => name,
            _ => return Err(self.unexpected("function name")),
        };
        let parameters = self.parse_optional_parameters()?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::Function(FunctionDefinition {
            name,
            parameters,
            body,
            span: start.merge(end),
        }))
    }

    fn parse_application(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `application`
        let name = match self.advance() {
            Token {
                kind: TokenKind::Name(name),
                ..
            } => name,
            _ => return Err(self.unexpected("application name")),
        };
        let parameters = self.parse_optional_parameters()?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::Application(ApplicationDefinition {
            name,
            parameters,
            body,
            span: start.merge(end),
        }))
    }

    fn parse_site(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `site`
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::Site(body, start.merge(end)))
    }

    fn parse_capability_mapping(&mut self) -> Result<Statement, ParseError> {
        let token = self.advance();
        let (resource_type, start) = match token.kind {
            TokenKind::TypeName(name) => (name, token.span),
            _ => return Err(self.unexpected("resource type name")),
        };
        let kind = if self.eat(&TokenKind::Produces) {
            CapabilityKind::Produces
        } else {
            self.expect(TokenKind::Consumes, "produces or consumes")?;
            CapabilityKind::Consumes
        };
        let capability = match self.advance() {
            Token {
                kind: TokenKind::TypeName(name),
                ..
            } => name,
            _ => return Err(self.unexpected("capability type name")),
        };
        self.expect(TokenKind::LeftBrace, "{")?;
        let operations = if self.check(&TokenKind::RightBrace) {
            Vec::new()
        } else {
            self.parse_attribute_operations()?
        };
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Statement::CapabilityMapping(CapabilityMapping {
            kind,
            resource_type,
            capability,
            operations,
            span: start.merge(end),
        }))
    }

    fn parse_type_alias(&mut self) -> Result<Statement, ParseError> {
        let start = self.advance().span; // `type`
        let name = match self.advance() {
            Token {
                kind: TokenKind::TypeName(name),
                ..
            } => name,
            _ => return Err(self.unexpected("type alias name")),
        };
        self.expect(TokenKind::Assign, "=")?;
        let target = self.parse_expression()?;
        let span = start.merge(target.span());
        Ok(Statement::TypeAlias(TypeAlias { name, target, span }))
    }

    fn parse_optional_parameters(&mut self) -> Result<Vec<Parameter>, ParseError> {
        if !self.eat(&TokenKind::LeftParen) {
            return Ok(Vec::new());
        }
        let mut parameters = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            parameters.push(self.parse_parameter()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, ")")?;
        Ok(parameters)
    }

    fn parse_parameter(&mut self) -> Result<Parameter, ParseError> {
        let start = self.peek().span;
        // An optional type expression precedes the variable.
        let type_expression = if matches!(self.peek_kind(), TokenKind::TypeName(_)) {
            Some(self.parse_postfix()?)
        } else {
            None
        };
        let captures = self.eat(&TokenKind::Star);
        let token = self.advance();
        let name = match token.kind {
            TokenKind::Variable(name) => name,
            _ => return Err(self.unexpected("parameter variable")),
        };
        let valid = name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c == '_')
            .unwrap_or(false)
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ParseError::InvalidParameterName {
                name,
                line: token.span.start.line,
                offset: token.span.start.offset,
            });
        }
        let default = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let end = default
            .as_ref()
            .map(|d| d.span())
            .unwrap_or(token.span);
        Ok(Parameter {
            type_expression,
            captures,
            name,
            default,
            span: start.merge(end),
        })
    }

    // ── Expressions ──

    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_assignment()
    }

    /// Assignment is right-associative and has the lowest precedence.
    fn parse_assignment(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_binary(0)?;
        if self.check(&TokenKind::Assign) {
            self.advance();
            let right = self.parse_assignment()?;
            let span = left.span().merge(right.span());
            return Ok(Expression::Binary {
                operator: BinaryOperator::Assign,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn binary_operator(&self) -> Option<(BinaryOperator, u8)> {
        // Precedence, low to high: or; and; comparison; in; match; additive;
        // multiplicative; modulo; shift.
        Some(match self.peek_kind() {
            TokenKind::Or => (BinaryOperator::Or, 1),
            TokenKind::And => (BinaryOperator::And, 2),
            TokenKind::Equals => (BinaryOperator::Equals, 3),
            TokenKind::NotEquals => (BinaryOperator::NotEquals, 3),
            TokenKind::Less => (BinaryOperator::Less, 3),
            TokenKind::LessEqual => (BinaryOperator::LessEqual, 3),
            TokenKind::Greater => (BinaryOperator::Greater, 3),
            TokenKind::GreaterEqual => (BinaryOperator::GreaterEqual, 3),
            TokenKind::In => (BinaryOperator::In, 4),
            TokenKind::Match => (BinaryOperator::Match, 5),
            TokenKind::NotMatch => (BinaryOperator::NotMatch, 5),
            TokenKind::Plus => (BinaryOperator::Plus, 6),
            TokenKind::Minus => (BinaryOperator::Minus, 6),
            TokenKind::Star => (BinaryOperator::Multiply, 7),
            TokenKind::Slash => (BinaryOperator::Divide, 7),
            TokenKind::Percent => (BinaryOperator::Modulo, 8),
            TokenKind::LeftShift => (BinaryOperator::LeftShift, 9),
            TokenKind::RightShift => (BinaryOperator::RightShift, 9),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some((operator, precedence)) = self.binary_operator() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let span = left.span().merge(right.span());
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        let operator = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOperator::Negate),
            TokenKind::Not => Some(UnaryOperator::Not),
            TokenKind::Star => Some(UnaryOperator::Splat),
            _ => None,
        };
        if let Some(operator) = operator {
            let start = self.advance().span;
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span());
            return Ok(Expression::Unary(operator, Box::new(operand), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LeftBracket => {
                    self.advance();
                    let mut arguments = Vec::new();
                    while !self.check(&TokenKind::RightBracket) {
                        arguments.push(self.parse_expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    let end = self.expect(TokenKind::RightBracket, "]")?.span;
                    let span = expression.span().merge(end);
                    expression = Expression::Access {
                        target: Box::new(expression),
                        arguments,
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let token = self.advance();
                    let name = match token.kind {
                        TokenKind::Name(name) => name,
                        TokenKind::Type => "type".to_string(),
                        _ => return Err(self.unexpected("method name")),
                    };
                    let mut arguments = Vec::new();
                    if self.eat(&TokenKind::LeftParen) {
                        while !self.check(&TokenKind::RightParen) {
                            arguments.push(self.parse_expression()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RightParen, ")")?;
                    }
                    let lambda = self.parse_optional_lambda()?;
                    let end = lambda
                        .as_ref()
                        .map(|l| l.span)
                        .unwrap_or(token.span);
                    let span = expression.span().merge(end);
                    expression = Expression::MethodCall(Box::new(MethodCall {
                        target: expression,
                        name,
                        name_span: token.span,
                        arguments,
                        lambda,
                        span,
                    }));
                }
                TokenKind::Question => {
                    self.advance();
                    self.expect(TokenKind::LeftBrace, "{")?;
                    let mut cases = Vec::new();
                    while !self.check(&TokenKind::RightBrace) {
                        let option = self.parse_expression()?;
                        self.expect(TokenKind::FatArrow, "=>")?;
                        let value = self.parse_expression()?;
                        cases.push((option, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    let end = self.expect(TokenKind::RightBrace, "}")?.span;
                    let span = expression.span().merge(end);
                    expression = Expression::Selector(Box::new(SelectorExpression {
                        target: expression,
                        cases,
                        span,
                    }));
                }
                _ => break,
            }
        }
        Ok(expression)
    }

    fn parse_optional_lambda(&mut self) -> Result<Option<Lambda>, ParseError> {
        if !self.check(&TokenKind::Pipe) {
            return Ok(None);
        }
        let start = self.advance().span; // '|'
        let mut parameters = Vec::new();
        while !self.check(&TokenKind::Pipe) {
            parameters.push(self.parse_parameter()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Pipe, "|")?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Some(Lambda {
            parameters,
            body,
            span: start.merge(end),
        }))
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Undef => {
                self.advance();
                Ok(Expression::Undef(token.span))
            }
            TokenKind::Default => {
                self.advance();
                Ok(Expression::Default(token.span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Boolean(true, token.span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Boolean(false, token.span))
            }
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expression::Integer(value, token.span))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expression::Float(value, token.span))
            }
            TokenKind::String(text) => {
                self.advance();
                Ok(Expression::String(text, token.span))
            }
            TokenKind::Heredoc(text) => {
                self.advance();
                Ok(Expression::String(text, token.span))
            }
            TokenKind::InterpolatedString(segments) => {
                self.advance();
                if segments.len() == 1 && !segments[0].0 {
                    Ok(Expression::String(segments[0].1.clone(), token.span))
                } else {
                    Ok(Expression::Interpolated(segments, token.span))
                }
            }
            TokenKind::Regex(pattern) => {
                self.advance();
                Ok(Expression::Regex(pattern, token.span))
            }
            TokenKind::Variable(name) => {
                self.advance();
                Ok(Expression::Variable(name, token.span))
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RightBracket) {
                    elements.push(self.parse_expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RightBracket, "]")?.span;
                Ok(Expression::Array(elements, token.span.merge(end)))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(&TokenKind::RightBrace) {
                    let key = self.parse_expression()?;
                    self.expect(TokenKind::FatArrow, "=>")?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RightBrace, "}")?.span;
                Ok(Expression::Hash(entries, token.span.merge(end)))
            }
            TokenKind::LeftParen => {
                self.advance();
                let expression = self.parse_expression()?;
                self.expect(TokenKind::RightParen, ")")?;
                Ok(expression)
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Unless => self.parse_unless(),
            TokenKind::Case => self.parse_case(),
            TokenKind::Class => {
                // `class { 'name': ... }` declares classes as resources.
                self.advance();
                if self.check(&TokenKind::LeftBrace) {
                    self.parse_resource_bodies("class".to_string(), token.span, ResourceStatus::Realized, token.span)
                } else {
                    Err(self.unexpected("'{' or class name"))
                }
            }
            TokenKind::At | TokenKind::AtAt => {
                let status = if matches!(token.kind, TokenKind::At) {
                    ResourceStatus::Virtual
                } else {
                    ResourceStatus::Exported
                };
                self.advance();
                let type_token = self.advance();
                let type_name = match type_token.kind {
                    TokenKind::Name(name) => name,
                    TokenKind::Class => "class".to_string(),
                    _ => return Err(self.unexpected("resource type name")),
                };
                self.parse_resource_bodies(type_name, type_token.span, status, token.span)
            }
            TokenKind::Name(name) => {
                self.advance();
                if self.check(&TokenKind::LeftBrace) {
                    return self.parse_resource_bodies(
                        name,
                        token.span,
                        ResourceStatus::Realized,
                        token.span,
                    );
                }
                if self.check(&TokenKind::LeftParen) {
                    return self.parse_function_call(name, token.span);
                }
                if STATEMENT_FUNCTIONS.contains(&name.as_str()) && self.starts_expression() {
                    return self.parse_statement_call(name, token.span);
                }
                Ok(Expression::Bareword(name, token.span))
            }
            TokenKind::Type => {
                // The `type` keyword doubles as the diagnostic function name.
                self.advance();
                if self.check(&TokenKind::LeftParen) {
                    self.parse_function_call("type".to_string(), token.span)
                } else {
                    Err(self.unexpected("'('"))
                }
            }
            TokenKind::TypeName(name) => {
                self.advance();
                // `Type <| query |>` collects; `Type { defaults }` sets
                // defaults; `Type[ref] { ... }` overrides (handled by
                // postfix + statement wrapping below).
                if self.check(&TokenKind::LeftCollect) || self.check(&TokenKind::LeftCollectExported)
                {
                    return self.parse_collector(name, token.span);
                }
                if self.check(&TokenKind::LeftBrace) {
                    return self.parse_resource_defaults(name, token.span);
                }
                // `Integer("0x1f")` is a conversion call.
                if self.check(&TokenKind::LeftParen) {
                    return self.parse_function_call(name, token.span);
                }
                let mut expression = Expression::TypeName(name, token.span);
                // An access on a type reference followed by a body is an
                // override: `File['/tmp/x'] { mode => '0644' }`.
                while self.check(&TokenKind::LeftBracket) {
                    self.advance();
                    let mut arguments = Vec::new();
                    while !self.check(&TokenKind::RightBracket) {
                        arguments.push(self.parse_expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    let end = self.expect(TokenKind::RightBracket, "]")?.span;
                    let span = expression.span().merge(end);
                    expression = Expression::Access {
                        target: Box::new(expression),
                        arguments,
                        span,
                    };
                }
                if matches!(expression, Expression::Access { .. })
                    && self.check(&TokenKind::LeftBrace)
                {
                    return self.parse_resource_override(expression);
                }
                Ok(expression)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Whether the current token could begin a statement-call argument.
    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Integer(_)
                | TokenKind::Float(_)
                | TokenKind::String(_)
                | TokenKind::InterpolatedString(_)
                | TokenKind::Heredoc(_)
                | TokenKind::Name(_)
                | TokenKind::TypeName(_)
                | TokenKind::Variable(_)
                | TokenKind::LeftBracket
                | TokenKind::Undef
                | TokenKind::True
                | TokenKind::False
        )
    }

    fn parse_function_call(&mut self, name: String, name_span: Span) -> Result<Expression, ParseError> {
        self.expect(TokenKind::LeftParen, "(")?;
        let mut arguments = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            arguments.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RightParen, ")")?.span;
        let lambda = self.parse_optional_lambda()?;
        let span = name_span.merge(lambda.as_ref().map(|l| l.span).unwrap_or(end));
        Ok(Expression::FunctionCall(Box::new(FunctionCall {
            name,
            name_span,
            arguments,
            lambda,
            span,
        })))
    }

    /// Statement-style call without parentheses: `include foo, bar`.
    fn parse_statement_call(&mut self, name: String, name_span: Span) -> Result<Expression, ParseError> {
        let mut arguments = Vec::new();
        loop {
            arguments.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let span = name_span.merge(
            arguments
                .last()
                .map(|a| a.span())
                .unwrap_or(name_span),
        );
        Ok(Expression::FunctionCall(Box::new(FunctionCall {
            name,
            name_span,
            arguments,
            lambda: None,
            span,
        })))
    }

    fn parse_attribute_operations(&mut self) -> Result<Vec<AttributeOperation>, ParseError> {
        let mut operations = Vec::new();
        loop {
            let name_token = match self.peek_kind().clone() {
                TokenKind::Name(name) => {
                    let token = self.advance();
                    (name, token.span)
                }
                // `unless`, `in`, and friends are valid attribute names.
                TokenKind::Unless | TokenKind::In | TokenKind::Type => {
                    let token = self.advance();
                    (token.kind.to_string(), token.span)
                }
                TokenKind::Star => {
                    let token = self.advance();
                    ("*".to_string(), token.span)
                }
                _ => break,
            };
            let operator = if self.eat(&TokenKind::PlusArrow) {
                AttributeOperator::Append
            } else {
                self.expect(TokenKind::FatArrow, "=> or +>")?;
                AttributeOperator::Assign
            };
            let value = self.parse_expression()?;
            let span = name_token.1.merge(value.span());
            operations.push(AttributeOperation {
                name: name_token.0,
                name_span: name_token.1,
                operator,
                value,
                span,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(operations)
    }

    fn parse_resource_bodies(
        &mut self,
        type_name: String,
        type_span: Span,
        status: ResourceStatus,
        start: Span,
    ) -> Result<Expression, ParseError> {
        self.expect(TokenKind::LeftBrace, "{")?;
        let mut bodies = Vec::new();
        loop {
            if self.check(&TokenKind::RightBrace) {
                break;
            }
            let title = self.parse_expression()?;
            self.expect(TokenKind::Colon, ":")?;
            let operations = if self.check(&TokenKind::RightBrace) || self.check(&TokenKind::Semicolon)
            {
                Vec::new()
            } else {
                self.parse_attribute_operations()?
            };
            let span = title.span();
            bodies.push(ResourceBody {
                title,
                operations,
                span,
            });
            if !self.eat(&TokenKind::Semicolon) {
                break;
            }
        }
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Expression::Resource(Box::new(ResourceExpression {
            status,
            type_name,
            type_span,
            bodies,
            span: start.merge(end),
        })))
    }

    fn parse_resource_defaults(
        &mut self,
        type_name: String,
        type_span: Span,
    ) -> Result<Expression, ParseError> {
        self.expect(TokenKind::LeftBrace, "{")?;
        let operations = if self.check(&TokenKind::RightBrace) {
            Vec::new()
        } else {
            self.parse_attribute_operations()?
        };
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Expression::ResourceDefaults(Box::new(
            ResourceDefaultsExpression {
                type_name,
                type_span,
                operations,
                span: type_span.merge(end),
            },
        )))
    }

    fn parse_resource_override(&mut self, reference: Expression) -> Result<Expression, ParseError> {
        self.expect(TokenKind::LeftBrace, "{")?;
        let operations = if self.check(&TokenKind::RightBrace) {
            Vec::new()
        } else {
            self.parse_attribute_operations()?
        };
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        let span = reference.span().merge(end);
        Ok(Expression::ResourceOverride(Box::new(
            ResourceOverrideExpression {
                reference,
                operations,
                span,
            },
        )))
    }

    fn parse_collector(&mut self, type_name: String, type_span: Span) -> Result<Expression, ParseError> {
        let exported = self.check(&TokenKind::LeftCollectExported);
        self.advance();
        let close = if exported {
            TokenKind::RightCollectExported
        } else {
            TokenKind::RightCollect
        };
        let query = if self.check(&close) {
            None
        } else {
            Some(self.parse_query()?)
        };
        let end = self.expect(close, "collector close")?.span;
        Ok(Expression::Collector(Box::new(CollectorExpression {
            type_name,
            type_span,
            exported,
            query,
            span: type_span.merge(end),
        })))
    }

    fn parse_query(&mut self) -> Result<Query, ParseError> {
        let mut left = self.parse_query_term()?;
        loop {
            if self.eat(&TokenKind::And) {
                let right = self.parse_query_term()?;
                left = Query::And(Box::new(left), Box::new(right));
            } else if self.eat(&TokenKind::Or) {
                let right = self.parse_query_term()?;
                left = Query::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_query_term(&mut self) -> Result<Query, ParseError> {
        if self.eat(&TokenKind::LeftParen) {
            let query = self.parse_query()?;
            self.expect(TokenKind::RightParen, ")")?;
            return Ok(query);
        }
        let token = self.advance();
        let attribute = match token.kind {
            TokenKind::Name(name) => name,
            _ => return Err(self.unexpected("attribute name")),
        };
        let negated = if self.eat(&TokenKind::NotEquals) {
            true
        } else {
            self.expect(TokenKind::Equals, "== or !=")?;
            false
        };
        let value = self.parse_unary()?;
        let span = token.span.merge(value.span());
        Ok(Query::Condition {
            attribute,
            negated,
            value,
            span,
        })
    }

    fn parse_if(&mut self) -> Result<Expression, ParseError> {
        let start = self.advance().span; // `if`
        let mut branches = Vec::new();
        let condition = self.parse_expression()?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let mut end = self.expect(TokenKind::RightBrace, "}")?.span;
        branches.push((condition, body));
        let mut else_body = None;
        loop {
            if self.check(&TokenKind::Elsif) {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(TokenKind::LeftBrace, "{")?;
                let body = self.parse_statements(TokenKind::RightBrace)?;
                end = self.expect(TokenKind::RightBrace, "}")?.span;
                branches.push((condition, body));
            } else if self.check(&TokenKind::Else) {
                self.advance();
                self.expect(TokenKind::LeftBrace, "{")?;
                let body = self.parse_statements(TokenKind::RightBrace)?;
                end = self.expect(TokenKind::RightBrace, "}")?.span;
                else_body = Some(body);
                break;
            } else {
                break;
            }
        }
        Ok(Expression::If(Box::new(IfExpression {
            branches,
            else_body,
            span: start.merge(end),
        })))
    }

    fn parse_unless(&mut self) -> Result<Expression, ParseError> {
        let start = self.advance().span; // `unless`
        let condition = self.parse_expression()?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let mut end = self.expect(TokenKind::RightBrace, "}")?.span;
        let else_body = if self.eat(&TokenKind::Else) {
            self.expect(TokenKind::LeftBrace, "{")?;
            let body = self.parse_statements(TokenKind::RightBrace)?;
            end = self.expect(TokenKind::RightBrace, "}")?.span;
            Some(body)
        } else {
            None
        };
        Ok(Expression::Unless(Box::new(UnlessExpression {
            condition,
            body,
            else_body,
            span: start.merge(end),
        })))
    }

    fn parse_case(&mut self) -> Result<Expression, ParseError> {
        let start = self.advance().span; // `case`
        let subject = self.parse_expression()?;
        self.expect(TokenKind::LeftBrace, "{")?;
        let mut options = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            let mut patterns = Vec::new();
            loop {
                patterns.push(self.parse_expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Colon, ":")?;
            self.expect(TokenKind::LeftBrace, "{")?;
            let body = self.parse_statements(TokenKind::RightBrace)?;
            let end = self.expect(TokenKind::RightBrace, "}")?.span;
            let span = patterns
                .first()
                .map(|p| p.span())
                .unwrap_or(end)
                .merge(end);
            options.push(CaseOption {
                patterns,
                body,
                span,
            });
        }
        let end = self.expect(TokenKind::RightBrace, "}")?.span;
        Ok(Expression::Case(Box::new(CaseExpression {
            subject,
            options,
            span: start.merge(end),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> SyntaxTree {
        Parser::parse_tree("test.pp", source).unwrap()
    }

    fn parse_expression(source: &str) -> Expression {
        let tree = parse(source);
        match tree.statements.into_iter().next() {
            Some(Statement::Expression(e)) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let e = parse_expression("$a = 2 + 3 * 4");
        assert_eq!(e.to_string(), "($a = (2 + (3 * 4)))");
    }

    #[test]
    fn test_parse_comparison_below_in() {
        let e = parse_expression("'a' in ['a'] == true");
        // `in` binds tighter than `==`.
        assert_eq!(e.to_string(), "(('a' in ['a']) == true)");
    }

    #[test]
    fn test_parse_shift_binds_tight() {
        let e = parse_expression("1 + 2 << 3");
        assert_eq!(e.to_string(), "(1 + (2 << 3))");
    }

    #[test]
    fn test_parse_resource_expression() {
        let tree = parse("file { '/tmp/x': ensure => present, mode => '0644' }");
        match &tree.statements[0] {
            Statement::Expression(Expression::Resource(resource)) => {
                assert_eq!(resource.type_name, "file");
                assert_eq!(resource.bodies.len(), 1);
                assert_eq!(resource.bodies[0].operations.len(), 2);
                assert_eq!(resource.bodies[0].operations[0].name, "ensure");
            }
            other => panic!("expected resource, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_virtual_and_exported_resources() {
        let tree = parse("@file { 'a': } @@file { 'b': }");
        match (&tree.statements[0], &tree.statements[1]) {
            (
                Statement::Expression(Expression::Resource(a)),
                Statement::Expression(Expression::Resource(b)),
            ) => {
                assert_eq!(a.status, ResourceStatus::Virtual);
                assert_eq!(b.status, ResourceStatus::Exported);
            }
            other => panic!("unexpected statements {other:?}"),
        }
    }

    #[test]
    fn test_parse_multiple_titles_and_bodies() {
        let tree = parse("file { ['/a', '/b']: ensure => file; '/c': ensure => absent }");
        match &tree.statements[0] {
            Statement::Expression(Expression::Resource(resource)) => {
                assert_eq!(resource.bodies.len(), 2);
            }
            other => panic!("expected resource, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_class_definition_and_include() {
        let tree = parse("class foo { file { '/tmp/x': ensure => present } } include foo");
        assert!(matches!(&tree.statements[0], Statement::Class(c) if c.name == "foo"));
        match &tree.statements[1] {
            Statement::Expression(Expression::FunctionCall(call)) => {
                assert_eq!(call.name, "include");
                assert_eq!(call.arguments.len(), 1);
            }
            other => panic!("expected include call, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_parameterized_class() {
        let tree = parse("class foo (String $mode = '0644', *$rest) { }");
        match &tree.statements[0] {
            Statement::Class(c) => {
                assert_eq!(c.parameters.len(), 2);
                assert!(c.parameters[0].type_expression.is_some());
                assert!(c.parameters[0].default.is_some());
                assert!(c.parameters[1].captures);
            }
            other => panic!("expected class, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_relationship_chain() {
        let tree = parse("file { 'a': } -> file { 'b': } ~> service { 'c': }");
        match &tree.statements[0] {
            Statement::Relationship(r) => {
                assert_eq!(r.rest.len(), 2);
                assert_eq!(r.rest[0].0, RelationshipOperator::Before);
                assert_eq!(r.rest[1].0, RelationshipOperator::Notify);
            }
            other => panic!("expected relationship, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_collector() {
        let tree = parse("File <| tag == 'x' and ensure != absent |>");
        match &tree.statements[0] {
            Statement::Expression(Expression::Collector(collector)) => {
                assert_eq!(collector.type_name, "File");
                assert!(!collector.exported);
                assert!(matches!(collector.query, Some(Query::And(_, _))));
            }
            other => panic!("expected collector, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_resource_defaults_and_override() {
        let tree = parse("File { mode => '0644' } File['/tmp/x'] { owner => root }");
        assert!(matches!(
            &tree.statements[0],
            Statement::Expression(Expression::ResourceDefaults(_))
        ));
        assert!(matches!(
            &tree.statements[1],
            Statement::Expression(Expression::ResourceOverride(_))
        ));
    }

    #[test]
    fn test_parse_case_and_selector() {
        let tree = parse("case $os { 'linux', 'bsd': { 1 } /win.*/: { 2 } default: { 3 } }");
        match &tree.statements[0] {
            Statement::Expression(Expression::Case(c)) => {
                assert_eq!(c.options.len(), 3);
                assert_eq!(c.options[0].patterns.len(), 2);
            }
            other => panic!("expected case, got {other:?}"),
        }
        let e = parse_expression("$x ? { 'a' => 1, default => 2 }");
        assert!(matches!(e, Expression::Selector(_)));
    }

    #[test]
    fn test_parse_method_call_with_lambda() {
        let e = parse_expression("[1, 2].each |$x| { notice($x) }");
        match e {
            Expression::MethodCall(call) => {
                assert_eq!(call.name, "each");
                assert!(call.lambda.is_some());
            }
            other => panic!("expected method call, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_node_definitions() {
        let tree = parse("node 'web01.example.com', /^db\\d+/, default { }");
        match &tree.statements[0] {
            Statement::Node(n) => {
                assert_eq!(n.hostnames.len(), 3);
                assert!(matches!(&n.hostnames[0], Hostname::Literal(s) if s == "web01.example.com"));
                assert!(matches!(&n.hostnames[1], Hostname::Regex(_)));
                assert!(matches!(&n.hostnames[2], Hostname::Default));
            }
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_type_alias() {
        let tree = parse("type Mode = String");
        assert!(matches!(&tree.statements[0], Statement::TypeAlias(t) if t.name == "Mode"));
    }

    #[test]
    fn test_parse_determinism() {
        let source = "class foo { } include foo if $x { notice('y') }";
        assert_eq!(parse(source), parse(source));
    }

    #[test]
    fn test_pretty_print_round_trip() {
        let sources = [
            "$a = (2 + (3 * 4))",
            "file { '/tmp/x': ensure => present }",
            "if ($x == 1) { notice('one') } else { notice('other') }",
            "case $x { 'a': { 1 } default: { 2 } }",
            "[1, 2, 3].map(2) |$x| { ($x * 2) }",
            "File <| tag == 'x' |>",
            "@file { 'a': tag => 'x' }",
            "$h = {'k' => [1, 2], 'j' => undef}",
            "node default { include base }",
            "$s = \"prefix ${x} suffix\"",
        ];
        for source in sources {
            let once = parse(source);
            let printed = once.to_string();
            let twice = parse(&printed);
            assert_eq!(
                printed,
                twice.to_string(),
                "round trip failed for {source}"
            );
        }
    }

    #[test]
    fn test_parse_error_reports_expectation() {
        let err = Parser::parse_tree("test.pp", "file { 'x' ensure => present }").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("expected"), "got: {message}");
    }

    #[test]
    fn test_splat_unary() {
        let e = parse_expression("with(*$args)");
        match e {
            Expression::FunctionCall(call) => {
                assert!(matches!(
                    call.arguments[0],
                    Expression::Unary(UnaryOperator::Splat, _, _)
                ));
            }
            other => panic!("expected call, got {other:?}"),
        }
    }
}
