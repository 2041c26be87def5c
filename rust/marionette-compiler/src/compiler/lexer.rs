//! Lexer for Puppet manifests.
//!
//! Produces a finite token sequence with exact source ranges. Whitespace and
//! comments are consumed silently but preserve line counts. String
//! interpolation and heredocs require bounded lookahead; everything else is
//! a single-pass scan.

use crate::compiler::tokens::{InterpolationSegment, Position, Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}")]
    UnexpectedChar { ch: char, line: usize, offset: usize },
    #[error("unterminated string at line {line}")]
    UnterminatedString { line: usize, offset: usize },
    #[error("unterminated comment at line {line}")]
    UnterminatedComment { line: usize, offset: usize },
    #[error("unterminated regular expression at line {line}")]
    UnterminatedRegex { line: usize, offset: usize },
    #[error("invalid number '{text}' at line {line}")]
    InvalidNumber {
        text: String,
        line: usize,
        offset: usize,
    },
    #[error("invalid variable name at line {line}")]
    InvalidVariable { line: usize, offset: usize },
    #[error("invalid heredoc tag at line {line}")]
    InvalidHeredocTag { line: usize, offset: usize },
    #[error("unterminated heredoc '{tag}' at line {line}")]
    UnterminatedHeredoc {
        tag: String,
        line: usize,
        offset: usize,
    },
    #[error("invalid escape sequence '\\{ch}' at line {line}")]
    InvalidEscape { ch: char, line: usize, offset: usize },
}

impl LexError {
    /// The byte offset of the first bad character.
    pub fn offset(&self) -> usize {
        match self {
            LexError::UnexpectedChar { offset, .. }
            | LexError::UnterminatedString { offset, .. }
            | LexError::UnterminatedComment { offset, .. }
            | LexError::UnterminatedRegex { offset, .. }
            | LexError::InvalidNumber { offset, .. }
            | LexError::InvalidVariable { offset, .. }
            | LexError::InvalidHeredocTag { offset, .. }
            | LexError::UnterminatedHeredoc { offset, .. }
            | LexError::InvalidEscape { offset, .. } => *offset,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            LexError::UnexpectedChar { line, .. }
            | LexError::UnterminatedString { line, .. }
            | LexError::UnterminatedComment { line, .. }
            | LexError::UnterminatedRegex { line, .. }
            | LexError::InvalidNumber { line, .. }
            | LexError::InvalidVariable { line, .. }
            | LexError::InvalidHeredocTag { line, .. }
            | LexError::UnterminatedHeredoc { line, .. }
            | LexError::InvalidEscape { line, .. } => *line,
        }
    }
}

/// A heredoc opened on the current logical line; its body is consumed when
/// the line ends.
struct PendingHeredoc {
    tag: String,
    interpolated: bool,
    token_index: usize,
    line: usize,
    offset: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    byte_offset: usize,
    /// Whether a `/` at the current position starts a regex (true after
    /// operators and openers) rather than division.
    prefer_regex: bool,
    pending_heredocs: Vec<PendingHeredoc>,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            byte_offset: 0,
            prefer_regex: true,
            pending_heredocs: Vec::new(),
            tokens: Vec::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source.get(self.pos + n).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn position(&self) -> Position {
        Position::new(self.byte_offset, self.line)
    }

    fn push(&mut self, kind: TokenKind, start: Position) {
        self.prefer_regex = !matches!(
            kind,
            TokenKind::Integer(_)
                | TokenKind::Float(_)
                | TokenKind::String(_)
                | TokenKind::InterpolatedString(_)
                | TokenKind::Heredoc(_)
                | TokenKind::Regex(_)
                | TokenKind::Name(_)
                | TokenKind::TypeName(_)
                | TokenKind::Variable(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Undef
                | TokenKind::Default
                | TokenKind::RightParen
                | TokenKind::RightBracket
        );
        let span = Span::new(start, self.position());
        self.tokens.push(Token::new(kind, span));
    }

    /// Tokenizes the entire source.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while self.current().is_some() {
            self.skip_trivia()?;
            let Some(ch) = self.current() else {
                break;
            };
            let start = self.position();
            match ch {
                '0'..='9' => self.lex_number(start)?,
                'a'..='z' | '_' => self.lex_name(start)?,
                'A'..='Z' => self.lex_type_name(start)?,
                ':' if self.peek() == Some(':')
                    && matches!(self.peek_at(2), Some(c) if c.is_ascii_alphabetic() || c == '_') =>
                {
                    // Leading `::` on a qualified name.
                    if matches!(self.peek_at(2), Some(c) if c.is_ascii_uppercase()) {
                        self.lex_type_name(start)?;
                    } else {
                        self.lex_name(start)?;
                    }
                }
                '$' => self.lex_variable(start)?,
                '\'' => self.lex_single_quoted(start)?,
                '"' => self.lex_double_quoted(start)?,
                '/' if self.prefer_regex => self.lex_regex(start)?,
                '@' if self.peek() == Some('(') => self.lex_heredoc_tag(start)?,
                _ => self.lex_operator(start)?,
            }
        }
        // A heredoc opened on the final line never found its body.
        if let Some(pending) = self.pending_heredocs.first() {
            return Err(LexError::UnterminatedHeredoc {
                tag: pending.tag.clone(),
                line: pending.line,
                offset: pending.offset,
            });
        }
        let eof = self.position();
        self.tokens.push(Token::new(TokenKind::Eof, Span::new(eof, eof)));
        Ok(self.tokens)
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.current() {
                Some('\n') => {
                    self.advance();
                    self.consume_heredoc_bodies()?;
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek() == Some('*') => {
                    let line = self.line;
                    let offset = self.byte_offset;
                    self.advance();
                    self.advance();
                    loop {
                        match self.current() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                return Err(LexError::UnterminatedComment { line, offset });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_number(&mut self, start: Position) -> Result<(), LexError> {
        let mut text = String::new();
        if self.current() == Some('0')
            && matches!(self.peek(), Some('x') | Some('X'))
        {
            self.advance();
            self.advance();
            while let Some(c) = self.current() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if text.is_empty() || matches!(self.current(), Some(c) if c.is_ascii_alphanumeric()) {
                return Err(self.bad_number(start, format!("0x{text}")));
            }
            let value = i64::from_str_radix(&text, 16)
                .map_err(|_| self.bad_number(start, format!("0x{text}")))?;
            self.push(TokenKind::Integer(value), start);
            return Ok(());
        }

        let mut is_float = false;
        while let Some(c) = self.current() {
            match c {
                '0'..='9' => {
                    text.push(c);
                    self.advance();
                }
                '.' if !is_float && matches!(self.peek(), Some(d) if d.is_ascii_digit()) => {
                    is_float = true;
                    text.push(c);
                    self.advance();
                }
                'e' | 'E' if !text.is_empty() => {
                    // Exponent only when followed by digits (with optional sign).
                    let next = self.peek();
                    let digits_follow = match next {
                        Some('+') | Some('-') => {
                            matches!(self.peek_at(2), Some(d) if d.is_ascii_digit())
                        }
                        Some(d) => d.is_ascii_digit(),
                        None => false,
                    };
                    if !digits_follow {
                        break;
                    }
                    is_float = true;
                    text.push(c);
                    self.advance();
                    if matches!(self.current(), Some('+') | Some('-')) {
                        text.push(self.advance().unwrap_or('+'));
                    }
                    while let Some(d) = self.current() {
                        if d.is_ascii_digit() {
                            text.push(d);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        if matches!(self.current(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            return Err(self.bad_number(start, text));
        }
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.bad_number(start, text.clone()))?;
            self.push(TokenKind::Float(value), start);
        } else if text.len() > 1 && text.starts_with('0') {
            let value = i64::from_str_radix(&text[1..], 8)
                .map_err(|_| self.bad_number(start, text.clone()))?;
            self.push(TokenKind::Integer(value), start);
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.bad_number(start, text.clone()))?;
            self.push(TokenKind::Integer(value), start);
        }
        Ok(())
    }

    fn bad_number(&self, start: Position, text: String) -> LexError {
        LexError::InvalidNumber {
            text,
            line: start.line,
            offset: start.offset,
        }
    }

    fn lex_qualified(&mut self) -> String {
        let mut name = String::new();
        if self.current() == Some(':') && self.peek() == Some(':') {
            name.push_str("::");
            self.advance();
            self.advance();
        }
        loop {
            while let Some(c) = self.current() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if self.current() == Some(':')
                && self.peek() == Some(':')
                && matches!(self.peek_at(2), Some(c) if c.is_ascii_alphanumeric() || c == '_')
            {
                name.push_str("::");
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    fn lex_name(&mut self, start: Position) -> Result<(), LexError> {
        let name = self.lex_qualified();
        match TokenKind::keyword(&name) {
            Some(keyword) => self.push(keyword, start),
            None => self.push(TokenKind::Name(name), start),
        }
        Ok(())
    }

    fn lex_type_name(&mut self, start: Position) -> Result<(), LexError> {
        let name = self.lex_qualified();
        self.push(TokenKind::TypeName(name), start);
        Ok(())
    }

    fn lex_variable(&mut self, start: Position) -> Result<(), LexError> {
        self.advance(); // '$'
        match self.current() {
            Some(c) if c.is_ascii_digit() => {
                let mut name = String::new();
                while let Some(d) = self.current() {
                    if d.is_ascii_digit() {
                        name.push(d);
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.push(TokenKind::Variable(name), start);
                Ok(())
            }
            Some(c) if c.is_ascii_lowercase() || c == '_' || c == ':' => {
                let name = self.lex_qualified();
                if name.is_empty() || name.ends_with("::") {
                    return Err(LexError::InvalidVariable {
                        line: start.line,
                        offset: start.offset,
                    });
                }
                self.push(TokenKind::Variable(name), start);
                Ok(())
            }
            _ => Err(LexError::InvalidVariable {
                line: start.line,
                offset: start.offset,
            }),
        }
    }

    fn lex_single_quoted(&mut self, start: Position) -> Result<(), LexError> {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.current() {
                Some('\'') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('\\') => {
                            text.push('\\');
                            self.advance();
                        }
                        Some('\'') => {
                            text.push('\'');
                            self.advance();
                        }
                        // Other escapes are literal in single quotes.
                        Some(c) => {
                            text.push('\\');
                            text.push(c);
                            self.advance();
                        }
                        None => {
                            return Err(LexError::UnterminatedString {
                                line: start.line,
                                offset: start.offset,
                            })
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
                None => {
                    return Err(LexError::UnterminatedString {
                        line: start.line,
                        offset: start.offset,
                    })
                }
            }
        }
        self.push(TokenKind::String(text), start);
        Ok(())
    }

    fn lex_double_quoted(&mut self, start: Position) -> Result<(), LexError> {
        self.advance(); // opening quote
        let mut segments: Vec<InterpolationSegment> = Vec::new();
        let mut literal = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.lex_escape(start)?;
                    literal.push(escaped);
                }
                Some('$') => {
                    self.lex_interpolation(start, &mut segments, &mut literal)?;
                }
                Some(c) => {
                    literal.push(c);
                    self.advance();
                }
                None => {
                    return Err(LexError::UnterminatedString {
                        line: start.line,
                        offset: start.offset,
                    })
                }
            }
        }
        if !literal.is_empty() || segments.is_empty() {
            segments.push((false, literal));
        }
        if segments.len() == 1 && !segments[0].0 {
            // No interpolation at all; treat as a plain string value.
            let (_, text) = segments.pop().unwrap_or((false, String::new()));
            self.push(TokenKind::InterpolatedString(vec![(false, text)]), start);
        } else {
            self.push(TokenKind::InterpolatedString(segments), start);
        }
        Ok(())
    }

    fn lex_escape(&mut self, start: Position) -> Result<char, LexError> {
        let ch = self.current().ok_or(LexError::UnterminatedString {
            line: start.line,
            offset: start.offset,
        })?;
        if !matches!(ch, 'n' | 'r' | 't' | 's' | '$' | '"' | '\'' | '\\' | 'u') {
            // Unknown escapes keep the backslash, matching quoted-string
            // behavior for things like "\d" inside interpolated regexes.
            return Ok('\\');
        }
        self.advance();
        Ok(match ch {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            's' => ' ',
            '$' => '$',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            'u' => {
                // \u{XXXX}
                if self.current() == Some('{') {
                    self.advance();
                    let mut hex = String::new();
                    while let Some(c) = self.current() {
                        if c == '}' {
                            break;
                        }
                        hex.push(c);
                        self.advance();
                    }
                    self.advance(); // '}'
                    u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or(LexError::InvalidEscape {
                            ch: 'u',
                            line: start.line,
                            offset: start.offset,
                        })?
                } else {
                    return Err(LexError::InvalidEscape {
                        ch: 'u',
                        line: start.line,
                        offset: start.offset,
                    });
                }
            }
            other => {
                debug_assert!(false, "unreachable escape '{other}'");
                '\\'
            }
        })
    }

    fn lex_interpolation(
        &mut self,
        start: Position,
        segments: &mut Vec<InterpolationSegment>,
        literal: &mut String,
    ) -> Result<(), LexError> {
        match self.peek() {
            Some('{') => {
                self.advance(); // '$'
                self.advance(); // '{'
                if !literal.is_empty() {
                    segments.push((false, std::mem::take(literal)));
                }
                let mut depth = 1usize;
                let mut expression = String::new();
                loop {
                    match self.current() {
                        Some('{') => {
                            depth += 1;
                            expression.push('{');
                            self.advance();
                        }
                        Some('}') => {
                            depth -= 1;
                            self.advance();
                            if depth == 0 {
                                break;
                            }
                            expression.push('}');
                        }
                        Some('\'') | Some('"') => {
                            // Skip over nested quoted strings verbatim.
                            let quote = self.current().unwrap_or('"');
                            expression.push(quote);
                            self.advance();
                            loop {
                                match self.current() {
                                    Some('\\') => {
                                        expression.push('\\');
                                        self.advance();
                                        if let Some(c) = self.current() {
                                            expression.push(c);
                                            self.advance();
                                        }
                                    }
                                    Some(c) => {
                                        expression.push(c);
                                        self.advance();
                                        if c == quote {
                                            break;
                                        }
                                    }
                                    None => {
                                        return Err(LexError::UnterminatedString {
                                            line: start.line,
                                            offset: start.offset,
                                        })
                                    }
                                }
                            }
                        }
                        Some(c) => {
                            expression.push(c);
                            self.advance();
                        }
                        None => {
                            return Err(LexError::UnterminatedString {
                                line: start.line,
                                offset: start.offset,
                            })
                        }
                    }
                }
                segments.push((true, expression));
                Ok(())
            }
            Some(c) if c.is_ascii_lowercase() || c == '_' || c == ':' || c.is_ascii_digit() => {
                self.advance(); // '$'
                if !literal.is_empty() {
                    segments.push((false, std::mem::take(literal)));
                }
                let name = if matches!(self.current(), Some(d) if d.is_ascii_digit()) {
                    let mut digits = String::new();
                    while let Some(d) = self.current() {
                        if d.is_ascii_digit() {
                            digits.push(d);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    digits
                } else {
                    self.lex_qualified()
                };
                segments.push((true, format!("${name}")));
                Ok(())
            }
            _ => {
                // A lone '$' is literal text.
                literal.push('$');
                self.advance();
                Ok(())
            }
        }
    }

    fn lex_regex(&mut self, start: Position) -> Result<(), LexError> {
        self.advance(); // '/'
        let mut pattern = String::new();
        loop {
            match self.current() {
                Some('/') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('/') => {
                            pattern.push('/');
                            self.advance();
                        }
                        Some(c) => {
                            pattern.push('\\');
                            pattern.push(c);
                            self.advance();
                        }
                        None => {
                            return Err(LexError::UnterminatedRegex {
                                line: start.line,
                                offset: start.offset,
                            })
                        }
                    }
                }
                Some('\n') | None => {
                    return Err(LexError::UnterminatedRegex {
                        line: start.line,
                        offset: start.offset,
                    })
                }
                Some(c) => {
                    pattern.push(c);
                    self.advance();
                }
            }
        }
        self.push(TokenKind::Regex(pattern), start);
        Ok(())
    }

    fn lex_heredoc_tag(&mut self, start: Position) -> Result<(), LexError> {
        self.advance(); // '@'
        self.advance(); // '('
        let mut interpolated = false;
        let mut tag = String::new();
        // Optional whitespace, then TAG or "TAG", then optional /escapes or
        // :syntax suffixes which are accepted and ignored.
        while matches!(self.current(), Some(' ') | Some('\t')) {
            self.advance();
        }
        if self.current() == Some('"') {
            interpolated = true;
            self.advance();
            while let Some(c) = self.current() {
                if c == '"' {
                    self.advance();
                    break;
                }
                tag.push(c);
                self.advance();
            }
        } else {
            while let Some(c) = self.current() {
                if c == ')' || c == '/' || c == ':' || c.is_whitespace() {
                    break;
                }
                tag.push(c);
                self.advance();
            }
        }
        while let Some(c) = self.current() {
            if c == ')' {
                self.advance();
                break;
            }
            if c == '\n' {
                return Err(LexError::InvalidHeredocTag {
                    line: start.line,
                    offset: start.offset,
                });
            }
            self.advance();
        }
        if tag.is_empty() {
            return Err(LexError::InvalidHeredocTag {
                line: start.line,
                offset: start.offset,
            });
        }
        // Emit a placeholder token; the body replaces it when the line ends.
        let token_index = self.tokens.len();
        self.push(TokenKind::Heredoc(String::new()), start);
        self.pending_heredocs.push(PendingHeredoc {
            tag,
            interpolated,
            token_index,
            line: start.line,
            offset: start.offset,
        });
        Ok(())
    }

    fn consume_heredoc_bodies(&mut self) -> Result<(), LexError> {
        while !self.pending_heredocs.is_empty() {
            let pending = self.pending_heredocs.remove(0);
            let mut lines: Vec<String> = Vec::new();
            let mut margin: Option<usize> = None;
            let mut trim_break = false;
            let mut terminated = false;
            while self.current().is_some() {
                let mut text = String::new();
                while let Some(c) = self.current() {
                    self.advance();
                    if c == '\n' {
                        break;
                    }
                    text.push(c);
                }
                // End line: optional whitespace, optional '|', optional '-',
                // whitespace, tag.
                let trimmed = text.trim_start();
                let leading = text.len() - trimmed.len();
                let mut rest = trimmed;
                let mut has_margin = false;
                let mut has_trim = false;
                if let Some(after) = rest.strip_prefix('|') {
                    has_margin = true;
                    rest = after.trim_start();
                }
                if let Some(after) = rest.strip_prefix('-') {
                    has_trim = true;
                    rest = after.trim_start();
                }
                if rest == pending.tag {
                    if has_margin {
                        margin = Some(leading);
                    }
                    trim_break = has_trim;
                    terminated = true;
                    break;
                }
                lines.push(text);
            }
            if !terminated {
                return Err(LexError::UnterminatedHeredoc {
                    tag: pending.tag,
                    line: pending.line,
                    offset: pending.offset,
                });
            }
            if let Some(margin) = margin {
                for line in &mut lines {
                    let strip = line
                        .char_indices()
                        .take_while(|(i, c)| *i < margin && (*c == ' ' || *c == '\t'))
                        .count();
                    *line = line.chars().skip(strip).collect();
                }
            }
            let mut body = lines.join("\n");
            if !lines.is_empty() && !trim_break {
                body.push('\n');
            }
            let kind = if pending.interpolated {
                TokenKind::InterpolatedString(segment_heredoc(&body))
            } else {
                TokenKind::Heredoc(body)
            };
            self.tokens[pending.token_index].kind = kind;
        }
        Ok(())
    }

    fn lex_operator(&mut self, start: Position) -> Result<(), LexError> {
        let ch = self.current().ok_or(LexError::UnexpectedChar {
            ch: ' ',
            line: self.line,
            offset: self.byte_offset,
        })?;
        let two: String = self.source[self.pos..]
            .iter()
            .take(2)
            .collect();
        let three: String = self.source[self.pos..]
            .iter()
            .take(3)
            .collect();
        let (kind, len) = match three.as_str() {
            "<<|" => (TokenKind::LeftCollectExported, 3),
            "|>>" => (TokenKind::RightCollectExported, 3),
            _ => match two.as_str() {
                "<|" => (TokenKind::LeftCollect, 2),
                "|>" => (TokenKind::RightCollect, 2),
                "<<" => (TokenKind::LeftShift, 2),
                ">>" => (TokenKind::RightShift, 2),
                "<=" => (TokenKind::LessEqual, 2),
                ">=" => (TokenKind::GreaterEqual, 2),
                "==" => (TokenKind::Equals, 2),
                "!=" => (TokenKind::NotEquals, 2),
                "=~" => (TokenKind::Match, 2),
                "!~" => (TokenKind::NotMatch, 2),
                "=>" => (TokenKind::FatArrow, 2),
                "+>" => (TokenKind::PlusArrow, 2),
                "->" => (TokenKind::InEdge, 2),
                "~>" => (TokenKind::InEdgeSubscribe, 2),
                "<-" => (TokenKind::OutEdge, 2),
                "<~" => (TokenKind::OutEdgeSubscribe, 2),
                "@@" => (TokenKind::AtAt, 2),
                _ => match ch {
                    '{' => (TokenKind::LeftBrace, 1),
                    '}' => (TokenKind::RightBrace, 1),
                    '[' => (TokenKind::LeftBracket, 1),
                    ']' => (TokenKind::RightBracket, 1),
                    '(' => (TokenKind::LeftParen, 1),
                    ')' => (TokenKind::RightParen, 1),
                    ';' => (TokenKind::Semicolon, 1),
                    ',' => (TokenKind::Comma, 1),
                    ':' => (TokenKind::Colon, 1),
                    '.' => (TokenKind::Dot, 1),
                    '?' => (TokenKind::Question, 1),
                    '@' => (TokenKind::At, 1),
                    '|' => (TokenKind::Pipe, 1),
                    '=' => (TokenKind::Assign, 1),
                    '<' => (TokenKind::Less, 1),
                    '>' => (TokenKind::Greater, 1),
                    '+' => (TokenKind::Plus, 1),
                    '-' => (TokenKind::Minus, 1),
                    '*' => (TokenKind::Star, 1),
                    '/' => (TokenKind::Slash, 1),
                    '%' => (TokenKind::Percent, 1),
                    '!' => (TokenKind::Not, 1),
                    other => {
                        return Err(LexError::UnexpectedChar {
                            ch: other,
                            line: self.line,
                            offset: self.byte_offset,
                        })
                    }
                },
            },
        };
        for _ in 0..len {
            self.advance();
        }
        self.push(kind, start);
        Ok(())
    }
}

/// Splits heredoc body text into interpolation segments; escape processing
/// for `\$` only, since other escapes are literal in heredocs by default.
fn segment_heredoc(body: &str) -> Vec<InterpolationSegment> {
    let chars: Vec<char> = body.chars().collect();
    let mut segments: Vec<InterpolationSegment> = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() && chars[i + 1] == '$' {
            literal.push('$');
            i += 2;
            continue;
        }
        if c == '$' && i + 1 < chars.len() {
            let next = chars[i + 1];
            if next == '{' {
                if !literal.is_empty() {
                    segments.push((false, std::mem::take(&mut literal)));
                }
                let mut depth = 1;
                let mut expression = String::new();
                i += 2;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '{' => {
                            depth += 1;
                            expression.push('{');
                        }
                        '}' => {
                            depth -= 1;
                            if depth > 0 {
                                expression.push('}');
                            }
                        }
                        other => expression.push(other),
                    }
                    i += 1;
                }
                segments.push((true, expression));
                continue;
            }
            if next.is_ascii_lowercase() || next == '_' || next.is_ascii_digit() || next == ':' {
                if !literal.is_empty() {
                    segments.push((false, std::mem::take(&mut literal)));
                }
                let mut name = String::new();
                i += 1;
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                        name.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                segments.push((true, format!("${name}")));
                continue;
            }
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() || segments.is_empty() {
        segments.push((false, literal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lex_resource_expression() {
        let tokens = kinds("file { '/tmp/x': ensure => present }");
        assert_eq!(tokens[0], TokenKind::Name("file".into()));
        assert_eq!(tokens[1], TokenKind::LeftBrace);
        assert_eq!(tokens[2], TokenKind::String("/tmp/x".into()));
        assert_eq!(tokens[3], TokenKind::Colon);
        assert_eq!(tokens[4], TokenKind::Name("ensure".into()));
        assert_eq!(tokens[5], TokenKind::FatArrow);
        assert_eq!(tokens[6], TokenKind::Name("present".into()));
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(
            kinds("42 0x1f 017 3.14 1e3")[..5],
            [
                TokenKind::Integer(42),
                TokenKind::Integer(31),
                TokenKind::Integer(15),
                TokenKind::Float(3.14),
                TokenKind::Float(1000.0),
            ]
        );
        assert!(Lexer::new("0xzz").tokenize().is_err());
    }

    #[test]
    fn test_lex_variables() {
        assert_eq!(
            kinds("$x $foo::bar $0 $::top")[..4],
            [
                TokenKind::Variable("x".into()),
                TokenKind::Variable("foo::bar".into()),
                TokenKind::Variable("0".into()),
                TokenKind::Variable("::top".into()),
            ]
        );
    }

    #[test]
    fn test_lex_qualified_names() {
        assert_eq!(
            kinds("foo::bar Foo::Bar")[..2],
            [
                TokenKind::Name("foo::bar".into()),
                TokenKind::TypeName("Foo::Bar".into()),
            ]
        );
    }

    #[test]
    fn test_lex_interpolated_string() {
        let tokens = kinds(r#""a ${x + 1} b $name c""#);
        match &tokens[0] {
            TokenKind::InterpolatedString(segments) => {
                assert_eq!(
                    segments,
                    &vec![
                        (false, "a ".to_string()),
                        (true, "x + 1".to_string()),
                        (false, " b ".to_string()),
                        (true, "$name".to_string()),
                        (false, " c".to_string()),
                    ]
                );
            }
            other => panic!("expected interpolated string, got {other:?}"),
        }
    }

    #[test]
    fn test_lex_regex_vs_division() {
        let tokens = kinds("$x = /foo/ 10 / 2");
        assert_eq!(tokens[2], TokenKind::Regex("foo".into()));
        assert_eq!(tokens[4], TokenKind::Slash);
    }

    #[test]
    fn test_lex_relationship_operators() {
        assert_eq!(
            kinds("-> ~> <- <~")[..4],
            [
                TokenKind::InEdge,
                TokenKind::InEdgeSubscribe,
                TokenKind::OutEdge,
                TokenKind::OutEdgeSubscribe,
            ]
        );
    }

    #[test]
    fn test_lex_collectors() {
        assert_eq!(
            kinds("File <| tag == 'x' |>")[..3],
            [
                TokenKind::TypeName("File".into()),
                TokenKind::LeftCollect,
                TokenKind::Name("tag".into()),
            ]
        );
        let exported = kinds("File <<| |>>");
        assert_eq!(exported[1], TokenKind::LeftCollectExported);
        assert_eq!(exported[2], TokenKind::RightCollectExported);
    }

    #[test]
    fn test_lex_heredoc() {
        let source = "$x = @(EOT)\nline one\nline two\nEOT\n";
        let tokens = kinds(source);
        assert_eq!(tokens[2], TokenKind::Heredoc("line one\nline two\n".into()));
    }

    #[test]
    fn test_lex_heredoc_margin_and_trim() {
        let source = "$x = @(EOT)\n    indented\n    | - EOT\n";
        let tokens = kinds(source);
        assert_eq!(tokens[2], TokenKind::Heredoc("indented".into()));
    }

    #[test]
    fn test_lex_comments_preserve_lines() {
        let tokens = Lexer::new("# comment\n/* block\nspan */ $x").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Variable("x".into()));
        assert_eq!(tokens[0].span.start.line, 3);
    }

    #[test]
    fn test_lex_error_position() {
        let err = Lexer::new("$x = ^").tokenize().unwrap_err();
        match err {
            LexError::UnexpectedChar { ch, line, offset } => {
                assert_eq!(ch, '^');
                assert_eq!(line, 1);
                assert_eq!(offset, 5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_spans_track_offsets() {
        let tokens = Lexer::new("abc = 1").tokenize().unwrap();
        assert_eq!(tokens[0].span.start.offset, 0);
        assert_eq!(tokens[0].span.end.offset, 3);
        assert_eq!(tokens[1].span.start.offset, 4);
        assert_eq!(tokens[2].span.start.offset, 6);
    }
}
