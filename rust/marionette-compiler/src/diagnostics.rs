//! Error diagnostics with source snippets and caret underlines.

use std::fmt;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A rendered diagnostic with source context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub source_line: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            source_line: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    /// Attaches a location, deriving line/column and the excerpted source
    /// line from a byte offset.
    pub fn with_location(mut self, file: &str, source: &str, offset: usize) -> Self {
        let (line, column) = line_and_column(source, offset);
        self.file = Some(file.to_string());
        self.line = Some(line);
        self.column = Some(column);
        self.source_line = line_text(source, line).map(str::to_string);
        self
    }

    /// Renders with ANSI colors for a terminal.
    pub fn render_ansi(&self) -> String {
        let color = match self.severity {
            Severity::Error => "\x1b[0;31m",
            Severity::Warning => "\x1b[0;33m",
        };
        format!("{color}{self}\x1b[0m")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(file), Some(line), Some(column)) = (&self.file, self.line, self.column) {
            write!(f, "{file}:{line}:{column}: ")?;
        }
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        writeln!(f, "{label}: {}", self.message)?;
        if let (Some(text), Some(column)) = (&self.source_line, self.column) {
            writeln!(f, "    {text}")?;
            writeln!(f, "    {}^", " ".repeat(column.saturating_sub(1)))?;
        }
        Ok(())
    }
}

/// Computes the 1-based line and column of a byte offset.
pub fn line_and_column(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut line_start = 0;
    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    let column = source[line_start..offset.min(source.len())].chars().count() + 1;
    (line, column)
}

/// The text of a 1-based line.
pub fn line_text(source: &str, line: usize) -> Option<&str> {
    source.lines().nth(line.saturating_sub(1))
}

/// Counts and renders diagnostics to a sink.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    errors: usize,
    warnings: usize,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and renders a diagnostic to standard error.
    pub fn report(&mut self, diagnostic: &Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        eprint!("{}", diagnostic.render_ansi());
    }

    /// Records without rendering; used by tests and batch front-ends.
    pub fn count(&mut self, diagnostic: &Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn reset(&mut self) {
        self.errors = 0;
        self.warnings = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_and_column() {
        let source = "abc\ndef\nghi";
        assert_eq!(line_and_column(source, 0), (1, 1));
        assert_eq!(line_and_column(source, 5), (2, 2));
        assert_eq!(line_and_column(source, 8), (3, 1));
    }

    #[test]
    fn test_diagnostic_rendering() {
        let source = "$x = ^";
        let d = Diagnostic::error("unexpected character '^'").with_location("test.pp", source, 5);
        let rendered = d.to_string();
        assert!(rendered.contains("test.pp:1:6: error: unexpected character '^'"));
        assert!(rendered.contains("$x = ^"));
        assert!(rendered.lines().last().unwrap_or("").trim_end().ends_with('^'));
    }

    #[test]
    fn test_reporter_counts_and_reset() {
        let mut reporter = ErrorReporter::new();
        reporter.count(&Diagnostic::error("a"));
        reporter.count(&Diagnostic::warning("b"));
        reporter.count(&Diagnostic::error("c"));
        assert_eq!(reporter.errors(), 2);
        assert_eq!(reporter.warnings(), 1);
        reporter.reset();
        assert_eq!(reporter.errors(), 0);
        assert_eq!(reporter.warnings(), 0);
    }
}
