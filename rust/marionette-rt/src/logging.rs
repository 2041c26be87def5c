//! Logging layer used by the evaluation context and the logging functions.

use std::fmt;

/// Log severities, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Err,
    Crit,
    Alert,
    Emerg,
}

impl Level {
    pub fn from_name(name: &str) -> Option<Level> {
        Some(match name {
            "debug" => Level::Debug,
            "info" => Level::Info,
            "notice" => Level::Notice,
            "warning" => Level::Warning,
            "err" => Level::Err,
            "alert" => Level::Alert,
            "emerg" => Level::Emerg,
            "crit" => Level::Crit,
            _ => return None,
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Err => "err",
            Level::Crit => "crit",
            Level::Alert => "alert",
            Level::Emerg => "emerg",
        })
    }
}

pub trait Logger: fmt::Debug {
    fn log(&mut self, level: Level, message: &str);
}

/// Writes colored log lines to standard error, filtered by a minimum level.
#[derive(Debug)]
pub struct ConsoleLogger {
    minimum: Level,
}

impl ConsoleLogger {
    pub fn new(minimum: Level) -> Self {
        Self { minimum }
    }
}

impl Logger for ConsoleLogger {
    fn log(&mut self, level: Level, message: &str) {
        if level < self.minimum {
            return;
        }
        let color = match level {
            Level::Debug => "\x1b[90m",
            Level::Info | Level::Notice => "\x1b[32m",
            Level::Warning => "\x1b[33m",
            _ => "\x1b[31m",
        };
        eprintln!("{color}{level}: {message}\x1b[0m");
    }
}

/// Captures log lines in memory; used by tests and catalog consumers.
#[derive(Debug, Default)]
pub struct CaptureLogger {
    pub entries: Vec<(Level, String)>,
}

impl CaptureLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Logger for CaptureLogger {
    fn log(&mut self, level: Level, message: &str) {
        self.entries.push((level, message.to_string()));
    }
}

/// A shared capture handle, letting callers keep reading entries after the
/// evaluation context takes ownership of the logger.
impl Logger for std::rc::Rc<std::cell::RefCell<CaptureLogger>> {
    fn log(&mut self, level: Level, message: &str) {
        self.borrow_mut().log(level, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Notice);
        assert!(Level::Warning < Level::Err);
        assert!(Level::Crit < Level::Emerg);
    }

    #[test]
    fn test_level_names_round_trip() {
        for level in [
            Level::Debug,
            Level::Info,
            Level::Notice,
            Level::Warning,
            Level::Err,
            Level::Alert,
            Level::Emerg,
            Level::Crit,
        ] {
            assert_eq!(Level::from_name(&level.to_string()), Some(level));
        }
    }
}
