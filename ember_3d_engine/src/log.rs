//! Engine logging: the `Logger` seam, the console logger and the `engine_*!` macros
//!
//! Every message carries a source string naming the subsystem, such as
//! `"ember3d::ParticleRenderer"` or `"ember3d::vulkan"`. Errors also carry
//! the file and line that produced them.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use chrono::{DateTime, Local};
use colored::*;

/// Receiver of engine log entries
///
/// Install one with `Engine::set_logger` to route messages to a file, an
/// in-game console or a test buffer.
///
/// ```no_run
/// use ember_3d_engine::ember3d::log::{Logger, LogEntry, LogSeverity};
///
/// struct ErrorsOnly;
///
/// impl Logger for ErrorsOnly {
///     fn log(&self, entry: &LogEntry) {
///         if entry.severity == LogSeverity::Error {
///             eprintln!("{}: {}", entry.source, entry.message);
///         }
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub timestamp: SystemTime,
    /// Subsystem, e.g. "ember3d::Buffer"
    pub source: String,
    pub message: String,
    /// Set for errors only
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    /// Fixed-width label used by the console logger
    pub fn label(self) -> &'static str {
        match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO ",
            LogSeverity::Warn => "WARN ",
            LogSeverity::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().trim_end())
    }
}

impl FromStr for LogSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogSeverity::Trace),
            "debug" => Ok(LogSeverity::Debug),
            "info" => Ok(LogSeverity::Info),
            "warn" | "warning" => Ok(LogSeverity::Warn),
            "error" => Ok(LogSeverity::Error),
            other => Err(format!("unknown log severity '{}'", other)),
        }
    }
}

/// Variable read by `DefaultLogger::from_env`
pub const LOG_LEVEL_VAR: &str = "EMBER_LOG";

/// Colored console logger
///
/// Prints `[timestamp] [SEVERITY] [source] message`, followed by
/// `(file:line)` for errors. Warnings and errors go to stderr.
#[derive(Debug, Clone, Copy)]
pub struct DefaultLogger {
    min_severity: LogSeverity,
}

impl DefaultLogger {
    pub fn new(min_severity: LogSeverity) -> Self {
        Self { min_severity }
    }

    /// Minimum severity from `$EMBER_LOG`, Trace when unset or invalid
    pub fn from_env() -> Self {
        let min_severity = std::env::var(LOG_LEVEL_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(LogSeverity::Trace);
        Self::new(min_severity)
    }

    pub fn min_severity(&self) -> LogSeverity {
        self.min_severity
    }

    pub fn accepts(&self, severity: LogSeverity) -> bool {
        severity >= self.min_severity
    }

    /// The uncolored line printed for `entry`
    pub fn format_plain(entry: &LogEntry) -> String {
        let mut line = format!(
            "[{}] [{}] [{}] {}",
            timestamp(entry.timestamp),
            entry.severity.label(),
            entry.source,
            entry.message
        );
        if let (Some(file), Some(number)) = (entry.file, entry.line) {
            line.push_str(&format!(" ({}:{})", file, number));
        }
        line
    }
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self::from_env()
    }
}

fn timestamp(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        if !self.accepts(entry.severity) {
            return;
        }
        let label = entry.severity.label();
        let severity = match entry.severity {
            LogSeverity::Trace => label.bright_black(),
            LogSeverity::Debug => label.cyan(),
            LogSeverity::Info => label.green(),
            LogSeverity::Warn => label.yellow(),
            LogSeverity::Error => label.red().bold(),
        };
        let location = match (entry.file, entry.line) {
            (Some(file), Some(line)) => format!(" ({}:{})", file, line).bright_black().to_string(),
            _ => String::new(),
        };
        let line = format!(
            "[{}] [{}] [{}] {}{}",
            timestamp(entry.timestamp),
            severity,
            entry.source.bright_blue(),
            entry.message,
            location
        );
        if entry.severity >= LogSeverity::Warn {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message
///
/// ```no_run
/// # let count = 3;
/// ember_3d_engine::engine_trace!("ember3d::CommandContext", "Binding {} read-write views", count);
/// ```
#[macro_export]
macro_rules! engine_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::ember3d::Engine::log($crate::ember3d::log::LogSeverity::Trace, $source, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! engine_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::ember3d::Engine::log($crate::ember3d::log::LogSeverity::Debug, $source, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! engine_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::ember3d::Engine::log($crate::ember3d::log::LogSeverity::Info, $source, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! engine_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::ember3d::Engine::log($crate::ember3d::log::LogSeverity::Warn, $source, format!($($arg)*))
    };
}

/// Log an ERROR message with the caller's file and line
#[macro_export]
macro_rules! engine_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::ember3d::Engine::log_detailed(
            $crate::ember3d::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            file!(),
            line!(),
        )
    };
}

/// Log an ERROR and evaluate to `Error::BackendError` with the same text
///
/// ```no_run
/// # fn create() -> ember_3d_engine::ember3d::Result<()> {
/// # let code = -2;
/// Err(ember_3d_engine::engine_err!("ember3d::vulkan", "vkCreateBuffer failed: {}", code))
/// # }
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::ember3d::Engine::log_detailed(
            $crate::ember3d::log::LogSeverity::Error,
            $source,
            message.clone(),
            file!(),
            line!(),
        );
        $crate::ember3d::Error::BackendError(message)
    }};
}

/// `return Err(engine_err!(..))`
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

/// Log a WARN and evaluate to `Error::BackendError` with the same text
#[macro_export]
macro_rules! engine_warn_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::ember3d::Engine::log($crate::ember3d::log::LogSeverity::Warn, $source, message.clone());
        $crate::ember3d::Error::BackendError(message)
    }};
}

/// `return Err(engine_warn_err!(..))`
#[macro_export]
macro_rules! engine_bail_warn {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_warn_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
