/// Ember3D Engine - process-wide logger slot
///
/// Devices, registries and particle systems are owned by the application.
/// The logger behind the `engine_*!` macros is the one piece of global
/// state; it can be swapped at any time.

use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

fn logger_slot() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::from_env())))
}

fn dispatch(entry: LogEntry) {
    // A poisoned slot drops the entry rather than panicking inside a log call
    if let Ok(logger) = logger_slot().read() {
        logger.log(&entry);
    }
}

/// Engine-level entry points
pub struct Engine;

impl Engine {
    /// Replace the logger used by every `engine_*!` macro
    ///
    /// ```no_run
    /// use ember_3d_engine::ember3d::Engine;
    /// use ember_3d_engine::ember3d::log::{DefaultLogger, LogSeverity};
    ///
    /// Engine::set_logger(DefaultLogger::new(LogSeverity::Warn));
    /// ```
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        if let Ok(mut slot) = logger_slot().write() {
            *slot = Box::new(logger);
        }
    }

    /// Go back to a `DefaultLogger` configured from the environment
    pub fn reset_logger() {
        Self::set_logger(DefaultLogger::from_env());
    }

    pub fn log(severity: LogSeverity, source: &str, message: String) {
        dispatch(LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: None,
            line: None,
        });
    }

    /// Like `log`, with the location of the call site attached
    pub fn log_detailed(severity: LogSeverity, source: &str, message: String, file: &'static str, line: u32) {
        dispatch(LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: Some(file),
            line: Some(line),
        });
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
