//! Unit tests for log.rs
//!
//! Tests LogSeverity ordering, DefaultLogger output paths and the
//! error-producing macros (engine_err!, engine_bail!, engine_warn_err!).

use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
use crate::ember3d::{Engine, Error, Result};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

// ============================================================================
// HELPERS
// ============================================================================

struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn capture() -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(CaptureLogger { entries: entries.clone() });
    entries
}

fn entry(severity: LogSeverity, file: Option<&'static str>, line: Option<u32>) -> LogEntry {
    LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source: "ember3d::Buffer".to_string(),
        message: format!("{:?} message", severity),
        file,
        line,
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_parse() {
    assert_eq!("trace".parse::<LogSeverity>(), Ok(LogSeverity::Trace));
    assert_eq!(" WARN ".parse::<LogSeverity>(), Ok(LogSeverity::Warn));
    assert_eq!("warning".parse::<LogSeverity>(), Ok(LogSeverity::Warn));
    assert_eq!("Error".parse::<LogSeverity>(), Ok(LogSeverity::Error));
    assert!("verbose".parse::<LogSeverity>().is_err());
}

#[test]
fn test_log_severity_display_has_no_padding() {
    assert_eq!(LogSeverity::Info.to_string(), "INFO");
    assert_eq!(LogSeverity::Info.label(), "INFO ");
    assert_eq!(LogSeverity::Error.to_string(), "ERROR");
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_default_logger_filters_below_minimum() {
    let logger = DefaultLogger::new(LogSeverity::Warn);
    assert_eq!(logger.min_severity(), LogSeverity::Warn);
    assert!(!logger.accepts(LogSeverity::Info));
    assert!(logger.accepts(LogSeverity::Warn));
    assert!(logger.accepts(LogSeverity::Error));
}

#[test]
fn test_default_logger_all_severities() {
    let logger = DefaultLogger::new(LogSeverity::Trace);
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        logger.log(&entry(severity, None, None));
        logger.log(&entry(severity, Some("buffer.rs"), Some(42)));
    }
}

#[test]
fn test_format_plain_appends_location_for_errors() {
    let plain = DefaultLogger::format_plain(&entry(LogSeverity::Error, Some("buffer.rs"), Some(42)));
    assert!(plain.contains("[ERROR] [ember3d::Buffer] Error message (buffer.rs:42)"));

    let plain = DefaultLogger::format_plain(&entry(LogSeverity::Info, None, None));
    assert!(plain.ends_with("[INFO ] [ember3d::Buffer] Info message"));
}

#[test]
fn test_logger_trait_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DefaultLogger>();
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
#[serial]
fn test_engine_err_logs_and_builds_backend_error() {
    let entries = capture();

    let err = crate::engine_err!("ember3d::vulkan", "vkCreateBuffer failed: {}", -2);

    match err {
        Error::BackendError(msg) => assert_eq!(msg, "vkCreateBuffer failed: -2"),
        other => panic!("unexpected error: {:?}", other),
    }
    let logged = entries.lock().unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].severity, LogSeverity::Error);
    assert_eq!(logged[0].source, "ember3d::vulkan");
    assert!(logged[0].file.is_some());
    assert!(logged[0].line.is_some());
    drop(logged);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_bail_returns_early() {
    let entries = capture();

    fn checked(stride: u32) -> Result<u32> {
        if stride == 0 {
            crate::engine_bail!("ember3d::Buffer", "stride is zero");
        }
        Ok(stride)
    }

    assert_eq!(checked(16).unwrap(), 16);
    assert!(checked(0).is_err());
    assert_eq!(entries.lock().unwrap().len(), 1);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_warn_err_logs_warning_without_location() {
    let entries = capture();

    fn soft() -> Result<()> {
        crate::engine_bail_warn!("ember3d::ShaderRegistry", "reload skipped for {}", "emit.hlsl");
    }

    assert!(soft().is_err());
    let logged = entries.lock().unwrap();
    assert_eq!(logged[0].severity, LogSeverity::Warn);
    assert!(logged[0].file.is_none());
    assert_eq!(logged[0].message, "reload skipped for emit.hlsl");
    drop(logged);
    Engine::reset_logger();
}
