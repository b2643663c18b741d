//! Unit tests for the logging module

use crate::log::{LogEntry, LogSeverity, Logger, DefaultLogger};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

// ============================================================================
// SEVERITY ORDERING
// ============================================================================

#[test]
fn test_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

// ============================================================================
// CUSTOM LOGGER
// ============================================================================

/// Logger that captures entries for inspection
struct CapturingLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CapturingLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[test]
fn test_custom_logger_receives_entries() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let logger = CapturingLogger {
        entries: entries.clone(),
    };

    logger.log(&LogEntry {
        severity: LogSeverity::Warn,
        timestamp: SystemTime::now(),
        source: "pulsar::test".to_string(),
        message: "frame arena at 90% capacity".to_string(),
        file: None,
        line: None,
    });

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Warn);
    assert_eq!(captured[0].source, "pulsar::test");
    assert!(captured[0].file.is_none());
}

#[test]
fn test_error_entry_carries_file_and_line() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let logger = CapturingLogger {
        entries: entries.clone(),
    };

    logger.log(&LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "pulsar::Buffer".to_string(),
        message: "update overrun".to_string(),
        file: Some("buffer.rs"),
        line: Some(42),
    });

    let captured = entries.lock().unwrap();
    assert_eq!(captured[0].file, Some("buffer.rs"));
    assert_eq!(captured[0].line, Some(42));
}

// ============================================================================
// DEFAULT LOGGER
// ============================================================================

#[test]
fn test_default_logger_does_not_panic() {
    // Exercises both output paths (with and without file:line)
    DefaultLogger.log(&LogEntry {
        severity: LogSeverity::Info,
        timestamp: SystemTime::now(),
        source: "pulsar::test".to_string(),
        message: "plain".to_string(),
        file: None,
        line: None,
    });
    DefaultLogger.log(&LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "pulsar::test".to_string(),
        message: "detailed".to_string(),
        file: Some("log_tests.rs"),
        line: Some(1),
    });
}
