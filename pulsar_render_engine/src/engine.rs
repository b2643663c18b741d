/// Pulsar Engine - logging host for the engine subsystems
///
/// The renderer itself is an explicit context object (RenderSystem) that the
/// application constructs and owns; only the logger lives in process-wide
/// storage so that the engine_* macros work from any module.

use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

// ===== INTERNAL STATE =====

/// Global logger (initialized with DefaultLogger on first use)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)))
}

// ===== PUBLIC API =====

/// Engine logging entry points
///
/// # Example
///
/// ```
/// use pulsar_render_engine::engine::Engine;
/// use pulsar_render_engine::log::LogSeverity;
///
/// Engine::log(LogSeverity::Info, "pulsar::Demo", "starting up".to_string());
/// ```
pub struct Engine;

impl Engine {
    /// Replace the global logger
    ///
    /// # Arguments
    ///
    /// * `new_logger` - Logger implementation that receives all subsequent entries
    pub fn set_logger(new_logger: Box<dyn Logger>) {
        if let Ok(mut guard) = logger().write() {
            *guard = new_logger;
        }
    }

    /// Log a message without file/line details
    ///
    /// Normally called through the engine_trace!/engine_debug!/engine_info!/
    /// engine_warn! macros rather than directly.
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        let entry = LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: None,
            line: None,
        };
        if let Ok(guard) = logger().read() {
            guard.log(&entry);
        }
    }

    /// Log a message with file/line details (ERROR severity path)
    ///
    /// Normally called through the engine_error! and engine_fatal! macros.
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        let entry = LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: Some(file),
            line: Some(line),
        };
        if let Ok(guard) = logger().read() {
            guard.log(&entry);
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
