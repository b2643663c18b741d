//! Unit tests for the Engine logging host

use crate::engine::Engine;
use crate::log::LogSeverity;

#[test]
fn test_log_with_default_logger() {
    // Uses the lazily-initialized DefaultLogger; must not panic
    Engine::log(LogSeverity::Info, "pulsar::engine_tests", "hello".to_string());
}

#[test]
fn test_log_detailed_with_default_logger() {
    Engine::log_detailed(
        LogSeverity::Error,
        "pulsar::engine_tests",
        "detailed entry".to_string(),
        file!(),
        line!(),
    );
}

#[test]
fn test_macros_compile_and_run() {
    crate::engine_trace!("pulsar::engine_tests", "trace {}", 1);
    crate::engine_debug!("pulsar::engine_tests", "debug {}", 2);
    crate::engine_info!("pulsar::engine_tests", "info {}", 3);
    crate::engine_warn!("pulsar::engine_tests", "warn {}", 4);
    crate::engine_error!("pulsar::engine_tests", "error {}", 5);
}

#[test]
#[should_panic(expected = "fatal condition")]
fn test_engine_fatal_panics() {
    crate::engine_fatal!("pulsar::engine_tests", "fatal condition {}", 6);
}
