/// Vulkan Debug Messenger - Handles validation layer messages with colored output
///
/// Installed when the configuration enables validation. Messages are
/// printed with severity coloring and counted, so a run can be checked
/// for validation cleanliness after the fact.

use ash::vk;
use colored::*;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Counters for validation traffic seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

/// Thread-safe validation statistics tracker
struct ValidationStatsTracker {
    errors: AtomicU32,
    warnings: AtomicU32,
    info: AtomicU32,
    verbose: AtomicU32,
}

static VALIDATION_STATS: ValidationStatsTracker = ValidationStatsTracker {
    errors: AtomicU32::new(0),
    warnings: AtomicU32::new(0),
    info: AtomicU32::new(0),
    verbose: AtomicU32::new(0),
};

/// Get current validation statistics
pub fn get_validation_stats() -> ValidationStats {
    ValidationStats {
        errors: VALIDATION_STATS.errors.load(Ordering::Relaxed),
        warnings: VALIDATION_STATS.warnings.load(Ordering::Relaxed),
        info: VALIDATION_STATS.info.load(Ordering::Relaxed),
        verbose: VALIDATION_STATS.verbose.load(Ordering::Relaxed),
    }
}

/// Reset the counters, typically at backend init
pub fn reset_validation_stats() {
    VALIDATION_STATS.errors.store(0, Ordering::Relaxed);
    VALIDATION_STATS.warnings.store(0, Ordering::Relaxed);
    VALIDATION_STATS.info.store(0, Ordering::Relaxed);
    VALIDATION_STATS.verbose.store(0, Ordering::Relaxed);
}

/// Print validation statistics report
pub fn print_validation_stats_report() {
    let stats = get_validation_stats();

    if stats.total() == 0 {
        println!("\n{}", "✓ No validation messages".green().bold());
        return;
    }

    println!("\n{}", "=== Validation Statistics Report ===".bright_blue().bold());
    if stats.errors > 0 {
        println!("  {} {}", "Errors:".red().bold(), stats.errors);
    }
    if stats.warnings > 0 {
        println!("  {} {}", "Warnings:".yellow().bold(), stats.warnings);
    }
    if stats.info > 0 {
        println!("  {} {}", "Info:".cyan(), stats.info);
    }
    if stats.verbose > 0 {
        println!("  {} {}", "Verbose:".bright_black(), stats.verbose);
    }
    println!("  {} {}", "Total:".white().bold(), stats.total());
    println!("{}\n", "====================================".bright_blue().bold());
}

/// Vulkan debug messenger callback
///
/// Called by the validation layers; formats messages with colors and
/// updates the statistics counters.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_name = if callback_data.p_message_id_name.is_null() {
        "Unknown"
    } else {
        CStr::from_ptr(callback_data.p_message_id_name)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };
    let message = if callback_data.p_message.is_null() {
        "No message"
    } else {
        CStr::from_ptr(callback_data.p_message)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };

    let severity_colored = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        VALIDATION_STATS.errors.fetch_add(1, Ordering::Relaxed);
        "ERROR".red().bold()
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        VALIDATION_STATS.warnings.fetch_add(1, Ordering::Relaxed);
        "WARNING".yellow().bold()
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        VALIDATION_STATS.info.fetch_add(1, Ordering::Relaxed);
        "INFO".cyan()
    } else {
        VALIDATION_STATS.verbose.fetch_add(1, Ordering::Relaxed);
        "VERBOSE".bright_black()
    };

    let type_str = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    };

    println!(
        "{} [{}] [{}] {}",
        severity_colored,
        type_str,
        message_id_name.bright_black(),
        message
    );

    vk::FALSE
}
