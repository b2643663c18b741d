//! Error types for the Pulsar render engine
//!
//! This module defines the error types used throughout the engine,
//! covering backend failures, GPU memory exhaustion and initialization.
//!
//! Fatal conditions (caller bugs, driver incapability) do not go through
//! these types; they abort through the `engine_fatal!` macro instead.

use std::fmt;

/// Result type for Pulsar engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pulsar engine errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (buffer, handle, command list)
    InvalidResource(String),

    /// Initialization failed (backend, swapchain, subsystems)
    InitializationFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
