/*!
# Pulsar Render Engine

Core types and traits for the Pulsar frame-pipelined rendering engine.

This crate provides the platform-agnostic frame lifecycle: typed GPU buffer
objects, a frame-based vertex cache, per-frame command lists and the
double-buffered swap protocol that lets the CPU front end build one frame
while the GPU renders the previous one. Backend implementations (Vulkan)
live in separate crates and plug in through the `RenderBackend` trait.

## Architecture

- **RenderSystem**: Owns the frame slots and the swap/execute handoff
- **BufferObject**: Typed GPU buffer handle (vertex/index/uniform/joint)
- **VertexCache**: Frame-based geometry allocator with packed handles
- **FrameData**: Per-frame transient arena and the open command list
- **RenderBackend**: Trait a backend implements to execute command lists

Backend implementations provide concrete allocation and submission over
these traits.
*/

// Internal modules
mod error;
// pub so the engine_* macros can reach it from backend crates
#[doc(hidden)]
pub mod engine;
pub mod log;
pub mod renderer;

// Main pulsar namespace module
pub mod pulsar {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton
    pub use crate::engine::Engine;

    // Frame lifecycle owner
    pub use crate::renderer::RenderSystem;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
        // Note: engine_* macros are NOT re-exported here - they are internal only
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::renderer::*;
    }
}

// Re-export math library at crate root
pub use glam;
