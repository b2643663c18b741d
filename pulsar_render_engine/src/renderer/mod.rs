/// Renderer module - frame lifecycle, buffers, commands and backend traits

// Module declarations
pub mod backend;
pub mod buffer;
pub mod command;
pub mod frame_data;
pub mod render_system;
pub mod vertex_cache;

#[cfg(test)]
pub mod mock_backend;

// Re-export everything from backend.rs
pub use backend::*;

// Re-export from other modules
pub use buffer::*;
pub use command::*;
pub use frame_data::*;
pub use render_system::*;
pub use vertex_cache::*;
