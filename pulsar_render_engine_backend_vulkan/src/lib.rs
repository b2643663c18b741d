/*!
# Pulsar Render Engine - Vulkan Backend

Vulkan implementation of the Pulsar render engine backend traits.

This crate implements `RenderBackend` and `BufferAllocator` from
pulsar_render_engine using the Ash library for Vulkan bindings and
gpu-allocator for memory management.

The backend owns the frame-in-flight protocol: per-slot command
buffers, fences, semaphores and timestamp queries, a staging ring for
static buffer uploads, and per-slot garbage lists for deferred buffer
destruction.
*/

// Vulkan implementation modules
mod vulkan;
mod vulkan_buffer;
mod vulkan_context;
mod vulkan_render_target;
mod vulkan_staging;
mod vulkan_swapchain;
mod debug;

pub use vulkan::VulkanBackend;
pub use vulkan_swapchain::VulkanSwapchain;

// Re-export debug utilities
pub use debug::{get_validation_stats, print_validation_stats_report, ValidationStats};
