/// RenderBackend trait - the seam between the frame-lifecycle owner and GPU submission
///
/// Exactly one backend is alive per RenderSystem. The two concrete
/// implementations are the Vulkan backend (pulsar_render_engine_backend_vulkan)
/// and the MockBackend used by the protocol tests.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::Result;
use crate::renderer::vertex_cache::VertexCache;
use crate::renderer::CommandList;

/// Number of in-flight frame slots (the frame-lag)
///
/// The CPU may run this many frames ahead of the GPU before
/// swap_command_buffers blocks on the oldest slot's fence.
pub const NUM_FRAME_DATA: usize = 2;

/// What a buffer handle will be bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform/constant buffer
    Uniform,
    /// Skinning-matrix buffer (bound as a uniform buffer range)
    Joint,
}

/// Buffer usage class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// GPU read-only after upload; writes go through the staging ring
    Static,
    /// CPU-writable every frame through a persistent mapping
    Dynamic,
}

/// Mapping mode for BufferObject::map_buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMapType {
    /// Map for reading
    Read,
    /// Map for writing
    Write,
}

/// Anti-aliasing sample counts exposed in the configuration surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AntiAliasing {
    /// No multisampling
    #[default]
    None,
    /// 2x MSAA
    Msaa2X,
    /// 4x MSAA
    Msaa4X,
    /// 8x MSAA
    Msaa8X,
}

impl AntiAliasing {
    /// Sample count for this setting
    pub fn sample_count(self) -> u32 {
        match self {
            AntiAliasing::None => 1,
            AntiAliasing::Msaa2X => 2,
            AntiAliasing::Msaa4X => 4,
            AntiAliasing::Msaa8X => 8,
        }
    }
}

/// Renderer configuration, read at backend init and on resize
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Application name
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Multisample setting for the default render targets
    pub anti_aliasing: AntiAliasing,
    /// Wait for vertical sync when presenting (FIFO vs IMMEDIATE/MAILBOX)
    pub vsync: bool,
    /// Prefer an sRGB swapchain surface format when available
    pub prefer_srgb: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Pulsar Application".to_string(),
            app_version: (1, 0, 0),
            anti_aliasing: AntiAliasing::None,
            vsync: true,
            prefer_srgb: true,
        }
    }
}

/// Per-frame backend counters, harvested by swap_command_buffers
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendStats {
    /// Number of indexed draw calls issued this frame
    pub draw_calls: u32,
    /// Number of indexes submitted this frame
    pub indexes: u32,
    /// CPU time spent in execute_backend_commands (microseconds)
    pub total_micro_sec: u64,
    /// GPU time between the frame's opening and closing timestamps
    /// (microseconds), read back from the query pool of the completed frame
    pub gpu_micro_sec: u64,
}

/// Backing storage for one BufferObject, owned by a backend
///
/// The backend chooses the storage strategy from the usage class it was
/// allocated with: Dynamic allocations are persistently mapped host-visible
/// memory, Static allocations are device-local and written through the
/// staging ring.
pub trait BufferAllocation: Send + Sync {
    /// Copy `data` into the allocation at `offset` bytes
    ///
    /// Dynamic: a plain synchronous copy through the persistent mapping
    /// (the frame-lag discipline guarantees the GPU is not reading it).
    /// Static: staged through the upload ring plus a recorded device copy
    /// ordered before the buffer is read this frame.
    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// CPU-visible pointer at `offset` bytes into the allocation
    ///
    /// Only valid for Dynamic allocations; Static allocations have no
    /// host mapping and return an error.
    fn mapped_ptr(&self, offset: usize) -> Result<NonNull<u8>>;

    /// Retire the underlying GPU resource
    ///
    /// Destruction is deferred to the backend's per-frame-slot garbage list
    /// and only happens once that slot's fence has proven the GPU is done.
    fn free(&self);

    /// Downcast support for backend draw dispatch
    fn as_any(&self) -> &dyn Any;
}

/// Buffer allocation factory, implemented by every RenderBackend
pub trait BufferAllocator: Send + Sync {
    /// Allocate `num_bytes` of backing storage for a buffer
    ///
    /// # Arguments
    ///
    /// * `kind` - How the buffer will be bound
    /// * `usage` - Static (staged upload) or Dynamic (persistently mapped)
    /// * `num_bytes` - Allocation size, already 16-byte aligned by the caller
    fn allocate(
        &self,
        kind: BufferKind,
        usage: BufferUsage,
        num_bytes: usize,
    ) -> Result<Arc<dyn BufferAllocation>>;
}

/// Backend-specific GPU submission interface
///
/// Owns the device/queue/swapchain and the NUM_FRAME_DATA synchronization
/// objects. The shared frame-lifecycle logic (FrameData, the command-list
/// protocol) lives in RenderSystem and is not duplicated per backend.
pub trait RenderBackend: BufferAllocator {
    /// Translate a closed command list into submitted GPU work
    ///
    /// Walks the list in order and dispatches by command kind; begins and
    /// ends the frame (image acquisition, render pass, submit) around the
    /// dispatch loop. Draw surfaces carry packed cache handles, resolved
    /// against `vertex_cache`; handles from any frame but the one being
    /// drawn are stale and their surfaces are skipped.
    fn execute_backend_commands(
        &mut self,
        cmds: &CommandList,
        vertex_cache: &VertexCache,
    ) -> Result<()>;

    /// Wait for the oldest in-flight frame and present the last one
    ///
    /// Blocks on the fence of the frame slot about to be reused, presents
    /// the recorded frame, and advances the backend's slot index. This is
    /// the only blocking wait in the core and is what makes the frame-lag
    /// guarantee correct.
    fn blocking_swap_buffers(&mut self) -> Result<()>;

    /// React to configuration changes that require re-initialization
    fn check_cvars(&mut self, config: &RenderConfig) -> Result<()>;

    /// Notify the backend that the window surface changed size
    fn resize(&mut self, width: u32, height: u32);

    /// Wait for all GPU operations to complete
    fn wait_idle(&self) -> Result<()>;

    /// Idle the device and drain all deferred teardown work
    ///
    /// Called once before the backend is dropped.
    fn shutdown(&mut self) -> Result<()>;

    /// Counters for the most recently completed frame
    fn stats(&self) -> BackendStats;
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
