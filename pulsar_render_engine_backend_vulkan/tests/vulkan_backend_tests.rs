//! Integration tests for the VulkanBackend
//!
//! These tests verify that VulkanBackend correctly implements the
//! RenderBackend and BufferAllocator traits against a real device.
//! All tests require a GPU and a display, and are marked with #[ignore].
//!
//! Run with: cargo test --test vulkan_backend_tests -- --ignored

use pulsar_render_engine::pulsar::render::{
    BufferAllocator, BufferKind, BufferUsage, CommandList, DrawSurf, RenderBackend, RenderCommand,
    RenderConfig, ScreenRect, StateBits, VertCacheHandle, VertexCache, ViewDef, NUM_FRAME_DATA,
};
use pulsar_render_engine::pulsar::RenderSystem;
use pulsar_render_engine_backend_vulkan::VulkanBackend;
use winit::event_loop::EventLoop;
use winit::window::Window;

/// Helper to create a hidden test window for Vulkan
#[allow(deprecated)]
fn create_test_window() -> (Window, EventLoop<()>) {
    let event_loop = EventLoop::new().unwrap();
    let window_attrs = Window::default_attributes()
        .with_title("Pulsar Vulkan Backend Test")
        .with_inner_size(winit::dpi::LogicalSize::new(800, 600))
        .with_visible(false); // Hidden window for tests
    let window = event_loop.create_window(window_attrs).unwrap();
    (window, event_loop)
}

fn test_config() -> RenderConfig {
    RenderConfig {
        app_name: "Pulsar Vulkan Test".to_string(),
        ..RenderConfig::default()
    }
}

// ============================================================================
// BACKEND LIFECYCLE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_init_and_shutdown() {
    let (window, _event_loop) = create_test_window();
    let mut backend = VulkanBackend::new(&window, test_config()).unwrap();
    backend.shutdown().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_shutdown_is_idempotent() {
    let (window, _event_loop) = create_test_window();
    let mut backend = VulkanBackend::new(&window, test_config()).unwrap();
    backend.shutdown().unwrap();
    backend.shutdown().unwrap();
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_allocate_dynamic_buffer() {
    let (window, _event_loop) = create_test_window();
    let backend = VulkanBackend::new(&window, test_config()).unwrap();

    let allocation = backend
        .allocate(BufferKind::Vertex, BufferUsage::Dynamic, 4096)
        .unwrap();

    // Dynamic allocations are persistently mapped
    let ptr = allocation.mapped_ptr(0).unwrap();
    assert!(!ptr.as_ptr().is_null());

    let data = vec![0xA5u8; 256];
    allocation.write(128, &data).unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_allocate_static_buffer() {
    let (window, _event_loop) = create_test_window();
    let backend = VulkanBackend::new(&window, test_config()).unwrap();

    let allocation = backend
        .allocate(BufferKind::Index, BufferUsage::Static, 4096)
        .unwrap();

    // Static allocations upload through the staging ring
    let data = vec![0x3Cu8; 1024];
    allocation.write(0, &data).unwrap();

    // Static memory is device-local; no host mapping exists
    assert!(allocation.mapped_ptr(0).is_err());
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_buffer_write_out_of_bounds() {
    let (window, _event_loop) = create_test_window();
    let backend = VulkanBackend::new(&window, test_config()).unwrap();

    let allocation = backend
        .allocate(BufferKind::Vertex, BufferUsage::Dynamic, 64)
        .unwrap();

    let data = vec![0u8; 128];
    assert!(allocation.write(0, &data).is_err());
}

// ============================================================================
// FRAME LOOP TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_empty_frame_loop() {
    let (window, _event_loop) = create_test_window();
    let mut backend = VulkanBackend::new(&window, test_config()).unwrap();

    // With no recorded frame, the first swap returns immediately
    backend.blocking_swap_buffers().unwrap();

    let cmds = CommandList::new();
    let vertex_cache = VertexCache::new();
    for _ in 0..4 {
        backend.execute_backend_commands(&cmds, &vertex_cache).unwrap();
        backend.blocking_swap_buffers().unwrap();
    }
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_draw_view_frames() {
    let (window, _event_loop) = create_test_window();
    let mut backend = VulkanBackend::new(&window, test_config()).unwrap();

    let viewport = ScreenRect::new(0, 0, 799, 599);
    let vertex_cache = VertexCache::new();
    for _ in 0..NUM_FRAME_DATA + 1 {
        let mut cmds = CommandList::new();
        let view = ViewDef::new_2d(viewport);
        cmds.push(RenderCommand::DrawView {
            view: Box::new(view),
            gui_only: true,
        });

        backend.execute_backend_commands(&cmds, &vertex_cache).unwrap();
        backend.blocking_swap_buffers().unwrap();
    }

    // The GPU timestamps of a completed frame become visible once its
    // slot comes around again
    let stats = backend.stats();
    assert!(stats.total_micro_sec > 0);
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_stale_cache_handles_are_skipped() {
    let (window, _event_loop) = create_test_window();
    let mut backend = VulkanBackend::new(&window, test_config()).unwrap();

    let mut vertex_cache = VertexCache::new();
    vertex_cache.init(&backend).unwrap();

    let vertex_handle = vertex_cache.alloc_vertex(&[1u8; 64]).unwrap();
    let index_handle = vertex_cache.alloc_index(&[2u8; 32]).unwrap();
    vertex_cache.begin_back_end();

    let mut view = ViewDef::new_2d(ScreenRect::new(0, 0, 799, 599));
    view.draw_surfs.push(DrawSurf {
        vertex_cache: vertex_handle,
        index_cache: index_handle,
        joint_cache: VertCacheHandle::UNSET,
        num_indexes: 16,
        state_bits: StateBits::empty(),
        sort: 0.0,
    });
    let mut cmds = CommandList::new();
    cmds.push(RenderCommand::DrawView {
        view: Box::new(view),
        gui_only: true,
    });

    // handles from the frame just closed resolve and bind
    backend.execute_backend_commands(&cmds, &vertex_cache).unwrap();
    assert_eq!(backend.stats().draw_calls, 1);
    backend.blocking_swap_buffers().unwrap();

    // after one more rotation the same handles are stale and the surf
    // must be dropped, not drawn from recycled memory
    vertex_cache.begin_back_end();
    backend.execute_backend_commands(&cmds, &vertex_cache).unwrap();
    assert_eq!(backend.stats().draw_calls, 0);
    backend.blocking_swap_buffers().unwrap();

    vertex_cache.shutdown();
    backend.shutdown().unwrap();
}

// ============================================================================
// FULL RENDER SYSTEM TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_render_system_frame_cycle() {
    let (window, _event_loop) = create_test_window();
    let config = test_config();
    let backend = VulkanBackend::new(&window, config.clone()).unwrap();
    let mut render_system = RenderSystem::new(Box::new(backend), config);
    render_system.init().unwrap();

    let viewport = ScreenRect::new(0, 0, 799, 599);
    for _ in 0..3 {
        let vertex_data = vec![0u8; 32 * 4];
        let handle = render_system.alloc_vertex(&vertex_data).unwrap();
        assert!(handle.is_set());

        render_system.add_draw_view_cmd(ViewDef::new_2d(viewport), true);

        let (cmds, _timing) = render_system.swap_command_buffers().unwrap();
        render_system.render_command_buffers(&cmds).unwrap();
    }

    render_system.shutdown().unwrap();
}
