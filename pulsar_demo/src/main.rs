//! Pulsar demo application
//!
//! Opens a window, initializes the Vulkan backend and drives the
//! two-frame pipeline: each redraw builds a 2D view for the NEXT frame,
//! then swap_command_buffers hands the PREVIOUS frame's commands to the
//! back end while the front end starts over.

use glam::Vec2;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use pulsar_render_engine::engine_info;
use pulsar_render_engine::pulsar::render::{
    DrawSurf, RenderConfig, ScreenRect, StateBits, VertCacheHandle, ViewDef,
};
use pulsar_render_engine::pulsar::RenderSystem;
use pulsar_render_engine_backend_vulkan::VulkanBackend;

const LOG_SOURCE: &str = "pulsar_demo";

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

/// Simple 2D vertex: position and texcoord
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DemoVertex {
    position: Vec2,
    texcoord: Vec2,
}

fn quad_vertices(center: Vec2, half_size: f32) -> [DemoVertex; 4] {
    [
        DemoVertex {
            position: center + Vec2::new(-half_size, -half_size),
            texcoord: Vec2::new(0.0, 0.0),
        },
        DemoVertex {
            position: center + Vec2::new(half_size, -half_size),
            texcoord: Vec2::new(1.0, 0.0),
        },
        DemoVertex {
            position: center + Vec2::new(half_size, half_size),
            texcoord: Vec2::new(1.0, 1.0),
        },
        DemoVertex {
            position: center + Vec2::new(-half_size, half_size),
            texcoord: Vec2::new(0.0, 1.0),
        },
    ]
}

const QUAD_INDEXES: [u16; 6] = [0, 1, 2, 0, 2, 3];

struct DemoApp {
    window: Option<Window>,
    render_system: Option<RenderSystem>,
    frame: u64,
}

impl DemoApp {
    fn new() -> Self {
        Self {
            window: None,
            render_system: None,
            frame: 0,
        }
    }

    /// Build one frame's commands and run the previous frame's
    fn render_frame(&mut self) {
        let Some(render_system) = self.render_system.as_mut() else {
            return;
        };

        // a quad orbiting the window center, re-uploaded every frame
        // through the per-frame geometry arenas
        let t = self.frame as f32 * 0.02;
        let center = Vec2::new(
            WINDOW_WIDTH as f32 * 0.5 + t.cos() * 200.0,
            WINDOW_HEIGHT as f32 * 0.5 + t.sin() * 200.0,
        );
        let vertices = quad_vertices(center, 64.0);

        let vertex_cache = render_system
            .alloc_vertex(bytemuck::cast_slice(&vertices))
            .expect("vertex arena overflow");
        let index_cache = render_system
            .alloc_index(bytemuck::cast_slice(&QUAD_INDEXES))
            .expect("index arena overflow");

        let viewport = ScreenRect::new(0, 0, WINDOW_WIDTH as i32 - 1, WINDOW_HEIGHT as i32 - 1);
        let mut view = ViewDef::new_2d(viewport);
        view.draw_surfs.push(DrawSurf {
            vertex_cache,
            index_cache,
            joint_cache: VertCacheHandle::UNSET,
            num_indexes: QUAD_INDEXES.len() as u32,
            state_bits: StateBits::BLEND_ALPHA,
            sort: 0.0,
        });
        render_system.add_draw_view_cmd(view, true);

        // hand the previous frame to the back end and open the next one
        let (cmds, timing) = render_system
            .swap_command_buffers()
            .expect("swap_command_buffers failed");
        render_system
            .render_command_buffers(&cmds)
            .expect("render_command_buffers failed");

        self.frame += 1;
        if self.frame % 600 == 0 {
            engine_info!(
                LOG_SOURCE,
                "frame {}: front {}us back {}us gpu {}us",
                self.frame,
                timing.front_end_micro_sec,
                timing.back_end_micro_sec,
                timing.gpu_micro_sec
            );
        }
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title("Pulsar Demo")
            .with_inner_size(winit::dpi::PhysicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => window,
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        let config = RenderConfig {
            app_name: "Pulsar Demo".to_string(),
            ..RenderConfig::default()
        };

        let backend = match VulkanBackend::new(&window, config.clone()) {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("Failed to create Vulkan backend: {e}");
                event_loop.exit();
                return;
            }
        };

        let mut render_system = RenderSystem::new(Box::new(backend), config);
        if let Err(e) = render_system.init() {
            eprintln!("Failed to initialize render system: {e}");
            event_loop.exit();
            return;
        }

        self.window = Some(window);
        self.render_system = Some(render_system);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(mut render_system) = self.render_system.take() {
                    if let Err(e) = render_system.shutdown() {
                        eprintln!("Shutdown failed: {e}");
                    }
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(render_system) = self.render_system.as_mut() {
                    render_system.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.render_frame();
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DemoApp::new();
    event_loop.run_app(&mut app)
}
