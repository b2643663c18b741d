/// Render command list - frame-boundary handoff between front end and back end
///
/// The front end appends commands to the open list while the back end replays
/// the closed list from the previous frame. Commands are a closed sum type,
/// so the back end dispatch is exhaustive at compile time rather than failing
/// at run time on an unknown command id.

use glam::{Mat4, Vec3};

use crate::renderer::vertex_cache::VertCacheHandle;

// ============================================================================
// Screen rect
// ============================================================================

/// Inclusive pixel rectangle; x2/y2 are the last covered pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl ScreenRect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width in pixels; zero when degenerate
    pub fn width(&self) -> i32 {
        (self.x2 - self.x1 + 1).max(0)
    }

    /// Height in pixels; zero when degenerate
    pub fn height(&self) -> i32 {
        (self.y2 - self.y1 + 1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.x1 > self.x2 || self.y1 > self.y2
    }
}

// ============================================================================
// Draw state
// ============================================================================

bitflags::bitflags! {
    /// Fixed-function state for one draw surface
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateBits: u64 {
        /// Disable red channel writes
        const RED_MASK      = 1 << 0;
        /// Disable green channel writes
        const GREEN_MASK    = 1 << 1;
        /// Disable blue channel writes
        const BLUE_MASK     = 1 << 2;
        /// Disable alpha channel writes
        const ALPHA_MASK    = 1 << 3;
        /// Disable depth writes
        const DEPTH_MASK    = 1 << 4;
        /// Additive blending (one, one)
        const BLEND_ADD     = 1 << 5;
        /// Alpha blending (src alpha, one minus src alpha)
        const BLEND_ALPHA   = 1 << 6;
        /// Pass depth test only on equal depth
        const DEPTH_EQUAL   = 1 << 7;
        /// Always pass the depth test
        const DEPTH_ALWAYS  = 1 << 8;
        /// Enable polygon offset
        const POLYGON_OFFSET = 1 << 9;
        /// Draw back faces instead of front faces
        const BACK_SIDED    = 1 << 10;
        /// Draw both sides
        const TWO_SIDED     = 1 << 11;
    }
}

/// One surface ready for back-end submission
///
/// Geometry lives in the vertex cache; the handles keep the frame number
/// they were allocated in so the back end can reject stale dynamic data.
#[derive(Debug, Clone, Copy)]
pub struct DrawSurf {
    pub vertex_cache: VertCacheHandle,
    pub index_cache: VertCacheHandle,
    /// Unset handle for non-skinned surfaces
    pub joint_cache: VertCacheHandle,
    pub num_indexes: u32,
    pub state_bits: StateBits,
    /// Depth sort key, back to front for translucent surfaces
    pub sort: f32,
}

/// Everything the back end needs to render one view
///
/// A single scene may produce multiple views when mirrors, portals or
/// dynamic textures are present.
#[derive(Debug, Clone)]
pub struct ViewDef {
    pub view_origin: Vec3,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub viewport: ScreenRect,
    /// Clip rectangle within the viewport
    pub scissor: ScreenRect,
    /// Orthographic 2D view (menus, HUD) rather than a 3D scene
    pub is_2d_gui: bool,
    pub draw_surfs: Vec<DrawSurf>,
}

impl ViewDef {
    pub fn new_2d(viewport: ScreenRect) -> Self {
        Self {
            view_origin: Vec3::ZERO,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::orthographic_rh(
                0.0,
                viewport.width() as f32,
                viewport.height() as f32,
                0.0,
                -1.0,
                1.0,
            ),
            viewport,
            scissor: viewport,
            is_2d_gui: true,
            draw_surfs: Vec::new(),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Read back the current render target into a texture
#[derive(Debug, Clone, Copy)]
pub struct CopyRenderParams {
    pub x: i32,
    pub y: i32,
    pub image_width: i32,
    pub image_height: i32,
    /// Destination cube map face, or None for a 2D target
    pub cube_face: Option<u8>,
    pub clear_color_after_copy: bool,
}

/// Output buffer selection for subsequent draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetBuffer {
    /// The back buffer, presented at the next swap
    #[default]
    Back,
    /// The currently displayed buffer, for single-buffered debugging
    Front,
}

/// One back-end command
#[derive(Debug, Clone)]
pub enum RenderCommand {
    /// Sentinel; the list always opens with one so it is never empty
    Nop,
    /// Direct subsequent draws at `target`
    SetTarget(TargetBuffer),
    /// Render a view; `gui_only` views skip the 3D passes
    DrawView { view: Box<ViewDef>, gui_only: bool },
    /// Copy the framebuffer into a texture
    CopyRender(CopyRenderParams),
    /// Full-screen post processing after all views
    PostProcess { view: Box<ViewDef> },
}

impl RenderCommand {
    /// True for the commands that actually put pixels on screen
    pub fn is_draw_view(&self) -> bool {
        matches!(self, RenderCommand::DrawView { .. })
    }
}

/// Closed, ordered list of commands for one frame
#[derive(Debug, Clone)]
pub struct CommandList {
    commands: Vec<RenderCommand>,
}

impl CommandList {
    /// Start a new list with the sentinel already in place
    pub fn new() -> Self {
        Self {
            commands: vec![RenderCommand::Nop],
        }
    }

    pub fn push(&mut self, cmd: RenderCommand) {
        self.commands.push(cmd);
    }

    /// Number of commands, sentinel included
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether the list contains any draw view command
    ///
    /// A frame with no view must not be swapped to the screen; the caller
    /// skips back-end execution entirely when this is false.
    pub fn has_draw_view(&self) -> bool {
        self.commands.iter().any(RenderCommand::is_draw_view)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RenderCommand> {
        self.commands.iter()
    }
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a RenderCommand;
    type IntoIter = std::slice::Iter<'a, RenderCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

// ============================================================================
// Frame timing
// ============================================================================

/// Timing results for the frame that just finished on the GPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTiming {
    /// CPU time spent building commands, in microseconds
    pub front_end_micro_sec: u64,
    /// CPU time spent in back-end submission, in microseconds
    pub back_end_micro_sec: u64,
    /// CPU time spent in shadow passes, in microseconds
    pub shadow_micro_sec: u64,
    /// GPU time between the frame's timestamp queries, in microseconds
    pub gpu_micro_sec: u64,
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
