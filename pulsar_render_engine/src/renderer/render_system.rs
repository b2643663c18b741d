/// Render system - owns the frame lifecycle and the front/back handoff
///
/// The front end builds commands into the current frame slot while the back
/// end replays the previous frame's closed list. swap_command_buffers() is
/// the only synchronization point between the two: it blocks until the GPU
/// releases a slot, closes the open list, rotates the slots and returns the
/// closed list for execution.
///
/// Typical frame loop:
///
/// ```ignore
/// let (cmds, timing) = render_system.swap_command_buffers()?;
/// render_system.render_command_buffers(&cmds)?;   // previous frame
/// // ... build this frame's views and add_draw_view_cmd() ...
/// ```

use std::time::Instant;

use crate::error::Result;
use crate::renderer::frame_data::{FrameAllocKind, FrameData};
use crate::renderer::vertex_cache::VertexCache;
use crate::renderer::{
    BackendStats, CommandList, CopyRenderParams, FrameTiming, RenderBackend, RenderCommand,
    RenderConfig, TargetBuffer, ViewDef, NUM_FRAME_DATA,
};
use crate::{engine_debug, engine_info};

const LOG_SOURCE: &str = "pulsar::RenderSystem";

pub struct RenderSystem {
    backend: Box<dyn RenderBackend>,
    config: RenderConfig,
    frame_data: [FrameData; NUM_FRAME_DATA],
    /// Counts slot rotations; the open slot is smp_frame % NUM_FRAME_DATA
    smp_frame: u64,
    /// Completed frames; only swap_command_buffers advances this
    frame_count: u64,
    vertex_cache: VertexCache,
    initialized: bool,
    frame_start: Instant,
    /// Front-end time of the frame that was just closed
    closed_front_end_micro_sec: u64,
    num_views: u32,
}

impl RenderSystem {
    pub fn new(backend: Box<dyn RenderBackend>, config: RenderConfig) -> Self {
        Self {
            backend,
            config,
            frame_data: std::array::from_fn(|_| FrameData::new()),
            smp_frame: 0,
            frame_count: 0,
            vertex_cache: VertexCache::new(),
            initialized: false,
            frame_start: Instant::now(),
            closed_front_end_micro_sec: 0,
            num_views: 0,
        }
    }

    /// Allocate GPU-side caches and open the first frame
    pub fn init(&mut self) -> Result<()> {
        debug_assert!(!self.initialized);

        self.vertex_cache.init(self.backend.as_ref())?;

        for slot in &mut self.frame_data {
            slot.reset();
        }
        self.smp_frame = 0;
        self.frame_count = 0;
        self.frame_start = Instant::now();
        self.initialized = true;

        engine_info!(LOG_SOURCE, "render system initialized");
        Ok(())
    }

    /// Tear down in reverse of init; safe to call when never initialized
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.vertex_cache.shutdown();
        self.backend.shutdown()?;
        self.initialized = false;
        engine_info!(LOG_SOURCE, "render system shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Completed frame count; increments once per swap_command_buffers
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn vertex_cache(&self) -> &VertexCache {
        &self.vertex_cache
    }

    pub fn backend_stats(&self) -> BackendStats {
        self.backend.stats()
    }

    /// Views added to the open frame so far
    pub fn num_views(&self) -> u32 {
        self.num_views
    }

    /// Forward a window size change to the backend
    pub fn resize(&mut self, width: u32, height: u32) {
        self.backend.resize(width, height);
    }

    // ------------------------------------------------------------------
    // Front-end command generation
    // ------------------------------------------------------------------

    fn current_slot(&mut self) -> &mut FrameData {
        &mut self.frame_data[(self.smp_frame % NUM_FRAME_DATA as u64) as usize]
    }

    /// Frame-lifetime scratch memory for command generation
    pub fn frame_alloc(&mut self, bytes: usize, kind: FrameAllocKind) -> &mut [u8] {
        self.current_slot().frame_alloc(bytes, kind)
    }

    /// Append an arbitrary command to the open list
    pub fn add_command(&mut self, cmd: RenderCommand) {
        self.current_slot().add_command(cmd);
    }

    /// The main 3D rendering command; a single scene may add several views
    /// when mirrors, portals or dynamic textures are present
    pub fn add_draw_view_cmd(&mut self, view: ViewDef, gui_only: bool) {
        self.num_views += 1;
        self.add_command(RenderCommand::DrawView {
            view: Box::new(view),
            gui_only,
        });
    }

    /// Direct subsequent draws at the given output buffer
    pub fn add_set_target_cmd(&mut self, target: TargetBuffer) {
        self.add_command(RenderCommand::SetTarget(target));
    }

    /// Copy the render target into a texture after the current commands
    pub fn add_copy_render_cmd(&mut self, params: CopyRenderParams) {
        self.add_command(RenderCommand::CopyRender(params));
    }

    /// Post process after all views have been rendered
    pub fn add_post_process_cmd(&mut self, view: ViewDef) {
        self.add_command(RenderCommand::PostProcess {
            view: Box::new(view),
        });
    }

    /// Commands appended to the open list so far
    pub fn current_commands(&self) -> &CommandList {
        self.frame_data[(self.smp_frame % NUM_FRAME_DATA as u64) as usize].commands()
    }

    // ------------------------------------------------------------------
    // Frame boundary
    // ------------------------------------------------------------------

    /// Close the frame and return the previous frame's command list
    ///
    /// Blocks until the GPU has released a frame slot, so the CPU can never
    /// run more than NUM_FRAME_DATA frames ahead. After this returns, new
    /// commands build up in parallel with render_command_buffers() executing
    /// the returned list.
    pub fn swap_command_buffers(&mut self) -> Result<(CommandList, FrameTiming)> {
        let timing = self.swap_command_buffers_finish_rendering()?;
        let cmds = self.swap_command_buffers_finish_command_buffers();
        Ok((cmds, timing))
    }

    /// First half of the swap: wait for the GPU and collect timing
    pub fn swap_command_buffers_finish_rendering(&mut self) -> Result<FrameTiming> {
        let mut timing = FrameTiming::default();

        if !self.initialized {
            return Ok(timing);
        }

        // wait for the swap to actually happen before touching any
        // resource the GPU may still be reading
        self.backend.blocking_swap_buffers()?;

        let stats = self.backend.stats();
        timing.front_end_micro_sec = self.closed_front_end_micro_sec;
        timing.back_end_micro_sec = stats.total_micro_sec;
        timing.gpu_micro_sec = stats.gpu_micro_sec;

        // pick up r_* style changes that need reinitialization
        self.backend.check_cvars(&self.config)?;

        Ok(timing)
    }

    /// Second half of the swap: close the open list and rotate slots
    pub fn swap_command_buffers_finish_command_buffers(&mut self) -> CommandList {
        if !self.initialized {
            return CommandList::new();
        }

        // unmap per-frame geometry so the GPU can read it
        self.vertex_cache.begin_back_end();

        let cmds = self.current_slot().take_commands();

        // use the other slot next frame; the back end may still be
        // reading from the one just closed
        self.toggle_smp_frame();

        self.closed_front_end_micro_sec = self.frame_start.elapsed().as_micros() as u64;
        self.frame_start = Instant::now();

        // the ONLY place this advances
        self.frame_count += 1;
        self.num_views = 0;

        cmds
    }

    fn toggle_smp_frame(&mut self) {
        self.smp_frame += 1;
        // the slot being entered was consumed by the GPU two frames ago
        let slot = &mut self.frame_data[(self.smp_frame % NUM_FRAME_DATA as u64) as usize];
        slot.reset();
        engine_debug!(
            LOG_SOURCE,
            "frame slot {} reopened, high water {} bytes",
            self.smp_frame % NUM_FRAME_DATA as u64,
            slot.high_water()
        );
    }

    // ------------------------------------------------------------------
    // Back-end execution
    // ------------------------------------------------------------------

    /// Execute a closed command list on the backend
    ///
    /// Does nothing when the list has no draw view command, to avoid
    /// swapping a bad frame to the screen.
    pub fn render_command_buffers(&mut self, cmds: &CommandList) -> Result<()> {
        if !cmds.has_draw_view() {
            return Ok(());
        }
        self.backend.execute_backend_commands(cmds, &self.vertex_cache)
    }

    // ------------------------------------------------------------------
    // Geometry cache passthroughs
    // ------------------------------------------------------------------

    /// Allocate dynamic vertex data valid for this frame only
    pub fn alloc_vertex(&self, data: &[u8]) -> Result<crate::renderer::VertCacheHandle> {
        self.vertex_cache.alloc_vertex(data)
    }

    /// Allocate dynamic index data valid for this frame only
    pub fn alloc_index(&self, data: &[u8]) -> Result<crate::renderer::VertCacheHandle> {
        self.vertex_cache.alloc_index(data)
    }

    /// Allocate dynamic joint data valid for this frame only
    pub fn alloc_joint(&self, data: &[u8]) -> Result<crate::renderer::VertCacheHandle> {
        self.vertex_cache.alloc_joint(data)
    }
}

#[cfg(test)]
#[path = "render_system_tests.rs"]
mod tests;
