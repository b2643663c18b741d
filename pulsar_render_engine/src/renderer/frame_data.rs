/// Per-frame transient memory and the open command list
///
/// Each frame slot owns a fixed arena that is bump-allocated during command
/// generation and reset wholesale when the slot is reused, plus the command
/// list being built for that frame. Nothing allocated here survives the
/// frame; persistent data belongs in buffer objects or the vertex cache.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine_fatal;
use crate::renderer::{CommandList, RenderCommand};

const LOG_SOURCE: &str = "pulsar::FrameData";

/// Arena capacity per frame slot
pub const MAX_FRAME_MEMORY: usize = 64 * 1024 * 1024;
/// Every arena allocation starts on this boundary
pub const FRAME_ALLOC_ALIGNMENT: usize = 128;

/// What an arena allocation is for, kept for high-water reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocKind {
    DrawCommand,
    ViewDef,
    DrawSurf,
    GuiSurface,
    Unknown,
}

const FRAME_ALLOC_MAX: usize = 5;

impl FrameAllocKind {
    fn index(self) -> usize {
        match self {
            FrameAllocKind::DrawCommand => 0,
            FrameAllocKind::ViewDef => 1,
            FrameAllocKind::DrawSurf => 2,
            FrameAllocKind::GuiSurface => 3,
            FrameAllocKind::Unknown => 4,
        }
    }
}

/// One frame slot: byte arena plus the command list charged against it
pub struct FrameData {
    memory: Box<[u8]>,
    /// Bump pointer; atomic so parallel front-end jobs can allocate
    allocated: AtomicUsize,
    high_water: usize,
    kind_bytes: [AtomicUsize; FRAME_ALLOC_MAX],
    commands: CommandList,
}

impl FrameData {
    pub fn new() -> Self {
        Self {
            memory: vec![0u8; MAX_FRAME_MEMORY].into_boxed_slice(),
            allocated: AtomicUsize::new(0),
            high_water: 0,
            kind_bytes: std::array::from_fn(|_| AtomicUsize::new(0)),
            commands: CommandList::new(),
        }
    }

    /// Bytes handed out so far this frame
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Largest single-frame usage seen since startup
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Bytes handed out for one allocation kind this frame
    pub fn allocated_for(&self, kind: FrameAllocKind) -> usize {
        self.kind_bytes[kind.index()].load(Ordering::Relaxed)
    }

    /// Reserve `bytes` of frame-lifetime memory, without clearing it
    ///
    /// Running the arena dry mid-frame is unrecoverable; there is no way
    /// to back out of partially generated commands.
    pub fn frame_alloc(&mut self, bytes: usize, kind: FrameAllocKind) -> &mut [u8] {
        let bytes = (bytes + FRAME_ALLOC_ALIGNMENT - 1) & !(FRAME_ALLOC_ALIGNMENT - 1);
        let end = self.allocated.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if end > MAX_FRAME_MEMORY {
            engine_fatal!(
                LOG_SOURCE,
                "frame_alloc ran out of memory: bytes = {}, end = {}, high water = {}",
                bytes,
                end,
                self.high_water
            );
        }
        self.kind_bytes[kind.index()].fetch_add(bytes, Ordering::Relaxed);
        &mut self.memory[end - bytes..end]
    }

    /// Like frame_alloc, but the returned memory is zeroed
    pub fn cleared_frame_alloc(&mut self, bytes: usize, kind: FrameAllocKind) -> &mut [u8] {
        let block = self.frame_alloc(bytes, kind);
        block.fill(0);
        block
    }

    /// Append a command to the open list, charging the arena for it
    pub fn add_command(&mut self, cmd: RenderCommand) {
        self.frame_alloc(std::mem::size_of::<RenderCommand>(), FrameAllocKind::DrawCommand);
        self.commands.push(cmd);
    }

    /// Commands appended so far this frame
    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    /// Close the open list, returning it, and start a fresh one
    ///
    /// Called when this slot's frame is handed to the back end; the slot's
    /// arena is NOT reset here, because back-end execution may still read
    /// frame-lifetime data. reset() happens when the slot comes around again.
    pub fn take_commands(&mut self) -> CommandList {
        std::mem::replace(&mut self.commands, CommandList::new())
    }

    /// Reclaim the slot for a new frame
    pub fn reset(&mut self) {
        let used = self.allocated.load(Ordering::Relaxed);
        if used > self.high_water {
            self.high_water = used;
        }
        self.allocated.store(0, Ordering::Relaxed);
        for counter in &self.kind_bytes {
            counter.store(0, Ordering::Relaxed);
        }
        self.commands = CommandList::new();
    }
}

impl Default for FrameData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "frame_data_tests.rs"]
mod tests;
