/// Vertex cache - frame-based geometry allocator over large GPU buffers
///
/// Static geometry is uploaded once into a Static buffer set; dynamic
/// geometry is packed into one of NUM_FRAME_DATA rotating Dynamic sets, so
/// the CPU fills one set while the GPU reads the other. Allocations are
/// returned as packed 64-bit handles carrying the static flag, size, offset
/// and allocation frame, letting the back end detect stale dynamic handles.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::renderer::buffer::BufferObject;
use crate::renderer::{BufferAllocator, BufferKind, BufferUsage, NUM_FRAME_DATA};
use crate::{engine_fatal, engine_info};

const LOG_SOURCE: &str = "pulsar::VertexCache";

// ============================================================================
// Handle packing
// ============================================================================

const VERTCACHE_STATIC: u64 = 1;
const VERTCACHE_SIZE_SHIFT: u64 = 1;
const VERTCACHE_SIZE_MASK: u64 = 0x7fffff; // 8 MB
const VERTCACHE_OFFSET_SHIFT: u64 = 24;
const VERTCACHE_OFFSET_MASK: u64 = 0x1ffffff; // 32 MB
const VERTCACHE_FRAME_SHIFT: u64 = 49;
const VERTCACHE_FRAME_MASK: u64 = 0x7fff;

/// Per-frame dynamic budgets and static pool sizes, in bytes
pub const VERTCACHE_VERTEX_MEMORY_PER_FRAME: usize = 31 * 1024 * 1024;
pub const VERTCACHE_INDEX_MEMORY_PER_FRAME: usize = 31 * 1024 * 1024;
pub const VERTCACHE_JOINT_MEMORY_PER_FRAME: usize = 256 * 1024;
pub const STATIC_VERTEX_MEMORY: usize = 31 * 1024 * 1024;
pub const STATIC_INDEX_MEMORY: usize = 31 * 1024 * 1024;

const VERTEX_CACHE_ALIGN: usize = 32;
const INDEX_CACHE_ALIGN: usize = 16;
const JOINT_CACHE_ALIGN: usize = 16;

fn cache_align(bytes: usize, align: usize) -> usize {
    (bytes + align - 1) & !(align - 1)
}

/// Packed geometry allocation handle
///
/// Bit 0 marks static allocations; size, offset and frame number occupy
/// the remaining fields. Zero is the unset handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertCacheHandle(u64);

impl VertCacheHandle {
    pub const UNSET: VertCacheHandle = VertCacheHandle(0);

    fn pack(is_static: bool, size: usize, offset: usize, frame: u64) -> Self {
        // overflowing either field would corrupt the neighboring bits
        if (size as u64) > VERTCACHE_SIZE_MASK {
            engine_fatal!(LOG_SOURCE, "allocation too large for handle: {} bytes", size);
        }
        if (offset as u64) > VERTCACHE_OFFSET_MASK {
            engine_fatal!(LOG_SOURCE, "offset too large for handle: {}", offset);
        }
        let mut bits = ((size as u64) << VERTCACHE_SIZE_SHIFT)
            | ((offset as u64) << VERTCACHE_OFFSET_SHIFT)
            | ((frame & VERTCACHE_FRAME_MASK) << VERTCACHE_FRAME_SHIFT);
        if is_static {
            bits |= VERTCACHE_STATIC;
        }
        Self(bits)
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    pub fn is_static(self) -> bool {
        self.0 & VERTCACHE_STATIC != 0
    }

    /// Allocation size in bytes
    pub fn size(self) -> usize {
        ((self.0 >> VERTCACHE_SIZE_SHIFT) & VERTCACHE_SIZE_MASK) as usize
    }

    /// Byte offset within the owning buffer set
    pub fn offset(self) -> usize {
        ((self.0 >> VERTCACHE_OFFSET_SHIFT) & VERTCACHE_OFFSET_MASK) as usize
    }

    /// Frame number the allocation was made in, modulo the frame mask
    pub fn frame(self) -> u64 {
        (self.0 >> VERTCACHE_FRAME_SHIFT) & VERTCACHE_FRAME_MASK
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

// ============================================================================
// Geometry buffer set
// ============================================================================

/// One set of vertex/index/joint buffers with bump-pointer offsets
///
/// Offsets are atomics so multiple front-end jobs can allocate in parallel.
struct GeoBufferSet {
    vertex_buffer: BufferObject,
    index_buffer: BufferObject,
    joint_buffer: BufferObject,
    vertex_offset: AtomicUsize,
    index_offset: AtomicUsize,
    joint_offset: AtomicUsize,
    allocations: AtomicUsize,
}

impl GeoBufferSet {
    fn new() -> Self {
        Self {
            vertex_buffer: BufferObject::new(BufferKind::Vertex),
            index_buffer: BufferObject::new(BufferKind::Index),
            joint_buffer: BufferObject::new(BufferKind::Joint),
            vertex_offset: AtomicUsize::new(0),
            index_offset: AtomicUsize::new(0),
            joint_offset: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
        }
    }

    fn alloc(
        &mut self,
        allocator: &dyn BufferAllocator,
        usage: BufferUsage,
        vertex_bytes: usize,
        index_bytes: usize,
        joint_bytes: usize,
    ) -> Result<()> {
        self.vertex_buffer
            .alloc_buffer_object(allocator, None, vertex_bytes, usage)?;
        self.index_buffer
            .alloc_buffer_object(allocator, None, index_bytes, usage)?;
        if joint_bytes > 0 {
            self.joint_buffer
                .alloc_buffer_object(allocator, None, joint_bytes, usage)?;
        }
        Ok(())
    }

    fn free(&mut self) {
        self.vertex_buffer.free_buffer_object();
        self.index_buffer.free_buffer_object();
        self.joint_buffer.free_buffer_object();
    }

    fn clear(&self) {
        self.vertex_offset.store(0, Ordering::Relaxed);
        self.index_offset.store(0, Ordering::Relaxed);
        self.joint_offset.store(0, Ordering::Relaxed);
        self.allocations.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Vertex cache
// ============================================================================

enum CacheKind {
    Vertex,
    Index,
    Joint,
}

pub struct VertexCache {
    current_frame: u64,
    /// Set the front end is currently filling
    list_num: usize,
    /// Set the back end is currently drawing from
    draw_list_num: usize,
    static_data: GeoBufferSet,
    frame_data: [GeoBufferSet; NUM_FRAME_DATA],
    /// High-water marks across the run
    most_used_vertex: usize,
    most_used_index: usize,
    most_used_joint: usize,
}

impl VertexCache {
    pub fn new() -> Self {
        Self {
            current_frame: 0,
            list_num: 0,
            draw_list_num: 0,
            static_data: GeoBufferSet::new(),
            frame_data: std::array::from_fn(|_| GeoBufferSet::new()),
            most_used_vertex: 0,
            most_used_index: 0,
            most_used_joint: 0,
        }
    }

    /// Allocate the static pool and the rotating per-frame sets
    pub fn init(&mut self, allocator: &dyn BufferAllocator) -> Result<()> {
        self.static_data.alloc(
            allocator,
            BufferUsage::Static,
            STATIC_VERTEX_MEMORY,
            STATIC_INDEX_MEMORY,
            0,
        )?;
        for set in &mut self.frame_data {
            set.alloc(
                allocator,
                BufferUsage::Dynamic,
                VERTCACHE_VERTEX_MEMORY_PER_FRAME,
                VERTCACHE_INDEX_MEMORY_PER_FRAME,
                VERTCACHE_JOINT_MEMORY_PER_FRAME,
            )?;
        }
        self.current_frame = 0;
        self.list_num = 0;
        self.draw_list_num = 0;
        engine_info!(
            LOG_SOURCE,
            "vertex cache initialized ({} frame sets)",
            NUM_FRAME_DATA
        );
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.static_data.free();
        for set in &mut self.frame_data {
            set.free();
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    // ------------------------------------------------------------------
    // Per-frame allocation
    // ------------------------------------------------------------------

    /// Allocate dynamic vertex data for this frame
    pub fn alloc_vertex(&self, data: &[u8]) -> Result<VertCacheHandle> {
        self.actually_alloc(&self.frame_data[self.list_num], data, CacheKind::Vertex, false)
    }

    /// Allocate dynamic index data for this frame
    pub fn alloc_index(&self, data: &[u8]) -> Result<VertCacheHandle> {
        self.actually_alloc(&self.frame_data[self.list_num], data, CacheKind::Index, false)
    }

    /// Allocate dynamic joint data for this frame
    pub fn alloc_joint(&self, data: &[u8]) -> Result<VertCacheHandle> {
        self.actually_alloc(&self.frame_data[self.list_num], data, CacheKind::Joint, false)
    }

    /// Upload vertex data into the static pool
    pub fn alloc_static_vertex(&self, data: &[u8]) -> Result<VertCacheHandle> {
        self.actually_alloc(&self.static_data, data, CacheKind::Vertex, true)
    }

    /// Upload index data into the static pool
    pub fn alloc_static_index(&self, data: &[u8]) -> Result<VertCacheHandle> {
        self.actually_alloc(&self.static_data, data, CacheKind::Index, true)
    }

    fn actually_alloc(
        &self,
        set: &GeoBufferSet,
        data: &[u8],
        kind: CacheKind,
        is_static: bool,
    ) -> Result<VertCacheHandle> {
        if data.is_empty() {
            return Ok(VertCacheHandle::UNSET);
        }

        let (buffer, offset_counter, bytes, limit) = match kind {
            CacheKind::Vertex => (
                &set.vertex_buffer,
                &set.vertex_offset,
                cache_align(data.len(), VERTEX_CACHE_ALIGN),
                set.vertex_buffer.size(),
            ),
            CacheKind::Index => (
                &set.index_buffer,
                &set.index_offset,
                cache_align(data.len(), INDEX_CACHE_ALIGN),
                set.index_buffer.size(),
            ),
            CacheKind::Joint => (
                &set.joint_buffer,
                &set.joint_offset,
                cache_align(data.len(), JOINT_CACHE_ALIGN),
                set.joint_buffer.size(),
            ),
        };

        let offset = offset_counter.fetch_add(bytes, Ordering::Relaxed);
        if offset + bytes > limit {
            engine_fatal!(
                LOG_SOURCE,
                "out of vertex cache: {} + {} > {}",
                offset,
                bytes,
                limit
            );
        }

        set.allocations.fetch_add(1, Ordering::Relaxed);
        buffer.update(data, offset)?;

        Ok(VertCacheHandle::pack(
            is_static,
            data.len(),
            offset,
            self.current_frame,
        ))
    }

    // ------------------------------------------------------------------
    // Back-end resolution
    // ------------------------------------------------------------------

    /// Whether a handle was allocated recently enough to still be valid
    pub fn cache_is_current(&self, handle: VertCacheHandle) -> bool {
        if !handle.is_set() {
            return false;
        }
        if handle.is_static() {
            return true;
        }
        handle.frame() == (self.current_frame & VERTCACHE_FRAME_MASK)
    }

    /// Resolve a vertex handle into a non-owning buffer reference
    ///
    /// Dynamic handles must come from the previous frame, the one the back
    /// end is drawing; anything older was already overwritten.
    pub fn get_vertex_buffer(&self, handle: VertCacheHandle, vb: &mut BufferObject) -> bool {
        self.get_buffer(handle, vb, |set| &set.vertex_buffer)
    }

    /// Resolve an index handle into a non-owning buffer reference
    pub fn get_index_buffer(&self, handle: VertCacheHandle, ib: &mut BufferObject) -> bool {
        self.get_buffer(handle, ib, |set| &set.index_buffer)
    }

    /// Resolve a joint handle into a non-owning buffer reference
    pub fn get_joint_buffer(&self, handle: VertCacheHandle, jb: &mut BufferObject) -> bool {
        self.get_buffer(handle, jb, |set| &set.joint_buffer)
    }

    fn get_buffer(
        &self,
        handle: VertCacheHandle,
        out: &mut BufferObject,
        select: fn(&GeoBufferSet) -> &BufferObject,
    ) -> bool {
        if !handle.is_set() {
            return false;
        }
        if handle.is_static() {
            out.reference_range(select(&self.static_data), handle.offset(), handle.size());
            return true;
        }
        if handle.frame() != ((self.current_frame.wrapping_sub(1)) & VERTCACHE_FRAME_MASK) {
            return false;
        }
        out.reference_range(
            select(&self.frame_data[self.draw_list_num]),
            handle.offset(),
            handle.size(),
        );
        true
    }

    // ------------------------------------------------------------------
    // Frame rotation
    // ------------------------------------------------------------------

    /// Hand the filled set to the back end and open the next one
    ///
    /// Called once per frame from the swap path, before the command list
    /// is handed over.
    pub fn begin_back_end(&mut self) {
        let filled = &self.frame_data[self.list_num];
        self.most_used_vertex = self
            .most_used_vertex
            .max(filled.vertex_offset.load(Ordering::Relaxed));
        self.most_used_index = self
            .most_used_index
            .max(filled.index_offset.load(Ordering::Relaxed));
        self.most_used_joint = self
            .most_used_joint
            .max(filled.joint_offset.load(Ordering::Relaxed));

        self.draw_list_num = self.list_num;
        self.current_frame += 1;
        self.list_num = (self.current_frame % NUM_FRAME_DATA as u64) as usize;

        // the set the GPU finished with two frames ago gets reused
        self.frame_data[self.list_num].clear();
    }

    /// High-water marks as (vertex, index, joint) bytes
    pub fn most_used(&self) -> (usize, usize, usize) {
        (self.most_used_vertex, self.most_used_index, self.most_used_joint)
    }
}

impl Default for VertexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "vertex_cache_tests.rs"]
mod tests;
