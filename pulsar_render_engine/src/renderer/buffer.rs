/// BufferObject - typed GPU memory handle (vertex/index/uniform/joint)
///
/// Either owns a backend allocation or aliases a range of another buffer's
/// allocation (see reference()). The original packed the mapped and
/// ownership flags into the high bits of the size/offset fields; here they
/// are explicit fields with the same external accessor contract: size()
/// never reflects the mapped state and offset() never reflects ownership.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::renderer::{BufferAllocation, BufferAllocator, BufferKind, BufferMapType, BufferUsage};
use crate::{engine_debug, engine_fatal};

const LOG_SOURCE: &str = "pulsar::BufferObject";

/// Typed GPU buffer handle
pub struct BufferObject {
    kind: BufferKind,
    usage: BufferUsage,
    /// Declared size in bytes; 0 while unallocated
    size: usize,
    /// Byte offset within the backing allocation (non-zero for references)
    offset: usize,
    /// Currently mapped for CPU access
    mapped: AtomicBool,
    /// Whether free_buffer_object may release the backing allocation
    owns_buffer: bool,
    allocation: Option<Arc<dyn BufferAllocation>>,
}

impl BufferObject {
    /// Create an empty, unallocated buffer of the given kind
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            usage: BufferUsage::Dynamic,
            size: 0,
            offset: 0,
            mapped: AtomicBool::new(false),
            owns_buffer: true,
            allocation: None,
        }
    }

    /// Declared size in bytes (never includes any status flag)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size rounded up to a 16-byte boundary; the backing allocation size
    pub fn alloced_size(&self) -> usize {
        (self.size + 15) & !15
    }

    /// Byte offset within the backing allocation (never includes any status flag)
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Usage class this buffer was allocated with
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// How this buffer is bound
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Whether map_buffer is currently outstanding
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Relaxed)
    }

    /// Whether this instance owns the backing allocation
    pub fn owns_buffer(&self) -> bool {
        self.owns_buffer
    }

    /// Whether backing storage has been allocated or referenced
    pub fn is_allocated(&self) -> bool {
        self.allocation.is_some()
    }

    /// Backing allocation, for backend draw dispatch
    pub fn allocation(&self) -> Option<&Arc<dyn BufferAllocation>> {
        self.allocation.as_ref()
    }

    /// Allocate backing storage, optionally uploading initial data
    ///
    /// # Arguments
    ///
    /// * `allocator` - Backend allocation factory
    /// * `data` - Optional initial contents, at most `alloc_size` bytes
    /// * `alloc_size` - Declared size in bytes; zero is a fatal caller bug
    /// * `usage` - Static or Dynamic
    pub fn alloc_buffer_object(
        &mut self,
        allocator: &dyn BufferAllocator,
        data: Option<&[u8]>,
        alloc_size: usize,
        usage: BufferUsage,
    ) -> Result<()> {
        debug_assert!(self.allocation.is_none());

        if alloc_size == 0 {
            engine_fatal!(LOG_SOURCE, "alloc_buffer_object: alloc_size = 0 ({:?})", self.kind);
        }

        self.size = alloc_size;
        self.usage = usage;
        self.owns_buffer = true;
        self.offset = 0;

        let num_bytes = self.alloced_size();
        self.allocation = Some(allocator.allocate(self.kind, usage, num_bytes)?);

        engine_debug!(
            LOG_SOURCE,
            "{:?} buffer alloc ({} bytes, {:?})",
            self.kind,
            self.size,
            self.usage
        );

        if let Some(data) = data {
            self.update(data, 0)?;
        }

        Ok(())
    }

    /// Release the buffer
    ///
    /// Unmaps first if needed. A reference into another buffer only clears
    /// local bookkeeping; an owner retires the backing allocation through
    /// the backend's deferred garbage path.
    pub fn free_buffer_object(&mut self) {
        if self.is_mapped() {
            self.unmap_buffer();
        }

        // a sub-allocation inside a larger buffer frees nothing
        if !self.owns_buffer {
            self.clear_without_freeing();
            return;
        }

        if let Some(allocation) = self.allocation.take() {
            engine_debug!(
                LOG_SOURCE,
                "{:?} buffer free ({} bytes)",
                self.kind,
                self.size
            );
            allocation.free();
        }

        self.clear_without_freeing();
    }

    /// Make this buffer an alias of the whole of `other`
    pub fn reference(&mut self, other: &BufferObject) {
        self.reference_range(other, 0, other.size());
    }

    /// Make this buffer an alias of `ref_size` bytes of `other` at `ref_offset`
    ///
    /// The alias shares the backing allocation but does not own it; only
    /// freeing the owner releases the underlying GPU resource.
    pub fn reference_range(&mut self, other: &BufferObject, ref_offset: usize, ref_size: usize) {
        debug_assert!(!self.is_mapped());
        debug_assert!(!other.is_mapped());

        if !other.is_allocated() {
            engine_fatal!(LOG_SOURCE, "reference: source buffer is not allocated");
        }
        if ref_size == 0 || ref_offset + ref_size > other.size() {
            engine_fatal!(
                LOG_SOURCE,
                "reference: range {}..{} outside source buffer of {} bytes",
                ref_offset,
                ref_offset + ref_size,
                other.size()
            );
        }

        self.free_buffer_object();

        self.kind = other.kind;
        self.usage = other.usage;
        self.size = ref_size;
        self.offset = other.offset() + ref_offset;
        self.owns_buffer = false;
        self.allocation = other.allocation.clone();
    }

    /// Copy `data` into the buffer at `offset` bytes
    ///
    /// `offset + data.len()` beyond the declared size is a fatal caller bug,
    /// never silently truncated. Dynamic buffers are written directly through
    /// the persistent mapping; Static buffers go through the staging ring and
    /// a recorded device copy.
    pub fn update(&self, data: &[u8], offset: usize) -> Result<()> {
        let allocation = match &self.allocation {
            Some(allocation) => allocation,
            None => engine_fatal!(LOG_SOURCE, "update: buffer is not allocated"),
        };

        if offset + data.len() > self.size() {
            engine_fatal!(
                LOG_SOURCE,
                "update: size overrun, {} + {} > {}",
                offset,
                data.len(),
                self.size()
            );
        }

        allocation.write(self.offset() + offset, data)
    }

    /// Map the buffer for CPU access at its base offset
    ///
    /// Only legal for Dynamic buffers; mapping a Static buffer is fatal.
    /// The returned pointer stays valid until unmap_buffer.
    pub fn map_buffer(&self, map_type: BufferMapType) -> Result<NonNull<u8>> {
        let allocation = match &self.allocation {
            Some(allocation) => allocation,
            None => engine_fatal!(LOG_SOURCE, "map_buffer: buffer is not allocated"),
        };

        if self.usage == BufferUsage::Static {
            engine_fatal!(
                LOG_SOURCE,
                "map_buffer: cannot map a buffer marked as Static ({:?})",
                map_type
            );
        }

        let ptr = allocation.mapped_ptr(self.offset())?;
        self.mapped.store(true, Ordering::Relaxed);
        Ok(ptr)
    }

    /// End a map_buffer cycle
    ///
    /// Unbalanced map/unmap is a programming error.
    pub fn unmap_buffer(&self) {
        if self.usage == BufferUsage::Static {
            engine_fatal!(LOG_SOURCE, "unmap_buffer: cannot unmap a buffer marked as Static");
        }

        debug_assert!(self.is_mapped(), "unmap_buffer without matching map_buffer");
        self.mapped.store(false, Ordering::Relaxed);
    }

    fn clear_without_freeing(&mut self) {
        self.size = 0;
        self.offset = 0;
        self.owns_buffer = true;
        self.mapped.store(false, Ordering::Relaxed);
        self.allocation = None;
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        self.free_buffer_object();
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
