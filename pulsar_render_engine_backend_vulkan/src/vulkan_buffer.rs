/// VulkanAllocation - Vulkan implementation of the BufferAllocation trait
///
/// Dynamic allocations live in CpuToGpu memory and stay persistently
/// mapped; writes are straight memcpys. Static allocations live in
/// device-local memory and are written through the staging ring with a
/// recorded buffer copy. Frees are deferred through the per-slot garbage
/// lists so the GPU is never holding a destroyed buffer.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pulsar_render_engine::pulsar::render::{BufferAllocation, BufferKind, BufferUsage};
use pulsar_render_engine::pulsar::{Error, Result};
use pulsar_render_engine::{engine_bail, engine_err};

use crate::vulkan_context::GpuContext;

const LOG_SOURCE: &str = "pulsar::vulkan";

/// Vulkan buffer allocation
pub struct VulkanAllocation {
    /// Shared GPU context (device, allocator, staging, garbage lists)
    ctx: Arc<GpuContext>,
    pub(crate) buffer: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
    usage: BufferUsage,
    size: usize,
    freed: AtomicBool,
}

impl VulkanAllocation {
    /// Create a buffer of `num_bytes` with usage flags derived from `kind`
    pub(crate) fn create(
        ctx: Arc<GpuContext>,
        kind: BufferKind,
        usage: BufferUsage,
        num_bytes: usize,
    ) -> Result<Arc<VulkanAllocation>> {
        let mut usage_flags = match kind {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Uniform | BufferKind::Joint => vk::BufferUsageFlags::UNIFORM_BUFFER,
        };
        if usage == BufferUsage::Static {
            usage_flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let location = match usage {
            BufferUsage::Static => MemoryLocation::GpuOnly,
            BufferUsage::Dynamic => MemoryLocation::CpuToGpu,
        };

        unsafe {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(num_bytes as u64)
                .usage(usage_flags)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = ctx
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create buffer: {:?}", e))?;

            let requirements = ctx.device.get_buffer_memory_requirements(buffer);
            let allocation = ctx
                .allocator
                .lock()
                .map_err(|_| Error::BackendError("allocator lock poisoned".to_string()))?
                .allocate(&AllocationCreateDesc {
                    name: "buffer object",
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to allocate buffer memory: {:?}", e))?;

            ctx.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to bind buffer memory: {:?}", e))?;

            Ok(Arc::new(VulkanAllocation {
                ctx,
                buffer,
                allocation: Mutex::new(Some(allocation)),
                usage,
                size: num_bytes,
                freed: AtomicBool::new(false),
            }))
        }
    }

    fn write_dynamic(&self, offset: usize, data: &[u8]) -> Result<()> {
        let guard = self
            .allocation
            .lock()
            .map_err(|_| Error::BackendError("allocation lock poisoned".to_string()))?;
        let allocation = match guard.as_ref() {
            Some(allocation) => allocation,
            None => engine_bail!(LOG_SOURCE, "write on a freed allocation"),
        };
        let mapped = allocation
            .mapped_ptr()
            .ok_or_else(|| Error::BackendError("buffer is not CPU-accessible".to_string()))?
            .as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset), data.len());
        }
        Ok(())
    }

    fn write_staged(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut staging = self
            .ctx
            .staging
            .lock()
            .map_err(|_| Error::BackendError("staging lock poisoned".to_string()))?;
        let slice = staging.stage(data.len(), 1)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), slice.data, data.len());

            let region = vk::BufferCopy::default()
                .src_offset(slice.offset as u64)
                .dst_offset(offset as u64)
                .size(data.len() as u64);
            self.ctx.device.cmd_copy_buffer(
                slice.command_buffer,
                slice.buffer,
                self.buffer,
                &[region],
            );
        }
        Ok(())
    }
}

impl BufferAllocation for VulkanAllocation {
    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.size {
            engine_bail!(
                LOG_SOURCE,
                "write {} + {} beyond allocation of {} bytes",
                offset,
                data.len(),
                self.size
            );
        }
        match self.usage {
            BufferUsage::Dynamic => self.write_dynamic(offset, data),
            BufferUsage::Static => self.write_staged(offset, data),
        }
    }

    fn mapped_ptr(&self, offset: usize) -> Result<NonNull<u8>> {
        if self.usage == BufferUsage::Static {
            engine_bail!(LOG_SOURCE, "mapped_ptr on a Static allocation");
        }
        let guard = self
            .allocation
            .lock()
            .map_err(|_| Error::BackendError("allocation lock poisoned".to_string()))?;
        let allocation = match guard.as_ref() {
            Some(allocation) => allocation,
            None => engine_bail!(LOG_SOURCE, "mapped_ptr on a freed allocation"),
        };
        let mapped = allocation
            .mapped_ptr()
            .ok_or_else(|| Error::BackendError("buffer is not CPU-accessible".to_string()))?
            .as_ptr() as *mut u8;
        NonNull::new(unsafe { mapped.add(offset) })
            .ok_or_else(|| Error::BackendError("null mapped pointer".to_string()))
    }

    fn free(&self) {
        if self.freed.swap(true, Ordering::AcqRel) {
            return;
        }
        let allocation = self.allocation.lock().ok().and_then(|mut guard| guard.take());
        self.ctx.defer_free(self.buffer, allocation);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanAllocation {
    fn drop(&mut self) {
        // a leaked handle still returns its memory
        self.free();
    }
}
