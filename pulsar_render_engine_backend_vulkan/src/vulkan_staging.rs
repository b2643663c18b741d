/// Staging manager - host-visible upload ring for Static buffer data
///
/// Static buffers live in device-local memory the CPU cannot write, so
/// updates are memcpy'd into one of NUM_FRAME_DATA host-visible staging
/// buffers while a copy command is recorded into that buffer's dedicated
/// command buffer. flush() submits the recorded copies and rotates to the
/// next staging buffer, fence-waiting it before reuse.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use std::sync::{Arc, Mutex};

use pulsar_render_engine::pulsar::render::NUM_FRAME_DATA;
use pulsar_render_engine::pulsar::{Error, Result};
use pulsar_render_engine::{engine_bail, engine_err, engine_fatal};

const LOG_SOURCE: &str = "pulsar::vulkan";

/// Upload ring capacity per staging buffer
pub const MAX_UPLOAD_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// One staged region, ready for the caller to fill and record a copy from
pub struct StagingSlice {
    /// Mapped host pointer at the staged offset
    pub data: *mut u8,
    /// Command buffer the copy must be recorded into
    pub command_buffer: vk::CommandBuffer,
    /// Source buffer for the copy
    pub buffer: vk::Buffer,
    /// Source offset for the copy
    pub offset: usize,
}

struct StagingBuffer {
    submitted: bool,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    fence: vk::Fence,
    offset: usize,
    allocation: Option<Allocation>,
}

pub struct StagingManager {
    device: ash::Device,
    queue: vk::Queue,
    allocator: Arc<Mutex<Allocator>>,
    command_pool: vk::CommandPool,
    buffers: Vec<StagingBuffer>,
    current: usize,
}

impl StagingManager {
    pub fn new(
        device: ash::Device,
        queue: vk::Queue,
        queue_family: u32,
        allocator: Arc<Mutex<Allocator>>,
    ) -> Result<Self> {
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create staging command pool: {:?}", e))?;

            let cb_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(NUM_FRAME_DATA as u32);
            let command_buffers = device
                .allocate_command_buffers(&cb_info)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to allocate staging command buffers: {:?}", e))?;

            let mut buffers = Vec::with_capacity(NUM_FRAME_DATA);
            for &command_buffer in &command_buffers {
                let buffer_info = vk::BufferCreateInfo::default()
                    .size(MAX_UPLOAD_BUFFER_SIZE as u64)
                    .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE);
                let buffer = device
                    .create_buffer(&buffer_info, None)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create staging buffer: {:?}", e))?;

                let requirements = device.get_buffer_memory_requirements(buffer);
                let allocation = allocator
                    .lock()
                    .map_err(|_| Error::BackendError("allocator lock poisoned".to_string()))?
                    .allocate(&AllocationCreateDesc {
                        name: "staging buffer",
                        requirements,
                        location: MemoryLocation::CpuToGpu,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to allocate staging memory: {:?}", e))?;

                device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to bind staging memory: {:?}", e))?;

                let fence = device
                    .create_fence(&vk::FenceCreateInfo::default(), None)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create staging fence: {:?}", e))?;

                let begin_info = vk::CommandBufferBeginInfo::default();
                device
                    .begin_command_buffer(command_buffer, &begin_info)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to begin staging command buffer: {:?}", e))?;

                buffers.push(StagingBuffer {
                    submitted: false,
                    command_buffer,
                    buffer,
                    fence,
                    offset: 0,
                    allocation: Some(allocation),
                });
            }

            Ok(Self {
                device,
                queue,
                allocator,
                command_pool,
                buffers,
                current: 0,
            })
        }
    }

    /// Reserve `size` bytes in the current staging buffer
    ///
    /// May flush and rotate if the current buffer cannot hold the request.
    pub fn stage(&mut self, size: usize, alignment: usize) -> Result<StagingSlice> {
        if size > MAX_UPLOAD_BUFFER_SIZE {
            engine_fatal!(LOG_SOURCE, "can't stage {} bytes, limit is {}", size, MAX_UPLOAD_BUFFER_SIZE);
        }

        {
            let stage = &mut self.buffers[self.current];
            stage.offset = (stage.offset + alignment - 1) & !(alignment - 1);
            if stage.offset + size > MAX_UPLOAD_BUFFER_SIZE && !stage.submitted {
                // roll to the next staging buffer
                self.flush()?;
            }
        }

        let current = self.current;
        self.wait(current)?;

        let stage = &mut self.buffers[self.current];
        let mapped = match &stage.allocation {
            Some(allocation) => allocation
                .mapped_ptr()
                .ok_or_else(|| Error::BackendError("staging memory is not mapped".to_string()))?
                .as_ptr() as *mut u8,
            None => engine_bail!(LOG_SOURCE, "staging buffer has no allocation"),
        };

        let slice = StagingSlice {
            data: unsafe { mapped.add(stage.offset) },
            command_buffer: stage.command_buffer,
            buffer: stage.buffer,
            offset: stage.offset,
        };
        stage.offset += size;
        Ok(slice)
    }

    /// Submit all copies recorded since the last flush
    pub fn flush(&mut self) -> Result<()> {
        let current = self.current;
        {
            let stage = &mut self.buffers[current];
            if stage.submitted || stage.offset == 0 {
                return Ok(());
            }

            unsafe {
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(
                        vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ,
                    );
                self.device.cmd_pipeline_barrier(
                    stage.command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::VERTEX_INPUT,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );

                self.device
                    .end_command_buffer(stage.command_buffer)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to end staging command buffer: {:?}", e))?;

                // make the host writes visible before the submit
                let range = vk::MappedMemoryRange::default()
                    .memory(stage.allocation.as_ref().unwrap().memory())
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                let _ = self.device.flush_mapped_memory_ranges(&[range]);

                let command_buffers = [stage.command_buffer];
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                self.device
                    .queue_submit(self.queue, &[submit_info], stage.fence)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to submit staging copies: {:?}", e))?;
            }
            stage.submitted = true;
        }

        self.current = (self.current + 1) % NUM_FRAME_DATA;
        let next = self.current;
        self.wait(next)
    }

    /// Block until staging buffer `index` is reusable, then reopen it
    fn wait(&mut self, index: usize) -> Result<()> {
        let stage = &mut self.buffers[index];
        if !stage.submitted {
            return Ok(());
        }

        unsafe {
            self.device
                .wait_for_fences(&[stage.fence], true, u64::MAX)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to wait for staging fence: {:?}", e))?;
            self.device
                .reset_fences(&[stage.fence])
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to reset staging fence: {:?}", e))?;

            stage.offset = 0;
            stage.submitted = false;

            let begin_info = vk::CommandBufferBeginInfo::default();
            self.device
                .begin_command_buffer(stage.command_buffer, &begin_info)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to reopen staging command buffer: {:?}", e))?;
        }
        Ok(())
    }

    /// Destroy the ring; only safe after the device is idle
    pub fn shutdown(&mut self) {
        unsafe {
            for stage in &mut self.buffers {
                self.device.destroy_fence(stage.fence, None);
                if let Some(allocation) = stage.allocation.take() {
                    if let Ok(mut allocator) = self.allocator.lock() {
                        allocator.free(allocation).ok();
                    }
                }
                self.device.destroy_buffer(stage.buffer, None);
            }
            self.buffers.clear();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
