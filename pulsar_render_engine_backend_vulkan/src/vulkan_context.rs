/// GpuContext - Shared GPU resources for all Vulkan objects
///
/// Contains everything buffer allocations need after creation:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - The per-frame-slot garbage lists for deferred destruction
///
/// Resources freed mid-frame may still be referenced by the command buffer
/// the GPU is executing, so frees are queued on the slot that is currently
/// being recorded and only destroyed when that slot's fence has been waited
/// on again, two frames later.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use pulsar_render_engine::engine_warn;
use pulsar_render_engine::pulsar::render::NUM_FRAME_DATA;

use crate::vulkan_staging::StagingManager;

const LOG_SOURCE: &str = "pulsar::vulkan";

/// One deferred destruction
struct Garbage {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

/// Shared GPU context for all Vulkan resources.
///
/// Shared (via `Arc`) by every buffer allocation so that frees can reach
/// the device and the garbage lists without a reference back into the
/// backend. Device and instance destruction stays with VulkanBackend to
/// keep teardown ordering in one place.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop; VulkanBackend::shutdown drops this copy
    /// explicitly, after the garbage lists drain and before the device dies
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue for command submission
    pub graphics_queue: vk::Queue,

    /// Graphics queue family index
    pub graphics_queue_family: u32,

    /// Upload ring for Static buffer writes (behind Mutex for &self access)
    pub staging: Mutex<StagingManager>,

    /// Deferred frees, one list per frame slot
    garbage: Mutex<[Vec<Garbage>; NUM_FRAME_DATA]>,

    /// Slot garbage is currently queued on
    garbage_slot: Mutex<usize>,
}

impl GpuContext {
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        staging: StagingManager,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            graphics_queue,
            graphics_queue_family,
            staging: Mutex::new(staging),
            garbage: Mutex::new(std::array::from_fn(|_| Vec::new())),
            garbage_slot: Mutex::new(0),
        }
    }

    /// Queue a buffer for destruction once the current slot's frame is
    /// known to be off the GPU
    pub fn defer_free(&self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        let slot = *self.garbage_slot.lock().unwrap();
        self.garbage.lock().unwrap()[slot].push(Garbage { buffer, allocation });
    }

    /// Point new frees at `slot` and destroy everything queued there
    ///
    /// Called at the start of recording into `slot`: its previous frame
    /// has been fence-waited, so its garbage is safe to destroy.
    pub fn empty_garbage(&self, slot: usize) {
        *self.garbage_slot.lock().unwrap() = slot;

        let drained: Vec<Garbage> = std::mem::take(&mut self.garbage.lock().unwrap()[slot]);
        for item in drained {
            self.destroy(item);
        }
    }

    /// Destroy all queued garbage in every slot; only safe after wait_idle
    pub fn empty_all_garbage(&self) {
        let mut lists = self.garbage.lock().unwrap();
        for list in lists.iter_mut() {
            for item in std::mem::take(list) {
                self.destroy(item);
            }
        }
    }

    fn destroy(&self, item: Garbage) {
        if let Some(allocation) = item.allocation {
            match self.allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        engine_warn!(LOG_SOURCE, "failed to free GPU allocation: {:?}", e);
                    }
                }
                Err(_) => {
                    engine_warn!(LOG_SOURCE, "allocator lock poisoned during garbage drain");
                }
            }
        }
        unsafe {
            self.device.destroy_buffer(item.buffer, None);
        }
    }
}
