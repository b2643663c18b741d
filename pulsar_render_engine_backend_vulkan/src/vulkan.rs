/// VulkanBackend - Vulkan implementation of the RenderBackend trait
///
/// Owns the device, the swapchain and the per-frame-slot synchronization
/// state: one command buffer, fence, acquire semaphore, render-complete
/// semaphore and timestamp query pool per slot. execute_backend_commands
/// records and submits a whole frame; blocking_swap_buffers fence-waits
/// the slot, presents and advances to the other slot. The CPU therefore
/// never runs more than NUM_FRAME_DATA frames ahead of the GPU.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use winit::window::Window;

use pulsar_render_engine::pulsar::render::{
    BackendStats, BufferAllocation, BufferAllocator, BufferKind, BufferObject, BufferUsage,
    CommandList, RenderBackend, RenderCommand, RenderConfig, VertexCache, ViewDef, NUM_FRAME_DATA,
};
use pulsar_render_engine::pulsar::{Error, Result};
use pulsar_render_engine::{engine_debug, engine_err, engine_info, engine_warn};

use crate::vulkan_buffer::VulkanAllocation;
use crate::vulkan_context::GpuContext;
use crate::vulkan_render_target::{clamp_sample_count, RenderTargets, DEPTH_FORMAT};
use crate::vulkan_staging::StagingManager;
use crate::vulkan_swapchain::VulkanSwapchain;

const LOG_SOURCE: &str = "pulsar::vulkan";

/// Two queries per slot: frame start and frame end
const NUM_TIMESTAMP_QUERIES: u32 = 2;

pub struct VulkanBackend {
    /// Vulkan entry (kept alive for the loaders)
    _entry: ash::Entry,
    instance: ash::Instance,
    #[allow(dead_code)]
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,

    graphics_queue: vk::Queue,
    #[allow(dead_code)]
    graphics_queue_family: u32,
    present_queue: vk::Queue,
    #[allow(dead_code)]
    present_queue_family: u32,

    /// Nanoseconds per timestamp tick, from device limits
    timestamp_period: f32,
    /// Device limits, kept for sample-count clamping on recreate
    device_limits: vk::PhysicalDeviceLimits,

    /// GPU memory allocator reference (also stored in GpuContext)
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Shared GPU context for buffer allocations
    ctx: Arc<GpuContext>,

    swapchain: VulkanSwapchain,
    render_targets: RenderTargets,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    command_pool: vk::CommandPool,
    /// One primary command buffer per frame slot
    command_buffers: Vec<vk::CommandBuffer>,
    /// Signaled when the slot's submission finishes on the GPU
    command_buffer_fences: Vec<vk::Fence>,
    /// Whether the slot has a submission in flight worth waiting on
    command_buffer_recorded: [bool; NUM_FRAME_DATA],

    acquire_semaphores: Vec<vk::Semaphore>,
    render_complete_semaphores: Vec<vk::Semaphore>,

    query_pools: Vec<vk::QueryPool>,
    query_index: [u32; NUM_FRAME_DATA],

    /// Total frames submitted; the active slot is counter % NUM_FRAME_DATA
    counter: u64,
    current_frame_data: usize,
    current_swap_index: u32,

    config: RenderConfig,
    stats: BackendStats,
    /// Swapchain must be rebuilt before the next frame
    pending_resize: bool,
    shutdown_done: bool,

    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanBackend {
    /// Create the backend against a window
    pub fn new(window: &Window, config: RenderConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| Error::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

            // ================================================================
            // Instance
            // ================================================================

            let app_name = CString::new(config.app_name.clone())
                .map_err(|_| Error::InitializationFailed("app name contains NUL".to_string()))?;
            let engine_name = c"Pulsar Render Engine";
            let (major, minor, patch) = config.app_version;

            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(engine_name)
                .engine_version(vk::make_api_version(0, 1, 0, 0))
                .api_version(vk::API_VERSION_1_3);

            let display_handle = window
                .display_handle()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get display handle: {}", e))?;
            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get required extensions: {:?}", e))?
                    .to_vec();

            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create Vulkan instance: {:?}", e))?;

            let debug_utils = if config.enable_validation {
                crate::debug::reset_validation_stats();
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));
                let messenger = loader
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create debug messenger: {:?}", e))?;
                Some((loader, messenger))
            } else {
                None
            };

            // ================================================================
            // Surface, physical device and queues
            // ================================================================

            let window_handle = window
                .window_handle()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get window handle: {}", e))?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create surface: {:?}", e))?;

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to enumerate physical devices: {:?}", e))?;
            let physical_device = physical_devices
                .into_iter()
                .next()
                .ok_or_else(|| engine_err!(LOG_SOURCE, "No Vulkan-capable GPU found"))?;

            let properties = instance.get_physical_device_properties(physical_device);
            let timestamp_period = properties.limits.timestamp_period;

            let queue_families =
                instance.get_physical_device_queue_family_properties(physical_device);

            let graphics_family_index = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, _)| i as u32)
                .ok_or_else(|| engine_err!(LOG_SOURCE, "No graphics queue family found"))?;

            let present_family_index = (0..queue_families.len() as u32)
                .find(|&i| {
                    surface_loader
                        .get_physical_device_surface_support(physical_device, i, surface)
                        .unwrap_or(false)
                })
                .ok_or_else(|| engine_err!(LOG_SOURCE, "No present queue family found"))?;

            // ================================================================
            // Logical device
            // ================================================================

            let queue_priorities = [1.0];
            let queue_create_infos = if graphics_family_index == present_family_index {
                vec![vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family_index)
                    .queue_priorities(&queue_priorities)]
            } else {
                vec![
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(graphics_family_index)
                        .queue_priorities(&queue_priorities),
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(present_family_index)
                        .queue_priorities(&queue_priorities),
                ]
            };

            let device_extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default();

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features);

            let device = Arc::new(
                instance
                    .create_device(physical_device, &device_create_info, None)
                    .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create logical device: {:?}", e))?,
            );

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);
            let present_queue = device.get_device_queue(present_family_index, 0);

            // ================================================================
            // Allocator, staging and shared context
            // ================================================================

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: (*device).clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create GPU allocator: {:?}", e))?;
            let allocator_arc = Arc::new(Mutex::new(allocator));

            let staging = StagingManager::new(
                (*device).clone(),
                graphics_queue,
                graphics_family_index,
                Arc::clone(&allocator_arc),
            )?;

            let ctx = Arc::new(GpuContext::new(
                (*device).clone(),
                Arc::clone(&allocator_arc),
                graphics_queue,
                graphics_family_index,
                staging,
            ));

            // ================================================================
            // Swapchain, render pass, framebuffers
            // ================================================================

            let swapchain = VulkanSwapchain::new(
                &instance,
                Arc::clone(&device),
                physical_device,
                surface,
                surface_loader,
                &config,
            )?;

            let samples = clamp_sample_count(config.anti_aliasing.sample_count(), &properties.limits);
            let render_targets = RenderTargets::new(
                &device,
                &allocator_arc,
                swapchain.extent(),
                swapchain.format(),
                samples,
            )?;
            let render_pass = Self::create_render_pass(&device, swapchain.format(), samples)?;
            let framebuffers =
                Self::create_framebuffers(&device, render_pass, &swapchain, &render_targets)?;

            // ================================================================
            // Per-slot command buffers and synchronization
            // ================================================================

            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family_index)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create command pool: {:?}", e))?;

            let cb_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(NUM_FRAME_DATA as u32);
            let command_buffers = device
                .allocate_command_buffers(&cb_info)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to allocate command buffers: {:?}", e))?;

            let mut command_buffer_fences = Vec::with_capacity(NUM_FRAME_DATA);
            let mut acquire_semaphores = Vec::with_capacity(NUM_FRAME_DATA);
            let mut render_complete_semaphores = Vec::with_capacity(NUM_FRAME_DATA);
            let mut query_pools = Vec::with_capacity(NUM_FRAME_DATA);

            let fence_info = vk::FenceCreateInfo::default();
            let semaphore_info = vk::SemaphoreCreateInfo::default();
            let query_pool_info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::TIMESTAMP)
                .query_count(NUM_TIMESTAMP_QUERIES);

            for _ in 0..NUM_FRAME_DATA {
                command_buffer_fences.push(
                    device
                        .create_fence(&fence_info, None)
                        .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create frame fence: {:?}", e))?,
                );
                acquire_semaphores.push(
                    device
                        .create_semaphore(&semaphore_info, None)
                        .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create acquire semaphore: {:?}", e))?,
                );
                render_complete_semaphores.push(
                    device
                        .create_semaphore(&semaphore_info, None)
                        .map_err(|e| {
                            engine_err!(LOG_SOURCE, "Failed to create render-complete semaphore: {:?}", e)
                        })?,
                );
                query_pools.push(
                    device
                        .create_query_pool(&query_pool_info, None)
                        .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create query pool: {:?}", e))?,
                );
            }

            engine_info!(
                LOG_SOURCE,
                "Vulkan backend initialized on {:?}",
                properties.device_name_as_c_str().unwrap_or(c"unknown")
            );

            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                graphics_queue,
                graphics_queue_family: graphics_family_index,
                present_queue,
                present_queue_family: present_family_index,
                timestamp_period,
                device_limits: properties.limits,
                allocator: ManuallyDrop::new(allocator_arc),
                ctx,
                swapchain,
                render_targets,
                render_pass,
                framebuffers,
                command_pool,
                command_buffers,
                command_buffer_fences,
                command_buffer_recorded: [false; NUM_FRAME_DATA],
                acquire_semaphores,
                render_complete_semaphores,
                query_pools,
                query_index: [0; NUM_FRAME_DATA],
                counter: 0,
                current_frame_data: 0,
                current_swap_index: 0,
                config,
                stats: BackendStats::default(),
                pending_resize: false,
                shutdown_done: false,
                debug_utils,
            })
        }
    }

    fn create_render_pass(
        device: &ash::Device,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<vk::RenderPass> {
        let msaa = samples != vk::SampleCountFlags::TYPE_1;
        unsafe {
            // with MSAA the color attachment is the multisampled target and
            // the swapchain image becomes the resolve destination; without,
            // the swapchain image is the color attachment directly.
            // GENERAL as the presentable image's final layout so the
            // end-of-frame barrier owns the transition to PRESENT_SRC.
            let mut attachments = vec![
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(if msaa {
                        vk::AttachmentStoreOp::DONT_CARE
                    } else {
                        vk::AttachmentStoreOp::STORE
                    })
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(if msaa {
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                    } else {
                        vk::ImageLayout::GENERAL
                    }),
                vk::AttachmentDescription::default()
                    .format(DEPTH_FORMAT)
                    .samples(samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            ];
            if msaa {
                attachments.push(
                    vk::AttachmentDescription::default()
                        .format(format)
                        .samples(vk::SampleCountFlags::TYPE_1)
                        .load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .store_op(vk::AttachmentStoreOp::STORE)
                        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .initial_layout(vk::ImageLayout::UNDEFINED)
                        .final_layout(vk::ImageLayout::GENERAL),
                );
            }

            let color_refs = [vk::AttachmentReference::default()
                .attachment(0)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
            let depth_ref = vk::AttachmentReference::default()
                .attachment(1)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            let resolve_refs = [vk::AttachmentReference::default()
                .attachment(2)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

            let mut subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs)
                .depth_stencil_attachment(&depth_ref);
            if msaa {
                subpass = subpass.resolve_attachments(&resolve_refs);
            }
            let subpasses = [subpass];

            let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            let dependencies = [vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(stages)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_stage_mask(stages)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )];

            let render_pass_info = vk::RenderPassCreateInfo::default()
                .attachments(&attachments)
                .subpasses(&subpasses)
                .dependencies(&dependencies);

            device
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create render pass: {:?}", e))
        }
    }

    fn create_framebuffers(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        swapchain: &VulkanSwapchain,
        render_targets: &RenderTargets,
    ) -> Result<Vec<vk::Framebuffer>> {
        unsafe {
            let extent = swapchain.extent();
            (0..swapchain.image_count() as u32)
                .map(|i| {
                    // attachment order must match the render pass
                    let attachments = match render_targets.msaa_color_view() {
                        Some(msaa_view) => {
                            vec![msaa_view, render_targets.depth_view(), swapchain.image_view(i)]
                        }
                        None => vec![swapchain.image_view(i), render_targets.depth_view()],
                    };
                    let fb_info = vk::FramebufferCreateInfo::default()
                        .render_pass(render_pass)
                        .attachments(&attachments)
                        .width(extent.width)
                        .height(extent.height)
                        .layers(1);
                    device
                        .create_framebuffer(&fb_info, None)
                        .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create framebuffer: {:?}", e))
                })
                .collect()
        }
    }

    /// Rebuild swapchain-sized resources after a resize or OUT_OF_DATE
    fn recreate_swapchain(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .staging
                .lock()
                .map_err(|_| Error::BackendError("staging lock poisoned".to_string()))?
                .flush()?;

            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to wait for device idle: {:?}", e))?;

            self.ctx.empty_all_garbage();

            // swapchain-sized resources go in reverse creation order
            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
            self.framebuffers.clear();
            self.device.destroy_render_pass(self.render_pass, None);
            self.render_targets.destroy(&self.device, &self.allocator);

            self.swapchain.recreate(&self.config)?;

            let samples = clamp_sample_count(
                self.config.anti_aliasing.sample_count(),
                &self.device_limits,
            );
            self.render_targets = RenderTargets::new(
                &self.device,
                &self.allocator,
                self.swapchain.extent(),
                self.swapchain.format(),
                samples,
            )?;
            self.render_pass =
                Self::create_render_pass(&self.device, self.swapchain.format(), samples)?;
            self.framebuffers = Self::create_framebuffers(
                &self.device,
                self.render_pass,
                &self.swapchain,
                &self.render_targets,
            )?;
            self.pending_resize = false;
            Ok(())
        }
    }

    /// Acquire an image and open this slot's command buffer
    ///
    /// Returns false when no image could be acquired and the frame must be
    /// skipped.
    fn start_frame(&mut self) -> Result<bool> {
        let slot = self.current_frame_data;

        let image_index = match self
            .swapchain
            .acquire_next_image(self.acquire_semaphores[slot])?
        {
            Some(index) => index,
            None => {
                self.recreate_swapchain()?;
                match self
                    .swapchain
                    .acquire_next_image(self.acquire_semaphores[slot])?
                {
                    Some(index) => index,
                    None => {
                        engine_warn!(LOG_SOURCE, "swapchain still out of date, skipping frame");
                        return Ok(false);
                    }
                }
            }
        };
        self.current_swap_index = image_index;

        // this slot's previous frame has been fence-waited, so its
        // deferred frees are safe now
        self.ctx.empty_garbage(slot);

        self.ctx
            .staging
            .lock()
            .map_err(|_| Error::BackendError("staging lock poisoned".to_string()))?
            .flush()?;

        unsafe {
            // read back the previous timestamps recorded in this slot
            if self.query_index[slot] > 0 {
                let mut results = [0u64; NUM_TIMESTAMP_QUERIES as usize];
                let fetched = self.device.get_query_pool_results(
                    self.query_pools[slot],
                    0,
                    &mut results,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                );
                if fetched.is_ok() {
                    let ticks = results[1].saturating_sub(results[0]);
                    self.stats.gpu_micro_sec =
                        (ticks as f64 * self.timestamp_period as f64 / 1000.0) as u64;
                }
                self.query_index[slot] = 0;
            }

            let command_buffer = self.command_buffers[slot];
            let begin_info = vk::CommandBufferBeginInfo::default();
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to begin command buffer: {:?}", e))?;

            self.device.cmd_reset_query_pool(
                command_buffer,
                self.query_pools[slot],
                0,
                NUM_TIMESTAMP_QUERIES,
            );

            // one clear value per attachment, in render pass order
            let color_clear = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            };
            let depth_clear = vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            };
            let mut clear_values = vec![color_clear, depth_clear];
            if self.render_targets.msaa_color_view().is_some() {
                clear_values.push(color_clear);
            }
            let render_pass_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(self.framebuffers[self.current_swap_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.swapchain.extent(),
                })
                .clear_values(&clear_values);
            self.device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );

            self.device.cmd_write_timestamp(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                self.query_pools[slot],
                self.query_index[slot],
            );
            self.query_index[slot] += 1;
        }

        Ok(true)
    }

    /// Close the slot's command buffer and submit it with the slot fence
    fn end_frame(&mut self) -> Result<()> {
        let slot = self.current_frame_data;
        let command_buffer = self.command_buffers[slot];

        unsafe {
            self.device.cmd_write_timestamp(
                command_buffer,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                self.query_pools[slot],
                self.query_index[slot],
            );
            self.query_index[slot] += 1;

            self.device.cmd_end_render_pass(command_buffer);

            // transition the swap image to present here instead of in the
            // render pass, keeping a single pass for all frames
            let barrier = vk::ImageMemoryBarrier::default()
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.swapchain.image(self.current_swap_index))
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::empty());

            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );

            self.device
                .end_command_buffer(command_buffer)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to end command buffer: {:?}", e))?;
            self.command_buffer_recorded[slot] = true;

            let wait_semaphores = [self.acquire_semaphores[slot]];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let signal_semaphores = [self.render_complete_semaphores[slot]];
            let command_buffers = [command_buffer];

            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            self.device
                .queue_submit(
                    self.graphics_queue,
                    &[submit_info],
                    self.command_buffer_fences[slot],
                )
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to submit frame: {:?}", e))?;
        }

        Ok(())
    }

    /// Record viewport/scissor state, then resolve and bind each surface's
    /// geometry through the vertex cache
    fn draw_view(&mut self, view: &ViewDef, _gui_only: bool, vertex_cache: &VertexCache) {
        let slot = self.current_frame_data;
        let command_buffer = self.command_buffers[slot];
        let extent = self.swapchain.extent();

        unsafe {
            let viewport = vk::Viewport {
                x: view.viewport.x1 as f32,
                y: view.viewport.y1 as f32,
                width: view.viewport.width().max(1).min(extent.width as i32) as f32,
                height: view.viewport.height().max(1).min(extent.height as i32) as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);

            let scissor = vk::Rect2D {
                offset: vk::Offset2D {
                    x: view.scissor.x1.max(0),
                    y: view.scissor.y1.max(0),
                },
                extent: vk::Extent2D {
                    width: view.scissor.width().max(0) as u32,
                    height: view.scissor.height().max(0) as u32,
                },
            };
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        let mut vertex_buffer = BufferObject::new(BufferKind::Vertex);
        let mut index_buffer = BufferObject::new(BufferKind::Index);
        let mut joint_buffer = BufferObject::new(BufferKind::Joint);

        for surf in &view.draw_surfs {
            if !vertex_cache.get_vertex_buffer(surf.vertex_cache, &mut vertex_buffer)
                || !vertex_cache.get_index_buffer(surf.index_cache, &mut index_buffer)
            {
                engine_warn!(LOG_SOURCE, "draw surf with stale cache handle, skipped");
                continue;
            }
            if surf.joint_cache.is_set()
                && !vertex_cache.get_joint_buffer(surf.joint_cache, &mut joint_buffer)
            {
                engine_warn!(LOG_SOURCE, "draw surf with stale joint handle, skipped");
                continue;
            }

            let (Some(vertex_vk), Some(index_vk)) =
                (device_buffer(&vertex_buffer), device_buffer(&index_buffer))
            else {
                continue;
            };

            unsafe {
                self.device.cmd_bind_vertex_buffers(
                    command_buffer,
                    0,
                    &[vertex_vk],
                    &[vertex_buffer.offset() as vk::DeviceSize],
                );
                self.device.cmd_bind_index_buffer(
                    command_buffer,
                    index_vk,
                    index_buffer.offset() as vk::DeviceSize,
                    vk::IndexType::UINT16,
                );
            }

            self.stats.draw_calls += 1;
            self.stats.indexes += surf.num_indexes;
        }
    }
}

/// vk::Buffer behind a resolved cache reference
fn device_buffer(buffer: &BufferObject) -> Option<vk::Buffer> {
    let allocation = buffer.allocation()?;
    let vulkan = allocation.as_any().downcast_ref::<VulkanAllocation>()?;
    Some(vulkan.buffer)
}

impl BufferAllocator for VulkanBackend {
    fn allocate(
        &self,
        kind: BufferKind,
        usage: BufferUsage,
        num_bytes: usize,
    ) -> Result<Arc<dyn BufferAllocation>> {
        let allocation = VulkanAllocation::create(Arc::clone(&self.ctx), kind, usage, num_bytes)?;
        Ok(allocation)
    }
}

impl RenderBackend for VulkanBackend {
    /// Record and submit one frame's worth of commands
    fn execute_backend_commands(
        &mut self,
        cmds: &CommandList,
        vertex_cache: &VertexCache,
    ) -> Result<()> {
        if self.pending_resize {
            self.recreate_swapchain()?;
        }

        if !self.start_frame()? {
            return Ok(());
        }

        let backend_start = Instant::now();
        self.stats.draw_calls = 0;
        self.stats.indexes = 0;

        for cmd in cmds {
            match cmd {
                RenderCommand::Nop => {}
                RenderCommand::SetTarget(target) => {
                    // a single back buffer is all we present; front-buffer
                    // debugging has no Vulkan equivalent
                    engine_debug!(LOG_SOURCE, "set target {:?}", target);
                }
                RenderCommand::DrawView { view, gui_only } => {
                    self.draw_view(view, *gui_only, vertex_cache);
                }
                RenderCommand::CopyRender(params) => {
                    engine_debug!(
                        LOG_SOURCE,
                        "copy render {}x{} at ({}, {})",
                        params.image_width,
                        params.image_height,
                        params.x,
                        params.y
                    );
                }
                RenderCommand::PostProcess { view } => {
                    // same dynamic state as a view; the filter passes bind here
                    self.draw_view(view, false, vertex_cache);
                }
            }
        }

        self.end_frame()?;

        self.stats.total_micro_sec = backend_start.elapsed().as_micros() as u64;
        Ok(())
    }

    /// Wait for this slot's submission, present it, advance to the other slot
    fn blocking_swap_buffers(&mut self) -> Result<()> {
        let slot = self.current_frame_data;

        if !self.command_buffer_recorded[slot] {
            return Ok(());
        }

        unsafe {
            self.device
                .wait_for_fences(&[self.command_buffer_fences[slot]], true, u64::MAX)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to wait for frame fence: {:?}", e))?;
            self.device
                .reset_fences(&[self.command_buffer_fences[slot]])
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to reset frame fence: {:?}", e))?;
        }
        self.command_buffer_recorded[slot] = false;

        let presented = self.swapchain.present(
            self.present_queue,
            self.current_swap_index,
            self.render_complete_semaphores[slot],
        )?;
        if !presented {
            self.pending_resize = true;
        }

        self.counter += 1;
        self.current_frame_data = (self.counter % NUM_FRAME_DATA as u64) as usize;

        Ok(())
    }

    fn check_cvars(&mut self, config: &RenderConfig) -> Result<()> {
        if config.vsync != self.config.vsync
            || config.prefer_srgb != self.config.prefer_srgb
            || config.anti_aliasing != self.config.anti_aliasing
        {
            self.pending_resize = true;
        }
        self.config = config.clone();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        engine_debug!(LOG_SOURCE, "resize requested: {}x{}", width, height);
        self.pending_resize = true;
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to wait for device idle: {:?}", e))
        }
    }

    /// Tear everything down in reverse creation order
    fn shutdown(&mut self) -> Result<()> {
        if self.shutdown_done {
            return Ok(());
        }
        self.shutdown_done = true;

        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to wait for device idle: {:?}", e))?;

            self.ctx.empty_all_garbage();
            if let Ok(mut staging) = self.ctx.staging.lock() {
                staging.shutdown();
            }

            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
            self.framebuffers.clear();
            self.device.destroy_render_pass(self.render_pass, None);
            self.render_targets.destroy(&self.device, &self.allocator);

            for i in 0..NUM_FRAME_DATA {
                self.device.destroy_fence(self.command_buffer_fences[i], None);
                self.device.destroy_semaphore(self.acquire_semaphores[i], None);
                self.device
                    .destroy_semaphore(self.render_complete_semaphores[i], None);
                self.device.destroy_query_pool(self.query_pools[i], None);
            }
            self.device.destroy_command_pool(self.command_pool, None);

            self.swapchain.destroy();

            // the allocator must release its device memory before the
            // device dies; both Arc copies go here, ours first and then
            // the context's (all allocations were drained above, so the
            // backend holds the last reference to the context)
            ManuallyDrop::drop(&mut self.allocator);
            if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
                ManuallyDrop::drop(&mut ctx.allocator);
            } else {
                engine_warn!(LOG_SOURCE, "GPU context still referenced at shutdown");
            }

            self.device.destroy_device(None);

            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
                crate::debug::print_validation_stats_report();
            }

            self.instance.destroy_instance(None);
        }

        engine_info!(LOG_SOURCE, "Vulkan backend shut down");
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if !self.shutdown_done {
            if let Err(e) = self.shutdown() {
                engine_warn!(LOG_SOURCE, "shutdown during drop failed: {}", e);
            }
        }
    }
}
