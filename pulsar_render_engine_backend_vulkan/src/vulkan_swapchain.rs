/// VulkanSwapchain - surface, swapchain images and present plumbing
///
/// Separated from the frame loop so it can be destroyed and recreated on
/// resize or on VK_ERROR_OUT_OF_DATE_KHR without touching the rest of the
/// backend. Acquire and present take their semaphores from the caller;
/// frame-slot synchronization stays with the backend.

use ash::vk;
use std::sync::Arc;

use pulsar_render_engine::pulsar::render::RenderConfig;
use pulsar_render_engine::pulsar::Result;
use pulsar_render_engine::{engine_debug, engine_err, engine_info};

const LOG_SOURCE: &str = "pulsar::vulkan";

pub struct VulkanSwapchain {
    device: Arc<ash::Device>,
    physical_device: vk::PhysicalDevice,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,

    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl VulkanSwapchain {
    pub fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        config: &RenderConfig,
    ) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);
        let mut swapchain = Self {
            device,
            physical_device,
            surface,
            surface_loader,
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
        };
        swapchain.create_swapchain(config)?;
        Ok(swapchain)
    }

    fn create_swapchain(&mut self, config: &RenderConfig) -> Result<()> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get surface capabilities: {:?}", e))?;

            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get surface formats: {:?}", e))?;

            let surface_format = if config.prefer_srgb {
                formats
                    .iter()
                    .find(|f| {
                        f.format == vk::Format::B8G8R8A8_SRGB || f.format == vk::Format::R8G8B8A8_SRGB
                    })
                    .unwrap_or(&formats[0])
            } else {
                formats
                    .iter()
                    .find(|f| {
                        f.format == vk::Format::B8G8R8A8_UNORM
                            || f.format == vk::Format::R8G8B8A8_UNORM
                    })
                    .unwrap_or(&formats[0])
            };

            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get present modes: {:?}", e))?;

            // FIFO is always available; MAILBOX gives unthrottled frames
            // without tearing when vsync is off
            let present_mode = if config.vsync {
                vk::PresentModeKHR::FIFO
            } else if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
                vk::PresentModeKHR::IMMEDIATE
            } else {
                vk::PresentModeKHR::FIFO
            };

            let extent = capabilities.current_extent;

            let mut min_image_count = capabilities.min_image_count + 1;
            if capabilities.max_image_count > 0 {
                min_image_count = min_image_count.min(capabilities.max_image_count);
            }

            let create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(self.surface)
                .min_image_count(min_image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .old_swapchain(self.swapchain);

            let new_swapchain = self
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create swapchain: {:?}", e))?;

            self.destroy_swapchain_resources();
            self.swapchain = new_swapchain;

            self.images = self
                .swapchain_loader
                .get_swapchain_images(self.swapchain)
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to get swapchain images: {:?}", e))?;

            self.image_views = self
                .images
                .iter()
                .map(|&image| {
                    let view_info = vk::ImageViewCreateInfo::default()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(surface_format.format)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        });
                    self.device.create_image_view(&view_info, None)
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create swapchain image views: {:?}", e))?;

            self.format = surface_format.format;
            self.extent = extent;

            engine_info!(
                LOG_SOURCE,
                "swapchain created: {}x{} {:?} {:?}, {} images",
                extent.width,
                extent.height,
                surface_format.format,
                present_mode,
                self.images.len()
            );
            Ok(())
        }
    }

    /// Rebuild the swapchain against the current surface size
    ///
    /// Caller must have waited the device idle first.
    pub fn recreate(&mut self, config: &RenderConfig) -> Result<()> {
        engine_debug!(LOG_SOURCE, "recreating swapchain");
        self.create_swapchain(config)
    }

    /// Acquire the next image, signalling `semaphore` when it is ready
    ///
    /// Returns None when the swapchain is out of date and must be recreated.
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<Option<u32>> {
        unsafe {
            match self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            ) {
                Ok((image_index, _suboptimal)) => Ok(Some(image_index)),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
                Err(e) => Err(engine_err!(LOG_SOURCE, "Failed to acquire swapchain image: {:?}", e)),
            }
        }
    }

    /// Present `image_index` after `wait_semaphore` signals
    ///
    /// Returns false when the swapchain has gone out of date.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool> {
        unsafe {
            let wait_semaphores = [wait_semaphore];
            let swapchains = [self.swapchain];
            let image_indices = [image_index];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            match self.swapchain_loader.queue_present(queue, &present_info) {
                Ok(suboptimal) => Ok(!suboptimal),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
                Err(e) => Err(engine_err!(LOG_SOURCE, "Failed to present: {:?}", e)),
            }
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn destroy_swapchain_resources(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.image_views.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            self.images.clear();
        }
    }

    /// Destroy the swapchain and the surface; only safe after wait_idle
    pub fn destroy(&mut self) {
        self.destroy_swapchain_resources();
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
