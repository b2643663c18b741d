/// Render targets - depth buffer and optional MSAA color target
///
/// Sized to the swapchain extent, so they are destroyed and recreated
/// together with the swapchain on resize. With multisampling the render
/// pass draws into the MSAA color image and resolves into the swapchain
/// image; without it the swapchain image is the color attachment and only
/// the depth image is added.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use std::sync::{Arc, Mutex};

use pulsar_render_engine::pulsar::{Error, Result};
use pulsar_render_engine::{engine_err, engine_warn};

const LOG_SOURCE: &str = "pulsar::vulkan";

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

struct TargetImage {
    image: vk::Image,
    allocation: Option<Allocation>,
    view: vk::ImageView,
}

/// Depth target and, above one sample, the multisampled color target
pub struct RenderTargets {
    depth: TargetImage,
    msaa_color: Option<TargetImage>,
    samples: vk::SampleCountFlags,
}

impl RenderTargets {
    pub fn new(
        device: &ash::Device,
        allocator: &Arc<Mutex<Allocator>>,
        extent: vk::Extent2D,
        color_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let depth = create_target_image(
            device,
            allocator,
            extent,
            DEPTH_FORMAT,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            "depth target",
        )?;

        let msaa_color = if samples != vk::SampleCountFlags::TYPE_1 {
            Some(create_target_image(
                device,
                allocator,
                extent,
                color_format,
                samples,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
                "msaa color target",
            )?)
        } else {
            None
        };

        Ok(Self {
            depth,
            msaa_color,
            samples,
        })
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.view
    }

    /// The MSAA color view, present only above one sample
    pub fn msaa_color_view(&self) -> Option<vk::ImageView> {
        self.msaa_color.as_ref().map(|t| t.view)
    }

    /// Destroy the images; only safe after the device is idle
    pub fn destroy(&mut self, device: &ash::Device, allocator: &Arc<Mutex<Allocator>>) {
        destroy_target_image(device, allocator, &mut self.depth);
        if let Some(mut target) = self.msaa_color.take() {
            destroy_target_image(device, allocator, &mut target);
        }
    }
}

/// Clamp a requested sample count to what the device supports
///
/// Unsupported counts degrade to the next supported one rather than
/// failing; no multisampling is always available.
pub fn clamp_sample_count(
    requested: u32,
    limits: &vk::PhysicalDeviceLimits,
) -> vk::SampleCountFlags {
    let supported =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    let mut candidates = [
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
    ]
    .into_iter()
    .filter(|&(count, flag)| count <= requested && supported.contains(flag));

    match candidates.next() {
        Some((count, flag)) => {
            if count < requested {
                engine_warn!(
                    LOG_SOURCE,
                    "{}x MSAA not supported, using {}x",
                    requested,
                    count
                );
            }
            flag
        }
        None => {
            if requested > 1 {
                engine_warn!(LOG_SOURCE, "{}x MSAA not supported, disabled", requested);
            }
            vk::SampleCountFlags::TYPE_1
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn create_target_image(
    device: &ash::Device,
    allocator: &Arc<Mutex<Allocator>>,
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    aspect_mask: vk::ImageAspectFlags,
    name: &'static str,
) -> Result<TargetImage> {
    unsafe {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = device
            .create_image(&image_info, None)
            .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create {}: {:?}", name, e))?;

        let requirements = device.get_image_memory_requirements(image);
        let allocation = allocator
            .lock()
            .map_err(|_| Error::BackendError("allocator lock poisoned".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| engine_err!(LOG_SOURCE, "Failed to allocate {}: {:?}", name, e))?;

        device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .map_err(|e| engine_err!(LOG_SOURCE, "Failed to bind {} memory: {:?}", name, e))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = device
            .create_image_view(&view_info, None)
            .map_err(|e| engine_err!(LOG_SOURCE, "Failed to create {} view: {:?}", name, e))?;

        Ok(TargetImage {
            image,
            allocation: Some(allocation),
            view,
        })
    }
}

fn destroy_target_image(
    device: &ash::Device,
    allocator: &Arc<Mutex<Allocator>>,
    target: &mut TargetImage,
) {
    unsafe {
        device.destroy_image_view(target.view, None);
        device.destroy_image(target.image, None);
    }
    if let Some(allocation) = target.allocation.take() {
        if let Ok(mut allocator) = allocator.lock() {
            if let Err(e) = allocator.free(allocation) {
                engine_warn!(LOG_SOURCE, "failed to free render target memory: {:?}", e);
            }
        }
    }
}
