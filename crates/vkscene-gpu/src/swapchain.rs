//! Swapchain negotiation and management.
//!
//! The selection functions are pure so they can be checked against any
//! surface description. [`Swapchain`] is never resized in place: on resize
//! the old one is destroyed and a new one negotiated from scratch.

use crate::capabilities::QueueFamilyIndices;
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::surface::SwapchainSupport;
use ash::vk;

/// Surface format used when the surface offers it.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Select the best surface format.
///
/// BGRA8 sRGB with the non-linear colour space when offered, otherwise the
/// first reported format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == PREFERRED_SURFACE_FORMAT.format
                && format.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| available.first())
        .copied()
        .ok_or(GpuError::SwapchainCreation(
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        ))
}

/// Select the present mode: mailbox when available, otherwise FIFO.
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // Always supported
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
///
/// A current extent of `u32::MAX` means the surface lets the swapchain pick;
/// the window size is then clamped into the allowed range.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;
        vk::Extent2D {
            width: desired_width.max(min.width).min(max.width.max(min.width)),
            height: desired_height.max(min.height).min(max.height.max(min.height)),
        }
    }
}

/// One more image than the minimum, capped by a non-zero maximum.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// How swapchain images are shared between queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl QueueSharing {
    pub fn for_families(families: QueueFamilyIndices) -> Self {
        if families.is_shared() {
            Self::Exclusive
        } else {
            Self::Concurrent([families.graphics, families.present])
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(families) => families,
        }
    }
}

/// Parameters negotiated for a new swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: QueueSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Derive every swapchain parameter from the surface and window size.
pub fn negotiate(
    support: &SwapchainSupport,
    families: QueueFamilyIndices,
    width: u32,
    height: u32,
) -> Result<SwapchainPlan> {
    Ok(SwapchainPlan {
        surface_format: select_surface_format(&support.formats)?,
        present_mode: select_present_mode(&support.present_modes),
        extent: calculate_extent(&support.capabilities, width, height),
        image_count: select_image_count(&support.capabilities),
        sharing: QueueSharing::for_families(families),
        pre_transform: support.capabilities.current_transform,
    })
}

/// Swapchain with one view per image.
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Negotiate and create a swapchain for a window of `width`×`height`.
    pub fn new(ctx: &DeviceContext, width: u32, height: u32) -> Result<Self> {
        let surface = ctx
            .surface()
            .ok_or_else(|| GpuError::InvalidState("Headless context cannot present".to_string()))?;
        let support = SwapchainSupport::query(ctx)?;
        let plan = negotiate(&support, ctx.queue_families(), width, height)?;

        let loader = ash::khr::swapchain::Device::new(ctx.instance(), ctx.device());
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing.mode())
            .queue_family_indices(plan.sharing.family_indices())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(GpuError::SwapchainCreation)?
        };

        // The driver may create more images than requested
        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(GpuError::SwapchainCreation(e));
            }
        };

        let image_views =
            match unsafe { create_image_views(ctx.device(), &images, plan.surface_format.format) }
            {
                Ok(views) => views,
                Err(e) => {
                    unsafe { loader.destroy_swapchain(swapchain, None) };
                    return Err(e);
                }
            };

        tracing::info!(
            "Swapchain created: {}x{}, {:?}/{:?}, {:?}, {} images (requested {})",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            images.len(),
            plan.image_count
        );

        Ok(Self {
            loader,
            swapchain,
            images,
            image_views,
            format: plan.surface_format.format,
            color_space: plan.surface_format.color_space,
            present_mode: plan.present_mode,
            extent: plan.extent,
        })
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, returning its index and whether the swapchain
    /// is suboptimal. Waits without a timeout.
    ///
    /// # Safety
    /// The semaphore must be unsignaled with no pending signal operation.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        match self
            .loader
            .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        {
            Ok(acquired) => Ok(acquired),
            // No image was acquired; the semaphore stays unsignaled
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SwapchainOutOfDate),
            Err(e) => Err(GpuError::Vulkan(e)),
        }
    }

    /// Present an image, returning whether the swapchain is suboptimal.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.loader.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SwapchainOutOfDate),
            Err(e) => Err(GpuError::Present(e)),
        }
    }

    /// Destroy the image views, then the swapchain.
    ///
    /// # Safety
    /// The swapchain must not be in use and no framebuffer may reference its views.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view, None);
        }
        self.loader.destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

/// Create one 2D colour view per image, cleaning up on failure.
unsafe fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        match device.create_image_view(&view_info, None) {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    device.destroy_image_view(view, None);
                }
                return Err(GpuError::SwapchainCreation(e));
            }
        }
    }
    Ok(views)
}
