//! One framebuffer per swapchain image view.

use crate::error::{GpuError, Result};
use crate::render_pass::RenderPass;
use crate::swapchain::Swapchain;
use ash::vk;

/// Framebuffers for every image of a swapchain.
///
/// References the swapchain's views and extent, so it must be rebuilt
/// whenever the swapchain is.
#[derive(Debug, Default)]
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl Framebuffers {
    /// # Safety
    /// The device, render pass and swapchain must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        swapchain: &Swapchain,
    ) -> Result<Self> {
        let extent = swapchain.extent;
        let mut framebuffers = Vec::with_capacity(swapchain.image_views.len());

        for &view in &swapchain.image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match device.create_framebuffer(&create_info, None) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for framebuffer in framebuffers {
                        device.destroy_framebuffer(framebuffer, None);
                    }
                    return Err(GpuError::FramebufferCreation(e));
                }
            }
        }

        Ok(Self {
            framebuffers,
            extent,
        })
    }

    /// Whole-framebuffer render area and scissor.
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Viewport covering the framebuffers with the full depth range.
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Framebuffer for the given swapchain image index.
    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Destroy all framebuffers.
    ///
    /// # Safety
    /// None of the framebuffers may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
    }
}
