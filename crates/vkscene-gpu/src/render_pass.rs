//! Single-subpass colour render pass.

use crate::error::{GpuError, Result};
use ash::vk;

/// Render pass with one cleared colour attachment that ends in
/// `PRESENT_SRC_KHR`.
#[derive(Debug)]
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
}

impl RenderPass {
    /// Create the render pass for swapchain images of `format`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, format: vk::Format) -> Result<Self> {
        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        // Keeps the layout transition and first write behind image acquisition
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = device
            .create_render_pass(&create_info, None)
            .map_err(GpuError::PipelineCreation)?;

        tracing::debug!("Render pass created for {:?}", format);

        Ok(Self {
            render_pass,
            format,
        })
    }

    /// Destroy the render pass.
    ///
    /// # Safety
    /// No framebuffer or pipeline created from it may still be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_render_pass(self.render_pass, None);
    }
}
