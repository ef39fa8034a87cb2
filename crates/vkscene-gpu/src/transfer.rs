//! Synchronous staging uploads.
//!
//! Every operation records a one-time command buffer, submits it to the
//! graphics queue and waits for the queue to go idle before returning, so a
//! staging buffer is never freed while the copy that reads it is pending.

use crate::command::execute_single_time_commands;
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{BufferKind, GpuBuffer, GpuImage};
use ash::vk;

/// Copies data between host and device-local resources.
pub struct TransferEngine<'a> {
    ctx: &'a DeviceContext,
}

impl<'a> TransferEngine<'a> {
    pub fn new(ctx: &'a DeviceContext) -> Self {
        Self { ctx }
    }

    /// Fill `dst` with `payload` through a temporary staging buffer.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn upload(&self, dst: &GpuBuffer, payload: &[u8]) -> Result<()> {
        let size = payload.len() as u64;
        if size > dst.size {
            return Err(GpuError::InvalidState(format!(
                "Payload of {size} bytes exceeds {:?} buffer of {} bytes",
                dst.kind, dst.size
            )));
        }
        if size == 0 {
            return Ok(());
        }

        let mut staging = GpuBuffer::new(self.ctx, size, BufferKind::Staging)?;
        let result = staging
            .write_bytes(self.ctx, payload)
            .and_then(|()| self.copy_buffer_to_buffer(&staging, dst, size));
        unsafe { staging.destroy(self.ctx.device()) };

        if result.is_ok() {
            tracing::debug!("Uploaded {} bytes into {:?} buffer", size, dst.kind);
        }
        result
    }

    /// Upload typed data into `dst`.
    pub fn upload_slice<T: bytemuck::Pod>(&self, dst: &GpuBuffer, data: &[T]) -> Result<()> {
        self.upload(dst, bytemuck::cast_slice(data))
    }

    /// Create a device-local buffer of `kind` holding `data`.
    pub fn create_buffer_with_data<T: bytemuck::Pod>(
        &self,
        kind: BufferKind,
        data: &[T],
    ) -> Result<GpuBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = GpuBuffer::new(self.ctx, bytes.len() as u64, kind)?;
        if let Err(e) = self.upload(&buffer, bytes) {
            unsafe { buffer.destroy(self.ctx.device()) };
            return Err(e);
        }
        Ok(buffer)
    }

    /// Copy the first `size` bytes of `src` into `dst`.
    pub fn copy_buffer_to_buffer(&self, src: &GpuBuffer, dst: &GpuBuffer, size: u64) -> Result<()> {
        if size > src.size || size > dst.size {
            return Err(GpuError::InvalidState(format!(
                "Copy of {size} bytes exceeds source ({}) or destination ({})",
                src.size, dst.size
            )));
        }

        let device = self.ctx.device();
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            execute_single_time_commands(
                device,
                self.ctx.command_pool(),
                self.ctx.graphics_queue(),
                |cmd| device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]),
            )
        }
    }

    /// Fill `dst` with tightly packed pixels and leave it in
    /// `SHADER_READ_ONLY_OPTIMAL` layout.
    ///
    /// The image must be in the undefined layout (freshly created).
    pub fn upload_image(&self, dst: &GpuImage, pixels: &[u8]) -> Result<()> {
        let expected = dst.byte_len();
        if pixels.len() as u64 != expected {
            return Err(GpuError::InvalidState(format!(
                "Expected {expected} bytes of pixel data for a {}x{} image, got {}",
                dst.width,
                dst.height,
                pixels.len()
            )));
        }

        let mut staging = GpuBuffer::new(self.ctx, expected, BufferKind::Staging)?;
        let result = staging
            .write_bytes(self.ctx, pixels)
            .and_then(|()| self.copy_staging_to_image(&staging, dst));
        unsafe { staging.destroy(self.ctx.device()) };

        if result.is_ok() {
            tracing::debug!(
                "Uploaded {}x{} image ({} bytes)",
                dst.width,
                dst.height,
                expected
            );
        }
        result
    }

    fn copy_staging_to_image(&self, staging: &GpuBuffer, dst: &GpuImage) -> Result<()> {
        let device = self.ctx.device();
        let subresource = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        let to_transfer_dst = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(dst.image)
            .subresource_range(subresource)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

        let to_shader_read = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(dst.image)
            .subresource_range(subresource)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: dst.width,
                height: dst.height,
                depth: 1,
            });

        unsafe {
            execute_single_time_commands(
                device,
                self.ctx.command_pool(),
                self.ctx.graphics_queue(),
                |cmd| {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_transfer_dst],
                    );
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging.buffer,
                        dst.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_shader_read],
                    );
                },
            )
        }
    }

    /// Copy the contents of `src` back to the host.
    ///
    /// Host-visible buffers are mapped directly; device-local buffers are
    /// first copied into a temporary read-back buffer.
    pub fn read_back(&self, src: &GpuBuffer) -> Result<Vec<u8>> {
        if src.kind.is_host_visible() {
            return src.read_bytes(self.ctx);
        }

        let mut readback = GpuBuffer::new(self.ctx, src.size, BufferKind::Readback)?;
        let result = self
            .copy_buffer_to_buffer(src, &readback, src.size)
            .and_then(|()| readback.read_bytes(self.ctx));
        unsafe { readback.destroy(self.ctx.device()) };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceContextBuilder;
    use crate::memory::ImageKind;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn repeated_uploads_are_identical() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let transfer = TransferEngine::new(&ctx);
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut first = GpuBuffer::new(&ctx, 1000, BufferKind::Vertex).unwrap();
        let mut second = GpuBuffer::new(&ctx, 1000, BufferKind::Vertex).unwrap();
        transfer.upload(&first, &payload).unwrap();
        transfer.upload(&second, &payload).unwrap();

        let a = transfer.read_back(&first).unwrap();
        let b = transfer.read_back(&second).unwrap();
        assert_eq!(a, payload);
        assert_eq!(a, b);

        unsafe {
            first.destroy(ctx.device());
            second.destroy(ctx.device());
        }
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn oversized_payload_is_rejected() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let transfer = TransferEngine::new(&ctx);
        let mut buffer = GpuBuffer::new(&ctx, 4, BufferKind::Index).unwrap();
        assert!(transfer.upload(&buffer, &[0; 8]).is_err());
        unsafe { buffer.destroy(ctx.device()) };
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn index_buffer_with_data_round_trips() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let transfer = TransferEngine::new(&ctx);
        let indices: [u32; 6] = [0, 3, 2, 2, 1, 0];
        let mut buffer = transfer
            .create_buffer_with_data(BufferKind::Index, &indices)
            .unwrap();
        let bytes = transfer.read_back(&buffer).unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&indices));
        unsafe { buffer.destroy(ctx.device()) };
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn image_upload_checks_pixel_count() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let transfer = TransferEngine::new(&ctx);
        let mut image = GpuImage::new(&ctx, 2, 2, ImageKind::Texture).unwrap();
        assert!(transfer.upload_image(&image, &[0; 15]).is_err());
        transfer.upload_image(&image, &[0; 16]).unwrap();
        unsafe { image.destroy(ctx.device()) };
    }
}
