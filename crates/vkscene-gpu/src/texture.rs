//! Sampled textures.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{GpuImage, ImageKind};
use crate::transfer::TransferEngine;
use ash::vk;

/// An uploaded RGBA image with a view and a linear, repeating sampler.
#[derive(Debug)]
pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    /// Upload tightly packed 8-bit RGBA `pixels` into a new texture.
    pub fn from_rgba(ctx: &DeviceContext, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let device = ctx.device();
        let mut image = GpuImage::new(ctx, width, height, ImageKind::Texture)?;

        let parts = TransferEngine::new(ctx)
            .upload_image(&image, pixels)
            .and_then(|()| unsafe { create_view(device, &image) })
            .and_then(|view| match unsafe { create_sampler(device) } {
                Ok(sampler) => Ok((view, sampler)),
                Err(e) => {
                    unsafe { device.destroy_image_view(view, None) };
                    Err(e)
                }
            });

        match parts {
            Ok((view, sampler)) => Ok(Self {
                image,
                view,
                sampler,
            }),
            Err(e) => {
                unsafe { image.destroy(device) };
                Err(e)
            }
        }
    }

    /// Destroy the sampler, the view, then the image.
    ///
    /// # Safety
    /// The texture must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_sampler(self.sampler, None);
        device.destroy_image_view(self.view, None);
        self.image.destroy(device);
    }
}

unsafe fn create_view(device: &ash::Device, image: &GpuImage) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image.image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(image.format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    device.create_image_view(&view_info, None).map_err(GpuError::from)
}

unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    device.create_sampler(&sampler_info, None).map_err(GpuError::from)
}
