//! Memory type selection and resource creation.
//!
//! Every buffer and image owns exactly one `VkDeviceMemory` allocation, sized
//! to the driver-reported requirement and bound at offset 0.

use crate::context::DeviceContext;
use crate::error::{GpuError, ResourceStage, Result};
use ash::vk;

/// Find the lowest memory type index allowed by `type_filter` whose property
/// flags contain all of `required`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    properties
        .memory_types
        .iter()
        .take(properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_filter,
            required,
        })
}

/// Role of a buffer, which fixes its usage and memory properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local vertex data, filled through a staging copy.
    Vertex,
    /// Device-local 32-bit index data, filled through a staging copy.
    Index,
    /// Host-visible transfer source.
    Staging,
    /// Host-visible transfer destination used to read results back.
    Readback,
}

impl BufferKind {
    /// Buffer usage flags for this kind.
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory property flags required for this kind.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::Vertex | Self::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::Staging | Self::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    /// Whether the CPU can map buffers of this kind.
    pub fn is_host_visible(self) -> bool {
        self.memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

/// Role of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Sampled 8-bit RGBA sRGB texture, filled through a staging copy.
    Texture,
}

impl ImageKind {
    /// Image usage flags for this kind.
    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            Self::Texture => vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        }
    }

    /// Memory property flags required for this kind.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::Texture => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    /// Pixel format for this kind.
    pub fn format(self) -> vk::Format {
        match self {
            Self::Texture => vk::Format::R8G8B8A8_SRGB,
        }
    }

    /// Bytes per pixel.
    pub fn channels(self) -> u32 {
        match self {
            Self::Texture => 4,
        }
    }
}

/// Allocate memory satisfying `requirements` with the given properties.
///
/// # Safety
/// The device must be valid.
unsafe fn allocate_memory(
    ctx: &DeviceContext,
    requirements: &vk::MemoryRequirements,
    required: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(ctx.memory_properties(), requirements.memory_type_bits, required)?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    ctx.device()
        .allocate_memory(&alloc_info, None)
        .map_err(GpuError::resource(ResourceStage::Allocate))
}

/// A buffer with its own memory allocation.
#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Size requested by the caller.
    pub size: u64,
    /// Size of the backing allocation; never less than `size`.
    pub allocation_size: u64,
    pub kind: BufferKind,
}

impl GpuBuffer {
    /// Create a buffer of `size` bytes with memory bound at offset 0.
    pub fn new(ctx: &DeviceContext, size: u64, kind: BufferKind) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState(
                "Buffer size must be non-zero".to_string(),
            ));
        }

        let device = ctx.device();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(GpuError::resource(ResourceStage::Create))?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match unsafe { allocate_memory(ctx, &requirements, kind.memory_properties()) }
        {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_buffer(buffer, None);
            }
            return Err(GpuError::resource(ResourceStage::Bind)(e));
        }

        tracing::trace!(
            "Created {:?} buffer: {} bytes ({} allocated)",
            kind,
            size,
            requirements.size
        );

        Ok(Self {
            buffer,
            memory,
            size,
            allocation_size: requirements.size,
            kind,
        })
    }

    fn ensure_host_visible(&self) -> Result<()> {
        if self.kind.is_host_visible() {
            Ok(())
        } else {
            Err(GpuError::InvalidState(format!(
                "{:?} buffer is not host-visible",
                self.kind
            )))
        }
    }

    /// Copy `data` to the start of the buffer (host-visible kinds only).
    pub fn write_bytes(&self, ctx: &DeviceContext, data: &[u8]) -> Result<()> {
        self.ensure_host_visible()?;
        if data.len() as u64 > self.size {
            return Err(GpuError::InvalidState(format!(
                "{} bytes do not fit in a {} byte buffer",
                data.len(),
                self.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let device = ctx.device();
        unsafe {
            let ptr = device
                .map_memory(
                    self.memory,
                    0,
                    data.len() as u64,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(GpuError::resource(ResourceStage::Map))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Copy typed data to the start of the buffer (host-visible kinds only).
    pub fn write<T: bytemuck::Pod>(&self, ctx: &DeviceContext, data: &[T]) -> Result<()> {
        self.write_bytes(ctx, bytemuck::cast_slice(data))
    }

    /// Read the first `size` bytes of the buffer (host-visible kinds only).
    pub fn read_bytes(&self, ctx: &DeviceContext) -> Result<Vec<u8>> {
        self.ensure_host_visible()?;

        let device = ctx.device();
        let len = self.size as usize;
        let mut out = vec![0u8; len];
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(GpuError::resource(ResourceStage::Map))?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), len);
            device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    /// Free the memory, then destroy the buffer.
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.free_memory(self.memory, None);
        device.destroy_buffer(self.buffer, None);
        self.memory = vk::DeviceMemory::null();
        self.buffer = vk::Buffer::null();
    }
}

/// A 2D image with its own memory allocation.
#[derive(Debug)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub format: vk::Format,
    pub allocation_size: u64,
    pub kind: ImageKind,
}

impl GpuImage {
    /// Create a single-mip 2D image in the undefined layout.
    pub fn new(ctx: &DeviceContext, width: u32, height: u32, kind: ImageKind) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidState(format!(
                "Image extent {width}x{height} is empty"
            )));
        }

        let device = ctx.device();
        let format = kind.format();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(GpuError::resource(ResourceStage::Create))?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = match unsafe { allocate_memory(ctx, &requirements, kind.memory_properties()) }
        {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_image(image, None);
            }
            return Err(GpuError::resource(ResourceStage::Bind)(e));
        }

        Ok(Self {
            image,
            memory,
            width,
            height,
            channels: kind.channels(),
            format,
            allocation_size: requirements.size,
            kind,
        })
    }

    /// Number of bytes in a tightly packed copy of the image.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.channels)
    }

    /// Free the memory, then destroy the image.
    ///
    /// # Safety
    /// The image must not be in use by the GPU and no view may reference it.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.free_memory(self.memory, None);
        device.destroy_image(self.image, None);
        self.memory = vk::DeviceMemory::null();
        self.image = vk::Image::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceContextBuilder;
    use crate::transfer::TransferEngine;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            *slot = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    fn typical_table() -> vk::PhysicalDeviceMemoryProperties {
        memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn picks_lowest_matching_index() {
        let props = typical_table();
        let host = BufferKind::Staging.memory_properties();

        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b1100, host).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b1000, host).unwrap(), 3);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn empty_requirement_accepts_first_allowed_type() {
        let props = typical_table();
        assert_eq!(
            find_memory_type(&props, 0b0100, vk::MemoryPropertyFlags::empty()).unwrap(),
            2
        );
    }

    #[test]
    fn zero_filter_never_matches() {
        let props = typical_table();
        for required in [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferKind::Staging.memory_properties(),
        ] {
            let err = find_memory_type(&props, 0, required).unwrap_err();
            assert!(matches!(
                err,
                GpuError::NoSuitableMemoryType { type_filter: 0, .. }
            ));
        }
    }

    #[test]
    fn ignores_types_past_reported_count() {
        let mut props = typical_table();
        props.memory_type_count = 1;
        let err = find_memory_type(&props, u32::MAX, BufferKind::Staging.memory_properties());
        assert!(err.is_err());
    }

    #[test]
    fn buffer_kinds_have_fixed_usage() {
        assert!(BufferKind::Vertex
            .usage()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert!(BufferKind::Index
            .usage()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(
            BufferKind::Staging.usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert!(!BufferKind::Vertex.is_host_visible());
        assert!(!BufferKind::Index.is_host_visible());
        assert!(BufferKind::Staging.is_host_visible());
        assert!(BufferKind::Readback.is_host_visible());
    }

    #[test]
    fn texture_kind_is_srgb_rgba() {
        assert_eq!(ImageKind::Texture.format(), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(ImageKind::Texture.channels(), 4);
        assert!(ImageKind::Texture
            .usage()
            .contains(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn allocation_covers_requested_size() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();

        for size in [1, 3, 64, 1000, 65_537] {
            for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Staging] {
                let mut buffer = GpuBuffer::new(&ctx, size, kind).unwrap();
                assert!(buffer.allocation_size >= size);
                unsafe { buffer.destroy(ctx.device()) };
            }
        }
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn zero_sized_buffer_is_rejected() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        assert!(GpuBuffer::new(&ctx, 0, BufferKind::Vertex).is_err());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn device_local_buffer_cannot_be_mapped() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let mut buffer = GpuBuffer::new(&ctx, 16, BufferKind::Vertex).unwrap();
        assert!(buffer.write_bytes(&ctx, &[0; 16]).is_err());
        unsafe { buffer.destroy(ctx.device()) };
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn staging_write_then_read() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let mut buffer = GpuBuffer::new(&ctx, 8, BufferKind::Staging).unwrap();
        buffer.write::<u32>(&ctx, &[0xdead_beef, 7]).unwrap();
        let bytes = buffer.read_bytes(&ctx).unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&[0xdead_beef, 7]));
        unsafe { buffer.destroy(ctx.device()) };
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn texture_image_allocation() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let mut image = GpuImage::new(&ctx, 4, 4, ImageKind::Texture).unwrap();
        assert_eq!(image.byte_len(), 64);
        assert!(image.allocation_size >= 64);
        let pixels = vec![255u8; 64];
        TransferEngine::new(&ctx).upload_image(&image, &pixels).unwrap();
        unsafe { image.destroy(ctx.device()) };
    }
}
