//! Synchronization primitives.

use crate::command::CommandPool;
use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Per-frame synchronization resources and the command buffer they guard.
///
/// The fence starts signaled so the first frame does not block. It must be
/// waited on before the command buffer is reused.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
    /// Primary command buffer recorded each frame
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and `pool` must belong to it.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool) -> Result<Self> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            command_buffer: vk::CommandBuffer::null(),
        };

        if let Err(e) = sync.create_all(device, pool) {
            sync.destroy(device, pool);
            return Err(e);
        }
        Ok(sync)
    }

    unsafe fn create_all(&mut self, device: &ash::Device, pool: &CommandPool) -> Result<()> {
        self.image_available = create_semaphore(device)?;
        self.render_finished = create_semaphore(device)?;
        self.in_flight = create_fence(device, true)?;
        self.command_buffer = pool.allocate(device)?;
        Ok(())
    }

    /// Destroy synchronization resources and free the command buffer.
    ///
    /// Null handles are skipped.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device, pool: &CommandPool) {
        if self.command_buffer != vk::CommandBuffer::null() {
            pool.free(device, self.command_buffer);
        }
        if self.in_flight != vk::Fence::null() {
            device.destroy_fence(self.in_flight, None);
        }
        if self.render_finished != vk::Semaphore::null() {
            device.destroy_semaphore(self.render_finished, None);
        }
        if self.image_available != vk::Semaphore::null() {
            device.destroy_semaphore(self.image_available, None);
        }
        self.command_buffer = vk::CommandBuffer::null();
        self.in_flight = vk::Fence::null();
        self.render_finished = vk::Semaphore::null();
        self.image_available = vk::Semaphore::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceContextBuilder;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn fence_starts_signaled() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let device = ctx.device();
        unsafe {
            let mut sync = FrameSync::new(device, ctx.command_pool()).unwrap();
            // Returns immediately on a pre-signaled fence
            wait_for_fence(device, sync.in_flight, 0).unwrap();
            reset_fence(device, sync.in_flight).unwrap();
            assert!(!device.get_fence_status(sync.in_flight).unwrap());
            sync.destroy(device, ctx.command_pool());
        }
    }
}
