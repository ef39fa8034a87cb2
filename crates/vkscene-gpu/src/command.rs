//! Command pool and one-time command buffers.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool for allocating command buffers.
#[derive(Debug)]
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a command pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        device
            .allocate_command_buffers(&alloc_info)?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::InvalidState("Driver returned no command buffer".to_string()))
    }

    /// Return a command buffer to the pool.
    ///
    /// # Safety
    /// The command buffer must not be pending execution.
    pub unsafe fn free(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.free_command_buffers(self.pool, &[cmd]);
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Record `f` into a fresh command buffer, submit it and block until the
/// queue is idle. The command buffer is freed on every path.
///
/// # Safety
/// All handles must be valid and `queue` must belong to the pool's family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate(device)?;
    let result = record_and_wait(device, cmd, queue, f);
    pool.free(device, cmd);
    result
}

unsafe fn record_and_wait<F>(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    f(cmd);
    end_command_buffer(device, cmd)?;

    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
    device
        .queue_submit(queue, &[submit_info], vk::Fence::null())
        .map_err(GpuError::QueueSubmit)?;
    device.queue_wait_idle(queue)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceContextBuilder;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn empty_single_time_submission_completes() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        let mut recorded = false;
        unsafe {
            execute_single_time_commands(
                ctx.device(),
                ctx.command_pool(),
                ctx.graphics_queue(),
                |_| recorded = true,
            )
            .unwrap();
        }
        assert!(recorded);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn pool_uses_graphics_family() {
        let ctx = DeviceContextBuilder::new()
            .validation(false)
            .build_headless()
            .unwrap();
        assert_eq!(
            ctx.command_pool().queue_family(),
            ctx.graphics_queue_family()
        );
    }
}
