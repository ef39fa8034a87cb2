//! Per-frame scheduling with a single frame in flight.
//!
//! Each frame waits for the previous submission's fence, acquires a swapchain
//! image, records, submits and presents. The fence is only reset once the
//! command buffer is recorded, so an out-of-date swapchain or a recording
//! failure never leaves it unsignaled with no work pending. A frame abandoned
//! after acquire is released with an empty batch that waits on the acquire
//! semaphore and signals the fence.
//!
//! The driver calls go through [`FrameBackend`] so the ordering can be
//! exercised without a GPU.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::framebuffer::Framebuffers;
use crate::memory::GpuBuffer;
use crate::pipeline::{GraphicsPipeline, PushConstants};
use crate::render_pass::RenderPass;
use crate::swapchain::Swapchain;
use crate::sync::FrameSync;
use ash::vk;

/// An image handed out by the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

/// Driver operations used by [`FrameScheduler`].
pub trait FrameBackend {
    /// Block until `fence` is signaled.
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()>;

    /// Return `fence` to the unsignaled state.
    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()>;

    /// Acquire the next presentable image, signaling `semaphore` when ready.
    /// Reports [`GpuError::SwapchainOutOfDate`] when no image was acquired.
    fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<AcquiredImage>;

    /// Record the draw for `image_index` into `cmd`.
    fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()>;

    /// Submit `cmd` after `wait`, signaling `signal` and `fence` on completion.
    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()>;

    /// Present `image_index` after `wait`, returning whether the swapchain is
    /// suboptimal.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool>;

    /// Submit an empty batch that waits on `wait` and signals the unsignaled
    /// `fence`.
    fn release(&mut self, wait: vk::Semaphore, fence: vk::Fence) -> Result<()>;
}

/// Result of one [`FrameScheduler::draw_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and queued for presentation.
    Presented { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be rebuilt.
    OutOfDate,
}

impl FrameOutcome {
    /// Whether swapchain-dependent state should be rebuilt.
    pub fn needs_rebuild(&self) -> bool {
        match self {
            Self::Presented { suboptimal, .. } => *suboptimal,
            Self::OutOfDate => true,
        }
    }
}

/// Drives frames using one set of sync objects.
#[derive(Debug)]
pub struct FrameScheduler {
    sync: FrameSync,
    frame_count: u64,
}

impl FrameScheduler {
    /// Wrap existing sync objects.
    pub fn new(sync: FrameSync) -> Self {
        Self {
            sync,
            frame_count: 0,
        }
    }

    /// Create the sync objects and command buffer from the context's pool.
    pub fn create(ctx: &DeviceContext) -> Result<Self> {
        let sync = unsafe { FrameSync::new(ctx.device(), ctx.command_pool()) }?;
        Ok(Self::new(sync))
    }

    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Number of frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Run one frame.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let sync = self.sync;

        backend.wait_for_fence(sync.in_flight)?;

        let acquired = match backend.acquire_next_image(sync.image_available) {
            Ok(acquired) => acquired,
            Err(GpuError::SwapchainOutOfDate) => return Ok(FrameOutcome::OutOfDate),
            Err(e) => return Err(e),
        };

        if let Err(e) = backend.record(sync.command_buffer, acquired.index) {
            self.abandon(backend, true);
            return Err(e);
        }

        backend.reset_fence(sync.in_flight)?;
        if let Err(e) = backend.submit(
            sync.command_buffer,
            sync.image_available,
            sync.render_finished,
            sync.in_flight,
        ) {
            self.abandon(backend, false);
            return Err(e);
        }
        self.frame_count += 1;

        match backend.present(acquired.index, sync.render_finished) {
            Ok(suboptimal) => Ok(FrameOutcome::Presented {
                image_index: acquired.index,
                suboptimal: suboptimal || acquired.suboptimal,
            }),
            Err(GpuError::SwapchainOutOfDate) => Ok(FrameOutcome::OutOfDate),
            Err(e) => Err(e),
        }
    }

    /// Return the fence and acquire semaphore of an unsubmitted frame to a
    /// state the next frame can wait on.
    fn abandon<B: FrameBackend>(&self, backend: &mut B, fence_signaled: bool) {
        let sync = self.sync;
        let result = if fence_signaled {
            backend.reset_fence(sync.in_flight)
        } else {
            Ok(())
        }
        .and_then(|()| backend.release(sync.image_available, sync.in_flight));

        if let Err(e) = result {
            tracing::warn!("Failed to release abandoned frame: {e}");
        }
    }

    /// Destroy the sync objects.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        self.sync.destroy(ctx.device(), ctx.command_pool());
    }
}

/// Everything the recorded draw refers to.
#[derive(Debug, Clone, Copy)]
pub struct DrawParams<'a> {
    pub render_pass: &'a RenderPass,
    pub pipeline: &'a GraphicsPipeline,
    pub framebuffers: &'a Framebuffers,
    pub vertex_buffer: &'a GpuBuffer,
    pub index_buffer: &'a GpuBuffer,
    pub index_count: u32,
    pub clear_color: [f32; 4],
    pub push_constants: PushConstants,
}

/// [`FrameBackend`] issuing real Vulkan calls.
pub struct VulkanFrameBackend<'a> {
    ctx: &'a DeviceContext,
    swapchain: &'a Swapchain,
    params: DrawParams<'a>,
}

impl<'a> VulkanFrameBackend<'a> {
    pub fn new(ctx: &'a DeviceContext, swapchain: &'a Swapchain, params: DrawParams<'a>) -> Self {
        Self {
            ctx,
            swapchain,
            params,
        }
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { crate::sync::wait_for_fence(self.ctx.device(), fence, u64::MAX) }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { crate::sync::reset_fence(self.ctx.device(), fence) }
    }

    fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<AcquiredImage> {
        let (index, suboptimal) = unsafe { self.swapchain.acquire_next_image(semaphore) }?;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let device = self.ctx.device();
        let params = &self.params;
        let framebuffer = params.framebuffers.get(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("No framebuffer for swapchain image {image_index}"))
        })?;

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            crate::command::begin_command_buffer(
                device,
                cmd,
                vk::CommandBufferUsageFlags::empty(),
            )?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: params.clear_color,
                },
            }];
            let render_area = params.framebuffers.render_area();
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(params.render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                params.pipeline.pipeline,
            );
            for range in PushConstants::ranges() {
                device.cmd_push_constants(
                    cmd,
                    params.pipeline.layout,
                    range.stage_flags,
                    range.offset,
                    params.push_constants.bytes_in(range),
                );
            }
            device.cmd_bind_vertex_buffers(cmd, 0, &[params.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(
                cmd,
                params.index_buffer.buffer,
                0,
                vk::IndexType::UINT32,
            );

            device.cmd_set_viewport(cmd, 0, &[params.framebuffers.viewport()]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            device.cmd_draw_indexed(cmd, params.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
            crate::command::end_command_buffer(device, cmd)
        }
    }

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let command_buffers = [cmd];
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [signal];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.graphics_queue(), &[submit_info], fence)
                .map_err(GpuError::QueueSubmit)
        }
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        unsafe {
            self.swapchain
                .present(self.ctx.present_queue(), image_index, &[wait])
        }
    }

    fn release(&mut self, wait: vk::Semaphore, fence: vk::Fence) -> Result<()> {
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.graphics_queue(), &[submit_info], fence)
                .map_err(GpuError::QueueSubmit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        /// Fence wait satisfied by the given submission, or by the initial
        /// signaled state.
        Wait(Option<u64>),
        Reset,
        Acquire(u32),
        AcquireOutOfDate,
        Record(u32),
        Submit(u64),
        Present(u32),
        /// Empty batch returning an abandoned frame's fence and semaphore.
        Release,
    }

    /// Simulated queue and swapchain. Submitted work completes when the CPU
    /// next waits on its fence. A released batch completes as submission 0.
    struct MockGpu {
        sync: FrameSync,
        image_count: u32,
        next_image: u32,
        fence_signaled: bool,
        image_available_signaled: bool,
        pending: Option<u64>,
        submissions: u64,
        acquire_out_of_date: bool,
        present_out_of_date: bool,
        acquire_suboptimal: bool,
        record_failures: u32,
        submit_failures: u32,
        events: Vec<Event>,
    }

    impl MockGpu {
        fn new(sync: FrameSync) -> Self {
            Self {
                sync,
                image_count: 3,
                next_image: 0,
                fence_signaled: true,
                image_available_signaled: false,
                pending: None,
                submissions: 0,
                acquire_out_of_date: false,
                present_out_of_date: false,
                acquire_suboptimal: false,
                record_failures: 0,
                submit_failures: 0,
                events: Vec::new(),
            }
        }
    }

    impl FrameBackend for MockGpu {
        fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
            assert_eq!(fence, self.sync.in_flight);
            if let Some(submission) = self.pending.take() {
                self.fence_signaled = true;
                self.events.push(Event::Wait(Some(submission)));
                Ok(())
            } else if self.fence_signaled {
                self.events.push(Event::Wait(None));
                Ok(())
            } else {
                Err(GpuError::InvalidState(
                    "Waiting on a fence that will never signal".to_string(),
                ))
            }
        }

        fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
            assert_eq!(fence, self.sync.in_flight);
            assert!(self.pending.is_none(), "fence reset while work is pending");
            self.fence_signaled = false;
            self.events.push(Event::Reset);
            Ok(())
        }

        fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<AcquiredImage> {
            assert_eq!(semaphore, self.sync.image_available);
            if self.acquire_out_of_date {
                self.events.push(Event::AcquireOutOfDate);
                return Err(GpuError::SwapchainOutOfDate);
            }
            assert!(
                !self.image_available_signaled,
                "acquire semaphore signaled twice without a wait"
            );
            self.image_available_signaled = true;
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            self.events.push(Event::Acquire(index));
            Ok(AcquiredImage {
                index,
                suboptimal: self.acquire_suboptimal,
            })
        }

        fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
            assert_eq!(cmd, self.sync.command_buffer);
            assert!(self.pending.is_none(), "command buffer recorded while in use");
            if self.record_failures > 0 {
                self.record_failures -= 1;
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
            }
            self.events.push(Event::Record(image_index));
            Ok(())
        }

        fn submit(
            &mut self,
            cmd: vk::CommandBuffer,
            wait: vk::Semaphore,
            signal: vk::Semaphore,
            fence: vk::Fence,
        ) -> Result<()> {
            assert_eq!(cmd, self.sync.command_buffer);
            assert_eq!(wait, self.sync.image_available);
            assert_eq!(signal, self.sync.render_finished);
            assert_eq!(fence, self.sync.in_flight);
            assert!(!self.fence_signaled, "submitted with a signaled fence");
            if self.submit_failures > 0 {
                self.submit_failures -= 1;
                return Err(GpuError::QueueSubmit(vk::Result::ERROR_DEVICE_LOST));
            }
            self.image_available_signaled = false;
            self.submissions += 1;
            self.pending = Some(self.submissions);
            self.events.push(Event::Submit(self.submissions));
            Ok(())
        }

        fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
            assert_eq!(wait, self.sync.render_finished);
            self.events.push(Event::Present(image_index));
            if self.present_out_of_date {
                Err(GpuError::SwapchainOutOfDate)
            } else {
                Ok(false)
            }
        }

        fn release(&mut self, wait: vk::Semaphore, fence: vk::Fence) -> Result<()> {
            assert_eq!(wait, self.sync.image_available);
            assert_eq!(fence, self.sync.in_flight);
            assert!(!self.fence_signaled, "released with a signaled fence");
            assert!(self.pending.is_none(), "released while work is pending");
            self.image_available_signaled = false;
            self.pending = Some(0);
            self.events.push(Event::Release);
            Ok(())
        }
    }

    fn fake_sync() -> FrameSync {
        FrameSync {
            image_available: vk::Semaphore::from_raw(1),
            render_finished: vk::Semaphore::from_raw(2),
            in_flight: vk::Fence::from_raw(3),
            command_buffer: vk::CommandBuffer::from_raw(4),
        }
    }

    #[test]
    fn second_frame_waits_for_first_submission() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());

        let first = scheduler.draw_frame(&mut gpu).unwrap();
        let second = scheduler.draw_frame(&mut gpu).unwrap();

        assert_eq!(
            first,
            FrameOutcome::Presented {
                image_index: 0,
                suboptimal: false
            }
        );
        assert_eq!(
            second,
            FrameOutcome::Presented {
                image_index: 1,
                suboptimal: false
            }
        );
        assert_eq!(
            gpu.events,
            vec![
                Event::Wait(None),
                Event::Acquire(0),
                Event::Record(0),
                Event::Reset,
                Event::Submit(1),
                Event::Present(0),
                Event::Wait(Some(1)),
                Event::Acquire(1),
                Event::Record(1),
                Event::Reset,
                Event::Submit(2),
                Event::Present(1),
            ]
        );
        assert_eq!(scheduler.frame_count(), 2);
    }

    #[test]
    fn image_indices_cycle_through_swapchain() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());

        let indices: Vec<u32> = (0..5)
            .map(|_| match scheduler.draw_frame(&mut gpu).unwrap() {
                FrameOutcome::Presented { image_index, .. } => image_index,
                FrameOutcome::OutOfDate => panic!("unexpected out-of-date"),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn out_of_date_acquire_leaves_fence_signaled() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());

        scheduler.draw_frame(&mut gpu).unwrap();
        gpu.acquire_out_of_date = true;
        let outcome = scheduler.draw_frame(&mut gpu).unwrap();
        assert_eq!(outcome, FrameOutcome::OutOfDate);
        assert!(outcome.needs_rebuild());

        // After a rebuild the next frame proceeds without deadlocking
        gpu.acquire_out_of_date = false;
        scheduler.draw_frame(&mut gpu).unwrap();

        assert_eq!(
            &gpu.events[6..],
            &[
                Event::Wait(Some(1)),
                Event::AcquireOutOfDate,
                Event::Wait(None),
                Event::Acquire(1),
                Event::Record(1),
                Event::Reset,
                Event::Submit(2),
                Event::Present(1),
            ]
        );
        assert_eq!(scheduler.frame_count(), 2);
    }

    #[test]
    fn out_of_date_present_still_counts_submission() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());
        gpu.present_out_of_date = true;

        assert_eq!(
            scheduler.draw_frame(&mut gpu).unwrap(),
            FrameOutcome::OutOfDate
        );
        assert_eq!(scheduler.frame_count(), 1);

        gpu.present_out_of_date = false;
        scheduler.draw_frame(&mut gpu).unwrap();
        assert_eq!(gpu.events[6], Event::Wait(Some(1)));
    }

    #[test]
    fn record_failure_does_not_stall_next_frame() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());
        gpu.record_failures = 1;

        let err = scheduler.draw_frame(&mut gpu).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(scheduler.frame_count(), 0);

        scheduler.draw_frame(&mut gpu).unwrap();
        assert_eq!(
            gpu.events,
            vec![
                Event::Wait(None),
                Event::Acquire(0),
                Event::Reset,
                Event::Release,
                Event::Wait(Some(0)),
                Event::Acquire(1),
                Event::Record(1),
                Event::Reset,
                Event::Submit(1),
                Event::Present(1),
            ]
        );
        assert_eq!(scheduler.frame_count(), 1);
    }

    #[test]
    fn submit_failure_does_not_stall_next_frame() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());
        gpu.submit_failures = 1;

        assert!(scheduler.draw_frame(&mut gpu).is_err());
        assert_eq!(scheduler.frame_count(), 0);

        scheduler.draw_frame(&mut gpu).unwrap();
        assert_eq!(
            gpu.events,
            vec![
                Event::Wait(None),
                Event::Acquire(0),
                Event::Record(0),
                Event::Reset,
                Event::Release,
                Event::Wait(Some(0)),
                Event::Acquire(1),
                Event::Record(1),
                Event::Reset,
                Event::Submit(1),
                Event::Present(1),
            ]
        );
        assert_eq!(scheduler.frame_count(), 1);
    }

    #[test]
    fn suboptimal_acquire_requests_rebuild() {
        let mut scheduler = FrameScheduler::new(fake_sync());
        let mut gpu = MockGpu::new(fake_sync());
        gpu.acquire_suboptimal = true;

        let outcome = scheduler.draw_frame(&mut gpu).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 0,
                suboptimal: true
            }
        );
        assert!(outcome.needs_rebuild());
    }

    #[test]
    fn driver_errors_propagate() {
        struct LostDevice;
        impl FrameBackend for LostDevice {
            fn wait_for_fence(&mut self, _: vk::Fence) -> Result<()> {
                Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
            }
            fn reset_fence(&mut self, _: vk::Fence) -> Result<()> {
                unreachable!()
            }
            fn acquire_next_image(&mut self, _: vk::Semaphore) -> Result<AcquiredImage> {
                unreachable!()
            }
            fn record(&mut self, _: vk::CommandBuffer, _: u32) -> Result<()> {
                unreachable!()
            }
            fn submit(
                &mut self,
                _: vk::CommandBuffer,
                _: vk::Semaphore,
                _: vk::Semaphore,
                _: vk::Fence,
            ) -> Result<()> {
                unreachable!()
            }
            fn present(&mut self, _: u32, _: vk::Semaphore) -> Result<bool> {
                unreachable!()
            }
            fn release(&mut self, _: vk::Semaphore, _: vk::Fence) -> Result<()> {
                unreachable!()
            }
        }

        let mut scheduler = FrameScheduler::new(fake_sync());
        let err = scheduler.draw_frame(&mut LostDevice).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(scheduler.frame_count(), 0);
    }
}
