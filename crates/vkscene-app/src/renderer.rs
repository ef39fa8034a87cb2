//! Renderer assembly.
//!
//! Owns every GPU object in construction order: device context, mesh
//! buffers, render pass and pipeline, swapchain and framebuffers, then the
//! frame scheduler. Swapchain-dependent state is rebuilt on resize and when
//! a frame reports the swapchain as out of date or suboptimal.

use anyhow::Context as _;
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};
use vkscene_gpu::ash::{self, vk};
use vkscene_gpu::{
    BufferKind, DeviceContext, DeviceContextBuilder, DrawParams, FrameOutcome, FrameScheduler,
    Framebuffers, GpuBuffer, GraphicsPipeline, PushConstants, RenderPass, Swapchain,
    TransferEngine, VulkanFrameBackend,
};
use winit::dpi::PhysicalSize;

use crate::config::AppConfig;
use crate::mesh::Mesh;

/// Vertex and index buffers for one mesh.
struct MeshBuffers {
    vertex: GpuBuffer,
    index: GpuBuffer,
    index_count: u32,
}

impl MeshBuffers {
    fn upload(ctx: &DeviceContext, mesh: &Mesh) -> vkscene_gpu::Result<Self> {
        let transfer = TransferEngine::new(ctx);
        let mut vertex = transfer.create_buffer_with_data(BufferKind::Vertex, &mesh.vertices)?;
        let index = match transfer.create_buffer_with_data(BufferKind::Index, &mesh.indices) {
            Ok(index) => index,
            Err(e) => {
                unsafe { vertex.destroy(ctx.device()) };
                return Err(e);
            }
        };

        Ok(Self {
            vertex,
            index,
            index_count: mesh.index_count(),
        })
    }

    unsafe fn destroy(&mut self, device: &ash::Device) {
        self.index.destroy(device);
        self.vertex.destroy(device);
    }
}

/// Render pass and the pipeline compiled against it.
struct PipelineState {
    render_pass: RenderPass,
    pipeline: GraphicsPipeline,
}

impl PipelineState {
    fn new(
        device: &ash::Device,
        format: vk::Format,
        vertex_shader: &[u32],
        fragment_shader: &[u32],
    ) -> vkscene_gpu::Result<Self> {
        let render_pass = unsafe { RenderPass::new(device, format) }?;
        match unsafe { GraphicsPipeline::new(device, &render_pass, vertex_shader, fragment_shader) }
        {
            Ok(pipeline) => Ok(Self {
                render_pass,
                pipeline,
            }),
            Err(e) => {
                unsafe { render_pass.destroy(device) };
                Err(e)
            }
        }
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        self.pipeline.destroy(device);
        self.render_pass.destroy(device);
    }
}

/// Swapchain and the framebuffers wrapping its views.
struct SwapchainTargets {
    swapchain: Swapchain,
    framebuffers: Framebuffers,
}

impl SwapchainTargets {
    unsafe fn destroy(&mut self, device: &ash::Device) {
        self.framebuffers.destroy(device);
        self.swapchain.destroy(device);
    }
}

/// Draws one indexed mesh into a window every frame.
pub struct Renderer {
    scheduler: Option<FrameScheduler>,
    targets: Option<SwapchainTargets>,
    pipeline: Option<PipelineState>,
    buffers: Option<MeshBuffers>,
    vertex_shader: Vec<u32>,
    fragment_shader: Vec<u32>,
    clear_color: [f32; 4],
    transform: Mat4,
    color_shift: f32,
    size: PhysicalSize<u32>,
    needs_rebuild: bool,
    // Dropped last; everything above is destroyed explicitly in `Drop`.
    ctx: DeviceContext,
}

impl Renderer {
    /// Create the device, upload `mesh` and build the first swapchain.
    ///
    /// `window` must outlive the renderer.
    pub fn new<W>(
        window: &W,
        size: PhysicalSize<u32>,
        config: &AppConfig,
        mesh: &Mesh,
    ) -> anyhow::Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        mesh.validate().context("Invalid mesh")?;

        let vertex_shader = match &config.vertex_shader {
            Some(path) => vkscene_gpu::load_spirv(path)?,
            None => vkscene_shaders::mesh_vertex_shader().to_vec(),
        };
        let fragment_shader = match &config.fragment_shader {
            Some(path) => vkscene_gpu::load_spirv(path)?,
            None => vkscene_shaders::mesh_fragment_shader().to_vec(),
        };

        let ctx = DeviceContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .build(window)
            .context("Failed to create device context")?;

        info!("GPU: {}", ctx.device_info().summary());

        // Partially built state is released by `Drop` if a later step fails.
        let mut renderer = Self {
            scheduler: None,
            targets: None,
            pipeline: None,
            buffers: None,
            vertex_shader,
            fragment_shader,
            clear_color: config.clear_color,
            transform: Mat4::IDENTITY,
            color_shift: 0.0,
            size,
            needs_rebuild: false,
            ctx,
        };

        renderer.buffers =
            Some(MeshBuffers::upload(&renderer.ctx, mesh).context("Failed to upload mesh")?);
        renderer.rebuild()?;
        renderer.scheduler = Some(
            FrameScheduler::create(&renderer.ctx).context("Failed to create frame sync objects")?,
        );

        Ok(renderer)
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.scheduler.as_ref().map_or(0, FrameScheduler::frame_count)
    }

    /// Current swapchain extent, if one exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.targets.as_ref().map(|t| t.swapchain.extent)
    }

    /// Width over height of the window, 1.0 while it has no area.
    pub fn aspect_ratio(&self) -> f32 {
        if self.size.height == 0 {
            1.0
        } else {
            self.size.width as f32 / self.size.height as f32
        }
    }

    /// Clip-space transform pushed to the vertex shader.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn set_color_shift(&mut self, color_shift: f32) {
        self.color_shift = color_shift;
    }

    /// Track a new window size, rebuilding immediately unless it is zero.
    pub fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.size = PhysicalSize::new(width, height);
        if width == 0 || height == 0 {
            debug!("Window minimized, pausing rendering");
            self.needs_rebuild = true;
            return Ok(());
        }
        self.rebuild()
    }

    /// Draw and present one frame.
    ///
    /// Does nothing while the window has zero area.
    pub fn render(&mut self) -> anyhow::Result<()> {
        if self.size.width == 0 || self.size.height == 0 {
            return Ok(());
        }
        if self.needs_rebuild || self.targets.is_none() {
            self.rebuild()?;
        }

        let (Some(scheduler), Some(targets), Some(state), Some(buffers)) = (
            self.scheduler.as_mut(),
            self.targets.as_ref(),
            self.pipeline.as_ref(),
            self.buffers.as_ref(),
        ) else {
            anyhow::bail!("Renderer used before initialization completed");
        };

        let params = DrawParams {
            render_pass: &state.render_pass,
            pipeline: &state.pipeline,
            framebuffers: &targets.framebuffers,
            vertex_buffer: &buffers.vertex,
            index_buffer: &buffers.index,
            index_count: buffers.index_count,
            clear_color: self.clear_color,
            push_constants: PushConstants::new(self.transform, self.color_shift),
        };
        let mut backend = VulkanFrameBackend::new(&self.ctx, &targets.swapchain, params);

        let outcome = scheduler
            .draw_frame(&mut backend)
            .context("Failed to draw frame")?;

        if outcome.needs_rebuild() {
            match outcome {
                FrameOutcome::OutOfDate => debug!("Swapchain out of date"),
                FrameOutcome::Presented { .. } => debug!("Swapchain suboptimal"),
            }
            self.needs_rebuild = true;
        }
        Ok(())
    }

    /// Recreate the swapchain and framebuffers for the current size.
    ///
    /// The render pass and pipeline are kept unless the surface format changed.
    fn rebuild(&mut self) -> anyhow::Result<()> {
        self.ctx.wait_idle()?;
        let device = self.ctx.device();

        if let Some(mut targets) = self.targets.take() {
            unsafe { targets.destroy(device) };
        }

        let mut swapchain = Swapchain::new(&self.ctx, self.size.width, self.size.height)
            .context("Failed to create swapchain")?;

        let format_changed = self
            .pipeline
            .as_ref()
            .map_or(true, |state| state.render_pass.format != swapchain.format);
        if format_changed {
            if let Some(state) = self.pipeline.take() {
                info!("Surface format changed, rebuilding pipeline");
                unsafe { state.destroy(device) };
            }
            match PipelineState::new(
                device,
                swapchain.format,
                &self.vertex_shader,
                &self.fragment_shader,
            ) {
                Ok(state) => self.pipeline = Some(state),
                Err(e) => {
                    unsafe { swapchain.destroy(device) };
                    return Err(e).context("Failed to build graphics pipeline");
                }
            }
        }

        let Some(state) = self.pipeline.as_ref() else {
            unsafe { swapchain.destroy(device) };
            anyhow::bail!("Graphics pipeline missing after rebuild");
        };
        let framebuffers = match unsafe { Framebuffers::new(device, &state.render_pass, &swapchain) }
        {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                unsafe { swapchain.destroy(device) };
                return Err(e).context("Failed to create framebuffers");
            }
        };

        info!(
            "Swapchain rebuilt: {}x{}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count()
        );

        self.targets = Some(SwapchainTargets {
            swapchain,
            framebuffers,
        });
        self.needs_rebuild = false;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("Failed to wait for device idle during teardown: {e}");
        }

        let device = self.ctx.device();
        unsafe {
            if let Some(mut scheduler) = self.scheduler.take() {
                scheduler.destroy(&self.ctx);
            }
            if let Some(mut targets) = self.targets.take() {
                targets.destroy(device);
            }
            if let Some(state) = self.pipeline.take() {
                state.destroy(device);
            }
            if let Some(mut buffers) = self.buffers.take() {
                buffers.destroy(device);
            }
        }
        debug!("Renderer resources destroyed");
    }
}
