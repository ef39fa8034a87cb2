//! Fixed-function graphics pipeline.

use crate::error::{GpuError, Result};
use crate::render_pass::RenderPass;
use crate::shader::create_shader_module;
use crate::vertex::Vertex;
use ash::vk;
use glam::Mat4;
use std::mem::{offset_of, size_of};

/// Per-draw push constants.
///
/// The vertex stage reads `transform` at offset 0; the fragment stage reads
/// `color_shift` right after it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PushConstants {
    /// Column-major clip-space transform applied to every vertex position.
    pub transform: [f32; 16],
    pub color_shift: f32,
}

impl Default for PushConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, 0.0)
    }
}

impl PushConstants {
    pub fn new(transform: Mat4, color_shift: f32) -> Self {
        Self {
            transform: transform.to_cols_array(),
            color_shift,
        }
    }

    /// Vertex range for the transform, then fragment range for the colour shift.
    pub fn ranges() -> [vk::PushConstantRange; 2] {
        let color_offset = offset_of!(PushConstants, color_shift);
        [
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .offset(0)
                .size(color_offset as u32),
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .offset(color_offset as u32)
                .size((size_of::<Self>() - color_offset) as u32),
        ]
    }

    /// The bytes of this block covered by `range`.
    pub fn bytes_in(&self, range: vk::PushConstantRange) -> &[u8] {
        let start = range.offset as usize;
        &bytemuck::bytes_of(self)[start..start + range.size as usize]
    }
}

/// Graphics pipeline wrapper.
#[derive(Debug)]
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build the pipeline for `render_pass` from vertex and fragment SPIR-V.
    ///
    /// Triangle list of [`Vertex`], dynamic viewport and scissor, back-face
    /// culling with counter-clockwise front faces, no depth and no blending.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        vertex_shader: &[u32],
        fragment_shader: &[u32],
    ) -> Result<Self> {
        let vert_module = create_shader_module(device, vertex_shader)?;
        let frag_module = match create_shader_module(device, fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vert_module, None);
                return Err(e);
            }
        };

        let result = Self::build(device, render_pass, vert_module, frag_module);

        // Modules are only needed while the pipeline is compiled
        device.destroy_shader_module(frag_module, None);
        device.destroy_shader_module(vert_module, None);

        if result.is_ok() {
            tracing::debug!("Graphics pipeline created");
        }
        result
    }

    unsafe fn build(
        device: &ash::Device,
        render_pass: &RenderPass,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
    ) -> Result<Self> {
        let push_constant_ranges = PushConstants::ranges();
        let layout_info =
            vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&push_constant_ranges);
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(GpuError::PipelineCreation)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(0);

        match device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) {
            Ok(pipelines) => match pipelines.first() {
                Some(&pipeline) => Ok(Self { pipeline, layout }),
                None => {
                    device.destroy_pipeline_layout(layout, None);
                    Err(GpuError::PipelineCreation(vk::Result::ERROR_UNKNOWN))
                }
            },
            Err((_pipelines, e)) => {
                device.destroy_pipeline_layout(layout, None);
                Err(GpuError::PipelineCreation(e))
            }
        }
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_ranges_split_by_stage() {
        let [vertex, fragment] = PushConstants::ranges();
        assert_eq!(vertex.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!((vertex.offset, vertex.size), (0, 64));
        assert_eq!(fragment.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!((fragment.offset, fragment.size), (64, 4));
        assert_eq!(
            (fragment.offset + fragment.size) as usize,
            size_of::<PushConstants>()
        );
    }

    #[test]
    fn default_transform_is_identity() {
        let push = PushConstants::default();
        assert_eq!(Mat4::from_cols_array(&push.transform), Mat4::IDENTITY);
        assert_eq!(push.color_shift, 0.0);
    }

    #[test]
    fn range_bytes_select_each_member() {
        let push = PushConstants::new(Mat4::from_scale(glam::Vec3::splat(2.0)), 0.25);
        let [vertex, fragment] = PushConstants::ranges();

        let matrix: &[f32] = bytemuck::cast_slice(push.bytes_in(vertex));
        assert_eq!(matrix, &push.transform[..]);
        assert_eq!(push.bytes_in(fragment), &0.25f32.to_ne_bytes());
    }
}
