//! SPIR-V loading and shader modules.

use crate::error::{GpuError, Result};
use ash::vk;
use std::fs::File;
use std::path::Path;

/// Read a SPIR-V binary from disk.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let shader_load = |source| GpuError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(shader_load)?;
    ash::util::read_spv(&mut file).map_err(shader_load)
}

/// Create a shader module from SPIR-V words.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&create_info, None)
        .map_err(GpuError::PipelineCreation)
}
