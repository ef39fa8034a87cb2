//! GPU error types.

use std::fmt;
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Driver call that failed while creating a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStage {
    /// `vkCreateBuffer` / `vkCreateImage`.
    Create,
    /// `vkAllocateMemory`.
    Allocate,
    /// `vkBindBufferMemory` / `vkBindImageMemory`.
    Bind,
    /// `vkMapMemory`.
    Map,
}

impl fmt::Display for ResourceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "handle creation",
            Self::Allocate => "memory allocation",
            Self::Bind => "memory binding",
            Self::Map => "memory mapping",
        };
        f.write_str(name)
    }
}

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The Vulkan loader could not be found or initialised.
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// `vkCreateInstance` failed.
    #[error("Instance creation failed: {0}")]
    InstanceCreation(vk::Result),

    /// The window did not expose usable native handles.
    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    /// Surface creation from the native window failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(vk::Result),

    /// No physical device supports graphics, presentation and swapchains.
    #[error("No usable GPU found")]
    NoUsableDevice,

    /// `vkCreateDevice` failed.
    #[error("Logical device creation failed: {0}")]
    LogicalDeviceCreation(vk::Result),

    /// Swapchain or swapchain image view creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(vk::Result),

    /// The surface changed and the swapchain must be rebuilt.
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// Framebuffer creation failed.
    #[error("Framebuffer creation failed: {0}")]
    FramebufferCreation(vk::Result),

    /// Buffer or image creation failed at the given stage.
    #[error("Resource creation failed during {stage}: {result}")]
    ResourceCreation {
        stage: ResourceStage,
        result: vk::Result,
    },

    /// No memory type satisfies both the filter and the property flags.
    #[error("No memory type matches filter {type_filter:#034b} with properties {required:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// SPIR-V bytecode could not be read.
    #[error("Failed to load shader {}: {source}", .path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Render pass, shader module, layout or pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),

    /// `vkQueueSubmit` failed.
    #[error("Queue submit failed: {0}")]
    QueueSubmit(vk::Result),

    /// `vkQueuePresentKHR` failed.
    #[error("Present failed: {0}")]
    Present(vk::Result),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Any other Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl GpuError {
    /// The driver error code behind this failure, if there is one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::InstanceCreation(r)
            | Self::SurfaceCreation(r)
            | Self::LogicalDeviceCreation(r)
            | Self::SwapchainCreation(r)
            | Self::FramebufferCreation(r)
            | Self::PipelineCreation(r)
            | Self::QueueSubmit(r)
            | Self::Present(r)
            | Self::Vulkan(r)
            | Self::ResourceCreation { result: r, .. } => Some(*r),
            Self::SwapchainOutOfDate => Some(vk::Result::ERROR_OUT_OF_DATE_KHR),
            _ => None,
        }
    }

    pub(crate) fn resource(stage: ResourceStage) -> impl Fn(vk::Result) -> Self {
        move |result| Self::ResourceCreation { stage, result }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_error_names_the_stage() {
        let err = GpuError::resource(ResourceStage::Bind)(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let text = err.to_string();
        assert!(text.contains("memory binding"), "{text}");
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    }

    #[test]
    fn memory_type_error_has_no_driver_code() {
        let err = GpuError::NoSuitableMemoryType {
            type_filter: 0,
            required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(err.vk_result().is_none());
    }
}
