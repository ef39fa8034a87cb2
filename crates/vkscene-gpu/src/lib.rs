//! Vulkan resource lifecycle and frame synchronization.
//!
//! This crate provides:
//! - Instance, surface, GPU selection and logical device ([`DeviceContext`])
//! - Memory type selection with one allocation per buffer or image
//! - Synchronous staging uploads ([`TransferEngine`])
//! - Swapchain negotiation, render pass, pipeline and framebuffers
//! - A single-frame-in-flight scheduler ([`FrameScheduler`])

pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod transfer;
pub mod vertex;

pub use ash;

pub use capabilities::{DeviceInfo, QueueFamilyIndices};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use error::{GpuError, ResourceStage, Result};
pub use frame::{
    AcquiredImage, DrawParams, FrameBackend, FrameOutcome, FrameScheduler, VulkanFrameBackend,
};
pub use framebuffer::Framebuffers;
pub use memory::{find_memory_type, BufferKind, GpuBuffer, GpuImage, ImageKind};
pub use pipeline::{GraphicsPipeline, PushConstants};
pub use render_pass::RenderPass;
pub use shader::load_spirv;
pub use swapchain::Swapchain;
pub use sync::FrameSync;
pub use texture::Texture;
pub use transfer::TransferEngine;
pub use vertex::Vertex;
