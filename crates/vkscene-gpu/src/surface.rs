//! Presentation surface creation and capability queries.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Create a surface for `window`.
///
/// # Safety
/// The instance must have been created with the window's surface extensions
/// and the window must outlive the returned surface.
pub unsafe fn create_surface<W>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &W,
) -> Result<vk::SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let display = window.display_handle()?;
    let window_handle = window.window_handle()?;

    ash_window::create_surface(
        entry,
        instance,
        display.as_raw(),
        window_handle.as_raw(),
        None,
    )
    .map_err(GpuError::SurfaceCreation)
}

/// What the surface supports on the selected device.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query capabilities, formats and present modes of the context's surface.
    pub fn query(ctx: &DeviceContext) -> Result<Self> {
        let surface = ctx
            .surface()
            .ok_or_else(|| GpuError::InvalidState("Context has no surface".to_string()))?;
        let loader = ctx.surface_loader();
        let physical_device = ctx.physical_device();

        unsafe {
            let capabilities = loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(GpuError::SwapchainCreation)?;
            let formats = loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(GpuError::SwapchainCreation)?;
            let present_modes = loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(GpuError::SwapchainCreation)?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}
