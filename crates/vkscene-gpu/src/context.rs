//! Device context: instance, surface, physical and logical device, queues.

use crate::capabilities::{
    required_device_extensions, select_physical_device, DeviceInfo, QueueFamilyIndices,
};
use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use crate::instance::InstanceContext;
use crate::surface::create_surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;

/// Everything downstream components need from the device.
///
/// Teardown order is fixed by field order and [`Drop`]: the command pool and
/// logical device go first, then the surface, debug messenger and instance.
pub struct DeviceContext {
    pub(crate) device: ash::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device_info: DeviceInfo,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) command_pool: CommandPool,
    // Must stay last: outlives the device
    pub(crate) instance: InstanceContext,
}

impl DeviceContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        self.instance.instance()
    }

    /// Get the loader entry.
    pub fn entry(&self) -> &ash::Entry {
        self.instance.entry()
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Name, type and API version of the selected GPU.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Memory types and heaps of the selected GPU, queried once at build time.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Get the chosen queue family indices.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.queue_families.graphics
    }

    /// Get the present queue family index.
    pub fn present_queue_family(&self) -> u32 {
        self.queue_families.present
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Command pool on the graphics family.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Get the presentation surface; `None` for headless contexts.
    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.instance.surface()
    }

    /// Get the surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        self.instance.surface_loader()
    }

    /// Whether the debug messenger is active.
    pub fn validation_enabled(&self) -> bool {
        self.instance.validation_enabled()
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.command_pool.destroy(&self.device);
            self.device.destroy_device(None);
        }
        tracing::debug!("Logical device destroyed");
        // `instance` drops next: surface, messenger, instance
    }
}

/// Builder for creating a device context.
pub struct DeviceContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "vkscene".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context that can present to `window`.
    ///
    /// The window must outlive the returned context.
    pub fn build<W>(self, window: &W) -> Result<DeviceContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window.display_handle()?.as_raw();
        let mut instance =
            unsafe { InstanceContext::new(&self.app_name, self.enable_validation, Some(display)) }?;

        let surface =
            unsafe { create_surface(instance.entry(), instance.instance(), window) }?;
        instance.attach_surface(surface);

        Self::finish(instance)
    }

    /// Build a context without a surface, for offscreen work and tests.
    pub fn build_headless(self) -> Result<DeviceContext> {
        let instance = unsafe { InstanceContext::new(&self.app_name, self.enable_validation, None) }?;
        Self::finish(instance)
    }

    fn finish(instance: InstanceContext) -> Result<DeviceContext> {
        let surface = instance
            .surface()
            .map(|surface| (instance.surface_loader(), surface));

        let selected = unsafe { select_physical_device(instance.instance(), surface) }?;
        let queue_families = selected.queue_families;

        let device = unsafe {
            create_logical_device(
                instance.instance(),
                selected.physical_device,
                queue_families,
                surface.is_some(),
            )
        }?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let command_pool = match unsafe { CommandPool::new(&device, queue_families.graphics) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let memory_properties = unsafe {
            instance
                .instance()
                .get_physical_device_memory_properties(selected.physical_device)
        };

        tracing::info!(
            "Device context ready ({} queue famil{}, {} memory types)",
            queue_families.unique().len(),
            if queue_families.is_shared() { "y" } else { "ies" },
            memory_properties.memory_type_count
        );

        Ok(DeviceContext {
            device,
            physical_device: selected.physical_device,
            device_info: selected.info,
            memory_properties,
            queue_families,
            graphics_queue,
            present_queue,
            command_pool,
            instance,
        })
    }
}

/// Create the logical device with one queue per distinct family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    presenting: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = required_device_extensions(presenting);
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let features = vk::PhysicalDeviceFeatures::default();
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::LogicalDeviceCreation)
}
