//! Physical device description and suitability checks.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;

/// Queue family indices chosen for a device. The two may coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether graphics and present share a family.
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices in ascending order, one queue each.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Pick the first graphics-capable family and a present-capable family.
///
/// The graphics family is preferred for presentation when it can present;
/// otherwise the first family with present support is used.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: impl Fn(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let graphics = families
        .iter()
        .position(|family| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })? as u32;

    let present = if present_support(graphics) {
        graphics
    } else {
        (0..families.len() as u32).find(|&i| present_support(i))?
    };

    Some(QueueFamilyIndices { graphics, present })
}

/// Whether every extension in `required` appears in `available`.
pub fn supports_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> bool {
    required.iter().all(|&name| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|ext| ext == name))
    })
}

/// Device extensions needed for presentation.
pub fn required_device_extensions(presenting: bool) -> Vec<&'static CStr> {
    if presenting {
        vec![ash::khr::swapchain::NAME]
    } else {
        Vec::new()
    }
}

/// Identity of a physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
}

impl DeviceInfo {
    pub fn from_properties(properties: &vk::PhysicalDeviceProperties) -> Self {
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".to_string());

        Self {
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
        }
    }

    /// CPU implementations are never selected.
    pub fn is_software_renderer(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::CPU
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, Vulkan {}.{}.{})",
            self.name,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }
}

/// Everything needed to judge one physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub info: DeviceInfo,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<vk::ExtensionProperties>,
    /// Per-family present support; empty when not presenting.
    pub present_support: Vec<bool>,
}

impl DeviceCandidate {
    /// Queue families to use if this device is suitable.
    ///
    /// A suitable device has a graphics family, a family that can present
    /// (skipped when `presenting` is false), the swapchain extension when
    /// presenting, and is not a CPU renderer.
    pub fn evaluate(&self, presenting: bool) -> Option<QueueFamilyIndices> {
        if self.info.is_software_renderer() {
            return None;
        }
        if !supports_extensions(&self.extensions, &required_device_extensions(presenting)) {
            return None;
        }
        if presenting {
            select_queue_families(&self.queue_families, |i| {
                self.present_support
                    .get(i as usize)
                    .copied()
                    .unwrap_or(false)
            })
        } else {
            select_queue_families(&self.queue_families, |_| true).map(|families| {
                QueueFamilyIndices {
                    graphics: families.graphics,
                    present: families.graphics,
                }
            })
        }
    }
}

/// Query the properties of one physical device.
///
/// # Safety
/// The instance, physical device and surface must be valid.
pub unsafe fn query_candidate(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<DeviceCandidate> {
    let properties = instance.get_physical_device_properties(physical_device);
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);
    let extensions = instance.enumerate_device_extension_properties(physical_device)?;

    let present_support = match surface {
        Some((loader, surface)) => (0..queue_families.len() as u32)
            .map(|i| {
                loader
                    .get_physical_device_surface_support(physical_device, i, surface)
                    .unwrap_or(false)
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(DeviceCandidate {
        info: DeviceInfo::from_properties(&properties),
        queue_families,
        extensions,
        present_support,
    })
}

/// A physical device chosen for rendering.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub info: DeviceInfo,
}

/// Select the first suitable physical device in enumeration order.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;
    let presenting = surface.is_some();

    for physical_device in devices {
        let candidate = query_candidate(instance, physical_device, surface)?;
        match candidate.evaluate(presenting) {
            Some(queue_families) => {
                tracing::info!(
                    "Selected GPU: {} (graphics family {}, present family {})",
                    candidate.info.summary(),
                    queue_families.graphics,
                    queue_families.present
                );
                return Ok(SelectedDevice {
                    physical_device,
                    queue_families,
                    info: candidate.info,
                });
            }
            None => tracing::debug!("Skipping unsuitable GPU: {}", candidate.info.summary()),
        }
    }

    Err(GpuError::NoUsableDevice)
}
