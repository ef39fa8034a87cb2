//! Vulkan instance creation, validation layer and debug messenger.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layer enabled when validation is requested.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Whether `name` is among the instance layers reported by the loader.
pub fn layer_available(available: &[vk::LayerProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|props| props.layer_name_as_c_str().is_ok_and(|layer| layer == name))
}

/// Map a debug-utils severity onto a tracing level.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> tracing::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    match severity_level(severity) {
        tracing::Level::ERROR => tracing::error!(target: "vulkan", "[{:?}] {}", message_type, message),
        tracing::Level::WARN => tracing::warn!(target: "vulkan", "[{:?}] {}", message_type, message),
        tracing::Level::DEBUG => tracing::debug!(target: "vulkan", "[{:?}] {}", message_type, message),
        _ => tracing::trace!(target: "vulkan", "[{:?}] {}", message_type, message),
    }

    vk::FALSE
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Instance-level objects: loader entry, instance, optional debug messenger
/// and optional presentation surface.
///
/// Dropping destroys the surface, then the messenger, then the instance.
pub struct InstanceContext {
    // Entry must outlive the instance
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface_loader: ash::khr::surface::Instance,
    surface: Option<vk::SurfaceKHR>,
}

impl InstanceContext {
    /// Load Vulkan and create an instance.
    ///
    /// With a display handle the platform's surface extensions are enabled.
    /// When validation is requested but unavailable the instance is created
    /// without it.
    ///
    /// # Safety
    /// `display`, if given, must be a valid display handle.
    pub unsafe fn new(
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> Result<Self> {
        let entry = ash::Entry::load()?;

        let app_name = CString::new(app_name)
            .map_err(|_| GpuError::InvalidState("Application name contains NUL".to_string()))?;
        let engine_name = c"vkscene";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extension_names: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(GpuError::InstanceCreation)?
                .to_vec(),
            None => Vec::new(),
        };

        #[cfg(target_os = "macos")]
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

        let mut validation = enable_validation;
        if validation {
            let available = entry.enumerate_instance_layer_properties()?;
            if layer_available(&available, VALIDATION_LAYER) {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            } else {
                tracing::warn!(
                    "Validation layer {} not available, continuing without validation",
                    VALIDATION_LAYER.to_string_lossy()
                );
                validation = false;
            }
        }

        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        // Chained so instance creation and destruction are covered as well
        let mut instance_messenger_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(create_flags);
        if validation {
            create_info = create_info.push_next(&mut instance_messenger_info);
        }

        let instance = entry
            .create_instance(&create_info, None)
            .map_err(GpuError::InstanceCreation)?;

        tracing::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extension_names.len(),
            if validation { "on" } else { "off" }
        );

        let debug = if validation {
            create_debug_messenger(&entry, &instance)
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface: None,
        })
    }

    /// Get the loader entry.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Get the presentation surface, if one was attached.
    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface
    }

    /// Whether the debug messenger is active.
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }

    /// Take ownership of a surface created from this instance.
    pub(crate) fn attach_surface(&mut self, surface: vk::SurfaceKHR) {
        self.surface = Some(surface);
    }
}

/// Create the persistent messenger, degrading to no validation on failure.
unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Option<DebugMessenger> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    match loader.create_debug_utils_messenger(&messenger_create_info(), None) {
        Ok(messenger) => {
            tracing::debug!("Debug messenger installed");
            Some(DebugMessenger { loader, messenger })
        }
        Err(e) => {
            tracing::warn!(
                "Failed to create debug messenger ({}), continuing without validation output",
                e
            );
            None
        }
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(surface) = self.surface.take() {
                self.surface_loader.destroy_surface(surface, None);
            }
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Vulkan instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (dst, src) in props.layer_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn finds_validation_layer_by_exact_name() {
        let layers = [
            layer("VK_LAYER_MESA_device_select"),
            layer("VK_LAYER_KHRONOS_validation"),
        ];
        assert!(layer_available(&layers, VALIDATION_LAYER));
        assert!(!layer_available(&layers[..1], VALIDATION_LAYER));
        assert!(!layer_available(
            &[layer("VK_LAYER_KHRONOS_validation_extra")],
            VALIDATION_LAYER
        ));
    }

    #[test]
    fn severities_map_to_tracing_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::VERBOSE), tracing::Level::TRACE);
        assert_eq!(severity_level(S::INFO), tracing::Level::DEBUG);
        assert_eq!(severity_level(S::WARNING), tracing::Level::WARN);
        assert_eq!(severity_level(S::ERROR), tracing::Level::ERROR);
        assert_eq!(severity_level(S::WARNING | S::ERROR), tracing::Level::ERROR);
    }

    #[test]
    fn callback_never_aborts_the_call() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default();
        let result = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::FALSE);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_instance_without_validation() {
        let ctx = unsafe { InstanceContext::new("instance-test", false, None) }.unwrap();
        assert!(!ctx.validation_enabled());
        assert!(ctx.surface().is_none());
    }
}
