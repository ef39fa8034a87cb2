//! Application configuration.

use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Colour the frame is cleared to before drawing.
    pub clear_color: [f32; 4],
    /// SPIR-V vertex shader; the built-in mesh shader when `None`.
    pub vertex_shader: Option<PathBuf>,
    /// SPIR-V fragment shader; the built-in mesh shader when `None`.
    pub fragment_shader: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "vkscene".to_string(),
            width: 800,
            height: 600,
            validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the clear colour.
    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    /// Load the vertex shader from a SPIR-V file.
    pub fn with_vertex_shader(mut self, path: impl Into<PathBuf>) -> Self {
        self.vertex_shader = Some(path.into());
        self
    }

    /// Load the fragment shader from a SPIR-V file.
    pub fn with_fragment_shader(mut self, path: impl Into<PathBuf>) -> Self {
        self.fragment_shader = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = AppConfig::new("Test")
            .with_size(1024, 768)
            .with_validation(false)
            .with_clear_color([0.1, 0.2, 0.3, 1.0])
            .with_fragment_shader("frag.spv");

        assert_eq!(config.title, "Test");
        assert_eq!((config.width, config.height), (1024, 768));
        assert!(!config.validation);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.vertex_shader, None);
        assert_eq!(config.fragment_shader, Some(PathBuf::from("frag.spv")));
    }

    #[test]
    fn validation_defaults_to_debug_builds() {
        assert_eq!(AppConfig::default().validation, cfg!(debug_assertions));
    }
}
