//! Configuration system
//!
//! Every setting the presentation loop reads at startup lives here, loadable
//! from TOML or RON. Validation is a runtime value rather than a build flag:
//! leaving `enable_validation` unset falls back to the build profile.

pub use serde::{Deserialize, Serialize};

use serde::de::DeserializeOwned;

/// Configuration trait
pub trait Config: Serialize + DeserializeOwned + Default {
    /// Load configuration from file, picking the format from the extension
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(path, &contents)
    }

    /// Parse configuration text in the format implied by `path`
    fn parse(path: &str, contents: &str) -> Result<Self, ConfigError> {
        if path.ends_with(".toml") {
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Values parsed but are not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Number of frame slots recorded concurrently by default
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 4;

/// Swapchain image count requested before clamping to surface bounds
pub const DEFAULT_SWAPCHAIN_IMAGES: u32 = 3;

/// Physical device capabilities a GPU must offer to be selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRequirements {
    /// Only accept discrete GPUs
    pub require_discrete_gpu: bool,
    /// Require geometry shader support
    pub require_geometry_shader: bool,
    /// Require stores and atomics in vertex, tessellation and geometry stages
    pub require_vertex_pipeline_stores_and_atomics: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            require_discrete_gpu: true,
            require_geometry_shader: true,
            require_vertex_pipeline_stores_and_atomics: true,
        }
    }
}

/// # Renderer Configuration
///
/// Settings threaded into device context construction and the frame loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable validation layers; `None` follows the build profile
    pub enable_validation: Option<bool>,
    /// Number of frame slots, independent of the swapchain image count
    pub frames_in_flight: usize,
    /// Preferred swapchain image count
    pub target_image_count: u32,
    /// Clear color for the color attachment
    pub clear_color: [f32; 4],
    /// Directory holding compiled `.spv` shaders
    pub shader_directory: String,
    /// Physical device requirements
    pub device: DeviceRequirements,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: None,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            target_image_count: DEFAULT_SWAPCHAIN_IMAGES,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_directory: "shaders".to_string(),
            device: DeviceRequirements::default(),
        }
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the number of frames in flight
    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the clear color
    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the shader directory
    #[must_use]
    pub fn with_shader_directory(mut self, dir: impl Into<String>) -> Self {
        self.shader_directory = dir.into();
        self
    }

    /// Set the device requirements
    #[must_use]
    pub const fn with_device_requirements(mut self, device: DeviceRequirements) -> Self {
        self.device = device;
        self
    }

    /// Resolved validation setting
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("frames in flight must be at least 1".to_string()));
        }
        if self.target_image_count == 0 {
            return Err(ConfigError::Invalid("target image count must be at least 1".to_string()));
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::Invalid(format!(
                "clear color components must lie in [0, 1], got {:?}",
                self.clear_color
            )));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Vulkan")
    }
}

impl Config for RendererConfig {}

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan window".to_string(),
            width: 1920,
            height: 1080,
        }
    }
}

impl Config for WindowConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 4);
        assert_eq!(config.target_image_count, 3);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.device.require_discrete_gpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_follows_build_profile_when_unset() {
        let config = RendererConfig::default();
        assert_eq!(config.validation_enabled(), cfg!(debug_assertions));
        assert!(!config.clone().with_validation(false).validation_enabled());
        assert!(config.with_validation(true).validation_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default()
            .with_clear_color([0.0, 1.5, 0.0, 1.0])
            .validate()
            .is_err());

        let mut config = RendererConfig::default();
        config.target_image_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let text = r#"
            application_name = "demo"
            frames_in_flight = 2

            [device]
            require_discrete_gpu = false
        "#;
        let config = RendererConfig::parse("renderer.toml", text).unwrap();
        assert_eq!(config.application_name, "demo");
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.target_image_count, 3);
        assert!(!config.device.require_discrete_gpu);
        assert!(config.device.require_geometry_shader);
    }

    #[test]
    fn test_parse_ron() {
        let text = r#"(title: "ron window", width: 640)"#;
        let config = WindowConfig::parse("window.ron", text).unwrap();
        assert_eq!(config.title, "ron window");
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 1080);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = WindowConfig::parse("window.json", "{}");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");
        let path = path.to_string_lossy().into_owned();

        let config = RendererConfig::new("saved").with_clear_color([0.25, 0.5, 0.75, 1.0]);
        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded.application_name, "saved");
        assert_eq!(loaded.clear_color, [0.25, 0.5, 0.75, 1.0]);
    }
}
