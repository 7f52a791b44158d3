//! Configuration system
//!
//! Every program reads the same [`SandboxConfig`], either from defaults or
//! from a `.toml`/`.ron` file passed on the command line.

use std::path::{Path, PathBuf};

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            ConfigFormat::Ron => {
                ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
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

    /// A value was parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Window settings for samples that present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Client area width in pixels
    pub width: u32,
    /// Client area height in pixels
    pub height: u32,
    /// Title bar text; the application name is used when empty
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: String::new(),
        }
    }
}

/// Where compiled SPIR-V shaders are looked up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Explicit directory; when unset the search paths are tried in order
    pub directory: Option<PathBuf>,
    /// Candidate directories relative to the working directory
    pub search_paths: Vec<PathBuf>,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: None,
            search_paths: [
                "target/shaders",
                "shaders",
                "resources/shaders",
                "../target/shaders",
                ".",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

impl ShaderConfig {
    /// Resolve a compiled shader file name to an existing path
    ///
    /// Falls back to the bare file name so the subsequent open reports a
    /// readable "not found" error.
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        if let Some(dir) = &self.directory {
            return dir.join(file_name);
        }

        self.search_paths
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(file_name))
    }
}

/// Top-level harness configuration shared by every program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Application name reported to the driver and used as default window title
    pub application_name: String,
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
    /// Validation layers; `None` enables them in debug builds only
    pub enable_validation: Option<bool>,
    /// Window settings
    pub window: WindowConfig,
    /// Stop the render loop after this many frames
    pub frame_limit: Option<u64>,
    /// Shader lookup
    pub shaders: ShaderConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            application_name: "vk_sandbox".to_string(),
            log_level: "info".to_string(),
            enable_validation: None,
            window: WindowConfig::default(),
            frame_limit: None,
            shaders: ShaderConfig::default(),
        }
    }
}

impl Config for SandboxConfig {}

impl SandboxConfig {
    /// Set the application name
    #[must_use]
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the window extent
    #[must_use]
    pub const fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set the frame limit
    #[must_use]
    pub const fn with_frame_limit(mut self, frames: Option<u64>) -> Self {
        self.frame_limit = frames;
        self
    }

    /// Force validation layers on or off
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested
    pub const fn validation_enabled(&self) -> bool {
        match self.enable_validation {
            Some(enabled) => enabled,
            None => cfg!(debug_assertions),
        }
    }

    /// Title to put on the window
    pub fn window_title(&self) -> &str {
        if self.window.title.is_empty() {
            &self.application_name
        } else {
            &self.window.title
        }
    }

    /// Parsed log level filter
    pub fn log_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.trim().is_empty() {
            return Err(ConfigError::Invalid("application name must not be empty".into()));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window extent must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.frame_limit == Some(0) {
            return Err(ConfigError::Invalid("frame limit must be at least 1".into()));
        }

        self.log_filter()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SandboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_title(), "vk_sandbox");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let empty_name = SandboxConfig::default().with_application_name("  ");
        assert!(matches!(empty_name.validate(), Err(ConfigError::Invalid(_))));

        let zero_window = SandboxConfig::default().with_window_size(0, 600);
        assert!(zero_window.validate().is_err());

        let zero_frames = SandboxConfig::default().with_frame_limit(Some(0));
        assert!(zero_frames.validate().is_err());

        let bad_level = SandboxConfig {
            log_level: "loud".into(),
            ..SandboxConfig::default()
        };
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SandboxConfig = toml::from_str(
            r#"
            application_name = "render_3d_image"
            frame_limit = 120

            [window]
            width = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.application_name, "render_3d_image");
        assert_eq!(config.frame_limit, Some(120));
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.log_level, "info");
        assert!(config.shaders.directory.is_none());
    }

    #[test]
    fn test_ron_config_parses() {
        let config: SandboxConfig =
            ron::from_str("(application_name: \"memory_commitment\", enable_validation: Some(false))")
                .unwrap();

        assert_eq!(config.application_name, "memory_commitment");
        assert!(!config.validation_enabled());
    }

    #[test]
    fn test_save_and_load_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("vk_sandbox_config_{}.toml", std::process::id()));
        let config = SandboxConfig::default()
            .with_application_name("update_template")
            .with_validation(true);

        config.save_to_file(&path).unwrap();
        let loaded = SandboxConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = SandboxConfig::load_from_file("settings.json");
        // Missing file is reported before the extension is inspected
        assert!(matches!(result, Err(ConfigError::Io(_))));

        let result = SandboxConfig::default().save_to_file("settings.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_explicit_shader_directory_wins() {
        let shaders = ShaderConfig {
            directory: Some(PathBuf::from("/opt/spirv")),
            ..ShaderConfig::default()
        };
        assert_eq!(shaders.resolve("layered_vert.spv"), PathBuf::from("/opt/spirv/layered_vert.spv"));

        let fallback = ShaderConfig {
            directory: None,
            search_paths: vec![PathBuf::from("definitely/not/here")],
        };
        assert_eq!(fallback.resolve("missing.spv"), PathBuf::from("missing.spv"));
    }
}
