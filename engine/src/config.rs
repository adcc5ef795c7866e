//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock "Galaxy Renderer" setup with a single `basic` pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::renderer::pipeline::{PipelineConfig, PipelinePreset, SampleCount};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub logging: LoggingConfig,
    pub pipelines: Vec<PipelineDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_true")]
    pub resizable: bool,

    #[serde(default)]
    pub fullscreen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    #[serde(default = "default_frames_in_flight")]
    pub max_frames_in_flight: usize,

    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages to the log.
    #[serde(default = "default_validation")]
    pub enable_validation: bool,

    /// Force FIFO presentation even when MAILBOX is available.
    #[serde(default)]
    pub prefer_vsync: bool,

    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// Pipeline bound while recording each frame.
    #[serde(default = "default_active_pipeline")]
    pub active_pipeline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A pipeline registered at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    pub name: String,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,

    #[serde(default)]
    pub preset: PipelinePreset,

    /// Full fixed-function state, replacing the preset when present.
    #[serde(default)]
    pub overrides: Option<PipelineConfig>,
}

impl PipelineDescriptor {
    pub fn resolve(&self) -> PipelineConfig {
        self.overrides
            .clone()
            .unwrap_or_else(|| self.preset.config())
    }
}

fn default_title() -> String {
    "Galaxy Renderer".to_string()
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_true() -> bool {
    true
}
fn default_frames_in_flight() -> usize {
    2
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_clear_color() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_active_pipeline() -> String {
    "basic".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_pipelines() -> Vec<PipelineDescriptor> {
    vec![PipelineDescriptor {
        name: default_active_pipeline(),
        vertex_shader: PathBuf::from("shaders/shader.vert"),
        fragment_shader: PathBuf::from("shaders/shader.frag"),
        preset: PipelinePreset::Default,
        overrides: None,
    }]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
            logging: LoggingConfig::default(),
            pipelines: default_pipelines(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
            resizable: true,
            fullscreen: false,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: default_frames_in_flight(),
            enable_validation: default_validation(),
            prefer_vsync: false,
            clear_color: default_clear_color(),
            active_pipeline: default_active_pipeline(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid {
                field: "window.width/height",
                reason: "window dimensions must be greater than 0".to_string(),
            });
        }

        if self.renderer.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "renderer.max_frames_in_flight",
                reason: "at least one frame must be in flight".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for pipeline in &self.pipelines {
            if !seen.insert(pipeline.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "pipelines.name",
                    reason: format!("pipeline '{}' is declared twice", pipeline.name),
                });
            }
            // the swapchain render pass has one single-sampled attachment
            if pipeline.resolve().samples != SampleCount::X1 {
                return Err(ConfigError::Invalid {
                    field: "pipelines.overrides.samples",
                    reason: format!("pipeline '{}' must use samples = \"1\"", pipeline.name),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::pipeline::CullMode;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.window.title, "Galaxy Renderer");
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);
        assert!(config.window.resizable);
        assert_eq!(config.renderer.max_frames_in_flight, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_registers_basic_pipeline() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.pipelines.len(), 1);
        let basic = &config.pipelines[0];
        assert_eq!(basic.name, "basic");
        assert_eq!(basic.vertex_shader, PathBuf::from("shaders/shader.vert"));
        assert_eq!(basic.resolve(), PipelineConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            title = "Orbit"

            [renderer]
            max_frames_in_flight = 3
            clear_color = [0.1, 0.1, 0.2, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.window.title, "Orbit");
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.renderer.max_frames_in_flight, 3);
        assert_eq!(config.renderer.clear_color, [0.1, 0.1, 0.2, 1.0]);
        assert_eq!(config.renderer.active_pipeline, "basic");
    }

    #[test]
    fn test_pipeline_presets_and_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[pipelines]]
            name = "hud"
            vertex_shader = "shaders/hud.vert"
            fragment_shader = "shaders/hud.frag"
            preset = "ui"

            [[pipelines]]
            name = "wire"
            vertex_shader = "shaders/shader.vert"
            fragment_shader = "shaders/shader.frag"

            [pipelines.overrides]
            fill_mode = "line"
            cull_mode = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipelines.len(), 2);
        assert_eq!(config.pipelines[0].resolve(), PipelineConfig::ui());
        let wire = config.pipelines[1].resolve();
        assert_eq!(wire.cull_mode, CullMode::None);
        assert!(wire.depth.write);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.renderer.max_frames_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        let duplicate = config.pipelines[0].clone();
        config.pipelines.push(duplicate);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "pipelines.name", .. })
        ));
    }

    #[test]
    fn test_multisampled_overrides_are_rejected() {
        let result = EngineConfig::from_toml_str(
            r#"
            [[pipelines]]
            name = "msaa"
            vertex_shader = "shaders/shader.vert"
            fragment_shader = "shaders/shader.frag"

            [pipelines.overrides]
            samples = "4"
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "pipelines.overrides.samples", .. })
        ));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let result = EngineConfig::from_toml_str("[window\nwidth = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
