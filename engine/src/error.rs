use ash::vk;
use std::path::PathBuf;
use thiserror::Error;
use winit::raw_window_handle::HandleError;

use crate::config::ConfigError;

/// Errors the renderer cannot recover from.
///
/// Stale or suboptimal swapchains are not errors; the frame loop reports
/// those through [`crate::frame::AcquireOutcome`] and
/// [`crate::frame::PresentOutcome`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] HandleError),

    #[error("failed to create window: {0}")]
    Os(#[from] winit::error::OsError),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("validation layers requested but VK_LAYER_KHRONOS_validation is not installed")]
    ValidationUnavailable,

    #[error("no physical device supports graphics, presentation and swapchains for this surface")]
    NoSuitableDevice,

    #[error("surface is unusable: {0}")]
    UnsupportedSurface(&'static str),

    #[error("window was closed before it became drawable")]
    WindowClosed,

    #[error("no memory type matches the buffer requirements")]
    NoMemoryType,

    #[error("Pipeline with name '{0}' already exists")]
    PipelineExists(String),

    #[error("Pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("pipeline state not supported: {0}")]
    UnsupportedPipelineState(&'static str),

    #[error("failed to read shader {path:?}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile shader {path:?}: {message}")]
    ShaderCompile { path: PathBuf, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, RenderError>;
