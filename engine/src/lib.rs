//! Galaxy: a Vulkan frame loop with frames in flight, swapchain recreation
//! and a registry of named graphics pipelines.

pub mod app;
pub mod config;
pub mod error;
pub mod frame;
pub mod renderer;
pub mod window;

pub use app::Application;
pub use config::EngineConfig;
pub use error::{RenderError, Result};
pub use frame::{
    AcquireOutcome, FrameBackend, FrameDriver, FrameStats, PresentOutcome, TickOutcome,
};
