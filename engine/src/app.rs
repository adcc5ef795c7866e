use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Span};

use crate::config::EngineConfig;
use crate::error::{RenderError, Result};
use crate::frame::{FrameDriver, FrameStats};
use crate::renderer::{FileShaderLoader, Renderer, VulkanContext};
use crate::window::{wait_until_drawable, Window, WindowState};

const DRAWABLE_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Window, device and frame loop wired together from an [`EngineConfig`].
pub struct Application {
    // dropped in declaration order: GPU objects before the device, the
    // device before the window its surface belongs to
    driver: FrameDriver<Renderer>,
    _ctx: Arc<VulkanContext>,
    window: Window,
    span: Span,
}

impl Application {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let span = info_span!("application");
        let _guard = span.enter();

        let mut window = Window::new(&config.window)?;
        let ctx = Arc::new(VulkanContext::new(&window, config.renderer.enable_validation)?);

        // a swapchain cannot be created for a window that starts minimized
        if !wait_until_drawable(&mut window, DRAWABLE_POLL_INTERVAL) {
            return Err(RenderError::WindowClosed);
        }

        // relative shader paths resolve against the working directory
        let renderer = Renderer::new(
            ctx.clone(),
            &config,
            window.framebuffer_size(),
            Box::new(FileShaderLoader::default()),
        )?;
        let driver = FrameDriver::new(renderer, config.renderer.max_frames_in_flight);

        info!("application initialized");
        drop(_guard);

        Ok(Self {
            driver,
            _ctx: ctx,
            window,
            span,
        })
    }

    /// Run until the window closes or Escape is pressed.
    pub fn run(&mut self) -> Result<FrameStats> {
        let _guard = self.span.enter();
        self.driver.run(&mut self.window)?;
        let stats = self.driver.stats();
        info!(
            presented = stats.presented,
            skipped = stats.skipped,
            recreations = stats.recreations,
            "application exiting"
        );
        Ok(stats)
    }
}
