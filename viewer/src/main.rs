use anyhow::{Context, Result};
use galaxy_engine::{Application, EngineConfig, RenderError};
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},naga=warn")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> Result<()> {
    let config = match env::args_os().nth(1) {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.to_string_lossy()))?,
        None => EngineConfig::default(),
    };

    init_logging(&config.logging.level);
    info!(
        title = %config.window.title,
        width = config.window.width,
        height = config.window.height,
        "starting galaxy viewer"
    );

    let mut app = match Application::new(config) {
        Ok(app) => app,
        Err(RenderError::WindowClosed) => {
            info!("window closed before the first frame");
            return Ok(());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("failed to initialize renderer")),
    };
    let stats = app.run().context("frame loop failed")?;
    info!(frames = stats.presented, "bye");

    Ok(())
}
