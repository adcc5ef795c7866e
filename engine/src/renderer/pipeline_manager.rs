use ash::vk;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Span};

use super::pipeline::{GraphicsPipeline, PipelineConfig};
use super::shader::ShaderLoader;
use super::VulkanContext;
use crate::error::{RenderError, Result};

/// Everything needed to rebuild a pipeline without outside input.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSource {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub config: PipelineConfig,
}

/// Builds and destroys the pipeline objects a [`PipelineManager`] stores.
pub trait PipelineFactory {
    type Pipeline;

    /// Build a pipeline; on error nothing may be left allocated.
    fn build(&self, name: &str, source: &PipelineSource) -> Result<Self::Pipeline>;

    fn destroy(&self, pipeline: Self::Pipeline);
}

struct Entry<P> {
    pipeline: P,
    source: PipelineSource,
}

/// Named graphics pipelines plus the configuration they were built from.
///
/// A name maps to at most one live pipeline. Names only become visible once
/// the pipeline is fully built.
pub struct PipelineManager<F: PipelineFactory> {
    factory: F,
    entries: HashMap<String, Entry<F::Pipeline>>,
    span: Span,
}

impl<F: PipelineFactory> PipelineManager<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            entries: HashMap::new(),
            span: info_span!("pipeline_manager"),
        }
    }

    pub fn create(
        &mut self,
        name: &str,
        vertex_shader: impl AsRef<Path>,
        fragment_shader: impl AsRef<Path>,
        config: PipelineConfig,
    ) -> Result<()> {
        let _guard = self.span.enter();
        if self.entries.contains_key(name) {
            return Err(RenderError::PipelineExists(name.to_string()));
        }

        let source = PipelineSource {
            vertex_shader: vertex_shader.as_ref().to_path_buf(),
            fragment_shader: fragment_shader.as_ref().to_path_buf(),
            config,
        };
        let pipeline = self.factory.build(name, &source)?;
        self.entries
            .insert(name.to_string(), Entry { pipeline, source });

        info!(name, "pipeline created");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&F::Pipeline> {
        self.entries
            .get(name)
            .map(|entry| &entry.pipeline)
            .ok_or_else(|| RenderError::PipelineNotFound(name.to_string()))
    }

    pub fn source(&self, name: &str) -> Option<&PipelineSource> {
        self.entries.get(name).map(|entry| &entry.source)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroy the named pipeline. Unknown names are ignored.
    pub fn remove(&mut self, name: &str) {
        if let Some(entry) = self.entries.remove(name) {
            self.factory.destroy(entry.pipeline);
            debug!(parent: &self.span, name, "pipeline removed");
        }
    }

    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            self.factory.destroy(entry.pipeline);
        }
    }

    /// Rebuild every pipeline from its stored source, e.g. against a new
    /// render pass. If a rebuild fails the manager keeps only the pipelines
    /// rebuilt so far.
    pub fn recreate_all(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        let mut sources: Vec<(String, PipelineSource)> = self
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.source.clone()))
            .collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        self.clear();
        for (name, source) in sources {
            if let Err(e) = self.create(
                &name,
                &source.vertex_shader,
                &source.fragment_shader,
                source.config,
            ) {
                warn!(name, error = %e, "pipeline rebuild failed");
                return Err(e);
            }
        }

        info!(count = self.entries.len(), "pipelines recreated");
        Ok(())
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }
}

impl<F: PipelineFactory> Drop for PipelineManager<F> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Builds [`GraphicsPipeline`]s against the swapchain's current render pass.
pub struct VulkanPipelineFactory {
    ctx: Arc<VulkanContext>,
    loader: Box<dyn ShaderLoader>,
    render_pass: vk::RenderPass,
}

impl VulkanPipelineFactory {
    pub fn new(
        ctx: Arc<VulkanContext>,
        loader: Box<dyn ShaderLoader>,
        render_pass: vk::RenderPass,
    ) -> Self {
        Self {
            ctx,
            loader,
            render_pass,
        }
    }

    /// Point future builds at a new render pass. Existing pipelines are not
    /// touched; follow up with [`PipelineManager::recreate_all`].
    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.render_pass = render_pass;
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl PipelineFactory for VulkanPipelineFactory {
    type Pipeline = GraphicsPipeline;

    fn build(&self, name: &str, source: &PipelineSource) -> Result<GraphicsPipeline> {
        let vertex_code = self.loader.load(&source.vertex_shader)?;
        let fragment_code = self.loader.load(&source.fragment_shader)?;
        debug!(name, render_pass = ?self.render_pass, "building pipeline");
        GraphicsPipeline::build(
            &self.ctx.device,
            &self.ctx.enabled_features,
            self.render_pass,
            &source.config,
            &vertex_code,
            &fragment_code,
        )
    }

    fn destroy(&self, pipeline: GraphicsPipeline) {
        // the pipeline may still be referenced by a frame in flight
        if let Err(e) = self.ctx.wait_idle() {
            warn!(
                error = %e,
                pipeline = ?pipeline.pipeline,
                "device did not go idle before pipeline destroy"
            );
        }
        pipeline.destroy(&self.ctx.device);
    }
}
