use ash::vk;
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

use super::buffer::Mesh;
use super::pipeline_manager::{PipelineManager, VulkanPipelineFactory};
use super::render_context::RenderContext;
use super::shader::ShaderLoader;
use super::vertex::{QUAD_INDICES, QUAD_VERTICES};
use super::{CommandPool, FrameSynchronizer, Swapchain, VulkanContext};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome};

/// Vulkan implementation of [`FrameBackend`]: one swapchain, one mesh and a
/// registry of named pipelines, one of which is drawn each frame.
pub struct Renderer {
    sync: FrameSynchronizer,
    pipelines: PipelineManager<VulkanPipelineFactory>,
    mesh: Mesh,
    command_pool: CommandPool,
    swapchain: Swapchain,
    active_pipeline: String,
    ctx: Arc<VulkanContext>,
    span: Span,
}

impl Renderer {
    /// Build the swapchain and per-frame resources, upload the quad and
    /// register every pipeline listed in `config`.
    pub fn new(
        ctx: Arc<VulkanContext>,
        config: &EngineConfig,
        framebuffer_size: (u32, u32),
        shader_loader: Box<dyn ShaderLoader>,
    ) -> Result<Self> {
        let span = info_span!("renderer");
        let _guard = span.enter();

        let frames_in_flight = config.renderer.max_frames_in_flight;
        let swapchain = Swapchain::new(
            ctx.clone(),
            framebuffer_size,
            config.renderer.clear_color,
            config.renderer.prefer_vsync,
        )?;
        let sync = FrameSynchronizer::new(ctx.clone(), frames_in_flight)?;
        let command_pool = CommandPool::new(ctx.clone(), frames_in_flight as u32)?;
        let mesh = Mesh::upload(
            ctx.clone(),
            &command_pool,
            ctx.graphics_queue,
            &QUAD_VERTICES,
            &QUAD_INDICES,
        )?;

        let factory =
            VulkanPipelineFactory::new(ctx.clone(), shader_loader, swapchain.render_pass());
        let mut pipelines = PipelineManager::new(factory);
        for descriptor in &config.pipelines {
            pipelines.create(
                &descriptor.name,
                &descriptor.vertex_shader,
                &descriptor.fragment_shader,
                descriptor.resolve(),
            )?;
        }

        let active_pipeline = config.renderer.active_pipeline.clone();
        if !pipelines.contains(&active_pipeline) {
            warn!(name = %active_pipeline, "active pipeline is not registered; frames will only clear");
        }

        info!(
            frames_in_flight,
            pipelines = pipelines.len(),
            format = ?swapchain.format(),
            images = swapchain.image_count(),
            "renderer ready"
        );
        drop(_guard);

        Ok(Self {
            sync,
            pipelines,
            mesh,
            command_pool,
            swapchain,
            active_pipeline,
            ctx,
            span,
        })
    }
}

impl FrameBackend for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.sync.wait_for_slot(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.sync.acquire_semaphore(slot))
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.sync.reset_slot(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let cmd = self.command_pool.begin(slot)?;
        self.swapchain.begin_render_pass(cmd, image_index);

        let rc = RenderContext::new(&self.ctx.device, cmd, self.swapchain.extent());
        if let Ok(pipeline) = self.pipelines.get(&self.active_pipeline) {
            rc.bind_pipeline(pipeline.pipeline);
            rc.set_full_viewport();
            rc.set_full_scissor();
            self.mesh.draw(&rc);
        }

        self.swapchain.end_render_pass(cmd);
        self.command_pool.end(slot)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let wait_semaphores = [self.sync.acquire_semaphore(slot)];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_pool.buffer(slot)];
        let signal_semaphores = [self.sync.present_semaphore(slot)];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                &[submit_info],
                self.sync.fence(slot),
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.swapchain.present(
            self.ctx.present_queue,
            self.sync.present_semaphore(slot),
            image_index,
        )
    }

    fn recreate_surface(&mut self, framebuffer_size: (u32, u32)) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.swapchain.recreate(framebuffer_size)?;
        // the render pass is rebuilt with the swapchain
        self.pipelines
            .factory_mut()
            .set_render_pass(self.swapchain.render_pass());
        self.pipelines.recreate_all()
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!(parent: &self.span, error = %e, "device did not go idle before teardown");
        }
    }
}
