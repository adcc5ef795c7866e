mod buffer;
mod command_pool;
mod context;
pub mod pipeline;
mod pipeline_manager;
mod render_context;
mod renderer;
mod shader;
mod swapchain;
mod sync;
pub mod vertex;

pub use buffer::{find_memory_type, GpuBuffer, Mesh};
pub use command_pool::CommandPool;
pub use context::{
    rate_device, select_device_features, QueueFamilyIndices, SurfaceSupport, VulkanContext,
};
pub use pipeline::{GraphicsPipeline, PipelineConfig, PipelinePreset};
pub use pipeline_manager::{PipelineFactory, PipelineManager, PipelineSource, VulkanPipelineFactory};
pub use render_context::RenderContext;
pub use renderer::Renderer;
pub use shader::{compile_glsl, FileShaderLoader, ShaderLoader};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, Swapchain,
};
pub use sync::{FrameSynchronizer, SyncSet};
pub use vertex::{Vertex, VertexFormat};
