use ash::vk;

/// Command recording helpers for one frame's command buffer.
pub struct RenderContext<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    extent: vk::Extent2D,
}

impl<'a> RenderContext<'a> {
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) -> Self {
        Self {
            device,
            cmd,
            extent,
        }
    }

    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    /// Viewport covering the whole swapchain extent.
    pub fn set_full_viewport(&self) {
        let viewport = vk::Viewport::default()
            .width(self.extent.width as f32)
            .height(self.extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &[viewport]) };
    }

    pub fn set_full_scissor(&self) {
        let scissor = vk::Rect2D::default().extent(self.extent);
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[scissor]) };
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[0]) };
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(self.cmd, buffer, 0, index_type) };
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.cmd, index_count, instance_count, 0, 0, 0);
        }
    }
}
