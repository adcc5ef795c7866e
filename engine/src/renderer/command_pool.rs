use ash::vk;
use std::sync::Arc;
use tracing::{debug, trace};

use super::VulkanContext;
use crate::error::Result;

/// Graphics command pool with one primary command buffer per frame slot.
pub struct CommandPool {
    ctx: Arc<VulkanContext>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    /// Create a resettable pool on the graphics family and allocate
    /// `buffer_count` primary buffers from it.
    pub fn new(ctx: Arc<VulkanContext>, buffer_count: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.graphics_family());

        let pool = unsafe { ctx.device.create_command_pool(&pool_info, None)? };

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(buffer_count);

        let buffers = match unsafe { ctx.device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        debug!(buffer_count, "command pool created");
        Ok(Self { ctx, pool, buffers })
    }

    pub fn buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }

    /// Reset the slot's buffer and begin recording into it.
    pub fn begin(&self, slot: usize) -> Result<vk::CommandBuffer> {
        let cmd = self.buffers[slot];
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.ctx
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.ctx.device.begin_command_buffer(cmd, &begin_info)?;
        }
        Ok(cmd)
    }

    pub fn end(&self, slot: usize) -> Result<()> {
        unsafe { self.ctx.device.end_command_buffer(self.buffers[slot])? };
        Ok(())
    }

    /// Record, submit and wait for a one-shot command buffer, e.g. uploads
    /// that must land before the first frame.
    pub fn immediate_submit<F>(&self, queue: vk::Queue, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.ctx.device;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { device.allocate_command_buffers(&allocate_info)?[0] };
        let result = self.run_once(queue, cmd, record);
        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        trace!(ok = result.is_ok(), "immediate submit finished");
        result
    }

    fn run_once<F>(&self, queue: vk::Queue, cmd: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.ctx.device;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.begin_command_buffer(cmd, &begin_info)?;
            record(device, cmd);
            device.end_command_buffer(cmd)?;

            let cmds = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            device.queue_submit(queue, &[submit], vk::Fence::null())?;
            device.queue_wait_idle(queue)?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // destroying the pool frees every buffer allocated from it
        unsafe { self.ctx.device.destroy_command_pool(self.pool, None) };
    }
}
