use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;
use tracing::trace;

use super::command_pool::CommandPool;
use super::render_context::RenderContext;
use super::VulkanContext;
use crate::error::{RenderError, Result};

/// Index of the first memory type allowed by `type_bits` that has all of
/// `required` set.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// A buffer with its own dedicated allocation.
pub struct GpuBuffer {
    ctx: Arc<VulkanContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    len: u32,
}

impl GpuBuffer {
    /// Host-visible, host-coherent buffer filled once at creation.
    pub fn with_data<T: Pod>(
        ctx: Arc<VulkanContext>,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::allocate(
            ctx,
            bytes.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            data.len() as u32,
        )?;

        // on error the partially built buffer is released by Drop
        unsafe {
            let device = &buffer.ctx.device;
            let ptr = device.map_memory(
                buffer.memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(buffer.memory);
        }

        trace!(bytes = bytes.len(), ?usage, "host buffer filled");
        Ok(buffer)
    }

    /// Device-local buffer filled through a staging copy submitted on
    /// `queue`. Blocks until the copy has finished.
    pub fn device_local<T: Pod>(
        ctx: Arc<VulkanContext>,
        commands: &CommandPool,
        queue: vk::Queue,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let staging = Self::with_data(ctx.clone(), data, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::allocate(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            data.len() as u32,
        )?;

        commands.immediate_submit(queue, |device, cmd| {
            let region = vk::BufferCopy::default().size(size);
            unsafe { device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
        })?;

        trace!(bytes = size, ?usage, "device buffer uploaded");
        Ok(buffer)
    }

    fn allocate(
        ctx: Arc<VulkanContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
        len: u32,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { ctx.device.create_buffer(&buffer_info, None)? };

        let mut gpu_buffer = Self {
            ctx,
            buffer,
            memory: vk::DeviceMemory::null(),
            len,
        };

        let device = &gpu_buffer.ctx.device;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = find_memory_type(
            &gpu_buffer.ctx.memory_properties(),
            requirements.memory_type_bits,
            required,
        )
        .ok_or(RenderError::NoMemoryType)?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
        gpu_buffer.memory = memory;
        unsafe { device.bind_buffer_memory(buffer, memory, 0)? };

        Ok(gpu_buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Number of elements the buffer was created with.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.ctx.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Vertex buffer plus a 16-bit index buffer.
pub struct Mesh {
    vertices: GpuBuffer,
    indices: GpuBuffer,
}

impl Mesh {
    /// Static mesh in device-local memory.
    pub fn upload<V: Pod>(
        ctx: Arc<VulkanContext>,
        commands: &CommandPool,
        queue: vk::Queue,
        vertices: &[V],
        indices: &[u16],
    ) -> Result<Self> {
        Ok(Self {
            vertices: GpuBuffer::device_local(
                ctx.clone(),
                commands,
                queue,
                vertices,
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?,
            indices: GpuBuffer::device_local(
                ctx,
                commands,
                queue,
                indices,
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len()
    }

    /// Bind both buffers and issue one indexed draw with the bound pipeline.
    pub fn draw(&self, ctx: &RenderContext) {
        ctx.bind_vertex_buffer(self.vertices.handle());
        ctx.bind_index_buffer(self.indices.handle(), vk::IndexType::UINT16);
        ctx.draw_indexed(self.index_count(), 1);
    }
}
