use ash::{khr, vk};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Span};

use super::VulkanContext;
use crate::error::{RenderError, Result};
use crate::frame::{AcquireOutcome, PresentOutcome};

/// Prefer 8-bit BGRA sRGB; otherwise take whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when available (and vsync isn't forced), else FIFO, which every
/// implementation must support.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_vsync: bool) -> vk::PresentModeKHR {
    if !prefer_vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent if it reports one, else the framebuffer size
/// clamped to the supported range. `None` when the result has no area, which
/// is what a minimized window reports.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> Option<vk::Extent2D> {
    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        clamp_extent(capabilities, framebuffer_size)
    };
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

fn clamp_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    (width, height): (u32, u32),
) -> vk::Extent2D {
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped at the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Presentable images plus everything needed to render into them: views,
/// a single-subpass render pass and one framebuffer per image.
pub struct Swapchain {
    ctx: Arc<VulkanContext>,
    loader: khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
    prefer_vsync: bool,
    span: Span,
}

impl Swapchain {
    pub fn new(
        ctx: Arc<VulkanContext>,
        framebuffer_size: (u32, u32),
        clear_color: [f32; 4],
        prefer_vsync: bool,
    ) -> Result<Self> {
        let loader = khr::swapchain::Device::new(&ctx.instance, &ctx.device);
        let mut swapchain = Self {
            ctx,
            loader,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            render_pass: vk::RenderPass::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            clear_color,
            prefer_vsync,
            span: info_span!("swapchain"),
        };
        // a failed create leaves partial state that Drop cleans up
        swapchain.create(framebuffer_size)?;
        Ok(swapchain)
    }

    /// Tear down every surface-dependent object and build it again for the
    /// current window size. The render pass handle changes.
    pub fn recreate(&mut self, framebuffer_size: (u32, u32)) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();
        unsafe { self.ctx.device.device_wait_idle()? };
        self.destroy();
        self.create(framebuffer_size)?;
        info!(
            width = self.extent.width,
            height = self.extent.height,
            "swapchain recreated"
        );
        Ok(())
    }

    fn create(&mut self, framebuffer_size: (u32, u32)) -> Result<()> {
        let _guard = self.span.enter();
        let support = self.ctx.surface_support()?;
        let format = choose_surface_format(&support.formats)
            .ok_or(RenderError::UnsupportedSurface("no surface formats reported"))?;
        if support.present_modes.is_empty() {
            return Err(RenderError::UnsupportedSurface("no present modes reported"));
        }
        let present_mode = choose_present_mode(&support.present_modes, self.prefer_vsync);
        let extent = choose_extent(&support.capabilities, framebuffer_size)
            .ok_or(RenderError::UnsupportedSurface("surface has zero area"))?;
        let image_count = choose_image_count(&support.capabilities);

        let families = self.ctx.queue_families.unique();
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.ctx.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        create_info = if families.len() > 1 {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        self.handle = unsafe { self.loader.create_swapchain(&create_info, None)? };
        self.format = format;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(self.handle)? };

        for &image in &self.images {
            let view = create_image_view(&self.ctx.device, image, format.format)?;
            self.image_views.push(view);
        }

        self.render_pass = create_render_pass(&self.ctx.device, format.format)?;

        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe {
                self.ctx
                    .device
                    .create_framebuffer(&framebuffer_info, None)?
            };
            self.framebuffers.push(framebuffer);
        }

        debug!(
            format = ?format.format,
            ?present_mode,
            width = extent.width,
            height = extent.height,
            images = self.images.len(),
            "swapchain created"
        );
        Ok(())
    }

    /// Reverse creation order. Safe on partially created state.
    fn destroy(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            self.images.clear();
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }

    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Image {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> Result<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::NeedsRecreate),
            Err(e) => Err(e.into()),
        }
    }

    /// Begin the render pass on the image's framebuffer, clearing to the
    /// configured background color.
    pub fn begin_render_pass(&self, cmd: vk::CommandBuffer, image_index: u32) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D::default().extent(self.extent))
            .clear_values(&clear_values);

        unsafe {
            self.ctx
                .device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.ctx.device.cmd_end_render_pass(cmd) };
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let span = self.span.clone();
        let _guard = span.enter();
        if let Err(e) = self.ctx.wait_idle() {
            warn!(error = %e, "device did not go idle before swapchain teardown");
        }
        self.destroy();
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );
    Ok(unsafe { device.create_image_view(&view_info, None)? })
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);

    // the acquire semaphore is waited at COLOR_ATTACHMENT_OUTPUT, so the
    // layout transition has to wait there too
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(unsafe { device.create_render_pass(&render_pass_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[1]));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_unless_vsync_forced() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn uses_current_extent_when_defined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&capabilities, (1920, 1080)),
            Some(vk::Extent2D {
                width: 800,
                height: 600
            })
        );
    }

    #[test]
    fn clamps_framebuffer_size_otherwise() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&capabilities, (4000, 10)),
            Some(vk::Extent2D {
                width: 1024,
                height: 64
            })
        );
    }

    #[test]
    fn minimized_surface_has_no_extent() {
        // minimized windows on Windows report a fixed 0x0 extent
        let fixed_zero = vk::SurfaceCapabilitiesKHR::default();
        assert_eq!(choose_extent(&fixed_zero, (1280, 720)), None);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        assert_eq!(choose_extent(&unbounded, (0, 720)), None);
        assert_eq!(
            choose_extent(&unbounded, (1, 1)),
            Some(vk::Extent2D {
                width: 1,
                height: 1
            })
        );
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);
        capabilities.max_image_count = 2;
        assert_eq!(choose_image_count(&capabilities), 2);
    }
}
