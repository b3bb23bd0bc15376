//! Render pass and per-image framebuffers
//!
//! A [`RenderTarget`] is rebuilt whenever the swapchain is: call
//! [`RenderTarget::update_format`] then
//! [`RenderTarget::create_pass_and_framebuffers`]. Any pipeline compiled
//! against the previous render pass must be finalized again afterwards.

use ash::{vk, Device};

use crate::render::vulkan::{ActiveRenderPass, CommandRecorder, Swapchain, VulkanError, VulkanResult};

/// Single color attachment: cleared on load, stored, handed to presentation
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

/// External -> subpass 0 dependency.
///
/// Color writes wait for the previous reader of the image (the presentation
/// engine) so a new frame never writes an image still being scanned out.
pub fn present_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        .src_access_mask(vk::AccessFlags::MEMORY_READ)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build()
}

struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    fn new(device: Device, color_format: vk::Format) -> VulkanResult<Self> {
        let attachments = [color_attachment(color_format)];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];
        let dependencies = [present_dependency()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe {
            device
                .create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, render_pass })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    fn new(
        device: Device,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, framebuffer })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

/// Render pass plus one framebuffer per swapchain image
pub struct RenderTarget {
    // Framebuffers reference the pass, so they are declared (and dropped) first
    framebuffers: Vec<Framebuffer>,
    render_pass: Option<RenderPass>,
    device: Device,
    color_format: vk::Format,
    extent: vk::Extent2D,
}

impl RenderTarget {
    /// Describe a target for the swapchain's format; nothing is created yet
    pub fn new(device: Device, swapchain: &Swapchain) -> Self {
        Self {
            framebuffers: Vec::new(),
            render_pass: None,
            device,
            color_format: swapchain.format(),
            extent: vk::Extent2D::default(),
        }
    }

    /// Take the attachment format from the current swapchain
    pub fn update_format(&mut self, swapchain: &Swapchain) {
        self.color_format = swapchain.format();
    }

    /// Replace the render pass and build a framebuffer for every image view
    pub fn create_pass_and_framebuffers(&mut self, swapchain: &Swapchain) -> VulkanResult<()> {
        self.framebuffers.clear();
        self.render_pass = None;

        let render_pass = RenderPass::new(self.device.clone(), self.color_format)?;
        let extent = swapchain.extent();
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(self.device.clone(), render_pass.render_pass, view, extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!(
            "Created render pass with {} framebuffers at {}x{}",
            framebuffers.len(),
            extent.width,
            extent.height
        );
        self.framebuffers = framebuffers;
        self.render_pass = Some(render_pass);
        self.extent = extent;
        Ok(())
    }

    /// Begin the pass on `image_index`'s framebuffer covering the full extent
    pub fn begin<'r>(
        &self,
        recorder: &'r mut CommandRecorder,
        image_index: usize,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> VulkanResult<ActiveRenderPass<'r>> {
        let framebuffer = self.framebuffer(image_index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!(
                "no framebuffer for image {image_index} ({} available)",
                self.framebuffers.len()
            ),
        })?;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        Ok(recorder.begin_render_pass(self.render_pass(), framebuffer, render_area, clear_values, contents))
    }

    /// Current render pass; null before the first build
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
            .as_ref()
            .map_or_else(vk::RenderPass::null, |pass| pass.render_pass)
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index).map(|fb| fb.framebuffer)
    }

    /// Number of framebuffers; equals the swapchain image count after a build
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Color attachment format
    pub const fn format(&self) -> vk::Format {
        self.color_format
    }

    /// Extent the framebuffers were built at
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment_clears_and_presents() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_dependency_waits_for_presentation_reads() {
        let dependency = present_dependency();
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(dependency.src_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(dependency.src_access_mask, vk::AccessFlags::MEMORY_READ);
        assert_eq!(
            dependency.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dependency.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }
}
