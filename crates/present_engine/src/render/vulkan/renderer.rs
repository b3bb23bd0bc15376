//! Frame orchestration
//!
//! [`FrameRenderer`] drives one frame at a time through
//! wait -> acquire -> record -> submit -> present, and rebuilds the swapchain
//! generation (swapchain, render target, pipeline, command buffers) when the
//! surface goes out of date. What gets drawn is supplied by a
//! [`FrameContent`].

use ash::vk;

use crate::config::RendererConfig;
use crate::render::frame::{FrameLifecycle, FrameOutcome, FrameScheduler};
use crate::render::vulkan::{
    extent_has_area, full_scissor, full_viewport, AcquireOutcome, ActiveRenderPass, ChainStatus,
    CommandRecorder, DeviceContext, FrameSlot, PipelineBuilder, PresentOutcome, QueueRole,
    RenderTarget, ShaderStore, SurfaceProvider, Swapchain, VulkanError, VulkanResult,
};

/// Scene-specific part of a frame
pub trait FrameContent {
    /// Add shader stages and vertex layout to the pipeline.
    ///
    /// Called once; the renderer recompiles the configured pipeline after
    /// every swapchain rebuild.
    fn configure_pipeline(&self, pipeline: &mut PipelineBuilder, shaders: &dyn ShaderStore) -> VulkanResult<()>;

    /// Record draw commands. The pipeline is bound and viewport and scissor
    /// are set when this is called.
    fn record(&self, pass: &ActiveRenderPass<'_>);
}

/// Decision taken after each swapchain interaction of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStep {
    /// Record and submit into this swapchain image
    Render(u32),
    /// Nothing left to do for this frame
    Done,
    /// Rebuild the swapchain generation; an unsubmitted frame is abandoned
    Rebuild,
    /// The surface has no area; skip and keep the rebuild pending
    Defer,
}

/// A suboptimal image is still rendered; the present reports it again
const fn after_acquire(outcome: AcquireOutcome) -> FrameStep {
    match outcome {
        AcquireOutcome::Acquired { image_index, .. } => FrameStep::Render(image_index),
        AcquireOutcome::OutOfDate => FrameStep::Rebuild,
    }
}

const fn after_present(outcome: PresentOutcome) -> FrameStep {
    if outcome.needs_recreate() {
        FrameStep::Rebuild
    } else {
        FrameStep::Done
    }
}

const fn before_rebuild(framebuffer_size: (u32, u32)) -> FrameStep {
    let (width, height) = framebuffer_size;
    if extent_has_area(vk::Extent2D { width, height }) {
        FrameStep::Rebuild
    } else {
        FrameStep::Defer
    }
}

const fn after_rebuild(status: ChainStatus) -> FrameStep {
    match status {
        ChainStatus::Created => FrameStep::Done,
        ChainStatus::ZeroExtent => FrameStep::Defer,
    }
}

/// Rebuild bookkeeping: a pending flag and a completed-rebuild counter
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RebuildState {
    pending: bool,
    generation: u64,
}

impl RebuildState {
    fn defer(&mut self) -> FrameOutcome {
        if !self.pending {
            log::debug!("Surface has no area, deferring swapchain rebuild");
        }
        self.pending = true;
        FrameOutcome::Skipped
    }

    fn complete(&mut self) -> FrameOutcome {
        self.pending = false;
        self.generation += 1;
        FrameOutcome::Recreated
    }
}

/// Owner of the swapchain generation and the frames in flight
pub struct FrameRenderer<'ctx, C: FrameContent> {
    pipeline: PipelineBuilder,
    render_target: RenderTarget,
    swapchain: Swapchain,
    frame_slots: Vec<FrameSlot>,
    command_buffers: Vec<vk::CommandBuffer>,
    scheduler: FrameScheduler<vk::Fence>,
    content: C,
    context: &'ctx DeviceContext,
    clear_color: [f32; 4],
    rebuild: RebuildState,
}

impl<'ctx, C: FrameContent> FrameRenderer<'ctx, C> {
    /// Build the first swapchain generation and the frame slots.
    ///
    /// A window that starts minimized gets an empty chain and a pending
    /// rebuild that the first drawable frame completes.
    pub fn new(
        context: &'ctx DeviceContext,
        surface: &impl SurfaceProvider,
        shaders: &dyn ShaderStore,
        content: C,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let mut swapchain = Swapchain::new(context, config.target_image_count)?;
        let status = swapchain.create_swap_chain(context, surface.framebuffer_size())?;
        let mut rebuild = RebuildState::default();
        if after_rebuild(status) == FrameStep::Defer {
            rebuild.defer();
        }

        let mut render_target = RenderTarget::new(context.device().clone(), &swapchain);
        render_target.create_pass_and_framebuffers(&swapchain)?;

        let mut pipeline = PipelineBuilder::new(context.device().clone());
        pipeline.set_dynamic_viewport_scissor(true);
        content.configure_pipeline(&mut pipeline, shaders)?;
        pipeline.finalize(&render_target, &swapchain)?;

        let image_count = swapchain.image_count();
        let command_buffers = Self::allocate_command_buffers(context, image_count)?;
        let frame_slots = FrameSlot::create_all(context, config.frames_in_flight)?;
        let scheduler = FrameScheduler::new(config.frames_in_flight, image_count);

        log::info!(
            "Frame renderer ready: {} images, {} frames in flight",
            image_count,
            config.frames_in_flight
        );

        Ok(Self {
            pipeline,
            render_target,
            swapchain,
            frame_slots,
            command_buffers,
            scheduler,
            content,
            context,
            clear_color: config.clear_color,
            rebuild,
        })
    }

    fn allocate_command_buffers(context: &DeviceContext, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let count = u32::try_from(count).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{count} command buffers requested"),
        })?;
        context.allocate_command_buffers(QueueRole::Graphics, vk::CommandBufferLevel::PRIMARY, count)
    }

    /// Render and present one frame
    pub fn draw_frame(&mut self, surface: &dyn SurfaceProvider) -> VulkanResult<FrameOutcome> {
        if self.rebuild.pending {
            return self.recreate(surface);
        }

        let slot = &self.frame_slots[self.scheduler.current_slot()];
        let in_flight = slot.in_flight.handle();
        let image_available = slot.image_available.handle();
        let render_finished = slot.render_finished.handle();

        // The slot's semaphores and fence are reused only after its last
        // submission has completed
        self.context.wait_fence(in_flight)?;

        // Nothing was submitted yet, so the slot's fence stays signaled
        let image_index = match after_acquire(self.swapchain.acquire_next_image(image_available)?) {
            FrameStep::Render(image_index) => image_index,
            _ => {
                log::debug!("Swapchain out of date on acquire, abandoning frame");
                return self.recreate(surface);
            }
        };
        let image = image_index as usize;

        if let Some(previous) = self.scheduler.claim_image(image, in_flight) {
            self.context.wait_fence(previous)?;
        }

        let command_buffer = *self
            .command_buffers
            .get(image)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no command buffer for image {image}"),
            })?;
        self.record(command_buffer, image)?;

        self.context.reset_fence(in_flight)?;

        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        self.context.submit(QueueRole::Graphics, &[submit_info], in_flight)?;

        let presented = self.swapchain.present(self.context, &signal_semaphores, image_index)?;
        self.scheduler.advance();

        if after_present(presented) == FrameStep::Rebuild {
            log::debug!("Swapchain {presented:?} on present");
            return self.recreate(surface);
        }
        Ok(FrameOutcome::Presented)
    }

    fn record(&self, command_buffer: vk::CommandBuffer, image: usize) -> VulkanResult<()> {
        let mut recorder = CommandRecorder::begin(self.context.device(), command_buffer)?;
        {
            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];
            let pass = self
                .render_target
                .begin(&mut recorder, image, &clear_values, vk::SubpassContents::INLINE)?;

            if self.pipeline.has_dynamic_viewport_scissor() {
                let extent = self.swapchain.extent();
                pass.set_viewport(full_viewport(extent));
                pass.set_scissor(full_scissor(extent));
            }
            self.pipeline.bind(&pass);
            self.content.record(&pass);
        }
        recorder.end()?;
        Ok(())
    }

    /// Rebuild the swapchain generation at the surface's current size.
    ///
    /// A zero-area surface defers the rebuild: frames are skipped until the
    /// window has a drawable size again.
    pub fn recreate(&mut self, surface: &dyn SurfaceProvider) -> VulkanResult<FrameOutcome> {
        self.context.wait_device_idle()?;

        let framebuffer_size = surface.framebuffer_size();
        if before_rebuild(framebuffer_size) == FrameStep::Defer {
            return Ok(self.rebuild.defer());
        }
        // The surface can still minimize between the size check and the
        // capabilities query
        let status = self.swapchain.create_swap_chain(self.context, framebuffer_size)?;
        if after_rebuild(status) == FrameStep::Defer {
            return Ok(self.rebuild.defer());
        }

        self.render_target.update_format(&self.swapchain);
        self.render_target.create_pass_and_framebuffers(&self.swapchain)?;
        self.pipeline.finalize(&self.render_target, &self.swapchain)?;

        let old_buffers = std::mem::take(&mut self.command_buffers);
        self.context.free_command_buffers(QueueRole::Graphics, &old_buffers);
        let image_count = self.swapchain.image_count();
        self.command_buffers = Self::allocate_command_buffers(self.context, image_count)?;
        self.scheduler.reset_images(image_count);

        let outcome = self.rebuild.complete();
        let extent = self.swapchain.extent();
        log::info!(
            "Swapchain rebuilt ({}x{}, {} images, generation {})",
            extent.width,
            extent.height,
            image_count,
            self.rebuild.generation
        );
        Ok(outcome)
    }

    /// Current swapchain
    pub const fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Current render target
    pub const fn render_target(&self) -> &RenderTarget {
        &self.render_target
    }

    /// Graphics pipeline
    pub const fn pipeline(&self) -> &PipelineBuilder {
        &self.pipeline
    }

    /// Scene content
    pub const fn content(&self) -> &C {
        &self.content
    }

    /// Swapchain image count
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frame_slots.len()
    }

    /// Number of completed swapchain rebuilds
    pub const fn generation(&self) -> u64 {
        self.rebuild.generation
    }

    /// Whether a rebuild is waiting for the surface to regain area
    pub const fn is_recreate_pending(&self) -> bool {
        self.rebuild.pending
    }
}

impl<C: FrameContent> FrameLifecycle for FrameRenderer<'_, C> {
    fn draw_frame(&mut self, surface: &dyn SurfaceProvider) -> VulkanResult<FrameOutcome> {
        Self::draw_frame(self, surface)
    }
}

impl<C: FrameContent> Drop for FrameRenderer<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_device_idle() {
            log::error!("Device idle wait failed while dropping frame renderer: {e}");
        }
        self.context
            .free_command_buffers(QueueRole::Graphics, &self.command_buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_acquire_abandons_frame() {
        assert_eq!(after_acquire(AcquireOutcome::OutOfDate), FrameStep::Rebuild);
    }

    #[test]
    fn test_suboptimal_acquire_still_renders() {
        let acquired = AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        };
        assert_eq!(after_acquire(acquired), FrameStep::Render(2));
    }

    #[test]
    fn test_present_outcome_drives_rebuild() {
        assert_eq!(after_present(PresentOutcome::Presented), FrameStep::Done);
        assert_eq!(after_present(PresentOutcome::Suboptimal), FrameStep::Rebuild);
        assert_eq!(after_present(PresentOutcome::OutOfDate), FrameStep::Rebuild);
    }

    #[test]
    fn test_zero_area_framebuffer_defers_rebuild() {
        assert_eq!(before_rebuild((0, 0)), FrameStep::Defer);
        assert_eq!(before_rebuild((0, 600)), FrameStep::Defer);
        assert_eq!(before_rebuild((800, 0)), FrameStep::Defer);
        assert_eq!(before_rebuild((800, 600)), FrameStep::Rebuild);
    }

    #[test]
    fn test_zero_extent_chain_defers_rebuild() {
        assert_eq!(after_rebuild(ChainStatus::ZeroExtent), FrameStep::Defer);
        assert_eq!(after_rebuild(ChainStatus::Created), FrameStep::Done);
    }

    #[test]
    fn test_deferred_rebuild_stays_pending_until_completed() {
        let mut rebuild = RebuildState::default();

        assert_eq!(rebuild.defer(), FrameOutcome::Skipped);
        assert!(rebuild.pending);
        assert_eq!(rebuild.defer(), FrameOutcome::Skipped);
        assert!(rebuild.pending);
        assert_eq!(rebuild.generation, 0);

        assert_eq!(rebuild.complete(), FrameOutcome::Recreated);
        assert!(!rebuild.pending);
        assert_eq!(rebuild.generation, 1);
    }
}
