//! Frame pacing and the outer presentation loop
//!
//! [`FrameScheduler`] owns the bookkeeping for frames in flight: which slot
//! the CPU records into next and which slot's fence last claimed each
//! swapchain image. It holds no Vulkan objects so the rotation rules can be
//! tested without a device.

use crate::render::vulkan::{SurfaceProvider, VulkanResult};

/// Round-robin slot rotation plus the per-image fence table.
///
/// `F` is whatever identifies a slot's fence; the renderer uses `vk::Fence`.
#[derive(Debug, Clone)]
pub struct FrameScheduler<F> {
    current_frame: usize,
    frames_in_flight: usize,
    images_in_flight: Vec<Option<F>>,
}

impl<F: Copy + Eq> FrameScheduler<F> {
    /// Scheduler for `frames_in_flight` slots over `image_count` images
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            current_frame: 0,
            frames_in_flight: frames_in_flight.max(1),
            images_in_flight: vec![None; image_count],
        }
    }

    /// Slot the next frame records into
    pub const fn current_slot(&self) -> usize {
        self.current_frame
    }

    /// Number of slots
    pub const fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Number of images tracked
    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Fence that last claimed `image_index`, if any
    pub fn image_owner(&self, image_index: usize) -> Option<F> {
        self.images_in_flight.get(image_index).copied().flatten()
    }

    /// Record that `fence` now guards `image_index`.
    ///
    /// Returns the fence of an earlier frame still holding the image, which
    /// the caller must wait on before writing it. A claim by the same fence
    /// returns `None` because that slot was already waited on.
    pub fn claim_image(&mut self, image_index: usize, fence: F) -> Option<F> {
        let entry = self.images_in_flight.get_mut(image_index)?;
        let previous = entry.replace(fence);
        previous.filter(|&prev| prev != fence)
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
    }

    /// Forget all image claims and size the table for a new swapchain
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }
}

/// What happened to one call of [`FrameLifecycle::draw_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Image rendered and queued for presentation
    Presented,
    /// The swapchain generation was rebuilt
    Recreated,
    /// Nothing drawn; the surface has no area
    Skipped,
}

/// Per-frame hooks driven by [`run_frame_loop`]
pub trait FrameLifecycle {
    /// Called before each frame
    fn start_frame(&mut self) -> VulkanResult<()> {
        Ok(())
    }

    /// Render and present one frame
    fn draw_frame(&mut self, surface: &dyn SurfaceProvider) -> VulkanResult<FrameOutcome>;

    /// Called after each frame
    fn end_frame(&mut self) -> VulkanResult<()> {
        Ok(())
    }
}

/// Source of window events and the close request
pub trait EventPump {
    /// Whether the user asked to close the window
    fn should_close(&self) -> bool;

    /// Process pending events
    fn poll_events(&mut self);
}

/// Poll events and draw frames until the window asks to close.
///
/// The first error stops the loop and is returned.
pub fn run_frame_loop<W, L>(window: &mut W, lifecycle: &mut L) -> VulkanResult<()>
where
    W: EventPump + SurfaceProvider,
    L: FrameLifecycle + ?Sized,
{
    let mut presented = 0u64;
    let mut recreated = 0u64;
    while !window.should_close() {
        window.poll_events();
        lifecycle.start_frame()?;
        match lifecycle.draw_frame(&*window)? {
            FrameOutcome::Presented => presented += 1,
            FrameOutcome::Recreated => recreated += 1,
            FrameOutcome::Skipped => {}
        }
        lifecycle.end_frame()?;
    }
    log::info!("Frame loop finished: {presented} frames presented, {recreated} swapchain rebuilds");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::{VulkanError, WindowResult};
    use ash::{vk, Instance};

    #[test]
    fn test_slots_rotate_round_robin() {
        let mut scheduler: FrameScheduler<u32> = FrameScheduler::new(4, 3);
        let slots: Vec<usize> = (0..9)
            .map(|_| {
                let slot = scheduler.current_slot();
                scheduler.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_zero_frames_in_flight_is_clamped() {
        let mut scheduler: FrameScheduler<u32> = FrameScheduler::new(0, 2);
        assert_eq!(scheduler.frames_in_flight(), 1);
        scheduler.advance();
        assert_eq!(scheduler.current_slot(), 0);
    }

    #[test]
    fn test_first_claim_has_nothing_to_wait_on() {
        let mut scheduler = FrameScheduler::new(4, 3);
        assert_eq!(scheduler.claim_image(1, 10u32), None);
        assert_eq!(scheduler.image_owner(1), Some(10));
        assert_eq!(scheduler.image_owner(0), None);
    }

    #[test]
    fn test_claim_returns_previous_owner() {
        let mut scheduler = FrameScheduler::new(4, 3);
        scheduler.claim_image(2, 10u32);
        assert_eq!(scheduler.claim_image(2, 11), Some(10));
        assert_eq!(scheduler.image_owner(2), Some(11));
    }

    #[test]
    fn test_reclaim_by_same_fence_does_not_wait() {
        let mut scheduler = FrameScheduler::new(4, 3);
        scheduler.claim_image(0, 7u32);
        assert_eq!(scheduler.claim_image(0, 7), None);
    }

    #[test]
    fn test_claim_out_of_range_is_ignored() {
        let mut scheduler = FrameScheduler::new(4, 3);
        assert_eq!(scheduler.claim_image(5, 1u32), None);
        assert_eq!(scheduler.image_owner(5), None);
    }

    #[test]
    fn test_more_slots_than_images_never_double_claims() {
        // Four slots over three images: every wrap onto an image held by a
        // different slot must report that slot's fence.
        let mut scheduler = FrameScheduler::new(4, 3);
        let mut waits = Vec::new();
        for frame in 0..8usize {
            let fence = scheduler.current_slot() as u32;
            let image = frame % 3;
            waits.push(scheduler.claim_image(image, fence));
            scheduler.advance();
        }
        assert_eq!(
            waits,
            vec![None, None, None, Some(0), Some(1), Some(2), Some(3), Some(0)]
        );
    }

    #[test]
    fn test_reset_images_clears_claims() {
        let mut scheduler = FrameScheduler::new(4, 3);
        scheduler.claim_image(0, 1u32);
        scheduler.claim_image(1, 2);
        scheduler.advance();
        scheduler.reset_images(5);
        assert_eq!(scheduler.image_count(), 5);
        assert!((0..5).all(|i| scheduler.image_owner(i).is_none()));
        assert_eq!(scheduler.current_slot(), 1);
    }

    struct MockWindow {
        polls: usize,
        close_after: usize,
    }

    impl EventPump for MockWindow {
        fn should_close(&self) -> bool {
            self.polls >= self.close_after
        }

        fn poll_events(&mut self) {
            self.polls += 1;
        }
    }

    impl SurfaceProvider for MockWindow {
        fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn create_surface(&mut self, _instance: &Instance) -> WindowResult<vk::SurfaceKHR> {
            Ok(vk::SurfaceKHR::null())
        }

        fn framebuffer_size(&self) -> (u32, u32) {
            (800, 600)
        }
    }

    #[derive(Default)]
    struct MockLifecycle {
        calls: Vec<&'static str>,
        fail_on_draw: Option<usize>,
        draws: usize,
    }

    impl FrameLifecycle for MockLifecycle {
        fn start_frame(&mut self) -> VulkanResult<()> {
            self.calls.push("start");
            Ok(())
        }

        fn draw_frame(&mut self, surface: &dyn SurfaceProvider) -> VulkanResult<FrameOutcome> {
            assert_eq!(surface.framebuffer_size(), (800, 600));
            self.calls.push("draw");
            self.draws += 1;
            if self.fail_on_draw == Some(self.draws) {
                return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
            }
            Ok(FrameOutcome::Presented)
        }

        fn end_frame(&mut self) -> VulkanResult<()> {
            self.calls.push("end");
            Ok(())
        }
    }

    #[test]
    fn test_loop_runs_hooks_in_order_until_close() {
        let mut window = MockWindow { polls: 0, close_after: 2 };
        let mut lifecycle = MockLifecycle::default();
        run_frame_loop(&mut window, &mut lifecycle).unwrap();
        assert_eq!(
            lifecycle.calls,
            vec!["start", "draw", "end", "start", "draw", "end"]
        );
    }

    #[test]
    fn test_loop_does_not_draw_when_already_closed() {
        let mut window = MockWindow { polls: 0, close_after: 0 };
        let mut lifecycle = MockLifecycle::default();
        run_frame_loop(&mut window, &mut lifecycle).unwrap();
        assert!(lifecycle.calls.is_empty());
    }

    #[test]
    fn test_loop_stops_on_first_error() {
        let mut window = MockWindow { polls: 0, close_after: 10 };
        let mut lifecycle = MockLifecycle {
            fail_on_draw: Some(2),
            ..MockLifecycle::default()
        };
        let result = run_frame_loop(&mut window, &mut lifecycle);
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))));
        assert_eq!(lifecycle.calls, vec!["start", "draw", "end", "start", "draw"]);
        assert_eq!(window.polls, 2);
    }
}
