//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! Semaphores order GPU work against GPU work (acquire -> render -> present).
//! Fences let the CPU block until a submission completes. A [`FrameSlot`]
//! bundles the three objects one in-flight frame needs:
//!
//! ```text
//! acquire  --signals--> image_available --waited by--> submit
//! submit   --signals--> render_finished --waited by--> present
//! submit   --signals--> in_flight       --waited by--> CPU (next use of slot/image)
//! ```
//!
//! Slots are created once and reused across swapchain rebuilds; they never
//! reference swapchain objects.

use ash::{vk, Device};

use crate::render::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Binary semaphore with automatic cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Get the fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects for one in-flight frame
pub struct FrameSlot {
    /// Signaled when the acquired swapchain image is ready to be written
    pub image_available: Semaphore,
    /// Signaled when the frame's commands finish; present waits on it
    pub render_finished: Semaphore,
    /// Signaled when the frame's submission completes; starts signaled
    pub in_flight: Fence,
}

impl FrameSlot {
    /// Create one slot
    pub fn new(context: &DeviceContext) -> VulkanResult<Self> {
        Ok(Self {
            image_available: context.create_semaphore()?,
            render_finished: context.create_semaphore()?,
            in_flight: context.create_fence(true)?,
        })
    }

    /// Create `count` slots
    pub fn create_all(context: &DeviceContext, count: usize) -> VulkanResult<Vec<Self>> {
        let slots = (0..count)
            .map(|_| Self::new(context))
            .collect::<VulkanResult<Vec<_>>>()?;
        log::debug!("Created {count} frame slots");
        Ok(slots)
    }
}
