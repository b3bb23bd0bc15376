//! Vulkan rendering backend
//!
//! Every device-owned object is wrapped in a type that destroys it on drop.
//! Objects that outlive a swapchain generation (device context, frame slots)
//! live in [`context`] and [`sync`]; the per-generation chain is
//! [`swapchain`] -> [`render_target`] -> [`pipeline`], rebuilt by
//! [`renderer::FrameRenderer`] whenever the surface goes out of date.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod pipeline;
pub mod render_target;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use buffer::{Buffer, MemoryMapping};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{
    find_memory_type, DeviceContext, QueueFamilyIndices, QueueRole, VulkanError, VulkanResult,
};
pub use descriptor::{DescriptorPool, DescriptorSetLayout};
pub use pipeline::{full_scissor, full_viewport, PipelineBuilder};
pub use render_target::RenderTarget;
pub use renderer::{FrameContent, FrameRenderer};
pub use shader::{FileShaderStore, ShaderError, ShaderModule, ShaderStore};
pub use swapchain::{extent_has_area, AcquireOutcome, ChainStatus, PresentOutcome, Swapchain};
pub use sync::{Fence, FrameSlot, Semaphore};
pub use window::{SurfaceProvider, Window, WindowError, WindowResult};
