//! # Present Engine
//!
//! A Vulkan presentation loop built on ash and GLFW.
//!
//! The crate owns a device context, allocates GPU buffers, manages the
//! swapchain and its render targets, builds graphics pipelines and drives
//! a fixed number of frames in flight through acquire, submit and present.
//! When the surface goes out of date the swapchain, render targets,
//! pipeline and command buffers are rebuilt as one generation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use present_engine::prelude::*;
//! # struct MyContent;
//! # impl MyContent { fn new(_: &DeviceContext) -> VulkanResult<Self> { Ok(Self) } }
//! # impl FrameContent for MyContent {
//! #     fn configure_pipeline(&self, _: &mut PipelineBuilder, _: &dyn ShaderStore) -> VulkanResult<()> { Ok(()) }
//! #     fn record(&self, _: &ActiveRenderPass<'_>) {}
//! # }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let mut window = Window::new("Vulkan window", 1920, 1080)?;
//!     let context = DeviceContext::new(&mut window, &config)?;
//!     let shaders = FileShaderStore::with_fallbacks(&config.shader_directory);
//!     let content = MyContent::new(&context)?;
//!     let mut renderer = FrameRenderer::new(&context, &window, &shaders, content, &config)?;
//!     run_frame_loop(&mut window, &mut renderer)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod render;

pub use ash;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, DeviceRequirements, RendererConfig, WindowConfig},
        render::{
            frame::{run_frame_loop, EventPump, FrameLifecycle, FrameOutcome, FrameScheduler},
            vulkan::{
                ActiveRenderPass, DeviceContext, FileShaderStore, FrameContent, FrameRenderer,
                PipelineBuilder, QueueRole, ShaderStore, SurfaceProvider, VulkanError,
                VulkanResult, Window,
            },
        },
    };
}
