//! Rendering: the Vulkan backend and the frame loop that drives it

pub mod frame;
pub mod vulkan;
