// Backend module - Vulkan abstraction layer
//
// Thin owned wrappers around ash handles. Each wrapper holds an
// `Arc<VulkanContext>` and releases its objects on Drop, so the logical
// device outlives everything created from it.

pub mod caps;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub mod mock;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub use device::{ContextConfig, VulkanContext};
pub use error::{report_fatal, RendererError};
pub use frame::{FrameBackend, FrameLoop, FrameStatus, ResizeFlag};
pub use pipeline::GraphicsPipeline;
pub use shader::ShaderPaths;
pub use swapchain::Swapchain;
