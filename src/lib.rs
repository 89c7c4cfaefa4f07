//! Ember: a small Vulkan rendering core.
//!
//! The core brings up instance, device and swapchain, builds one fixed
//! pipeline and drives a double-buffered draw loop. Windowing, file I/O and
//! fatal-error handling stay with the host, which talks to the core through
//! plain callbacks (see [`Renderer::new`]).

pub mod backend;
pub mod config;
pub mod logging;
pub mod renderer;

pub use config::Config;
pub use renderer::{Renderer, RendererOptions};
