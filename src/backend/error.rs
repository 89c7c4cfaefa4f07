// Renderer errors
//
// Everything the core cannot recover from surfaces as an `anyhow::Error`
// and travels up to the host, which hands it to `report_fatal`.
// The variants below are the conditions the core detects on its own
// (as opposed to a raw `vk::Result` from a failed create call).

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use super::caps::QueueCapabilities;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Failed to find graphics device with Vulkan support")]
    NoPhysicalDevices,

    #[error("Failed to find any appropriate device ({0} probed)")]
    NoSuitableDevice(usize),

    #[error("Failed to find required Vulkan instance layer \"{0}\"")]
    MissingValidationLayer(String),

    #[error("Failed to find a queue family with {0:?} capability")]
    MissingQueueFamily(QueueCapabilities),

    #[error(
        "Different graphics ({graphics}) and present ({present}) queue families, \
         separate families not implemented"
    )]
    QueueFamilyMismatch { graphics: u32, present: u32 },

    #[error("Failed to open shader binary {path:?}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shader binary {path:?} is not valid SPIR-V")]
    InvalidSpirv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to present swapchain image: {0}")]
    Present(vk::Result),
}

/// Fatal-error reporter: log the whole error chain, then terminate.
///
/// GPU context failures are not recoverable mid-session, so there is no
/// retry path. Only the host calls this; the core just returns `Err`.
pub fn report_fatal(err: &anyhow::Error) -> ! {
    log::error!("Fatal renderer error: {}", err);
    for cause in err.chain().skip(1) {
        log::error!("  caused by: {}", cause);
    }
    log::logger().flush();
    std::process::exit(1)
}
