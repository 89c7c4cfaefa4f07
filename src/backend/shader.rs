// Shader module loading
//
// Vulkan consumes SPIR-V words. Blobs come from a loader callback (the
// host's file I/O), get validated/realigned by `ash::util::read_spv` and
// wrapped in a module that is destroyed when it goes out of scope.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::error::RendererError;

/// Fixed locations of the compiled vertex/fragment binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("assets/shaders/vert.spv"),
            fragment: PathBuf::from("assets/shaders/frag.spv"),
        }
    }
}

/// Default byte-blob loader: read the whole file.
pub fn read_shader_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| {
        RendererError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// Decode a SPIR-V blob into 4-byte words (checks size and magic number).
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|source| {
        RendererError::InvalidSpirv {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// A shader module that lives only as long as pipeline creation needs it.
pub struct ShaderModule<'a> {
    pub handle: vk::ShaderModule,
    device: &'a ash::Device,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a ash::Device, words: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(words);

        let handle = unsafe { device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self { handle, device })
    }

    /// Load, decode and create in one go.
    pub fn load<L>(device: &'a ash::Device, path: &Path, loader: &L) -> Result<Self>
    where
        L: Fn(&Path) -> Result<Vec<u8>> + ?Sized,
    {
        let bytes = loader(path)?;
        let words = parse_spirv(path, &bytes)?;
        log::debug!("Loaded shader {:?} ({} words)", path, words.len());
        Self::new(device, &words)
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}
