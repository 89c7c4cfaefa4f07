// Physical device selection
//
// Filters probed devices down to those that can drive a swapchain on our
// surface, scores the survivors (prefer discrete GPU) and resolves the
// graphics/present queue families on the winner.

use anyhow::Result;
use ash::vk;
use std::ffi::CStr;

use super::caps::{device_type_name, PhysicalDeviceDescriptor, QueueCapabilities};
use super::error::RendererError;

/// Device extensions every candidate must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Why a device was filtered out before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingExtensions,
    NoSurfaceFormats,
    NoPresentModes,
}

pub fn check_suitability(device: &PhysicalDeviceDescriptor) -> Result<(), Rejection> {
    if !REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .all(|ext| device.supports_extension(ext))
    {
        return Err(Rejection::MissingExtensions);
    }
    if device.surface.formats.is_empty() {
        return Err(Rejection::NoSurfaceFormats);
    }
    if device.surface.present_modes.is_empty() {
        return Err(Rejection::NoPresentModes);
    }
    Ok(())
}

/// Device-type rank plus a bonus growing with the max 2D image dimension.
pub fn score_device(device: &PhysicalDeviceDescriptor) -> u32 {
    let type_bonus = match device.device_type() {
        vk::PhysicalDeviceType::DISCRETE_GPU => 2000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        vk::PhysicalDeviceType::CPU => 50,
        _ => 0,
    };
    type_bonus + device.max_image_dimension_2d() / 100
}

/// Pick the best-scoring suitable device; returns its index in `devices`.
///
/// Equal scores resolve to the later device.
pub fn select_device(devices: &[PhysicalDeviceDescriptor]) -> Result<usize> {
    let mut candidates = Vec::new();

    for (index, device) in devices.iter().enumerate() {
        match check_suitability(device) {
            Ok(()) => candidates.push((score_device(device), index)),
            Err(Rejection::MissingExtensions) => {
                log::info!("Device {} doesn't have required device extensions", device.name)
            }
            Err(reason) => log::info!(
                "Device {} doesn't have required surface features ({:?})",
                device.name,
                reason
            ),
        }
    }

    candidates.sort_by_key(|&(score, _)| score);
    for &(score, index) in &candidates {
        log::info!("\tScore {}: {}", devices[index].name, score);
    }

    let &(_, selected) = candidates
        .iter()
        .max_by_key(|&&(score, index)| (score, index))
        .ok_or(RendererError::NoSuitableDevice(devices.len()))?;

    let device = &devices[selected];
    log::info!(
        "Selected Graphics Device {} ({})",
        device.name,
        device_type_name(device.device_type())
    );
    Ok(selected)
}

/// Resolved queue family indices on the selected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Swapchain image sharing for these families, with the family list
    /// required by concurrent sharing.
    pub fn sharing_mode(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, vec![self.graphics, self.present])
        }
    }
}

/// First family with GRAPHICS and first family with PRESENT.
///
/// Only single-family devices are supported: differing indices are an error.
pub fn resolve_queue_indices(device: &PhysicalDeviceDescriptor) -> Result<QueueIndices> {
    let graphics = device
        .first_family_with(QueueCapabilities::GRAPHICS)
        .ok_or(RendererError::MissingQueueFamily(QueueCapabilities::GRAPHICS))?;
    let present = device
        .first_family_with(QueueCapabilities::PRESENT)
        .ok_or(RendererError::MissingQueueFamily(QueueCapabilities::PRESENT))?;

    if graphics != present {
        return Err(RendererError::QueueFamilyMismatch { graphics, present }.into());
    }

    Ok(QueueIndices { graphics, present })
}
