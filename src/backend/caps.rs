// Capability probing
//
// Read-only queries against the loader and every physical device:
// instance extensions/layers, device properties, extensions, queue
// families and surface support. The results are plain descriptors so
// selection and swapchain decisions can be made (and tested) without
// touching Vulkan again.

use anyhow::{Context, Result};
use ash::vk;
use bitflags::bitflags;
use std::ffi::{CStr, FromBytesUntilNulError};

use super::error::RendererError;

bitflags! {
    /// Per-queue-family capabilities. `PRESENT` is not a Vulkan queue flag;
    /// it is filled from the surface-support query once a surface exists.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueueCapabilities: u16 {
        const GRAPHICS       = 1 << 0;
        const COMPUTE        = 1 << 1;
        const TRANSFER       = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
        const PROTECTED      = 1 << 4;
        const VIDEO_DECODE   = 1 << 5;
        const VIDEO_ENCODE   = 1 << 6;
        const OPTICAL_FLOW   = 1 << 7;
        const PRESENT        = 1 << 8;
    }
}

impl QueueCapabilities {
    pub fn from_queue_flags(flags: vk::QueueFlags) -> Self {
        const MAPPING: [(vk::QueueFlags, QueueCapabilities); 8] = [
            (vk::QueueFlags::GRAPHICS, QueueCapabilities::GRAPHICS),
            (vk::QueueFlags::COMPUTE, QueueCapabilities::COMPUTE),
            (vk::QueueFlags::TRANSFER, QueueCapabilities::TRANSFER),
            (vk::QueueFlags::SPARSE_BINDING, QueueCapabilities::SPARSE_BINDING),
            (vk::QueueFlags::PROTECTED, QueueCapabilities::PROTECTED),
            (vk::QueueFlags::VIDEO_DECODE_KHR, QueueCapabilities::VIDEO_DECODE),
            (vk::QueueFlags::VIDEO_ENCODE_KHR, QueueCapabilities::VIDEO_ENCODE),
            (vk::QueueFlags::OPTICAL_FLOW_NV, QueueCapabilities::OPTICAL_FLOW),
        ];

        MAPPING
            .iter()
            .filter(|(vk_flag, _)| flags.contains(*vk_flag))
            .fold(QueueCapabilities::empty(), |acc, (_, cap)| acc | *cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyDescriptor {
    pub capabilities: QueueCapabilities,
    pub queue_count: u32,
}

/// Surface-dependent part of a device snapshot.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Immutable snapshot of one physical device, taken once at probe time.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceDescriptor {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<String>,
    pub queue_families: Vec<QueueFamilyDescriptor>,
    pub surface: SurfaceSupport,
}

impl PhysicalDeviceDescriptor {
    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.properties.device_type
    }

    pub fn max_image_dimension_2d(&self) -> u32 {
        self.properties.limits.max_image_dimension2_d
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|e| *e == name)
    }

    /// Index of the first queue family advertising `capability`.
    pub fn first_family_with(&self, capability: QueueCapabilities) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| family.capabilities.contains(capability))
            .map(|i| i as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub spec_version: u32,
    pub implementation_version: u32,
    pub description: String,
}

pub fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::OTHER => "OTHER",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "INTEGRATED_GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "DISCRETE_GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "VIRTUAL_GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "UNKNOWN",
    }
}

/// Owned copy of a fixed-size Vulkan name; empty if the array has no NUL.
fn name_string(name: Result<&CStr, FromBytesUntilNulError>) -> String {
    name.map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

pub fn probe_instance_extensions(entry: &ash::Entry) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_extension_properties(None) }
        .context("Failed to enumerate instance extensions")?;

    log::info!("Available Vulkan instance extensions ({}):", props.len());
    let names = props
        .iter()
        .map(|p| {
            let name = name_string(p.extension_name_as_c_str());
            log::info!("\t{}: {}", name, p.spec_version);
            name
        })
        .collect();

    Ok(names)
}

pub fn probe_instance_layers(entry: &ash::Entry) -> Result<Vec<LayerInfo>> {
    let props = unsafe { entry.enumerate_instance_layer_properties() }
        .context("Failed to enumerate instance layers")?;

    log::info!("Available Vulkan instance layers ({}):", props.len());
    let layers = props
        .iter()
        .map(|p| {
            let layer = LayerInfo {
                name: name_string(p.layer_name_as_c_str()),
                spec_version: p.spec_version,
                implementation_version: p.implementation_version,
                description: name_string(p.description_as_c_str()),
            };
            log::info!(
                "\t{}: {}, {}, ({})",
                layer.name,
                layer.spec_version,
                layer.implementation_version,
                layer.description
            );
            layer
        })
        .collect();

    Ok(layers)
}

/// Query the surface-dependent capabilities of `device` for `surface`.
pub fn probe_surface_support(
    surface_loader: &ash::khr::surface::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceSupport> {
    unsafe {
        Ok(SurfaceSupport {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(device, surface)
                .context("Failed to query surface capabilities")?,
            formats: surface_loader
                .get_physical_device_surface_formats(device, surface)
                .context("Failed to query surface formats")?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(device, surface)
                .context("Failed to query surface present modes")?,
        })
    }
}

fn probe_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    handle: vk::PhysicalDevice,
) -> Result<PhysicalDeviceDescriptor> {
    let properties = unsafe { instance.get_physical_device_properties(handle) };
    let features = unsafe { instance.get_physical_device_features(handle) };

    let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
        .context("Failed to enumerate device extensions")?
        .iter()
        .map(|e| name_string(e.extension_name_as_c_str()))
        .collect();

    let family_props = unsafe { instance.get_physical_device_queue_family_properties(handle) };
    let mut queue_families = Vec::with_capacity(family_props.len());
    for (index, props) in family_props.iter().enumerate() {
        let mut capabilities = QueueCapabilities::from_queue_flags(props.queue_flags);
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(handle, index as u32, surface)
        }
        .context("Failed to query surface present support")?;
        if present {
            capabilities |= QueueCapabilities::PRESENT;
        }
        queue_families.push(QueueFamilyDescriptor {
            capabilities,
            queue_count: props.queue_count,
        });
    }

    Ok(PhysicalDeviceDescriptor {
        handle,
        name: name_string(properties.device_name_as_c_str()),
        properties,
        features,
        extensions,
        queue_families,
        surface: probe_surface_support(surface_loader, handle, surface)?,
    })
}

/// Snapshot every physical device visible to `instance`.
///
/// Fails with [`RendererError::NoPhysicalDevices`] when the loader reports none.
pub fn probe_physical_devices(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Vec<PhysicalDeviceDescriptor>> {
    let handles = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    log::info!("Available Vulkan devices ({}):", handles.len());
    if handles.is_empty() {
        return Err(RendererError::NoPhysicalDevices.into());
    }

    let devices = handles
        .into_iter()
        .map(|handle| probe_device(instance, surface_loader, surface, handle))
        .collect::<Result<Vec<_>>>()?;

    for dev in &devices {
        log::info!("\t{}: {}", dev.name, device_type_name(dev.device_type()));
        log::info!("\tQueue Families ({}):", dev.queue_families.len());
        for family in &dev.queue_families {
            log::info!(
                "\t\tQueue count: {} Capabilities: {:?}",
                family.queue_count,
                family.capabilities
            );
        }
    }

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(capabilities: QueueCapabilities) -> QueueFamilyDescriptor {
        QueueFamilyDescriptor { capabilities, queue_count: 1 }
    }

    fn device_with_families(families: Vec<QueueFamilyDescriptor>) -> PhysicalDeviceDescriptor {
        PhysicalDeviceDescriptor {
            handle: vk::PhysicalDevice::null(),
            name: "test".into(),
            properties: vk::PhysicalDeviceProperties::default(),
            features: vk::PhysicalDeviceFeatures::default(),
            extensions: vec![],
            queue_families: families,
            surface: SurfaceSupport::default(),
        }
    }

    #[test]
    fn queue_flags_map_onto_capabilities() {
        let caps = QueueCapabilities::from_queue_flags(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER | vk::QueueFlags::VIDEO_DECODE_KHR,
        );
        assert_eq!(
            caps,
            QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER | QueueCapabilities::VIDEO_DECODE
        );
        assert!(!caps.contains(QueueCapabilities::PRESENT));
    }

    #[test]
    fn first_family_with_returns_first_match() {
        let dev = device_with_families(vec![
            family(QueueCapabilities::TRANSFER),
            family(QueueCapabilities::GRAPHICS | QueueCapabilities::COMPUTE),
            family(QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT),
        ]);
        assert_eq!(dev.first_family_with(QueueCapabilities::GRAPHICS), Some(1));
        assert_eq!(dev.first_family_with(QueueCapabilities::PRESENT), Some(2));
        assert_eq!(dev.first_family_with(QueueCapabilities::TRANSFER), Some(0));
    }

    #[test]
    fn first_family_with_does_not_match_other_bits() {
        // A family with only COMPUTE must never satisfy a PRESENT lookup.
        let dev = device_with_families(vec![family(QueueCapabilities::COMPUTE)]);
        assert_eq!(dev.first_family_with(QueueCapabilities::PRESENT), None);
        assert_eq!(dev.first_family_with(QueueCapabilities::GRAPHICS), None);
    }

    #[test]
    fn extension_lookup_compares_names() {
        let mut dev = device_with_families(vec![]);
        dev.extensions = vec!["VK_KHR_swapchain".into()];
        assert!(dev.supports_extension(ash::khr::swapchain::NAME));
        assert!(!dev.supports_extension(ash::ext::debug_utils::NAME));
    }

    fn extension(name: &[u8]) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &byte) in props.extension_name.iter_mut().zip(name) {
            *dst = byte as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn fixed_names_are_read_up_to_nul() {
        let props = extension(b"VK_KHR_swapchain");
        assert_eq!(name_string(props.extension_name_as_c_str()), "VK_KHR_swapchain");
    }

    #[test]
    fn unterminated_names_become_empty() {
        let props = extension(&[b'x'; vk::MAX_EXTENSION_NAME_SIZE]);
        assert_eq!(name_string(props.extension_name_as_c_str()), "");
    }

    #[test]
    fn device_type_names() {
        assert_eq!(device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU), "DISCRETE_GPU");
        assert_eq!(device_type_name(vk::PhysicalDeviceType::CPU), "CPU");
    }
}
