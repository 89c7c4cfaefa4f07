// Vulkan context - instance, surface and logical device
//
// Responsibilities:
// - Validation layer check + instance creation
// - Debug messenger (validation builds only) forwarding to the log sink
// - Surface creation through the host-supplied callback
// - Physical device probing/selection, logical device + queues

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{c_void, CStr, CString};

use super::caps::{self, LayerInfo, PhysicalDeviceDescriptor};
use super::error::RendererError;
use super::selector::{self, QueueIndices, REQUIRED_DEVICE_EXTENSIONS};

/// Explicit instance configuration; there is no global layer list.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub app_name: String,
    /// Empty when validation is disabled.
    pub validation_layers: Vec<CString>,
}

impl ContextConfig {
    pub fn validation_enabled(&self) -> bool {
        !self.validation_layers.is_empty()
    }
}

/// Every requested layer must be present among the available ones.
pub fn check_validation_layers(requested: &[CString], available: &[LayerInfo]) -> Result<()> {
    for layer in requested {
        let name = layer.to_string_lossy();
        if !available.iter().any(|l| l.name == name) {
            return Err(RendererError::MissingValidationLayer(name.into_owned()).into());
        }
    }
    Ok(())
}

/// Windowing-layer extensions plus debug utils when validating.
pub fn instance_extension_names<'a>(required: &[&'a CStr], validation: bool) -> Vec<&'a CStr> {
    let mut names = required.to_vec();
    if validation && !names.contains(&ash::ext::debug_utils::NAME) {
        names.push(ash::ext::debug_utils::NAME);
    }
    names
}

fn debug_messenger_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Instance, surface and logical device, destroyed together on drop.
///
/// Other components hold an `Arc<VulkanContext>`, so this is always the
/// last Vulkan object to go.
pub struct VulkanContext {
    pub device: ash::Device,
    pub physical_device: PhysicalDeviceDescriptor,
    pub queue_indices: QueueIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,

    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl VulkanContext {
    /// Build the full context.
    ///
    /// * `required_extensions` - instance extensions the windowing layer needs
    /// * `create_surface` - invoked exactly once with the new instance
    pub fn new<S>(config: &ContextConfig, required_extensions: &[&CStr], create_surface: S) -> Result<Self>
    where
        S: FnOnce(&Entry, &ash::Instance) -> Result<vk::SurfaceKHR>,
    {
        log::info!("Initializing Renderer...");

        // Step 1: Load Vulkan library and probe what the loader offers
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;
        caps::probe_instance_extensions(&entry)?;
        let layers = caps::probe_instance_layers(&entry)?;

        // Step 2: Create instance (+ debug messenger)
        check_validation_layers(&config.validation_layers, &layers)?;
        let instance = Self::create_instance(&entry, config, required_extensions)?;
        let debug_utils = if config.validation_enabled() {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        // From here on, partially built state is released by Drop
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let mut partial = PartialContext {
            instance: &instance,
            debug_utils: debug_utils.as_ref(),
            surface_loader: &surface_loader,
            surface: vk::SurfaceKHR::null(),
        };

        // Step 3: Surface from the windowing layer
        partial.surface = create_surface(&entry, &instance).context("Failed to create window surface")?;

        // Step 4: Probe + pick physical device
        let mut devices = caps::probe_physical_devices(&instance, &surface_loader, partial.surface)?;
        let selected = selector::select_device(&devices)?;
        let physical_device = devices.swap_remove(selected);
        let queue_indices = selector::resolve_queue_indices(&physical_device)?;

        // Step 5: Logical device + queues
        let device = Self::create_logical_device(&instance, &physical_device, queue_indices, config)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_indices.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_indices.present, 0) };

        let surface = std::mem::replace(&mut partial.surface, vk::SurfaceKHR::null());
        std::mem::forget(partial);

        let props = &physical_device.properties;
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version)
        );

        Ok(Self {
            device,
            physical_device,
            queue_indices,
            graphics_queue,
            present_queue,
            surface_loader,
            surface,
            debug_utils,
            instance,
            entry,
        })
    }

    fn create_instance(
        entry: &Entry,
        config: &ContextConfig,
        required_extensions: &[&CStr],
    ) -> Result<ash::Instance> {
        let app_name = CString::new(config.app_name.as_str())?;
        let engine_name = c"Ember Engine";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions: Vec<_> = instance_extension_names(required_extensions, config.validation_enabled())
            .iter()
            .map(|e| e.as_ptr())
            .collect();
        let layers: Vec<_> = config.validation_layers.iter().map(|l| l.as_ptr()).collect();

        // Chained so instance creation/destruction itself is covered
        let mut debug_info = debug_messenger_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if config.validation_enabled() {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&debug_messenger_info(), None) }
            .context("Failed to create a Vulkan debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &PhysicalDeviceDescriptor,
        queue_indices: QueueIndices,
        config: &ContextConfig,
    ) -> Result<ash::Device> {
        // One queue from the shared graphics/present family
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_indices.graphics)
            .queue_priorities(&queue_priorities);

        let extensions: Vec<_> = REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let layers: Vec<_> = config.validation_layers.iter().map(|l| l.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device.handle, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Current surface capabilities of the selected device.
    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device.handle, self.surface)
        }
        .context("Failed to query surface capabilities")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan context...");

        let _ = self.wait_idle();

        // device -> surface -> debug messenger -> instance
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Releases instance-level objects if construction bails out midway.
struct PartialContext<'a> {
    instance: &'a ash::Instance,
    debug_utils: Option<&'a (ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: &'a ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for PartialContext<'_> {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn message_category(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// Log level for a validation message. Never fatal.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    log::log!(
        severity_level(message_severity),
        "[Vulkan {}] {}",
        message_category(message_type),
        message.to_string_lossy()
    );

    vk::FALSE
}
