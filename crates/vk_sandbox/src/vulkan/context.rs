//! Vulkan context management
//!
//! Instance, physical device selection and logical device creation, plus the
//! error type every wrapper in this crate returns.

use ash::extensions::ext::DebugUtils;
use ash::{Device, Entry, Instance};
use ash::vk;
use bitflags::bitflags;
use std::ffi::{CStr, CString};
use thiserror::Error;

use super::surface::Surface;
use super::update_template::TemplateError;
use crate::config::SandboxConfig;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A Vulkan call returned something other than `VK_SUCCESS`
    #[error("{call} failed: expected SUCCESS, got {result:?}")]
    Api {
        /// Name of the failing entry point
        call: &'static str,
        /// Status code returned by the driver
        result: vk::Result,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the request
    #[error("No suitable memory type found (type bits {type_bits:#x}, flags {flags:?})")]
    NoSuitableMemoryType {
        /// Acceptable memory type indices as a bit mask
        type_bits: u32,
        /// Required property flags
        flags: vk::MemoryPropertyFlags,
    },

    /// A descriptor update template description was rejected before reaching the driver
    #[error("Invalid descriptor update template: {0}")]
    Template(#[from] TemplateError),

    /// Shader module could not be loaded
    #[error("Shader error: {0}")]
    Shader(String),

    /// Window or surface creation failed
    #[error("Window error: {0}")]
    Window(String),

    /// The driver returned a value that violates an API guarantee
    #[error("Conformance check failed: {0}")]
    Conformance(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Attach the entry point name to a raw `vk::Result`
pub trait VkResultExt<T> {
    /// Convert into a [`VulkanResult`], naming the call that failed
    fn check(self, call: &'static str) -> VulkanResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn check(self, call: &'static str) -> VulkanResult<T> {
        self.map_err(|result| VulkanError::Api { call, result })
    }
}

bitflags! {
    /// Optional device features a program can ask for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFeatures: u32 {
        /// `geometryShader`
        const GEOMETRY_SHADER = 1 << 0;
        /// `samplerAnisotropy`
        const SAMPLER_ANISOTROPY = 1 << 1;
        /// `fillModeNonSolid`
        const FILL_MODE_NON_SOLID = 1 << 2;
    }
}

impl DeviceFeatures {
    /// Features reported as supported by the driver
    pub fn from_vk(features: &vk::PhysicalDeviceFeatures) -> Self {
        let mut supported = Self::empty();
        supported.set(Self::GEOMETRY_SHADER, features.geometry_shader == vk::TRUE);
        supported.set(Self::SAMPLER_ANISOTROPY, features.sampler_anisotropy == vk::TRUE);
        supported.set(Self::FILL_MODE_NON_SOLID, features.fill_mode_non_solid == vk::TRUE);
        supported
    }

    /// Feature struct enabling exactly these features
    pub fn to_vk(self) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(self.contains(Self::GEOMETRY_SHADER))
            .sampler_anisotropy(self.contains(Self::SAMPLER_ANISOTROPY))
            .fill_mode_non_solid(self.contains(Self::FILL_MODE_NON_SOLID))
            .build()
    }
}

/// What a program needs from the physical device
#[derive(Debug, Clone, Default)]
pub struct DeviceRequirements {
    /// Minimum device API version
    pub api_version: u32,
    /// Features that must be supported and will be enabled
    pub features: DeviceFeatures,
    /// Device extensions that must be present and will be enabled
    pub extensions: Vec<&'static CStr>,
}

impl DeviceRequirements {
    /// Requirements with only a minimum API version
    pub fn new(api_version: u32) -> Self {
        Self {
            api_version,
            ..Self::default()
        }
    }

    /// Require additional features
    #[must_use]
    pub fn with_features(mut self, features: DeviceFeatures) -> Self {
        self.features |= features;
        self
    }

    /// Require an additional device extension
    #[must_use]
    pub fn with_extension(mut self, name: &'static CStr) -> Self {
        self.extensions.push(name);
        self
    }
}

/// Format a packed API version as `major.minor.patch`
pub fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Debug messenger, present when validation was enabled and available
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Vulkan entry point
    pub entry: Entry,
    /// API version the instance was created with
    pub api_version: u32,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// `extensions` are required; validation is best effort and only logged
    /// when the layer is missing.
    pub fn new(
        app_name: &str,
        api_version: u32,
        extensions: &[&CStr],
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let loader_version = entry
            .try_enumerate_instance_version()
            .check("vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        if loader_version < api_version {
            return Err(VulkanError::InitializationFailed(format!(
                "Vulkan {} requested but the loader only supports {}",
                version_string(api_version),
                version_string(loader_version)
            )));
        }

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed(format!("Invalid application name {app_name:?}")))?;
        let engine_name_cstr = CString::new("vk_sandbox")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(api_version);

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("Validation requested but {} is not installed", VALIDATION_LAYER.to_string_lossy());
        }

        let mut extension_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> = if validation {
            extension_ptrs.push(DebugUtils::name().as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }.check("vkCreateInstance")?;

        let debug_messenger = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::debug!(
            "Created Vulkan {} instance (validation: {})",
            version_string(api_version),
            validation
        );

        Ok(Self {
            debug_messenger,
            instance,
            entry,
            api_version,
        })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .check("vkEnumerateInstanceLayerProperties")?;

        Ok(layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER
        }))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .check("vkCreateDebugUtilsMessengerEXT")
    }

    /// Whether a debug messenger is attached
    pub const fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        log::info!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory types and heaps
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family, when a surface was given
    pub present_family: Option<u32>,
}

impl PhysicalDeviceInfo {
    /// Select the first physical device meeting `requirements`
    ///
    /// With a surface, the device must also be able to present to it.
    pub fn select(
        instance: &Instance,
        requirements: &DeviceRequirements,
        surface: Option<&Surface>,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.check("vkEnumeratePhysicalDevices")?;

        for device in devices {
            match Self::evaluate_device(instance, device, requirements, surface)? {
                Some(info) => {
                    log::info!(
                        "Selected GPU: {} (Vulkan {})",
                        info.device_name(),
                        version_string(info.properties.api_version)
                    );
                    return Ok(info);
                }
                None => continue,
            }
        }

        Err(VulkanError::InitializationFailed(format!(
            "No GPU supports Vulkan {} with features {:?} and extensions {:?}",
            version_string(requirements.api_version),
            requirements.features,
            requirements.extensions
        )))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        requirements: &DeviceRequirements,
        surface: Option<&Surface>,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        if properties.api_version < requirements.api_version {
            return Ok(None);
        }

        if !DeviceFeatures::from_vk(&features).contains(requirements.features) {
            return Ok(None);
        }

        let graphics_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32);
        let Some(graphics_family) = graphics_family else {
            return Ok(None);
        };

        let present_family = match surface {
            Some(surface) => {
                let mut found = None;
                for index in 0..queue_families.len() as u32 {
                    if surface.supports_queue_family(device, index)? {
                        found = Some(index);
                        break;
                    }
                }
                if found.is_none() {
                    return Ok(None);
                }
                found
            }
            None => None,
        };

        if !requirements.extensions.is_empty() {
            let available = unsafe { instance.enumerate_device_extension_properties(device) }
                .check("vkEnumerateDeviceExtensionProperties")?;
            let has_all = requirements.extensions.iter().all(|required| {
                available.iter().any(|ext| {
                    let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                    name == *required
                })
            });
            if !has_all {
                return Ok(None);
            }
        }

        Ok(Some(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        }))
    }

    /// Human readable device name
    pub fn device_name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue (same as graphics when headless)
    pub present_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl LogicalDevice {
    /// Create a new logical device with the required queues, features and extensions
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<Self> {
        let graphics_family = physical_device.graphics_family;
        let present_family = physical_device.present_family.unwrap_or(graphics_family);

        let mut families = vec![graphics_family];
        if present_family != graphics_family {
            families.push(present_family);
        }

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const std::ffi::c_char> =
            requirements.extensions.iter().map(|ext| ext.as_ptr()).collect();
        let device_features = requirements.features.to_vk();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&device_features);

        let device = unsafe { instance.create_device(physical_device.device, &create_info, None) }
            .check("vkCreateDevice")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
        })
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.check("vkDeviceWaitIdle")
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Instance and device for programs that never present
///
/// Fields drop in declaration order, so the device goes before the instance.
pub struct HeadlessContext {
    /// Logical device with one graphics queue
    pub device: LogicalDevice,
    /// Selected physical device
    pub physical_device: PhysicalDeviceInfo,
    /// Instance, optionally with validation
    pub instance: VulkanInstance,
}

impl HeadlessContext {
    /// Create a context with no extensions and no optional features
    pub fn new(config: &SandboxConfig, api_version: u32) -> VulkanResult<Self> {
        Self::with_requirements(config, &DeviceRequirements::new(api_version))
    }

    /// Create a context for specific device requirements
    pub fn with_requirements(config: &SandboxConfig, requirements: &DeviceRequirements) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(
            &config.application_name,
            requirements.api_version,
            &[],
            config.validation_enabled(),
        )?;
        let physical_device = PhysicalDeviceInfo::select(&instance.instance, requirements, None)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device, requirements)?;

        Ok(Self {
            device,
            physical_device,
            instance,
        })
    }

    /// Raw device handle
    pub const fn raw_device(&self) -> &Device {
        &self.device.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message_names_call() {
        let err: VulkanResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).check("vkAllocateMemory");
        let message = err.unwrap_err().to_string();
        assert_eq!(
            message,
            "vkAllocateMemory failed: expected SUCCESS, got ERROR_OUT_OF_DEVICE_MEMORY"
        );
    }

    #[test]
    fn test_check_passes_values_through() {
        let ok: Result<u32, vk::Result> = Ok(7);
        assert_eq!(ok.check("vkNothing").unwrap(), 7);
    }

    #[test]
    fn test_device_features_round_trip_vk_struct() {
        let requested = DeviceFeatures::GEOMETRY_SHADER;
        let vk_features = requested.to_vk();
        assert_eq!(vk_features.geometry_shader, vk::TRUE);
        assert_eq!(vk_features.sampler_anisotropy, vk::FALSE);
        assert_eq!(DeviceFeatures::from_vk(&vk_features), requested);
    }

    #[test]
    fn test_missing_feature_is_detected() {
        let supported = DeviceFeatures::from_vk(&vk::PhysicalDeviceFeatures::default());
        assert!(!supported.contains(DeviceFeatures::GEOMETRY_SHADER));
        assert!(supported.contains(DeviceFeatures::empty()));
    }

    #[test]
    fn test_requirements_builder() {
        let requirements = DeviceRequirements::new(vk::API_VERSION_1_1)
            .with_features(DeviceFeatures::GEOMETRY_SHADER)
            .with_extension(ash::extensions::khr::Swapchain::name());

        assert_eq!(requirements.api_version, vk::API_VERSION_1_1);
        assert!(requirements.features.contains(DeviceFeatures::GEOMETRY_SHADER));
        assert_eq!(requirements.extensions.len(), 1);
    }

    #[test]
    fn test_version_string() {
        assert_eq!(version_string(vk::API_VERSION_1_1), "1.1.0");
        assert_eq!(version_string(vk::make_api_version(0, 1, 3, 250)), "1.3.250");
    }
}
