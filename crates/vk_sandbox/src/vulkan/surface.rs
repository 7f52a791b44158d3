//! Presentation surface with RAII cleanup

use ash::extensions::khr;
use ash::vk;

use super::{VkResultExt, VulkanInstance, VulkanResult, Window};

/// Surface handle plus the extension loader that destroys it
pub struct Surface {
    /// Extension loader
    pub loader: khr::Surface,
    /// Raw surface handle
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for `window`
    pub fn new(instance: &VulkanInstance, window: &Window) -> VulkanResult<Self> {
        let loader = khr::Surface::new(&instance.entry, &instance.instance);
        let handle = window.create_vulkan_surface(instance.instance.handle())?;
        Ok(Self { loader, handle })
    }

    /// Whether `queue_family` of `device` can present to this surface
    pub fn supports_queue_family(&self, device: vk::PhysicalDevice, queue_family: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(device, queue_family, self.handle)
        }
        .check("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    /// Surface capabilities for `device`
    pub fn capabilities(&self, device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(device, self.handle)
        }
        .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    /// Supported formats for `device`
    pub fn formats(&self, device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.loader.get_physical_device_surface_formats(device, self.handle) }
            .check("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    /// Supported present modes for `device`
    pub fn present_modes(&self, device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(device, self.handle)
        }
        .check("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
