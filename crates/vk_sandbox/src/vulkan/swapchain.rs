//! Vulkan swapchain management
//!
//! The window never resizes, so the swapchain is created once. Images are
//! usable as transfer destinations so samples can blit straight into them.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::{PhysicalDeviceInfo, Surface, VkResultExt, VulkanError, VulkanInstance, VulkanResult};

/// Usage every swapchain image gets
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface`
    pub fn new(
        instance: &VulkanInstance,
        device: &Device,
        surface: &Surface,
        physical_device: &PhysicalDeviceInfo,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(&instance.instance, device);

        let capabilities = surface.capabilities(physical_device.device)?;
        if !capabilities.supported_usage_flags.contains(SWAPCHAIN_IMAGE_USAGE) {
            return Err(VulkanError::InitializationFailed(format!(
                "Surface does not support image usage {:?}",
                SWAPCHAIN_IMAGE_USAGE
            )));
        }

        let format = choose_surface_format(&surface.formats(physical_device.device)?).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&surface.present_modes(physical_device.device)?);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = choose_image_count(&capabilities);

        let queue_families = [
            physical_device.graphics_family,
            physical_device.present_family.unwrap_or(physical_device.graphics_family),
        ];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        create_info = if queue_families[0] == queue_families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        };

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.check("vkCreateSwapchainKHR")?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) }.check("vkGetSwapchainImagesKHR") {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        Ok(Self {
            loader,
            swapchain,
            images,
            format,
            extent,
        })
    }

    /// Acquire the next image, signalling `fence` when it is ready
    ///
    /// A suboptimal or out-of-date swapchain is an error: the window is fixed-size.
    pub fn acquire_next_image(&self, fence: vk::Fence) -> VulkanResult<u32> {
        let (index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, vk::Semaphore::null(), fence)
        }
        .check("vkAcquireNextImageKHR")?;

        if suboptimal {
            return Err(VulkanError::Api {
                call: "vkAcquireNextImageKHR",
                result: vk::Result::SUBOPTIMAL_KHR,
            });
        }
        Ok(index)
    }

    /// Present `image_index` on `queue`
    pub fn present(&self, queue: vk::Queue, image_index: u32) -> VulkanResult<()> {
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&indices);

        let suboptimal = unsafe { self.loader.queue_present(queue, &present_info) }.check("vkQueuePresentKHR")?;
        if suboptimal {
            return Err(VulkanError::Api {
                call: "vkQueuePresentKHR",
                result: vk::Result::SUBOPTIMAL_KHR,
            });
        }
        Ok(())
    }

    /// Swapchain images, owned by the swapchain
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Surface format of the images
    pub const fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when available, FIFO otherwise
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface extent when fixed, else clamp the window size
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: window_extent
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, bounded by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D { width: 1024, height: 1024 },
            ..Default::default()
        }
    }

    #[test]
    fn test_image_usage_allows_blit_destination() {
        assert!(SWAPCHAIN_IMAGE_USAGE.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(SWAPCHAIN_IMAGE_USAGE.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]).map(|f| f.format), Some(srgb.format));
        assert_eq!(choose_surface_format(&[unorm]).map(|f| f.format), Some(unorm.format));
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_extent_selection() {
        let fixed = caps(2, 3, vk::Extent2D { width: 800, height: 600 });
        let chosen = choose_extent(&fixed, vk::Extent2D { width: 10, height: 10 });
        assert_eq!((chosen.width, chosen.height), (800, 600));

        let free = caps(2, 3, vk::Extent2D { width: u32::MAX, height: u32::MAX });
        let chosen = choose_extent(&free, vk::Extent2D { width: 4096, height: 10 });
        assert_eq!((chosen.width, chosen.height), (1024, 64));
    }

    #[test]
    fn test_image_count() {
        let extent = vk::Extent2D { width: 1, height: 1 };
        assert_eq!(choose_image_count(&caps(2, 0, extent)), 3);
        assert_eq!(choose_image_count(&caps(2, 2, extent)), 2);
    }
}
