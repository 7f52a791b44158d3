//! Images with bound memory and their views

use ash::{vk, Device};

use super::memory::DeviceMemory;
use super::{PhysicalDeviceInfo, VkResultExt, VulkanResult};

/// Color subresource range for one mip level and a layer range
pub const fn color_subresource_range(base_array_layer: u32, layer_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer,
        layer_count,
    }
}

/// Image wrapper with bound device memory
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: DeviceMemory,
    format: vk::Format,
    extent: vk::Extent3D,
}

impl Image {
    /// Create an image from `create_info` and bind device-local memory to it
    pub fn new(
        device: &Device,
        physical_device: &PhysicalDeviceInfo,
        create_info: &vk::ImageCreateInfo,
    ) -> VulkanResult<Self> {
        let image = unsafe { device.create_image(create_info, None) }.check("vkCreateImage")?;

        let bound = (|| -> VulkanResult<DeviceMemory> {
            let requirements = unsafe { device.get_image_memory_requirements(image) };
            let memory = DeviceMemory::for_requirements(
                device,
                &physical_device.memory_properties,
                requirements,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            unsafe { device.bind_image_memory(image, memory.handle(), 0) }.check("vkBindImageMemory")?;
            Ok(memory)
        })();

        match bound {
            Ok(memory) => Ok(Self {
                device: device.clone(),
                image,
                memory,
                format: create_info.format,
                extent: create_info.extent,
            }),
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// Texel format
    pub const fn format(&self) -> vk::Format {
        self.format
    }

    /// Extent the image was created with
    pub const fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Size of the bound allocation
    pub const fn memory_size(&self) -> vk::DeviceSize {
        self.memory.size()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

/// Image view with RAII cleanup
pub struct ImageView {
    device: Device,
    view: vk::ImageView,
}

impl ImageView {
    /// Create a view of `image`
    pub fn new(
        device: &Device,
        image: &Image,
        view_type: vk::ImageViewType,
        subresource_range: vk::ImageSubresourceRange,
    ) -> VulkanResult<Self> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image.handle())
            .view_type(view_type)
            .format(image.format())
            .components(vk::ComponentMapping::default())
            .subresource_range(subresource_range);

        let view = unsafe { device.create_image_view(&create_info, None) }.check("vkCreateImageView")?;

        Ok(Self {
            device: device.clone(),
            view,
        })
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_subresource_range() {
        let range = color_subresource_range(3, 4);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.base_array_layer, 3);
        assert_eq!(range.layer_count, 4);
        assert_eq!(range.level_count, 1);
    }
}
