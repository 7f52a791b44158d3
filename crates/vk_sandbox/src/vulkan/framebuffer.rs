//! Framebuffer management

use ash::{vk, Device};

use super::{RenderPass, VkResultExt, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    layers: u32,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments`
    ///
    /// `layers` must not exceed the layer count of any attachment view.
    pub fn new(
        device: &Device,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(layers);

        let framebuffer = unsafe { device.create_framebuffer(&create_info, None) }.check("vkCreateFramebuffer")?;

        Ok(Self {
            device: device.clone(),
            framebuffer,
            extent,
            layers,
        })
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Width and height
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layer count
    pub const fn layers(&self) -> u32 {
        self.layers
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
