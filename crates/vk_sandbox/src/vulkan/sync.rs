//! Vulkan synchronization primitives
//!
//! Only fences are needed: every submission in the sandbox is either
//! followed by a queue idle wait or guarded by a fence.

use ash::{vk, Device};

use super::{VkResultExt, VulkanResult};

/// Fence wrapper for CPU-GPU synchronization
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: &Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe { device.create_fence(&create_info, None) }.check("vkCreateFence")?;

        Ok(Self {
            device: device.clone(),
            fence,
        })
    }

    /// Block until the fence is signaled
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout) }.check("vkWaitForFences")
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }.check("vkResetFences")
    }

    /// Wait with no timeout, then reset
    pub fn wait_and_reset(&self) -> VulkanResult<()> {
        self.wait(u64::MAX)?;
        self.reset()
    }

    /// Get the fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}
