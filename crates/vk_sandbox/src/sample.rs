//! Sample application framework
//!
//! [`SampleApplication`] owns the window, the Vulkan objects needed to present
//! and one `Frame` per swapchain image. A [`Sample`] only creates its own
//! resources, records per-image work and submits it.
//!
//! Each frame runs the same sequence:
//!
//! 1. acquire the next swapchain image and wait for its fence
//! 2. [`Sample::update`] with the elapsed time
//! 3. transition the image from `UNDEFINED` to `COLOR_ATTACHMENT_OPTIMAL`
//! 4. [`Sample::render`] for that image
//! 5. transition it to `PRESENT_SRC_KHR`, wait for the queue to drain, present
//!
//! Because step 5 waits for the queue, samples may submit without semaphores.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::config::SandboxConfig;
use crate::vulkan::commands::image_barrier;
use crate::vulkan::image::color_subresource_range;
use crate::vulkan::{
    CommandPool, DeviceRequirements, Fence, LogicalDevice, PhysicalDeviceInfo, Surface, Swapchain, VkResultExt,
    VulkanInstance, VulkanResult, Window,
};

/// Everything a sample needs to create and submit work
///
/// Fields drop in declaration order: pool, swapchain, device, surface, instance.
pub struct RenderContext {
    /// Command pool on the graphics queue family
    pub command_pool: CommandPool,
    /// Swapchain, usable as a blit destination
    pub swapchain: Swapchain,
    /// Logical device
    pub device: LogicalDevice,
    /// Window surface
    pub surface: Surface,
    /// Selected physical device
    pub physical_device: PhysicalDeviceInfo,
    /// Instance
    pub instance: VulkanInstance,
    /// Harness configuration
    pub config: SandboxConfig,
}

impl RenderContext {
    fn new(window: &Window, config: &SandboxConfig, requirements: &DeviceRequirements) -> VulkanResult<Self> {
        let extensions = window.required_instance_extensions()?;
        let extension_names: Vec<&std::ffi::CStr> = extensions.iter().map(|e| e.as_c_str()).collect();
        let instance = VulkanInstance::new(
            &config.application_name,
            requirements.api_version,
            &extension_names,
            config.validation_enabled(),
        )?;

        let surface = Surface::new(&instance, window)?;

        let requirements = requirements.clone().with_extension(SwapchainLoader::name());
        let physical_device = PhysicalDeviceInfo::select(&instance.instance, &requirements, Some(&surface))?;
        let device = LogicalDevice::new(&instance.instance, &physical_device, &requirements)?;

        let (width, height) = window.framebuffer_size();
        let swapchain = Swapchain::new(
            &instance,
            &device.device,
            &surface,
            &physical_device,
            vk::Extent2D { width, height },
        )?;
        let command_pool = CommandPool::new(&device.device, device.graphics_family)?;

        Ok(Self {
            command_pool,
            swapchain,
            device,
            surface,
            physical_device,
            instance,
            config: config.clone(),
        })
    }

    /// Raw device handle
    pub const fn raw_device(&self) -> &Device {
        &self.device.device
    }

    /// Graphics queue
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Swapchain extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Swapchain image format
    pub const fn color_format(&self) -> vk::Format {
        self.swapchain.format().format
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.swapchain.images().len()
    }

    fn transition_swapchain_image(&self, image: vk::Image, transition: LayoutTransition) -> VulkanResult<()> {
        let barrier = image_barrier(
            image,
            color_subresource_range(0, 1),
            transition.old_layout,
            transition.new_layout,
            transition.src_access,
            transition.dst_access,
        );
        self.command_pool.submit_one_time(self.graphics_queue(), |recorder| {
            recorder.cmd_image_barriers(transition.src_stage, transition.dst_stage, &[barrier])
        })
    }
}

/// Layout change the harness applies around [`Sample::render`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
    /// Stages waited on
    pub src_stage: vk::PipelineStageFlags,
    /// Stages blocked
    pub dst_stage: vk::PipelineStageFlags,
}

/// Swapchain image becomes a color attachment before the sample renders
pub const PRE_RENDER_TRANSITION: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::UNDEFINED,
    new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    src_access: vk::AccessFlags::empty(),
    dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
    dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
};

/// Swapchain image is handed to the presentation engine after the sample renders
pub const PRE_PRESENT_TRANSITION: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
    src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    dst_access: vk::AccessFlags::empty(),
    src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
};

/// A program driven by [`SampleApplication`]
pub trait Sample: Sized {
    /// Per swapchain image data
    type Frame;

    /// Device version, features and extensions the sample needs
    fn requirements() -> DeviceRequirements {
        DeviceRequirements::new(vk::API_VERSION_1_0)
    }

    /// Create sample-wide resources
    fn initialize_application(context: &RenderContext) -> VulkanResult<Self>;

    /// Create the data for swapchain image `frame_index`
    fn initialize_frame(
        &mut self,
        context: &RenderContext,
        frame_index: usize,
        swapchain_image: vk::Image,
    ) -> VulkanResult<Self::Frame>;

    /// Advance the simulation by `dt` seconds
    fn update(&mut self, context: &RenderContext, dt: f32) -> VulkanResult<()>;

    /// Submit the work for swapchain image `frame_index`
    ///
    /// The image is in `COLOR_ATTACHMENT_OPTIMAL` on entry and must be left there.
    fn render(&mut self, context: &RenderContext, frame_index: usize, frame: &mut Self::Frame) -> VulkanResult<()>;
}

/// Window, presentation objects, frames and the sample
///
/// Fields drop in declaration order, so frame data and the sample are released
/// before the objects they were created from.
pub struct SampleApplication<S: Sample> {
    frames: Vec<S::Frame>,
    sample: S,
    acquire_fence: Fence,
    context: RenderContext,
    window: Window,
    frame_count: u64,
}

impl<S: Sample> SampleApplication<S> {
    /// Open the window, bring up Vulkan and initialise the sample
    pub fn new(config: &SandboxConfig) -> VulkanResult<Self> {
        let window = Window::new(config.window_title(), config.window.width, config.window.height)?;
        let context = RenderContext::new(&window, config, &S::requirements())?;
        let acquire_fence = Fence::new(context.raw_device(), false)?;

        let mut sample = S::initialize_application(&context)?;
        let frames = context
            .swapchain
            .images()
            .iter()
            .enumerate()
            .map(|(index, &image)| sample.initialize_frame(&context, index, image))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!("Initialized {} frames", frames.len());

        Ok(Self {
            frames,
            sample,
            acquire_fence,
            context,
            window,
            frame_count: 0,
        })
    }

    /// Render one frame
    pub fn process_frame(&mut self, dt: f32) -> VulkanResult<()> {
        let image_index = self.context.swapchain.acquire_next_image(self.acquire_fence.handle())?;
        self.acquire_fence.wait_and_reset()?;

        let frame_index = image_index as usize;
        let image = self.context.swapchain.images()[frame_index];

        self.sample.update(&self.context, dt)?;

        self.context.transition_swapchain_image(image, PRE_RENDER_TRANSITION)?;
        self.sample
            .render(&self.context, frame_index, &mut self.frames[frame_index])?;
        self.context.transition_swapchain_image(image, PRE_PRESENT_TRANSITION)?;

        let queue = self.context.graphics_queue();
        unsafe { self.context.raw_device().queue_wait_idle(queue) }.check("vkQueueWaitIdle")?;

        self.context
            .swapchain
            .present(self.context.device.present_queue, image_index)?;
        self.frame_count += 1;
        Ok(())
    }

    /// Run until the window closes or the frame limit is reached
    pub fn run(&mut self) -> VulkanResult<()> {
        let limit = self.context.config.frame_limit;
        let mut last_time = self.window.time();

        while !self.window.should_close() && limit.map_or(true, |limit| self.frame_count < limit) {
            self.window.poll_events();

            let now = self.window.time();
            let dt = (now - last_time) as f32;
            last_time = now;

            self.process_frame(dt)?;
        }

        log::info!("Rendered {} frames", self.frame_count);
        self.context.device.wait_idle()
    }

    /// Frames presented so far
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The running sample
    pub const fn sample(&self) -> &S {
        &self.sample
    }
}

impl<S: Sample> Drop for SampleApplication<S> {
    fn drop(&mut self) {
        let _ = self.context.device.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_chain_through_color_attachment() {
        assert_eq!(PRE_RENDER_TRANSITION.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(PRE_RENDER_TRANSITION.new_layout, PRE_PRESENT_TRANSITION.old_layout);
        assert_eq!(PRE_PRESENT_TRANSITION.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_present_transition_waits_for_color_writes() {
        assert!(PRE_PRESENT_TRANSITION
            .src_access
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert_eq!(PRE_PRESENT_TRANSITION.src_stage, PRE_RENDER_TRANSITION.dst_stage);
    }
}
