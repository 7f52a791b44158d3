//! Command buffer management
//!
//! Recording goes through [`CommandRecorder`]; a render pass scope is an
//! [`ActiveRenderPass`] that ends the pass when dropped.

use ash::{vk, Device};

use super::{VkResultExt, VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool whose buffers can be reset individually
    pub fn new(device: &Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool =
            unsafe { device.create_command_pool(&pool_create_info, None) }.check("vkCreateCommandPool")?;

        Ok(Self {
            device: device.clone(),
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }.check("vkAllocateCommandBuffers")
    }

    /// Record a one-time command buffer, submit it and wait for the queue to drain
    pub fn submit_one_time<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let command_buffers = self.allocate_command_buffers(1)?;
        let result = (|| -> VulkanResult<()> {
            let mut recorder = CommandRecorder::new(&self.device, command_buffers[0]);
            recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            record(&mut recorder)?;
            let command_buffer = recorder.end()?;
            submit(&self.device, queue, &[command_buffer], vk::Fence::null())?;
            unsafe { self.device.queue_wait_idle(queue) }.check("vkQueueWaitIdle")
        })();

        unsafe {
            self.device.free_command_buffers(self.command_pool, &command_buffers);
        }
        result
    }

    /// Get the command pool handle
    pub const fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Submit `command_buffers` with no semaphores
pub fn submit(device: &Device, queue: vk::Queue, command_buffers: &[vk::CommandBuffer], fence: vk::Fence) -> VulkanResult<()> {
    let submit_info = vk::SubmitInfo::builder().command_buffers(command_buffers).build();
    unsafe { device.queue_submit(queue, &[submit_info], fence) }.check("vkQueueSubmit")
}

/// Image memory barrier covering `range` with ignored queue families
pub fn image_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build()
}

/// Command buffer recorder
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Wrap an allocated command buffer
    pub fn new(device: &Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            device: device.clone(),
            recording: false,
        }
    }

    fn ensure_recording(&self) -> VulkanResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            })
        }
    }

    /// Begin command recording
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            });
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(self.command_buffer, &begin_info) }
            .check("vkBeginCommandBuffer")?;

        self.recording = true;
        Ok(self)
    }

    /// Begin an inline render pass; it ends when the returned scope drops
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        self.ensure_recording()?;

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Record a pipeline barrier made of image barriers only
    pub fn cmd_image_barriers(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier],
    ) -> VulkanResult<()> {
        self.ensure_recording()?;
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        }
        Ok(())
    }

    /// Record an image blit
    pub fn cmd_blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) -> VulkanResult<()> {
        self.ensure_recording()?;
        unsafe {
            self.device
                .cmd_blit_image(self.command_buffer, src, src_layout, dst, dst_layout, regions, filter);
        }
        Ok(())
    }

    /// End command recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        self.ensure_recording()?;
        unsafe { self.device.end_command_buffer(self.command_buffer) }.check("vkEndCommandBuffer")?;
        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

/// Active render pass; ends the pass on drop
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl ActiveRenderPass<'_> {
    /// Bind a graphics pipeline
    pub fn cmd_bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.recorder.device.cmd_bind_pipeline(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Bind descriptor sets starting at `first_set`
    pub fn cmd_bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.recorder.device.cmd_bind_descriptor_sets(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    /// Bind vertex buffers
    pub fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_vertex_buffers(self.recorder.command_buffer, first_binding, buffers, offsets);
        }
    }

    /// Bind index buffer
    pub fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_index_buffer(self.recorder.command_buffer, buffer, offset, index_type);
        }
    }

    /// Draw indexed
    pub fn cmd_draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32) {
        unsafe {
            self.recorder.device.cmd_draw_indexed(
                self.recorder.command_buffer,
                index_count,
                instance_count,
                first_index,
                0,
                0,
            );
        }
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}
