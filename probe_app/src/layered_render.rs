//! Layered rendering into a 3D image
//!
//! A cube is drawn once per frame into four slices of a 3D color image at the
//! same time: the geometry shader replicates every triangle into each layer
//! of a `2D_ARRAY` view over depth slices 3..7. The four slices are then
//! blitted into the four quadrants of the swapchain image.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use vk_sandbox::foundation::math::{Mat4, Mat4Ext, Vec3};
use vk_sandbox::sample::{RenderContext, Sample};
use vk_sandbox::vulkan::commands::{image_barrier, submit};
use vk_sandbox::vulkan::context::{DeviceFeatures, DeviceRequirements};
use vk_sandbox::vulkan::descriptor_set::{
    BindingDesc, DescriptorKind, DescriptorPool, DescriptorSetLayout, DescriptorSetWriter, ShaderStages,
};
use vk_sandbox::vulkan::image::color_subresource_range;
use vk_sandbox::vulkan::shader::{GraphicsPipelineDesc, ShaderModule};
use vk_sandbox::vulkan::{
    CommandRecorder, FrameUniform, Framebuffer, GpuMesh, GraphicsPipeline, Image, ImageView, Mesh, PipelineLayout,
    RenderPass, Vertex, VulkanError, VulkanResult,
};

/// Depth of the 3D render image, in slices
pub const IMAGE_DEPTH: u32 = 8;
/// First slice the render view covers
pub const RENDER_BASE_LAYER: u32 = 3;
/// Slices rendered each frame; must match the geometry shader
pub const RENDER_LAYER_COUNT: u32 = 4;

const _: () = assert!(
    IMAGE_DEPTH > RENDER_BASE_LAYER + RENDER_LAYER_COUNT,
    "the 3D image must be deeper than the render view's base layer + layer count"
);

/// White
pub const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Vertical field of view in radians
#[allow(clippy::approx_constant)]
pub const FIELD_OF_VIEW: f32 = 1.5708;
/// Near clip plane
pub const NEAR_PLANE: f32 = 0.1;
/// Far clip plane
pub const FAR_PLANE: f32 = 100.0;

/// X rotation in radians per second
#[allow(clippy::approx_constant)]
pub const SPIN_RATE_X: f32 = 3.14;
/// Y rotation in radians per second
pub const SPIN_RATE_Y: f32 = SPIN_RATE_X * 0.5;

const VERTEX_SHADER: &str = "layered_vert.spv";
const GEOMETRY_SHADER: &str = "layered_geom.spv";
const FRAGMENT_SHADER: &str = "layered_frag.spv";

/// Camera uniform at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CameraUniform {
    /// Clip-from-view matrix
    pub projection: [[f32; 4]; 4],
}

unsafe impl Pod for CameraUniform {}
unsafe impl Zeroable for CameraUniform {}

/// Model uniform at binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModelUniform {
    /// View-from-model matrix
    pub transform: [[f32; 4]; 4],
}

unsafe impl Pod for ModelUniform {}
unsafe impl Zeroable for ModelUniform {}

/// Perspective projection flipped into Vulkan's downward Y
pub fn camera_projection(aspect: f32) -> Mat4 {
    Mat4::vulkan_y_flip() * Mat4::perspective(FIELD_OF_VIEW, aspect, NEAR_PLANE, FAR_PLANE)
}

/// Cube placed three units in front of the camera
pub fn initial_transform() -> Mat4 {
    Mat4::translation(Vec3::new(0.0, 0.0, -3.0))
}

/// Rotation applied for a frame that took `dt` seconds
pub fn spin(dt: f32) -> Mat4 {
    Mat4::rotation_x(SPIN_RATE_X * dt) * Mat4::rotation_y(SPIN_RATE_Y * dt)
}

/// Blit regions copying slice `RENDER_BASE_LAYER + i` of the render image
/// into quadrant `i` of the swapchain image
///
/// Quadrants are ordered top-left, top-right, bottom-left, bottom-right.
pub fn quadrant_blits(extent: vk::Extent2D) -> [vk::ImageBlit; 4] {
    let width = extent.width as i32;
    let height = extent.height as i32;
    let half_width = width / 2;
    let half_height = height / 2;

    let quadrants = [
        ((0, 0), (half_width, half_height)),
        ((half_width, 0), (width, half_height)),
        ((0, half_height), (half_width, height)),
        ((half_width, half_height), (width, height)),
    ];

    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };

    let mut regions = [vk::ImageBlit::default(); 4];
    for (slice, (region, ((x0, y0), (x1, y1)))) in regions.iter_mut().zip(quadrants).enumerate() {
        let z = (RENDER_BASE_LAYER + slice as u32) as i32;
        *region = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z },
                vk::Offset3D {
                    x: width,
                    y: height,
                    z: z + 1,
                },
            ],
            dst_subresource: layers,
            dst_offsets: [
                vk::Offset3D { x: x0, y: y0, z: 0 },
                vk::Offset3D { x: x1, y: y1, z: 1 },
            ],
        };
    }
    regions
}

fn uniform_bindings() -> [BindingDesc; 2] {
    [
        BindingDesc::new(0, DescriptorKind::UniformBuffer, 1, ShaderStages::VERTEX),
        BindingDesc::new(1, DescriptorKind::UniformBuffer, 1, ShaderStages::VERTEX),
    ]
}

fn render_image_info(format: vk::Format, extent: vk::Extent2D) -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .flags(vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE)
        .image_type(vk::ImageType::TYPE_3D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: IMAGE_DEPTH,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

/// Per swapchain image objects
///
/// Fields drop in declaration order: framebuffer, view, then image. The
/// command buffer and descriptor set go back with their pools.
pub struct LayeredFrame {
    command_buffer: vk::CommandBuffer,
    descriptor_set: vk::DescriptorSet,
    framebuffer: Framebuffer,
    render_view: ImageView,
    render_image: Image,
}

impl LayeredFrame {
    /// Recorded command buffer submitted every time this image comes up
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Descriptor set bound while drawing
    pub const fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// `2D_ARRAY` view over the rendered slices
    pub const fn render_view(&self) -> vk::ImageView {
        self.render_view.handle()
    }
}

/// Spinning cube rendered into four slices at once
pub struct LayeredRenderSample {
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
    render_pass: RenderPass,
    descriptor_pool: DescriptorPool,
    descriptor_layout: DescriptorSetLayout,
    cube: GpuMesh,
    camera: FrameUniform<CameraUniform>,
    model: FrameUniform<ModelUniform>,
    projection: Mat4,
    transform: Mat4,
}

impl LayeredRenderSample {
    /// Current model transform
    pub const fn transform(&self) -> &Mat4 {
        &self.transform
    }

    fn record_frame(
        &self,
        context: &RenderContext,
        frame: &LayeredFrame,
        swapchain_image: vk::Image,
    ) -> VulkanResult<()> {
        let extent = context.extent();
        let mut recorder = CommandRecorder::new(context.raw_device(), frame.command_buffer);
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;

        {
            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue { float32: CLEAR_COLOR },
            }];
            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let mut pass = recorder.begin_render_pass(
                self.render_pass.handle(),
                frame.framebuffer.handle(),
                render_area,
                &clear_values,
            )?;
            pass.cmd_bind_pipeline(self.pipeline.handle());
            pass.cmd_bind_descriptor_sets(self.pipeline_layout.handle(), 0, &[frame.descriptor_set]);
            self.cube.draw(&mut pass);
        }

        let swapchain_range = color_subresource_range(0, 1);
        recorder.cmd_image_barriers(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
            &[image_barrier(
                swapchain_image,
                swapchain_range,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::TRANSFER_WRITE,
            )],
        )?;

        recorder.cmd_blit_image(
            frame.render_image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &quadrant_blits(extent),
            vk::Filter::NEAREST,
        )?;

        recorder.cmd_image_barriers(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            &[image_barrier(
                swapchain_image,
                swapchain_range,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )],
        )?;

        recorder.end()?;
        Ok(())
    }
}

impl Sample for LayeredRenderSample {
    type Frame = LayeredFrame;

    fn requirements() -> DeviceRequirements {
        DeviceRequirements::new(vk::API_VERSION_1_1).with_features(DeviceFeatures::GEOMETRY_SHADER)
    }

    fn initialize_application(context: &RenderContext) -> VulkanResult<Self> {
        let device = context.raw_device();
        let physical_device = &context.physical_device;
        let extent = context.extent();
        let image_count = context.image_count();

        let cube = GpuMesh::upload(device, physical_device, &Mesh::cube())?;

        let descriptor_layout = DescriptorSetLayout::new(device, &uniform_bindings())?;
        let descriptor_pool = DescriptorPool::for_layout(device, &descriptor_layout, image_count as u32)?;
        let pipeline_layout = PipelineLayout::new(device, &[&descriptor_layout])?;

        let render_pass = RenderPass::new_single_color(
            device,
            context.color_format(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )?;

        let shaders = &context.config.shaders;
        let vertex = ShaderModule::from_file(device, shaders.resolve(VERTEX_SHADER))?;
        let geometry = ShaderModule::from_file(device, shaders.resolve(GEOMETRY_SHADER))?;
        let fragment = ShaderModule::from_file(device, shaders.resolve(FRAGMENT_SHADER))?;

        let pipeline = GraphicsPipeline::new(
            device,
            &render_pass,
            &pipeline_layout,
            &GraphicsPipelineDesc {
                stages: vec![
                    (vk::ShaderStageFlags::VERTEX, &vertex),
                    (vk::ShaderStageFlags::GEOMETRY, &geometry),
                    (vk::ShaderStageFlags::FRAGMENT, &fragment),
                ],
                vertex_bindings: vec![Vertex::binding_description()],
                vertex_attributes: Vertex::attribute_descriptions().to_vec(),
                extent,
                cull_mode: vk::CullModeFlags::BACK,
                front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            },
        )?;

        let camera = FrameUniform::new(device, physical_device, image_count)?;
        let model = FrameUniform::new(device, physical_device, image_count)?;

        let aspect = extent.width as f32 / extent.height as f32;
        log::info!(
            "Rendering {}x{} into slices {}..{} of a {}-deep image",
            extent.width,
            extent.height,
            RENDER_BASE_LAYER,
            RENDER_BASE_LAYER + RENDER_LAYER_COUNT,
            IMAGE_DEPTH
        );

        Ok(Self {
            pipeline,
            pipeline_layout,
            render_pass,
            descriptor_pool,
            descriptor_layout,
            cube,
            camera,
            model,
            projection: camera_projection(aspect),
            transform: initial_transform(),
        })
    }

    fn initialize_frame(
        &mut self,
        context: &RenderContext,
        frame_index: usize,
        swapchain_image: vk::Image,
    ) -> VulkanResult<Self::Frame> {
        let device = context.raw_device();
        let extent = context.extent();

        let render_image = Image::new(
            device,
            &context.physical_device,
            &render_image_info(context.color_format(), extent),
        )?;
        let render_view = ImageView::new(
            device,
            &render_image,
            vk::ImageViewType::TYPE_2D_ARRAY,
            color_subresource_range(RENDER_BASE_LAYER, RENDER_LAYER_COUNT),
        )?;
        let framebuffer = Framebuffer::new(
            device,
            &self.render_pass,
            &[render_view.handle()],
            extent,
            RENDER_LAYER_COUNT,
        )?;

        let descriptor_set = self
            .descriptor_pool
            .allocate(&self.descriptor_layout, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("no descriptor set allocated".to_string()))?;
        DescriptorSetWriter::new()
            .write_buffers(
                descriptor_set,
                0,
                0,
                DescriptorKind::UniformBuffer,
                &[self.camera.descriptor_info(frame_index)],
            )
            .write_buffers(
                descriptor_set,
                1,
                0,
                DescriptorKind::UniformBuffer,
                &[self.model.descriptor_info(frame_index)],
            )
            .update(device);

        let command_buffer = context
            .command_pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("no command buffer allocated".to_string()))?;

        let frame = LayeredFrame {
            command_buffer,
            descriptor_set,
            framebuffer,
            render_view,
            render_image,
        };
        self.record_frame(context, &frame, swapchain_image)?;
        Ok(frame)
    }

    fn update(&mut self, _context: &RenderContext, dt: f32) -> VulkanResult<()> {
        self.transform *= spin(dt);
        Ok(())
    }

    fn render(&mut self, context: &RenderContext, frame_index: usize, frame: &mut Self::Frame) -> VulkanResult<()> {
        self.camera.write(
            frame_index,
            &CameraUniform {
                projection: self.projection.to_cols_array_2d(),
            },
        )?;
        self.model.write(
            frame_index,
            &ModelUniform {
                transform: self.transform.to_cols_array_2d(),
            },
        )?;

        submit(
            context.raw_device(),
            context.graphics_queue(),
            &[frame.command_buffer],
            vk::Fence::null(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_render_view_fits_inside_image() {
        assert!(RENDER_BASE_LAYER + RENDER_LAYER_COUNT < IMAGE_DEPTH);
        let range = color_subresource_range(RENDER_BASE_LAYER, RENDER_LAYER_COUNT);
        assert_eq!(range.base_array_layer, 3);
        assert_eq!(range.layer_count, 4);
    }

    #[test]
    fn test_blits_read_consecutive_slices() {
        let regions = quadrant_blits(vk::Extent2D { width: 800, height: 600 });
        for (i, region) in regions.iter().enumerate() {
            let z = 3 + i as i32;
            assert_eq!(region.src_offsets[0], vk::Offset3D { x: 0, y: 0, z });
            assert_eq!(
                region.src_offsets[1],
                vk::Offset3D {
                    x: 800,
                    y: 600,
                    z: z + 1
                }
            );
            assert_eq!(region.dst_offsets[0].z, 0);
            assert_eq!(region.dst_offsets[1].z, 1);
        }
    }

    #[test]
    fn test_blits_tile_the_swapchain_image() {
        let regions = quadrant_blits(vk::Extent2D { width: 800, height: 600 });
        let corners: Vec<_> = regions
            .iter()
            .map(|r| (r.dst_offsets[0].x, r.dst_offsets[0].y, r.dst_offsets[1].x, r.dst_offsets[1].y))
            .collect();

        assert_eq!(
            corners,
            vec![
                (0, 0, 400, 300),
                (400, 0, 800, 300),
                (0, 300, 400, 600),
                (400, 300, 800, 600),
            ]
        );
    }

    #[test]
    fn test_bottom_right_quadrant_uses_width_on_tall_images() {
        let regions = quadrant_blits(vk::Extent2D { width: 300, height: 900 });
        assert_eq!(regions[3].dst_offsets[0].x, 150);
        assert_eq!(regions[3].dst_offsets[0].y, 450);
    }

    #[test]
    fn test_projection_flips_y() {
        let projection = camera_projection(1.0);
        let unflipped = Mat4::perspective(FIELD_OF_VIEW, 1.0, NEAR_PLANE, FAR_PLANE);
        assert_relative_eq!(projection[(1, 1)], -unflipped[(1, 1)]);
        assert_relative_eq!(projection[(0, 0)], unflipped[(0, 0)]);
        assert_relative_eq!(projection[(2, 2)], unflipped[(2, 2)]);
    }

    #[test]
    fn test_initial_transform_places_cube_in_front() {
        let origin = initial_transform().transform_point(&nalgebra::Point3::origin());
        assert_relative_eq!(origin.coords, Vec3::new(0.0, 0.0, -3.0));
    }

    #[test]
    fn test_transform_accumulates_spins_in_order() {
        let deltas = [0.016_f32, 0.020, 0.012];

        let mut transform = initial_transform();
        for dt in deltas {
            transform *= spin(dt);
        }

        let expected = initial_transform() * spin(0.016) * spin(0.020) * spin(0.012);
        assert_relative_eq!(transform, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_spin_rotates_x_before_y() {
        let dt = 0.25;
        let expected = Mat4::rotation_x(SPIN_RATE_X * dt) * Mat4::rotation_y(SPIN_RATE_X * 0.5 * dt);
        assert_relative_eq!(spin(dt), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_delta_keeps_transform() {
        assert_relative_eq!(spin(0.0), Mat4::identity());
    }

    #[test]
    fn test_uniforms_match_glsl_mat4() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64);
        assert_eq!(std::mem::size_of::<ModelUniform>(), 64);

        let uniform = ModelUniform {
            transform: initial_transform().to_cols_array_2d(),
        };
        // Translation lives in the last column
        assert_relative_eq!(uniform.transform[3][2], -3.0);
    }
}
