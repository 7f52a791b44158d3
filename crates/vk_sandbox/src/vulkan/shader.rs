//! Shader modules and graphics pipelines
//!
//! SPIR-V is produced by the build script and loaded from disk at runtime.

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use super::{DescriptorSetLayout, RenderPass, VkResultExt, VulkanError, VulkanResult};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Decode a SPIR-V binary into words, checking the magic number
pub fn spirv_words(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| VulkanError::Shader(format!("Invalid SPIR-V: {e}")))
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        let words = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let module = unsafe { device.create_shader_module(&create_info, None) }.check("vkCreateShaderModule")?;

        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load shader from SPIR-V file
    pub fn from_file(device: &Device, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| VulkanError::Shader(format!("Failed to read {}: {e}", path.display())))?;
        log::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub const fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage create info using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout over the given descriptor set layouts, no push constants
    pub fn new(device: &Device, set_layouts: &[&DescriptorSetLayout]) -> VulkanResult<Self> {
        let handles: Vec<vk::DescriptorSetLayout> = set_layouts.iter().map(|l| l.handle()).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&handles);

        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.check("vkCreatePipelineLayout")?;

        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Get layout handle
    pub const fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Fixed-function state for a single-subpass triangle-list pipeline
pub struct GraphicsPipelineDesc<'a> {
    /// Shader stages in pipeline order
    pub stages: Vec<(vk::ShaderStageFlags, &'a ShaderModule)>,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Viewport and scissor size
    pub extent: vk::Extent2D,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding considered front facing
    pub front_face: vk::FrontFace,
}

/// Full-extent viewport with the standard depth range
pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Create graphics pipeline without depth testing or blending
    pub fn new(
        device: &Device,
        render_pass: &RenderPass,
        layout: &PipelineLayout,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> VulkanResult<Self> {
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .map(|(stage, module)| module.stage_info(*stage))
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [viewport_for(desc.extent)];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: desc.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        }
        .map_err(|(_, result)| VulkanError::Api {
            call: "vkCreateGraphicsPipelines",
            result,
        })?;

        let pipeline = pipelines.first().copied().ok_or_else(|| {
            VulkanError::InitializationFailed("vkCreateGraphicsPipelines returned no pipeline".to_string())
        })?;

        Ok(Self {
            device: device.clone(),
            pipeline,
        })
    }

    /// Get pipeline handle
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spirv_magic_is_checked() {
        let mut bytes = 0x0723_0203_u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000_u32.to_le_bytes());
        assert_eq!(spirv_words(&bytes).unwrap(), vec![0x0723_0203, 0x0001_0000]);

        assert!(spirv_words(&[0xde, 0xad, 0xbe, 0xef]).is_err());
        assert!(spirv_words(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn test_viewport_covers_extent() {
        let viewport = viewport_for(vk::Extent2D { width: 640, height: 480 });
        assert_relative_eq!(viewport.width, 640.0);
        assert_relative_eq!(viewport.height, 480.0);
        assert_relative_eq!(viewport.max_depth, 1.0);
    }
}
