//! Vulkan RAII wrappers
//!
//! Every wrapper owns exactly one handle (plus, for buffers and images, the
//! memory bound to it) and destroys it on drop. Owners must declare
//! dependents before the objects they depend on.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor_set;
pub mod framebuffer;
pub mod image;
pub mod memory;
pub mod mesh;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod update_template;
pub mod window;

pub use buffer::{Buffer, BufferView, FrameUniform};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{
    DeviceFeatures, DeviceRequirements, HeadlessContext, LogicalDevice, PhysicalDeviceInfo, VkResultExt,
    VulkanError, VulkanInstance, VulkanResult,
};
pub use descriptor_set::{
    BindingDesc, BoundDescriptor, DescriptorKind, DescriptorPool, DescriptorResource, DescriptorSetLayout,
    DescriptorSetWriter, ShaderStages,
};
pub use framebuffer::Framebuffer;
pub use image::{Image, ImageView};
pub use memory::{CommitmentReport, DeviceMemory};
pub use mesh::{GpuMesh, Mesh, Vertex};
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, GraphicsPipelineDesc, PipelineLayout, ShaderModule};
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::Fence;
pub use update_template::{DescriptorData, DescriptorUpdateTemplate, TemplateEntryDesc, TemplateError};
pub use window::{Window, WindowError};
