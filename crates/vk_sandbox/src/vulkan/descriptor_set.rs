//! Descriptor set layouts, pools and explicit descriptor writes
//!
//! Layout bindings are described with plain serializable records
//! ([`BindingDesc`]) and converted into ash structs at the call site.

use ash::{vk, Device};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::mem;

use super::{VkResultExt, VulkanResult};

/// Descriptor types the sandbox knows how to lay out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    /// `VK_DESCRIPTOR_TYPE_SAMPLER`
    Sampler,
    /// `VK_DESCRIPTOR_TYPE_COMBINED_IMAGE_SAMPLER`
    CombinedImageSampler,
    /// `VK_DESCRIPTOR_TYPE_SAMPLED_IMAGE`
    SampledImage,
    /// `VK_DESCRIPTOR_TYPE_STORAGE_IMAGE`
    StorageImage,
    /// `VK_DESCRIPTOR_TYPE_UNIFORM_TEXEL_BUFFER`
    UniformTexelBuffer,
    /// `VK_DESCRIPTOR_TYPE_STORAGE_TEXEL_BUFFER`
    StorageTexelBuffer,
    /// `VK_DESCRIPTOR_TYPE_UNIFORM_BUFFER`
    UniformBuffer,
    /// `VK_DESCRIPTOR_TYPE_STORAGE_BUFFER`
    StorageBuffer,
}

/// Which native record a descriptor is written from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorPayload {
    /// `VkDescriptorImageInfo`
    Image,
    /// `VkDescriptorBufferInfo`
    Buffer,
    /// `VkBufferView`
    TexelBufferView,
}

impl DescriptorPayload {
    /// Size of the native record in bytes
    pub const fn abi_size(self) -> usize {
        match self {
            Self::Image => mem::size_of::<vk::DescriptorImageInfo>(),
            Self::Buffer => mem::size_of::<vk::DescriptorBufferInfo>(),
            Self::TexelBufferView => mem::size_of::<vk::BufferView>(),
        }
    }
}

impl DescriptorKind {
    /// Matching ash enumerant
    pub const fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::SAMPLER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            Self::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    /// Native record this kind of descriptor is written from
    pub const fn payload(self) -> DescriptorPayload {
        match self {
            Self::Sampler | Self::CombinedImageSampler | Self::SampledImage | Self::StorageImage => {
                DescriptorPayload::Image
            }
            Self::UniformTexelBuffer | Self::StorageTexelBuffer => DescriptorPayload::TexelBufferView,
            Self::UniformBuffer | Self::StorageBuffer => DescriptorPayload::Buffer,
        }
    }
}

bitflags! {
    /// Shader stages a binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Geometry stage
        const GEOMETRY = 1 << 1;
        /// Fragment stage
        const FRAGMENT = 1 << 2;
        /// Compute stage
        const COMPUTE = 1 << 3;
    }
}

impl ShaderStages {
    /// Matching ash flags
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        if self.contains(Self::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if self.contains(Self::GEOMETRY) {
            flags |= vk::ShaderStageFlags::GEOMETRY;
        }
        if self.contains(Self::FRAGMENT) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        if self.contains(Self::COMPUTE) {
            flags |= vk::ShaderStageFlags::COMPUTE;
        }
        flags
    }
}

/// One descriptor set layout binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDesc {
    /// Binding number
    pub binding: u32,
    /// Descriptor type
    pub kind: DescriptorKind,
    /// Number of array elements
    pub count: u32,
    /// Visible stages
    pub stages: ShaderStages,
}

impl BindingDesc {
    /// Describe a binding
    pub const fn new(binding: u32, kind: DescriptorKind, count: u32, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind,
            count,
            stages,
        }
    }

    /// Native layout binding (no immutable samplers)
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.kind.to_vk())
            .descriptor_count(self.count)
            .stage_flags(self.stages.to_vk())
            .build()
    }
}

/// Pool sizes big enough for `sets` copies of `bindings`
///
/// Descriptor types are merged and listed in order of first appearance.
pub fn pool_sizes(bindings: &[BindingDesc], sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings.iter().filter(|b| b.count > 0) {
        let ty = binding.kind.to_vk();
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += binding.count * sets,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: binding.count * sets,
            }),
        }
    }
    sizes
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<BindingDesc>,
}

impl DescriptorSetLayout {
    /// Create a layout from binding records
    pub fn new(device: &Device, bindings: &[BindingDesc]) -> VulkanResult<Self> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings.iter().map(BindingDesc::to_vk).collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .check("vkCreateDescriptorSetLayout")?;

        Ok(Self {
            layout,
            device: device.clone(),
            bindings: bindings.to_vec(),
        })
    }

    /// Get the Vulkan descriptor set layout handle
    pub const fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
///
/// Sets are freed together with the pool.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create a pool that can hold `max_sets` sets of `layout`
    pub fn for_layout(device: &Device, layout: &DescriptorSetLayout, max_sets: u32) -> VulkanResult<Self> {
        let sizes = pool_sizes(layout.bindings(), max_sets);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.check("vkCreateDescriptorPool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    /// Allocate `count` sets of `layout`
    pub fn allocate(&self, layout: &DescriptorSetLayout, count: usize) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.check("vkAllocateDescriptorSets")
    }

    /// Get the pool handle
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// What one descriptor array element ends up referencing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    /// Image descriptor
    Image {
        /// Sampler (null for storage images)
        sampler: vk::Sampler,
        /// Image view
        view: vk::ImageView,
        /// Layout the image is in when accessed
        layout: vk::ImageLayout,
    },
    /// Buffer descriptor
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
    /// Texel buffer descriptor
    TexelBufferView(vk::BufferView),
}

impl From<vk::DescriptorImageInfo> for DescriptorResource {
    fn from(info: vk::DescriptorImageInfo) -> Self {
        Self::Image {
            sampler: info.sampler,
            view: info.image_view,
            layout: info.image_layout,
        }
    }
}

impl From<vk::DescriptorBufferInfo> for DescriptorResource {
    fn from(info: vk::DescriptorBufferInfo) -> Self {
        Self::Buffer {
            buffer: info.buffer,
            offset: info.offset,
            range: info.range,
        }
    }
}

impl From<vk::BufferView> for DescriptorResource {
    fn from(view: vk::BufferView) -> Self {
        Self::TexelBufferView(view)
    }
}

/// A single descriptor element as written into a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundDescriptor {
    /// Binding number
    pub binding: u32,
    /// Array element within the binding
    pub element: u32,
    /// Descriptor type
    pub kind: DescriptorKind,
    /// Referenced resource
    pub resource: DescriptorResource,
}

#[derive(Debug, Clone)]
enum WritePayload {
    Images(Vec<vk::DescriptorImageInfo>),
    Buffers(Vec<vk::DescriptorBufferInfo>),
    TexelViews(Vec<vk::BufferView>),
}

#[derive(Debug, Clone)]
struct PendingWrite {
    set: vk::DescriptorSet,
    binding: u32,
    first_element: u32,
    kind: DescriptorKind,
    payload: WritePayload,
}

/// Collects explicit descriptor writes and applies them in one call
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create a new descriptor set writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write image descriptors starting at `first_element`
    #[must_use]
    pub fn write_images(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        kind: DescriptorKind,
        infos: &[vk::DescriptorImageInfo],
    ) -> Self {
        debug_assert_eq!(kind.payload(), DescriptorPayload::Image);
        self.writes.push(PendingWrite {
            set,
            binding,
            first_element,
            kind,
            payload: WritePayload::Images(infos.to_vec()),
        });
        self
    }

    /// Write buffer descriptors starting at `first_element`
    #[must_use]
    pub fn write_buffers(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        kind: DescriptorKind,
        infos: &[vk::DescriptorBufferInfo],
    ) -> Self {
        debug_assert_eq!(kind.payload(), DescriptorPayload::Buffer);
        self.writes.push(PendingWrite {
            set,
            binding,
            first_element,
            kind,
            payload: WritePayload::Buffers(infos.to_vec()),
        });
        self
    }

    /// Write texel buffer view descriptors starting at `first_element`
    #[must_use]
    pub fn write_texel_buffer_views(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        kind: DescriptorKind,
        views: &[vk::BufferView],
    ) -> Self {
        debug_assert_eq!(kind.payload(), DescriptorPayload::TexelBufferView);
        self.writes.push(PendingWrite {
            set,
            binding,
            first_element,
            kind,
            payload: WritePayload::TexelViews(views.to_vec()),
        });
        self
    }

    /// Every descriptor element these writes touch, in write order
    pub fn bound_descriptors(&self) -> Vec<BoundDescriptor> {
        let mut bound = Vec::new();
        for write in &self.writes {
            let resources: Vec<DescriptorResource> = match &write.payload {
                WritePayload::Images(infos) => infos.iter().copied().map(Into::into).collect(),
                WritePayload::Buffers(infos) => infos.iter().copied().map(Into::into).collect(),
                WritePayload::TexelViews(views) => views.iter().copied().map(Into::into).collect(),
            };
            bound.extend(resources.into_iter().enumerate().map(|(i, resource)| BoundDescriptor {
                binding: write.binding,
                element: write.first_element + i as u32,
                kind: write.kind,
                resource,
            }));
        }
        bound
    }

    /// Execute all write operations
    pub fn update(&self, device: &Device) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.first_element)
                    .descriptor_type(write.kind.to_vk());
                match &write.payload {
                    WritePayload::Images(infos) => builder.image_info(infos).build(),
                    WritePayload::Buffers(infos) => builder.buffer_info(infos).build(),
                    WritePayload::TexelViews(views) => builder.texel_buffer_view(views).build(),
                }
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_abi_sizes_match_native_records() {
        assert_eq!(DescriptorKind::StorageImage.payload().abi_size(), 24);
        assert_eq!(DescriptorKind::UniformBuffer.payload().abi_size(), 24);
        assert_eq!(DescriptorKind::UniformTexelBuffer.payload().abi_size(), 8);
    }

    #[test]
    fn test_binding_conversion() {
        let desc = BindingDesc::new(2, DescriptorKind::UniformTexelBuffer, 3, ShaderStages::FRAGMENT);
        let binding = desc.to_vk();
        assert_eq!(binding.binding, 2);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_TEXEL_BUFFER);
        assert_eq!(binding.descriptor_count, 3);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert!(binding.p_immutable_samplers.is_null());
    }

    #[test]
    fn test_stage_conversion() {
        let stages = ShaderStages::VERTEX | ShaderStages::FRAGMENT;
        assert_eq!(stages.to_vk(), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderStages::COMPUTE.to_vk(), vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_pool_sizes_merge_types() {
        let bindings = [
            BindingDesc::new(0, DescriptorKind::UniformBuffer, 1, ShaderStages::VERTEX),
            BindingDesc::new(1, DescriptorKind::UniformBuffer, 1, ShaderStages::VERTEX),
            BindingDesc::new(2, DescriptorKind::StorageImage, 4, ShaderStages::COMPUTE),
            BindingDesc::new(3, DescriptorKind::StorageBuffer, 0, ShaderStages::COMPUTE),
        ];

        let sizes = pool_sizes(&bindings, 3);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 6);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[1].descriptor_count, 12);
    }

    #[test]
    fn test_bindings_parse_from_toml() {
        #[derive(Deserialize)]
        struct Layout {
            bindings: Vec<BindingDesc>,
        }

        let layout: Layout = toml::from_str(
            r#"
            [[bindings]]
            binding = 0
            kind = "storage_image"
            count = 6
            stages = "VERTEX | FRAGMENT"
            "#,
        )
        .unwrap();

        assert_eq!(
            layout.bindings,
            vec![BindingDesc::new(
                0,
                DescriptorKind::StorageImage,
                6,
                ShaderStages::VERTEX | ShaderStages::FRAGMENT
            )]
        );
    }

    #[test]
    fn test_writer_expands_elements() {
        let set = vk::DescriptorSet::from_raw(1);
        let buffer = vk::Buffer::from_raw(2);
        let views = [vk::BufferView::from_raw(3), vk::BufferView::from_raw(4)];

        let writer = DescriptorSetWriter::new()
            .write_buffers(
                set,
                1,
                0,
                DescriptorKind::UniformBuffer,
                &[
                    vk::DescriptorBufferInfo { buffer, offset: 0, range: 256 },
                    vk::DescriptorBufferInfo { buffer, offset: 256, range: 256 },
                ],
            )
            .write_texel_buffer_views(set, 2, 1, DescriptorKind::UniformTexelBuffer, &views);

        let bound = writer.bound_descriptors();
        assert_eq!(bound.len(), 4);
        assert_eq!(bound[1].element, 1);
        assert_eq!(bound[1].resource, DescriptorResource::Buffer { buffer, offset: 256, range: 256 });
        assert_eq!(bound[3].binding, 2);
        assert_eq!(bound[3].element, 2);
        assert_eq!(bound[3].resource, DescriptorResource::TexelBufferView(views[1]));
    }
}
