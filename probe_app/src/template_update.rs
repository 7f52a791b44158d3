//! Descriptor update template: update probe
//!
//! Writes one storage image, two uniform buffer ranges and three uniform
//! texel buffer views into a descriptor set through a single
//! `vkUpdateDescriptorSetWithTemplate` call. Before the call the packed data
//! is decoded through the template entries and compared with the explicit
//! writes it stands in for.

use ash::vk;
use vk_sandbox::entry::EntryData;
use vk_sandbox::vulkan::descriptor_set::DescriptorPayload;
use vk_sandbox::vulkan::image::color_subresource_range;
use vk_sandbox::vulkan::{
    BindingDesc, BoundDescriptor, Buffer, BufferView, DescriptorData, DescriptorKind, DescriptorPool,
    DescriptorResource, DescriptorSetLayout, DescriptorSetWriter, DescriptorUpdateTemplate, HeadlessContext, Image, ImageView,
    ShaderStages, TemplateEntryDesc, TemplateError, VulkanError, VulkanResult,
};

/// Size of the uniform buffer split into two descriptors
pub const UNIFORM_BUFFER_SIZE: vk::DeviceSize = 512;
/// Size of the texel buffer split into three views
pub const TEXEL_BUFFER_SIZE: vk::DeviceSize = 1024;
/// Range of each texel view and each uniform buffer descriptor
pub const DESCRIPTOR_RANGE: vk::DeviceSize = 256;
/// Texel and storage image format
pub const TEXEL_FORMAT: vk::Format = vk::Format::R32G32B32A32_UINT;
/// Width and height of the storage image
pub const STORAGE_IMAGE_SIZE: u32 = 32;

const IMAGE_INFO_SIZE: usize = DescriptorPayload::Image.abi_size();
const BUFFER_INFO_SIZE: usize = DescriptorPayload::Buffer.abi_size();
const BUFFER_VIEW_SIZE: usize = DescriptorPayload::TexelBufferView.abi_size();

/// Storage image, two uniform buffers, three uniform texel buffers
pub fn layout_bindings() -> [BindingDesc; 3] {
    [
        BindingDesc::new(0, DescriptorKind::StorageImage, 1, ShaderStages::COMPUTE),
        BindingDesc::new(1, DescriptorKind::UniformBuffer, 2, ShaderStages::VERTEX),
        BindingDesc::new(2, DescriptorKind::UniformTexelBuffer, 3, ShaderStages::FRAGMENT),
    ]
}

/// Entries reading the records back to back: image info, buffer infos, views
pub fn template_entries() -> [TemplateEntryDesc; 3] {
    [
        TemplateEntryDesc::new(0, 0, 1, DescriptorKind::StorageImage, 0, IMAGE_INFO_SIZE),
        TemplateEntryDesc::new(1, 0, 2, DescriptorKind::UniformBuffer, IMAGE_INFO_SIZE, BUFFER_INFO_SIZE),
        TemplateEntryDesc::new(
            2,
            0,
            3,
            DescriptorKind::UniformTexelBuffer,
            IMAGE_INFO_SIZE + 2 * BUFFER_INFO_SIZE,
            BUFFER_VIEW_SIZE,
        ),
    ]
}

/// Resources written into the set
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSources {
    /// Storage image at binding 0
    pub image: vk::DescriptorImageInfo,
    /// Uniform buffer halves at binding 1
    pub buffers: [vk::DescriptorBufferInfo; 2],
    /// Texel views at binding 2
    pub texel_views: [vk::BufferView; 3],
}

impl DescriptorSources {
    /// Storage image in `GENERAL`, the uniform buffer split in two halves
    pub fn new(image_view: vk::ImageView, uniform_buffer: vk::Buffer, texel_views: [vk::BufferView; 3]) -> Self {
        let half = |index: vk::DeviceSize| vk::DescriptorBufferInfo {
            buffer: uniform_buffer,
            offset: index * DESCRIPTOR_RANGE,
            range: DESCRIPTOR_RANGE,
        };

        Self {
            image: vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view,
                image_layout: vk::ImageLayout::GENERAL,
            },
            buffers: [half(0), half(1)],
            texel_views,
        }
    }

    /// Pack the sources at the offsets and strides of `entries`
    pub fn pack(&self, entries: &[TemplateEntryDesc; 3]) -> Result<DescriptorData, TemplateError> {
        let mut data = DescriptorData::for_entries(entries);
        data.write_entry(0, &entries[0], &[DescriptorResource::from(self.image)])?;
        data.write_entry(1, &entries[1], &self.buffers.map(DescriptorResource::from))?;
        data.write_entry(2, &entries[2], &self.texel_views.map(DescriptorResource::from))?;
        Ok(data)
    }

    /// The same writes expressed as explicit descriptor writes
    pub fn explicit_writes(&self, set: vk::DescriptorSet) -> DescriptorSetWriter {
        DescriptorSetWriter::new()
            .write_images(set, 0, 0, DescriptorKind::StorageImage, &[self.image])
            .write_buffers(set, 1, 0, DescriptorKind::UniformBuffer, &self.buffers)
            .write_texel_buffer_views(set, 2, 0, DescriptorKind::UniformTexelBuffer, &self.texel_views)
    }
}

/// Fail unless both lists describe the same descriptor writes
pub fn verify_equivalent(templated: &[BoundDescriptor], explicit: &[BoundDescriptor]) -> VulkanResult<()> {
    let sorted = |list: &[BoundDescriptor]| {
        let mut list = list.to_vec();
        list.sort_by_key(|d| (d.binding, d.element));
        list
    };

    let templated = sorted(templated);
    let explicit = sorted(explicit);
    if templated != explicit {
        return Err(VulkanError::Conformance(format!(
            "template writes {templated:?} differ from explicit writes {explicit:?}"
        )));
    }
    Ok(())
}

fn storage_image_info() -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(TEXEL_FORMAT)
        .extent(vk::Extent3D {
            width: STORAGE_IMAGE_SIZE,
            height: STORAGE_IMAGE_SIZE,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::STORAGE)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

/// Program body
pub fn run(entry: &EntryData) -> VulkanResult<()> {
    let context = HeadlessContext::new(&entry.config, vk::API_VERSION_1_1)?;
    let device = context.raw_device();
    let physical_device = &context.physical_device;

    let layout = DescriptorSetLayout::new(device, &layout_bindings())?;
    let pool = DescriptorPool::for_layout(device, &layout, 1)?;
    let set = pool
        .allocate(&layout, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::InitializationFailed("no descriptor set allocated".to_string()))?;

    let uniform_buffer = Buffer::new(
        device,
        physical_device,
        UNIFORM_BUFFER_SIZE,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let texel_buffer = Buffer::new(
        device,
        physical_device,
        TEXEL_BUFFER_SIZE,
        vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let _whole_view = BufferView::new(device, &texel_buffer, TEXEL_FORMAT, 0, DESCRIPTOR_RANGE)?;
    let texel_views = (0..3)
        .map(|i| BufferView::new(device, &texel_buffer, TEXEL_FORMAT, i * DESCRIPTOR_RANGE, DESCRIPTOR_RANGE))
        .collect::<VulkanResult<Vec<_>>>()?;

    let image = Image::new(device, physical_device, &storage_image_info())?;
    let image_view = ImageView::new(device, &image, vk::ImageViewType::TYPE_2D, color_subresource_range(0, 1))?;

    let sources = DescriptorSources::new(
        image_view.handle(),
        uniform_buffer.handle(),
        [texel_views[0].handle(), texel_views[1].handle(), texel_views[2].handle()],
    );

    let entries = template_entries();
    let data = sources.pack(&entries)?;
    log::info!("Packed {} bytes of descriptor data", data.len());

    let template = DescriptorUpdateTemplate::new(device, &layout, &entries)?;

    let templated = template.decode(&data)?;
    verify_equivalent(&templated, &sources.explicit_writes(set).bound_descriptors())?;

    template.update(set, &data)?;
    log::info!("Updated {} descriptors through the template", templated.len());

    drop(template);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use vk_sandbox::vulkan::update_template::{required_data_size, validate_entries};

    fn sources() -> DescriptorSources {
        DescriptorSources::new(
            vk::ImageView::from_raw(0x10),
            vk::Buffer::from_raw(0x20),
            [
                vk::BufferView::from_raw(0x30),
                vk::BufferView::from_raw(0x31),
                vk::BufferView::from_raw(0x32),
            ],
        )
    }

    #[test]
    fn test_entries_are_valid_for_layout() {
        assert!(validate_entries(&layout_bindings(), &template_entries()).is_ok());
    }

    #[test]
    fn test_entries_pack_records_back_to_back() {
        let entries = template_entries();
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 24);
        assert_eq!(entries[2].offset, 24 + 2 * 24);
        assert_eq!(entries[2].stride, 8);
        assert_eq!(required_data_size(&entries), 24 + 2 * 24 + 3 * 8);
    }

    #[test]
    fn test_packed_data_decodes_to_explicit_writes() {
        let sources = sources();
        let entries = template_entries();
        let data = sources.pack(&entries).unwrap();
        assert_eq!(data.len(), 96);

        let set = vk::DescriptorSet::from_raw(0x99);
        let templated = vk_sandbox::vulkan::update_template::decode_descriptor_data(&entries, data.as_bytes()).unwrap();
        let explicit = sources.explicit_writes(set).bound_descriptors();

        assert_eq!(templated.len(), 6);
        verify_equivalent(&templated, &explicit).unwrap();
    }

    #[test]
    fn test_buffer_descriptors_split_uniform_buffer() {
        let sources = sources();
        assert_eq!((sources.buffers[0].offset, sources.buffers[0].range), (0, 256));
        assert_eq!((sources.buffers[1].offset, sources.buffers[1].range), (256, 256));
        assert_eq!(sources.image.sampler, vk::Sampler::null());
        assert_eq!(sources.image.image_layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_texel_views_land_on_consecutive_elements() {
        let entries = template_entries();
        let data = sources().pack(&entries).unwrap();
        let decoded = vk_sandbox::vulkan::update_template::decode_descriptor_data(&entries, data.as_bytes()).unwrap();

        let views: Vec<_> = decoded.iter().filter(|d| d.binding == 2).map(|d| (d.element, d.resource)).collect();
        assert_eq!(
            views,
            vec![
                (0, DescriptorResource::TexelBufferView(vk::BufferView::from_raw(0x30))),
                (1, DescriptorResource::TexelBufferView(vk::BufferView::from_raw(0x31))),
                (2, DescriptorResource::TexelBufferView(vk::BufferView::from_raw(0x32))),
            ]
        );
    }

    #[test]
    fn test_mismatched_writes_are_reported() {
        let entries = template_entries();
        let data = sources().pack(&entries).unwrap();
        let templated = vk_sandbox::vulkan::update_template::decode_descriptor_data(&entries, data.as_bytes()).unwrap();

        let mut other = sources();
        other.texel_views.swap(0, 1);
        let explicit = other.explicit_writes(vk::DescriptorSet::null()).bound_descriptors();

        assert!(matches!(
            verify_equivalent(&templated, &explicit),
            Err(VulkanError::Conformance(_))
        ));
    }
}
