//! Descriptor update templates
//!
//! A template maps byte ranges of one packed host buffer onto descriptor
//! array elements. Entries are validated against the layout before the
//! driver sees them, and the packed buffer can be decoded back into the
//! descriptors it would write.

use ash::vk::{self, Handle};
use ash::Device;
use serde::{Deserialize, Serialize};
use std::mem;
use thiserror::Error;

use super::descriptor_set::{
    BindingDesc, BoundDescriptor, DescriptorKind, DescriptorPayload, DescriptorResource, DescriptorSetLayout,
};
use super::{VkResultExt, VulkanResult};

/// Template entry rejected before reaching the driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A template needs at least one entry
    #[error("template has no entries")]
    NoEntries,

    /// Entry targets a binding the layout does not have
    #[error("entry {entry}: binding {binding} is not part of the layout")]
    UnknownBinding {
        /// Entry index
        entry: usize,
        /// Requested binding
        binding: u32,
    },

    /// Entry type differs from the binding type
    #[error("entry {entry}: {actual:?} does not match binding {binding} of type {expected:?}")]
    TypeMismatch {
        /// Entry index
        entry: usize,
        /// Binding number
        binding: u32,
        /// Type declared by the layout
        expected: DescriptorKind,
        /// Type declared by the entry
        actual: DescriptorKind,
    },

    /// Entry writes no descriptors
    #[error("entry {entry}: descriptor count is zero")]
    EmptyEntry {
        /// Entry index
        entry: usize,
    },

    /// Entry runs past the end of its binding
    #[error("entry {entry}: elements {first}..{end} exceed the {count} descriptors of binding {binding}")]
    OutOfRange {
        /// Entry index
        entry: usize,
        /// Binding number
        binding: u32,
        /// First element written
        first: u32,
        /// One past the last element written
        end: u64,
        /// Descriptor count of the binding
        count: u32,
    },

    /// Two entries write the same array element
    #[error("entry {entry}: elements {first}..{end} of binding {binding} overlap entry {other}")]
    Overlap {
        /// Entry index
        entry: usize,
        /// Earlier entry it collides with
        other: usize,
        /// Binding number
        binding: u32,
        /// First element written
        first: u32,
        /// One past the last element written
        end: u64,
    },

    /// Resources supplied for an entry do not fit it
    #[error("entry {entry}: expected {expected} {payload:?} resources, got {actual}")]
    ResourceMismatch {
        /// Entry index
        entry: usize,
        /// Record type the entry reads
        payload: DescriptorPayload,
        /// Descriptor count of the entry
        expected: u32,
        /// Number of matching resources supplied
        actual: usize,
    },

    /// Packed data ends before an entry's last record
    #[error("entry {entry}: needs {needed} bytes of data, only {available} supplied")]
    DataTooShort {
        /// Entry index
        entry: usize,
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },
}

/// One `VkDescriptorUpdateTemplateEntry`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntryDesc {
    /// Destination binding
    pub binding: u32,
    /// First array element written
    pub first_element: u32,
    /// Number of consecutive elements
    pub count: u32,
    /// Descriptor type
    pub kind: DescriptorKind,
    /// Byte offset of the first record in the packed data
    pub offset: usize,
    /// Byte distance between consecutive records
    pub stride: usize,
}

impl TemplateEntryDesc {
    /// Describe an entry
    pub const fn new(
        binding: u32,
        first_element: u32,
        count: u32,
        kind: DescriptorKind,
        offset: usize,
        stride: usize,
    ) -> Self {
        Self {
            binding,
            first_element,
            count,
            kind,
            offset,
            stride,
        }
    }

    /// Native template entry
    pub fn to_vk(&self) -> vk::DescriptorUpdateTemplateEntry {
        vk::DescriptorUpdateTemplateEntry::builder()
            .dst_binding(self.binding)
            .dst_array_element(self.first_element)
            .descriptor_count(self.count)
            .descriptor_type(self.kind.to_vk())
            .offset(self.offset)
            .stride(self.stride)
            .build()
    }

    /// One past the last array element written
    pub fn end_element(&self) -> u64 {
        u64::from(self.first_element) + u64::from(self.count)
    }

    /// Byte offset of the record for the `index`-th element of this entry
    pub const fn record_offset(&self, index: u32) -> usize {
        self.offset + index as usize * self.stride
    }

    /// Bytes of packed data this entry reads, measured from the start of the buffer
    pub const fn data_end(&self) -> usize {
        if self.count == 0 {
            return self.offset;
        }
        self.record_offset(self.count - 1) + self.kind.payload().abi_size()
    }
}

/// Check entries against the layout they will update
///
/// Rejects unknown bindings, type mismatches, empty entries, element ranges
/// running past the binding's count and element ranges overlapping an
/// earlier entry of the same binding.
pub fn validate_entries(bindings: &[BindingDesc], entries: &[TemplateEntryDesc]) -> Result<(), TemplateError> {
    if entries.is_empty() {
        return Err(TemplateError::NoEntries);
    }

    for (index, entry) in entries.iter().enumerate() {
        let binding = bindings
            .iter()
            .find(|b| b.binding == entry.binding)
            .ok_or(TemplateError::UnknownBinding {
                entry: index,
                binding: entry.binding,
            })?;

        if binding.kind != entry.kind {
            return Err(TemplateError::TypeMismatch {
                entry: index,
                binding: entry.binding,
                expected: binding.kind,
                actual: entry.kind,
            });
        }

        if entry.count == 0 {
            return Err(TemplateError::EmptyEntry { entry: index });
        }

        if entry.end_element() > u64::from(binding.count) {
            return Err(TemplateError::OutOfRange {
                entry: index,
                binding: entry.binding,
                first: entry.first_element,
                end: entry.end_element(),
                count: binding.count,
            });
        }

        let overlapping = entries[..index].iter().position(|other| {
            other.binding == entry.binding
                && u64::from(other.first_element) < entry.end_element()
                && u64::from(entry.first_element) < other.end_element()
        });
        if let Some(other) = overlapping {
            return Err(TemplateError::Overlap {
                entry: index,
                other,
                binding: entry.binding,
                first: entry.first_element,
                end: entry.end_element(),
            });
        }
    }

    Ok(())
}

/// Minimum packed data length for `entries`
pub fn required_data_size(entries: &[TemplateEntryDesc]) -> usize {
    entries.iter().map(TemplateEntryDesc::data_end).max().unwrap_or(0)
}

const IMAGE_INFO_SIZE: usize = mem::size_of::<vk::DescriptorImageInfo>();
const BUFFER_INFO_SIZE: usize = mem::size_of::<vk::DescriptorBufferInfo>();
const BUFFER_VIEW_SIZE: usize = mem::size_of::<vk::BufferView>();

/// Native bytes of one descriptor record
///
/// Fields are written one by one so padding is zeroed rather than copied.
fn encode_resource(resource: &DescriptorResource) -> Vec<u8> {
    match *resource {
        DescriptorResource::Image { sampler, view, layout } => {
            let mut bytes = vec![0u8; IMAGE_INFO_SIZE];
            bytes[0..8].copy_from_slice(&sampler.as_raw().to_ne_bytes());
            bytes[8..16].copy_from_slice(&view.as_raw().to_ne_bytes());
            bytes[16..20].copy_from_slice(&layout.as_raw().to_ne_bytes());
            bytes
        }
        DescriptorResource::Buffer { buffer, offset, range } => {
            let mut bytes = vec![0u8; BUFFER_INFO_SIZE];
            bytes[0..8].copy_from_slice(&buffer.as_raw().to_ne_bytes());
            bytes[8..16].copy_from_slice(&offset.to_ne_bytes());
            bytes[16..24].copy_from_slice(&range.to_ne_bytes());
            bytes
        }
        DescriptorResource::TexelBufferView(view) => {
            let mut bytes = vec![0u8; BUFFER_VIEW_SIZE];
            bytes[0..8].copy_from_slice(&view.as_raw().to_ne_bytes());
            bytes
        }
    }
}

const fn payload_of(resource: &DescriptorResource) -> DescriptorPayload {
    match resource {
        DescriptorResource::Image { .. } => DescriptorPayload::Image,
        DescriptorResource::Buffer { .. } => DescriptorPayload::Buffer,
        DescriptorResource::TexelBufferView(_) => DescriptorPayload::TexelBufferView,
    }
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)?.try_into().ok().map(u64::from_ne_bytes)
}

fn read_i32(data: &[u8], at: usize) -> Option<i32> {
    data.get(at..at + 4)?.try_into().ok().map(i32::from_ne_bytes)
}

fn decode_resource(payload: DescriptorPayload, data: &[u8], at: usize) -> Option<DescriptorResource> {
    match payload {
        DescriptorPayload::Image => Some(DescriptorResource::Image {
            sampler: vk::Sampler::from_raw(read_u64(data, at)?),
            view: vk::ImageView::from_raw(read_u64(data, at + 8)?),
            layout: vk::ImageLayout::from_raw(read_i32(data, at + 16)?),
        }),
        DescriptorPayload::Buffer => Some(DescriptorResource::Buffer {
            buffer: vk::Buffer::from_raw(read_u64(data, at)?),
            offset: read_u64(data, at + 8)?,
            range: read_u64(data, at + 16)?,
        }),
        DescriptorPayload::TexelBufferView => {
            Some(DescriptorResource::TexelBufferView(vk::BufferView::from_raw(read_u64(data, at)?)))
        }
    }
}

/// Packed descriptor data laid out exactly as the native structs
///
/// Backed by 8-byte words so the pointer handed to the driver is suitably
/// aligned for every record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorData {
    words: Vec<u64>,
    len: usize,
}

impl DescriptorData {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroed buffer large enough for `entries`
    pub fn for_entries(entries: &[TemplateEntryDesc]) -> Self {
        let mut data = Self::new();
        data.resize(required_data_size(entries));
        data
    }

    fn resize(&mut self, len: usize) {
        if len > self.len {
            self.words.resize(len.div_ceil(8), 0);
            self.len = len;
        }
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        self.resize(offset + bytes.len());
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        dst[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Append one record after the current end, returning its offset
    pub fn push(&mut self, resource: &DescriptorResource) -> usize {
        let offset = self.len;
        self.write_at(offset, &encode_resource(resource));
        offset
    }

    /// Write the records for `entry` at its offset and stride
    pub fn write_entry(
        &mut self,
        entry_index: usize,
        entry: &TemplateEntryDesc,
        resources: &[DescriptorResource],
    ) -> Result<(), TemplateError> {
        let payload = entry.kind.payload();
        let matching = resources.iter().filter(|r| payload_of(r) == payload).count();
        if resources.len() != entry.count as usize || matching != resources.len() {
            return Err(TemplateError::ResourceMismatch {
                entry: entry_index,
                payload,
                expected: entry.count,
                actual: matching,
            });
        }

        for (i, resource) in resources.iter().enumerate() {
            self.write_at(entry.record_offset(i as u32), &encode_resource(resource));
        }
        Ok(())
    }

    /// Packed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    /// Length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn as_ptr(&self) -> *const std::ffi::c_void {
        self.words.as_ptr().cast()
    }
}

/// Descriptors a template update would write, read back from packed data
pub fn decode_descriptor_data(
    entries: &[TemplateEntryDesc],
    data: &[u8],
) -> Result<Vec<BoundDescriptor>, TemplateError> {
    let mut bound = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let needed = entry.data_end();
        if needed > data.len() {
            return Err(TemplateError::DataTooShort {
                entry: index,
                needed,
                available: data.len(),
            });
        }

        for i in 0..entry.count {
            let resource = decode_resource(entry.kind.payload(), data, entry.record_offset(i)).ok_or(
                TemplateError::DataTooShort {
                    entry: index,
                    needed,
                    available: data.len(),
                },
            )?;
            bound.push(BoundDescriptor {
                binding: entry.binding,
                element: entry.first_element + i,
                kind: entry.kind,
                resource,
            });
        }
    }
    Ok(bound)
}

/// Descriptor update template with RAII cleanup
pub struct DescriptorUpdateTemplate {
    device: Device,
    template: vk::DescriptorUpdateTemplate,
    entries: Vec<TemplateEntryDesc>,
}

impl DescriptorUpdateTemplate {
    /// Create a descriptor-set template for `layout`
    ///
    /// Entries are validated first; the template uses the graphics bind
    /// point, no pipeline layout and set 0.
    pub fn new(device: &Device, layout: &DescriptorSetLayout, entries: &[TemplateEntryDesc]) -> VulkanResult<Self> {
        validate_entries(layout.bindings(), entries)?;

        let vk_entries: Vec<vk::DescriptorUpdateTemplateEntry> =
            entries.iter().map(TemplateEntryDesc::to_vk).collect();
        let create_info = vk::DescriptorUpdateTemplateCreateInfo::builder()
            .descriptor_update_entries(&vk_entries)
            .template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET)
            .descriptor_set_layout(layout.handle())
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .pipeline_layout(vk::PipelineLayout::null())
            .set(0);

        let template = unsafe { device.create_descriptor_update_template(&create_info, None) }
            .check("vkCreateDescriptorUpdateTemplate")?;

        Ok(Self {
            device: device.clone(),
            template,
            entries: entries.to_vec(),
        })
    }

    /// Write `set` from `data`
    pub fn update(&self, set: vk::DescriptorSet, data: &DescriptorData) -> VulkanResult<()> {
        let needed = required_data_size(&self.entries);
        if data.len() < needed {
            let entry = self
                .entries
                .iter()
                .position(|e| e.data_end() > data.len())
                .unwrap_or_default();
            return Err(TemplateError::DataTooShort {
                entry,
                needed,
                available: data.len(),
            }
            .into());
        }

        unsafe {
            self.device
                .update_descriptor_set_with_template(set, self.template, data.as_ptr());
        }
        Ok(())
    }

    /// Descriptors an update from `data` would write
    pub fn decode(&self, data: &DescriptorData) -> Result<Vec<BoundDescriptor>, TemplateError> {
        decode_descriptor_data(&self.entries, data.as_bytes())
    }

    /// Entries the template was created with
    pub fn entries(&self) -> &[TemplateEntryDesc] {
        &self.entries
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::DescriptorUpdateTemplate {
        self.template
    }
}

impl Drop for DescriptorUpdateTemplate {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_update_template(self.template, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::descriptor_set::ShaderStages;

    fn storage_image_binding() -> BindingDesc {
        BindingDesc::new(
            0,
            DescriptorKind::StorageImage,
            6,
            ShaderStages::VERTEX | ShaderStages::FRAGMENT,
        )
    }

    fn uniform_binding() -> BindingDesc {
        BindingDesc::new(2, DescriptorKind::UniformBuffer, 3, ShaderStages::VERTEX)
    }

    #[test]
    fn test_native_record_sizes() {
        assert_eq!(IMAGE_INFO_SIZE, 24);
        assert_eq!(BUFFER_INFO_SIZE, 24);
        assert_eq!(BUFFER_VIEW_SIZE, 8);
    }

    #[test]
    fn test_single_entry_is_valid() {
        let entries = [TemplateEntryDesc::new(0, 3, 3, DescriptorKind::StorageImage, 0, 24)];
        assert_eq!(validate_entries(&[storage_image_binding()], &entries), Ok(()));
    }

    #[test]
    fn test_disjoint_entries_are_valid() {
        let entries = [
            TemplateEntryDesc::new(0, 0, 3, DescriptorKind::StorageImage, 0, 24),
            TemplateEntryDesc::new(0, 5, 1, DescriptorKind::StorageImage, 72, 24),
            TemplateEntryDesc::new(2, 1, 2, DescriptorKind::UniformBuffer, 256, 24),
            TemplateEntryDesc::new(2, 0, 1, DescriptorKind::UniformBuffer, 512, 24),
        ];
        let bindings = [storage_image_binding(), uniform_binding()];
        assert_eq!(validate_entries(&bindings, &entries), Ok(()));
        assert_eq!(required_data_size(&entries), 536);
    }

    #[test]
    fn test_overlapping_entries_are_rejected() {
        let entries = [
            TemplateEntryDesc::new(0, 0, 3, DescriptorKind::StorageImage, 0, 24),
            TemplateEntryDesc::new(0, 2, 2, DescriptorKind::StorageImage, 72, 24),
        ];
        let err = validate_entries(&[storage_image_binding()], &entries).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Overlap {
                entry: 1,
                other: 0,
                binding: 0,
                first: 2,
                end: 4
            }
        );
    }

    #[test]
    fn test_out_of_range_entry_is_rejected() {
        let entries = [TemplateEntryDesc::new(0, 4, 3, DescriptorKind::StorageImage, 0, 24)];
        let err = validate_entries(&[storage_image_binding()], &entries).unwrap_err();
        assert!(matches!(err, TemplateError::OutOfRange { entry: 0, end: 7, count: 6, .. }));
    }

    #[test]
    fn test_huge_first_element_does_not_wrap() {
        let entries = [TemplateEntryDesc::new(0, u32::MAX, 2, DescriptorKind::StorageImage, 0, 24)];
        let err = validate_entries(&[storage_image_binding()], &entries).unwrap_err();
        assert!(matches!(err, TemplateError::OutOfRange { .. }));
    }

    #[test]
    fn test_layout_mismatches_are_rejected() {
        let bindings = [storage_image_binding()];

        let unknown = [TemplateEntryDesc::new(1, 0, 1, DescriptorKind::StorageImage, 0, 24)];
        assert!(matches!(
            validate_entries(&bindings, &unknown),
            Err(TemplateError::UnknownBinding { binding: 1, .. })
        ));

        let wrong_type = [TemplateEntryDesc::new(0, 0, 1, DescriptorKind::UniformBuffer, 0, 24)];
        assert!(matches!(
            validate_entries(&bindings, &wrong_type),
            Err(TemplateError::TypeMismatch { .. })
        ));

        let empty = [TemplateEntryDesc::new(0, 0, 0, DescriptorKind::StorageImage, 0, 24)];
        assert_eq!(validate_entries(&bindings, &empty), Err(TemplateError::EmptyEntry { entry: 0 }));

        assert_eq!(validate_entries(&bindings, &[]), Err(TemplateError::NoEntries));
    }

    #[test]
    fn test_entry_conversion() {
        let entry = TemplateEntryDesc::new(2, 1, 2, DescriptorKind::UniformBuffer, 256, 24).to_vk();
        assert_eq!(entry.dst_binding, 2);
        assert_eq!(entry.dst_array_element, 1);
        assert_eq!(entry.descriptor_count, 2);
        assert_eq!(entry.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(entry.offset, 256);
        assert_eq!(entry.stride, 24);
    }

    #[test]
    fn test_packed_records_use_native_layout() {
        let mut data = DescriptorData::new();
        let image = DescriptorResource::Image {
            sampler: vk::Sampler::null(),
            view: vk::ImageView::from_raw(0x1122),
            layout: vk::ImageLayout::GENERAL,
        };
        let buffer = DescriptorResource::Buffer {
            buffer: vk::Buffer::from_raw(0x33),
            offset: 256,
            range: 256,
        };
        let view = DescriptorResource::TexelBufferView(vk::BufferView::from_raw(0x44));

        assert_eq!(data.push(&image), 0);
        assert_eq!(data.push(&buffer), 24);
        assert_eq!(data.push(&view), 48);
        assert_eq!(data.len(), 56);

        let bytes = data.as_bytes();
        assert_eq!(&bytes[0..8], &0u64.to_ne_bytes());
        assert_eq!(&bytes[8..16], &0x1122u64.to_ne_bytes());
        assert_eq!(&bytes[16..20], &1i32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &[0, 0, 0, 0]);
        assert_eq!(&bytes[32..40], &256u64.to_ne_bytes());
        assert_eq!(&bytes[48..56], &0x44u64.to_ne_bytes());
    }

    #[test]
    fn test_decode_follows_offsets_and_strides() {
        let entries = [
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
        ];
        let buffer = vk::Buffer::from_raw(7);
        let views: Vec<DescriptorResource> = (10..13)
            .map(|raw| DescriptorResource::TexelBufferView(vk::BufferView::from_raw(raw)))
            .collect();
        let image = DescriptorResource::Image {
            sampler: vk::Sampler::null(),
            view: vk::ImageView::from_raw(9),
            layout: vk::ImageLayout::GENERAL,
        };

        let mut data = DescriptorData::for_entries(&entries);
        assert_eq!(data.len(), 96);
        data.write_entry(0, &entries[0], &[image]).unwrap();
        data.write_entry(
            1,
            &entries[1],
            &[
                DescriptorResource::Buffer { buffer, offset: 0, range: 256 },
                DescriptorResource::Buffer { buffer, offset: 256, range: 256 },
            ],
        )
        .unwrap();
        data.write_entry(2, &entries[2], &views).unwrap();

        let decoded = decode_descriptor_data(&entries, data.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 6);
        assert_eq!(decoded[0].resource, image);
        assert_eq!(decoded[2].element, 1);
        assert_eq!(decoded[2].resource, DescriptorResource::Buffer { buffer, offset: 256, range: 256 });
        assert_eq!(decoded[5].binding, 2);
        assert_eq!(decoded[5].element, 2);
        assert_eq!(decoded[5].resource, views[2]);
    }

    #[test]
    fn test_write_entry_checks_resources() {
        let entry = TemplateEntryDesc::new(1, 0, 2, DescriptorKind::UniformBuffer, 0, 24);
        let mut data = DescriptorData::for_entries(&[entry]);

        let wrong_kind = [DescriptorResource::TexelBufferView(vk::BufferView::null()); 2];
        assert!(matches!(
            data.write_entry(0, &entry, &wrong_kind),
            Err(TemplateError::ResourceMismatch { actual: 0, .. })
        ));

        let too_few = [DescriptorResource::Buffer {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: 16,
        }];
        assert!(data.write_entry(0, &entry, &too_few).is_err());
    }

    #[test]
    fn test_decode_rejects_short_data() {
        let entries = [TemplateEntryDesc::new(0, 0, 2, DescriptorKind::StorageImage, 0, 24)];
        let err = decode_descriptor_data(&entries, &[0u8; 40]).unwrap_err();
        assert_eq!(
            err,
            TemplateError::DataTooShort {
                entry: 0,
                needed: 48,
                available: 40
            }
        );
    }
}
