//! Buffer management for vertex data, uniforms and texel buffers
//!
//! Memory management following RAII patterns: the buffer handle is destroyed
//! before the allocation it is bound to.

use ash::{vk, Device};
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem;

use super::memory::DeviceMemory;
use super::{PhysicalDeviceInfo, VkResultExt, VulkanResult};

/// Host visible and coherent, for buffers written from the CPU
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Round `value` up to a multiple of `alignment` (zero means no alignment)
pub const fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Buffer wrapper with bound memory
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer and bind a fresh allocation to it
    pub fn new(
        device: &Device,
        physical_device: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.check("vkCreateBuffer")?;

        let bound = (|| -> VulkanResult<DeviceMemory> {
            let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
            let memory = DeviceMemory::for_requirements(
                device,
                &physical_device.memory_properties,
                requirements,
                properties,
            )?;
            unsafe { device.bind_buffer_memory(buffer, memory.handle(), 0) }.check("vkBindBufferMemory")?;
            Ok(memory)
        })();

        match bound {
            Ok(memory) => Ok(Self {
                device: device.clone(),
                buffer,
                memory,
                size,
            }),
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    /// Host visible buffer initialised with `data`
    pub fn with_data<T: Pod>(
        device: &Device,
        physical_device: &PhysicalDeviceInfo,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> VulkanResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(device, physical_device, bytes.len() as vk::DeviceSize, usage, HOST_MEMORY)?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Copy raw bytes into the buffer at `offset`
    pub fn write_bytes(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        self.memory.write_bytes(offset, bytes)
    }

    /// Copy one value into the buffer at `offset`
    pub fn write<T: Pod>(&self, offset: vk::DeviceSize, value: &T) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }

    /// Descriptor info covering `offset..offset + range`
    pub const fn descriptor_info(&self, offset: vk::DeviceSize, range: vk::DeviceSize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range,
        }
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
        // `memory` is freed when the field drops
    }
}

/// Typed view over a range of a texel buffer
pub struct BufferView {
    device: Device,
    view: vk::BufferView,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
}

impl BufferView {
    /// Create a view of `buffer` interpreting `offset..offset + range` as `format`
    pub fn new(
        device: &Device,
        buffer: &Buffer,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        let create_info = vk::BufferViewCreateInfo::builder()
            .buffer(buffer.handle())
            .format(format)
            .offset(offset)
            .range(range);

        let view = unsafe { device.create_buffer_view(&create_info, None) }.check("vkCreateBufferView")?;

        Ok(Self {
            device: device.clone(),
            view,
            offset,
            range,
        })
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::BufferView {
        self.view
    }

    /// Byte offset into the buffer
    pub const fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Byte range of the view
    pub const fn range(&self) -> vk::DeviceSize {
        self.range
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer_view(self.view, None);
        }
    }
}

/// One uniform buffer holding a `T` per frame slot
///
/// Slots are spaced by `minUniformBufferOffsetAlignment` so each slot can be
/// bound as its own descriptor range.
pub struct FrameUniform<T> {
    buffer: Buffer,
    stride: vk::DeviceSize,
    slots: usize,
    _phantom: PhantomData<T>,
}

impl<T: Pod> FrameUniform<T> {
    /// Create a uniform ring with `slots` entries
    pub fn new(device: &Device, physical_device: &PhysicalDeviceInfo, slots: usize) -> VulkanResult<Self> {
        let alignment = physical_device.properties.limits.min_uniform_buffer_offset_alignment;
        let stride = Self::slot_stride(alignment);
        let size = stride * slots.max(1) as vk::DeviceSize;

        let buffer = Buffer::new(device, physical_device, size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_MEMORY)?;

        Ok(Self {
            buffer,
            stride,
            slots,
            _phantom: PhantomData,
        })
    }

    /// Distance between slots for a given alignment
    pub const fn slot_stride(alignment: vk::DeviceSize) -> vk::DeviceSize {
        align_up(mem::size_of::<T>() as vk::DeviceSize, alignment)
    }

    /// Write the value for `slot`
    pub fn write(&self, slot: usize, value: &T) -> VulkanResult<()> {
        debug_assert!(slot < self.slots, "uniform slot {slot} out of {}", self.slots);
        self.buffer.write(self.stride * slot as vk::DeviceSize, value)
    }

    /// Descriptor info for `slot`
    pub const fn descriptor_info(&self, slot: usize) -> vk::DescriptorBufferInfo {
        self.buffer
            .descriptor_info(self.stride * slot as vk::DeviceSize, mem::size_of::<T>() as vk::DeviceSize)
    }

    /// Number of slots
    pub const fn slots(&self) -> usize {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(64, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 0), 100);
        assert_eq!(align_up(100, 1), 100);
    }

    #[test]
    fn test_frame_uniform_stride_follows_alignment() {
        type Matrix = [[f32; 4]; 4];
        assert_eq!(FrameUniform::<Matrix>::slot_stride(256), 256);
        assert_eq!(FrameUniform::<Matrix>::slot_stride(16), 64);
        assert_eq!(FrameUniform::<[f32; 20]>::slot_stride(64), 128);
    }

    #[test]
    fn test_host_memory_flags() {
        assert!(HOST_MEMORY.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_MEMORY.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(!HOST_MEMORY.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}
