//! Device memory allocation
//!
//! Raw `vkAllocateMemory` allocations with RAII cleanup, memory type
//! selection and lazily-allocated commitment queries.

use ash::{vk, Device};

use super::{VkResultExt, VulkanError, VulkanResult};

/// Find the first memory type allowed by `type_bits` whose flags contain `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
}

/// Same as [`find_memory_type`] but an error when nothing matches
pub fn require_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    find_memory_type(memory_properties, type_bits, required)
        .ok_or(VulkanError::NoSuitableMemoryType { type_bits, flags: required })
}

/// Heap backing a memory type
pub fn heap_for_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_index: u32,
) -> Option<(u32, vk::MemoryHeap)> {
    if type_index >= memory_properties.memory_type_count {
        return None;
    }
    let heap_index = memory_properties.memory_types[type_index as usize].heap_index;
    if heap_index >= memory_properties.memory_heap_count {
        return None;
    }
    Some((heap_index, memory_properties.memory_heaps[heap_index as usize]))
}

/// Owned `VkDeviceMemory` allocation
pub struct DeviceMemory {
    device: Device,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    type_index: u32,
}

impl DeviceMemory {
    /// Allocate `size` bytes from memory type `type_index`
    pub fn allocate(device: &Device, size: vk::DeviceSize, type_index: u32) -> VulkanResult<Self> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(type_index);

        let memory = unsafe { device.allocate_memory(&alloc_info, None) }.check("vkAllocateMemory")?;

        Ok(Self {
            device: device.clone(),
            memory,
            size,
            type_index,
        })
    }

    /// Allocate memory satisfying `requirements` with the given properties
    pub fn for_requirements(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let type_index = require_memory_type(memory_properties, requirements.memory_type_bits, flags)?;
        Self::allocate(device, requirements.size, type_index)
    }

    /// Bytes currently backed by physical memory
    ///
    /// Only meaningful for lazily allocated memory types.
    pub fn commitment(&self) -> vk::DeviceSize {
        unsafe { self.device.get_device_memory_commitment(self.memory) }
    }

    /// Copy `bytes` into the allocation at `offset`
    ///
    /// The memory type must be host visible and host coherent.
    pub fn write_bytes(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let len = bytes.len() as vk::DeviceSize;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(VulkanError::InitializationFailed(format!(
                "write of {len} bytes at offset {offset} exceeds allocation of {} bytes",
                self.size
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .check("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Allocation size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Memory type the allocation came from
    pub const fn type_index(&self) -> u32 {
        self.type_index
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Requested versus committed size of a lazily allocated allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitmentReport {
    /// Size passed to `vkAllocateMemory`
    pub requested: vk::DeviceSize,
    /// Size reported by `vkGetDeviceMemoryCommitment`
    pub committed: vk::DeviceSize,
}

impl CommitmentReport {
    /// Query the commitment of `memory`
    pub fn query(memory: &DeviceMemory) -> Self {
        Self {
            requested: memory.size(),
            committed: memory.commitment(),
        }
    }

    /// A driver may never report more committed bytes than were requested
    pub fn check(&self) -> VulkanResult<()> {
        if self.committed > self.requested {
            return Err(VulkanError::Conformance(format!(
                "committed {} bytes for an allocation of {} bytes",
                self.committed, self.requested
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[(vk::MemoryPropertyFlags, u32)], heaps: &[u64]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: heaps.len() as u32,
            ..Default::default()
        };
        for (slot, &(flags, heap)) in props.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags: flags,
                heap_index: heap,
            };
        }
        for (slot, &size) in props.memory_heaps.iter_mut().zip(heaps) {
            *slot = vk::MemoryHeap {
                size,
                flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
            };
        }
        props
    }

    fn lazy() -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED
    }

    #[test]
    fn test_first_matching_type_wins() {
        let props = memory_properties(
            &[
                (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
                (lazy(), 1),
                (lazy() | vk::MemoryPropertyFlags::PROTECTED, 1),
            ],
            &[1 << 30, 1 << 28],
        );

        assert_eq!(find_memory_type(&props, u32::MAX, lazy()), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, lazy()), Some(2));
        assert_eq!(find_memory_type(&props, 0b001, lazy()), None);
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let props = memory_properties(&[(vk::MemoryPropertyFlags::HOST_VISIBLE, 0)], &[1024]);
        let err = require_memory_type(&props, u32::MAX, lazy()).unwrap_err();
        assert!(matches!(err, VulkanError::NoSuitableMemoryType { type_bits: u32::MAX, .. }));
    }

    #[test]
    fn test_types_past_count_are_ignored() {
        let mut props = memory_properties(&[(vk::MemoryPropertyFlags::HOST_VISIBLE, 0)], &[1024]);
        props.memory_types[1] = vk::MemoryType {
            property_flags: lazy(),
            heap_index: 0,
        };
        assert_eq!(find_memory_type(&props, u32::MAX, lazy()), None);
    }

    #[test]
    fn test_heap_lookup() {
        let props = memory_properties(&[(vk::MemoryPropertyFlags::DEVICE_LOCAL, 0), (lazy(), 1)], &[4096, 2048]);

        let (heap_index, heap) = heap_for_type(&props, 1).unwrap();
        assert_eq!(heap_index, 1);
        assert_eq!(heap.size, 2048);
        assert!(heap_for_type(&props, 2).is_none());
    }

    #[test]
    fn test_commitment_bounds() {
        let within = CommitmentReport { requested: 1024, committed: 0 };
        assert!(within.check().is_ok());

        let full = CommitmentReport { requested: 1024, committed: 1024 };
        assert!(full.check().is_ok());

        let over = CommitmentReport { requested: 1024, committed: 1025 };
        assert!(matches!(over.check(), Err(VulkanError::Conformance(_))));
    }
}
