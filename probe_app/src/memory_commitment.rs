//! Lazily allocated memory commitment probe
//!
//! Allocates half of the heap behind the first `DEVICE_LOCAL |
//! LAZILY_ALLOCATED` memory type and checks that the driver never reports
//! more committed bytes than were requested.

use ash::vk;
use vk_sandbox::entry::EntryData;
use vk_sandbox::vulkan::memory::{heap_for_type, require_memory_type};
use vk_sandbox::vulkan::{CommitmentReport, DeviceMemory, HeadlessContext, VulkanError, VulkanResult};

/// Property flags the probed memory type must carry
pub const LAZY_DEVICE_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw() | vk::MemoryPropertyFlags::LAZILY_ALLOCATED.as_raw(),
);

/// Memory type, heap and allocation size the probe will use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitmentPlan {
    /// Selected memory type
    pub memory_type: u32,
    /// Heap backing that type
    pub heap_index: u32,
    /// Size of that heap
    pub heap_size: vk::DeviceSize,
    /// Bytes to allocate
    pub allocation_size: vk::DeviceSize,
}

impl CommitmentPlan {
    /// Pick the first lazily allocated device-local type, any type bit allowed
    pub fn select(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> VulkanResult<Self> {
        let memory_type = require_memory_type(memory_properties, u32::MAX, LAZY_DEVICE_MEMORY)?;
        let (heap_index, heap) = heap_for_type(memory_properties, memory_type).ok_or_else(|| {
            VulkanError::InitializationFailed(format!("memory type {memory_type} has no valid heap"))
        })?;

        Ok(Self {
            memory_type,
            heap_index,
            heap_size: heap.size,
            allocation_size: heap.size / 2,
        })
    }
}

/// Program body
pub fn run(entry: &EntryData) -> VulkanResult<()> {
    let context = HeadlessContext::new(&entry.config, vk::API_VERSION_1_0)?;

    let plan = CommitmentPlan::select(&context.physical_device.memory_properties)?;
    log::info!("Using memory index: {}", plan.memory_type);
    log::info!("Using heap index: {} size: {}", plan.heap_index, plan.heap_size);
    log::info!("Allocating memory size: {}", plan.allocation_size);

    let memory = DeviceMemory::allocate(context.raw_device(), plan.allocation_size, plan.memory_type)?;

    let report = CommitmentReport::query(&memory);
    log::info!("Committed memory in bytes: {}", report.committed);
    report.check()?;

    drop(memory);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[(vk::MemoryPropertyFlags, u32)], heaps: &[vk::DeviceSize]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: heaps.len() as u32,
            ..Default::default()
        };
        for (slot, &(flags, heap_index)) in props.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags: flags,
                heap_index,
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

    #[test]
    fn test_selects_first_lazy_device_local_type() {
        let props = properties(
            &[
                (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
                (vk::MemoryPropertyFlags::LAZILY_ALLOCATED, 1),
                (LAZY_DEVICE_MEMORY, 1),
                (LAZY_DEVICE_MEMORY, 0),
            ],
            &[1 << 30, 1 << 28],
        );

        let plan = CommitmentPlan::select(&props).unwrap();
        assert_eq!(plan.memory_type, 2);
        assert_eq!(plan.heap_index, 1);
        assert_eq!(plan.heap_size, 1 << 28);
        assert_eq!(plan.allocation_size, 1 << 27);
    }

    #[test]
    fn test_odd_heap_size_rounds_down() {
        let props = properties(&[(LAZY_DEVICE_MEMORY, 0)], &[1001]);
        assert_eq!(CommitmentPlan::select(&props).unwrap().allocation_size, 500);
    }

    #[test]
    fn test_missing_lazy_type_is_an_error() {
        let props = properties(&[(vk::MemoryPropertyFlags::DEVICE_LOCAL, 0)], &[1 << 30]);
        assert!(matches!(
            CommitmentPlan::select(&props),
            Err(VulkanError::NoSuitableMemoryType { .. })
        ));
    }

    #[test]
    fn test_commitment_above_request_fails() {
        let within = CommitmentReport {
            requested: 4096,
            committed: 0,
        };
        assert!(within.check().is_ok());

        let over = CommitmentReport {
            requested: 4096,
            committed: 8192,
        };
        assert!(matches!(over.check(), Err(VulkanError::Conformance(_))));
    }
}
