//! Descriptor update template: create/destroy probe
//!
//! Creates and destroys templates whose entries cover parts of array
//! bindings. No descriptor data is ever written. Entry sets that overlap or
//! run past a binding are checked to be refused before reaching the driver.

use ash::vk;
use vk_sandbox::entry::EntryData;
use vk_sandbox::vulkan::update_template::validate_entries;
use vk_sandbox::vulkan::{
    BindingDesc, DescriptorKind, DescriptorSetLayout, DescriptorUpdateTemplate, HeadlessContext, ShaderStages,
    TemplateEntryDesc, VulkanError, VulkanResult,
};

/// Record stride used by every entry
pub const ENTRY_STRIDE: usize = 24;

/// Layout bindings plus the template entries to create against them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCase {
    /// Logged name
    pub name: &'static str,
    /// Layout bindings
    pub bindings: Vec<BindingDesc>,
    /// Template entries
    pub entries: Vec<TemplateEntryDesc>,
}

fn storage_images() -> BindingDesc {
    BindingDesc::new(
        0,
        DescriptorKind::StorageImage,
        6,
        ShaderStages::VERTEX.union(ShaderStages::FRAGMENT),
    )
}

fn uniform_buffers() -> BindingDesc {
    BindingDesc::new(2, DescriptorKind::UniformBuffer, 3, ShaderStages::VERTEX)
}

/// Cases that must create successfully
pub fn valid_cases() -> [TemplateCase; 2] {
    [
        TemplateCase {
            name: "single entry in the middle of a storage image array",
            bindings: vec![storage_images()],
            entries: vec![TemplateEntryDesc::new(0, 3, 3, DescriptorKind::StorageImage, 0, ENTRY_STRIDE)],
        },
        TemplateCase {
            name: "split ranges over two bindings",
            bindings: vec![storage_images(), uniform_buffers()],
            entries: vec![
                TemplateEntryDesc::new(0, 0, 3, DescriptorKind::StorageImage, 0, ENTRY_STRIDE),
                TemplateEntryDesc::new(0, 5, 1, DescriptorKind::StorageImage, 72, ENTRY_STRIDE),
                TemplateEntryDesc::new(2, 1, 2, DescriptorKind::UniformBuffer, 256, ENTRY_STRIDE),
                TemplateEntryDesc::new(2, 0, 1, DescriptorKind::UniformBuffer, 512, ENTRY_STRIDE),
            ],
        },
    ]
}

/// Cases that must be refused
pub fn rejected_cases() -> [TemplateCase; 2] {
    [
        TemplateCase {
            name: "overlapping ranges in one binding",
            bindings: vec![storage_images()],
            entries: vec![
                TemplateEntryDesc::new(0, 0, 3, DescriptorKind::StorageImage, 0, ENTRY_STRIDE),
                TemplateEntryDesc::new(0, 2, 2, DescriptorKind::StorageImage, 72, ENTRY_STRIDE),
            ],
        },
        TemplateCase {
            name: "range past the end of a binding",
            bindings: vec![storage_images(), uniform_buffers()],
            entries: vec![TemplateEntryDesc::new(2, 2, 2, DescriptorKind::UniformBuffer, 0, ENTRY_STRIDE)],
        },
    ]
}

fn create_and_destroy(device: &ash::Device, case: &TemplateCase) -> VulkanResult<()> {
    log::info!("Case: {}", case.name);

    let layout = DescriptorSetLayout::new(device, &case.bindings)?;
    let template = DescriptorUpdateTemplate::new(device, &layout, &case.entries)?;
    log::info!(
        "Created template {:#x} with {} entries",
        vk::Handle::as_raw(template.handle()),
        template.entries().len()
    );

    drop(template);
    drop(layout);
    Ok(())
}

fn expect_rejected(case: &TemplateCase) -> VulkanResult<()> {
    match validate_entries(&case.bindings, &case.entries) {
        Err(err) => {
            log::info!("Rejected {}: {}", case.name, err);
            Ok(())
        }
        Ok(()) => Err(VulkanError::Conformance(format!("entries accepted for case: {}", case.name))),
    }
}

/// Program body
pub fn run(entry: &EntryData) -> VulkanResult<()> {
    let context = HeadlessContext::new(&entry.config, vk::API_VERSION_1_1)?;

    for case in &valid_cases() {
        create_and_destroy(context.raw_device(), case)?;
    }
    for case in &rejected_cases() {
        expect_rejected(case)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk_sandbox::vulkan::TemplateError;

    #[test]
    fn test_valid_cases_pass_validation() {
        for case in valid_cases() {
            assert_eq!(validate_entries(&case.bindings, &case.entries), Ok(()), "{}", case.name);
        }
    }

    #[test]
    fn test_rejected_cases_name_the_offending_entry() {
        let [overlap, past_end] = rejected_cases();

        assert!(matches!(
            validate_entries(&overlap.bindings, &overlap.entries),
            Err(TemplateError::Overlap { entry: 1, other: 0, .. })
        ));
        assert!(matches!(
            validate_entries(&past_end.bindings, &past_end.entries),
            Err(TemplateError::OutOfRange { entry: 0, binding: 2, .. })
        ));
        assert!(expect_rejected(&overlap).is_ok());
    }

    #[test]
    fn test_split_case_leaves_gaps_unwritten() {
        let [_, split] = valid_cases();
        let covered: Vec<(u32, u32)> = split
            .entries
            .iter()
            .flat_map(|e| (e.first_element..e.first_element + e.count).map(move |i| (e.binding, i)))
            .collect();

        assert_eq!(covered.len(), 7);
        assert!(!covered.contains(&(0, 3)));
        assert!(!covered.contains(&(0, 4)));
    }

    #[test]
    fn test_valid_case_reported_as_not_rejected() {
        let [single, _] = valid_cases();
        assert!(matches!(expect_rejected(&single), Err(VulkanError::Conformance(_))));
    }
}
