//! # Vulkan Sandbox
//!
//! Small harness for writing Vulkan sample applications and conformance probes.
//!
//! ## Features
//!
//! - **RAII Handles**: every Vulkan object is owned by one value and destroyed on drop
//! - **Sample Framework**: window, swapchain and per-image frame data managed for you
//! - **Headless Context**: instance + device bootstrap for probes that never present
//! - **Descriptor Update Templates**: host-side validation and ABI-exact packed data
//! - **Fail Fast**: the entry harness logs the failing call and aborts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vk_sandbox::prelude::*;
//!
//! fn main() {
//!     vk_sandbox::entry::run("my_probe", |entry| {
//!         let context = HeadlessContext::new(&entry.config, vk::API_VERSION_1_0)?;
//!         log::info!("Running on {}", context.physical_device.device_name());
//!         Ok(())
//!     });
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod entry;
pub mod foundation;
pub mod sample;
pub mod vulkan;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigError, SandboxConfig};
    pub use crate::entry::{run, run_sample, EntryData};
    pub use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
    pub use crate::sample::{RenderContext, Sample, SampleApplication};
    pub use crate::vulkan::{
        HeadlessContext, LogicalDevice, VkResultExt, VulkanError, VulkanInstance, VulkanResult,
    };
    pub use ash::vk;
}
