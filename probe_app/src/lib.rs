//! # Vulkan probes
//!
//! Programs built on `vk_sandbox`:
//!
//! - [`layered_render`]: cube rendered into four slices of a 3D image with a
//!   geometry shader, blitted into the swapchain quadrants
//! - [`memory_commitment`]: lazily allocated memory commitment query
//! - [`template_update`]: descriptor set update through an update template
//! - [`template_create_destroy`]: update template creation over partial array ranges
//!
//! Each program is a library module with a `run` body; the binaries only hand
//! that body to the entry harness.

#![warn(missing_docs)]

pub mod layered_render;
pub mod memory_commitment;
pub mod template_create_destroy;
pub mod template_update;
