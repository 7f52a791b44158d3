//! Foundation module - Core utilities and types
//!
//! - Math types and operations
//! - Logging utilities

pub mod logging;
pub mod math;
