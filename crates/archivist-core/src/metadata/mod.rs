//! Sidecar metadata persistence.
//!
//! This module provides:
//! - Atomic JSON file operations
//! - The sidecar manager that guarantees every primary file has an identity record

mod atomic;
mod sidecar;

pub use atomic::{read_json, write_json_atomic};
pub(crate) use sidecar::file_stem;
pub use sidecar::{SidecarManager, SidecarRecord};
