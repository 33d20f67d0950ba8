//! Archivist Core - Headless scan-and-reconcile engine for tiered model storage.
//!
//! Large model files live in an active tier (used by an application), an
//! optional inactive staging tier and an archive tier. This crate walks all of
//! them, identifies every model by the sha256 of its primary file, and keeps a
//! deduplicated SQLite catalog of what exists where. It can be used
//! programmatically without any HTTP/RPC layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use archivist_core::{Archivist, ArchivistConfig};
//!
//! fn main() -> archivist_core::Result<()> {
//!     let config = ArchivistConfig::new(
//!         "/srv/app/models",
//!         "/mnt/archive/models",
//!         "/var/lib/archivist/catalog.db",
//!     );
//!     let archivist = Archivist::open(config)?;
//!
//!     let report = archivist.reconcile_all()?;
//!     println!("Observed {} models", report.observed);
//!
//!     for entry in archivist.list_models(true, false)? {
//!         println!("{} {:?} archived={}", entry.name, entry.status, entry.archived);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archivist;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hashing;
pub mod locator;
pub mod metadata;
pub mod reconcile;
pub mod scanner;
pub mod types;

// Re-export commonly used types
pub use archivist::{Archivist, ScanIssue, ScanReport};
pub use catalog::{CatalogEntry, CatalogStore, Component, ComponentEntry, Model, SqliteCatalog};
pub use config::{ArchivistConfig, ExtraRootSet, ScanConfig};
pub use error::{ArchivistError, ErrorCode, Result};
pub use hashing::{compute_sha256, verify_sha256};
pub use locator::{CategoryRoots, PathLocator, TierDirs};
pub use metadata::{SidecarManager, SidecarRecord};
pub use reconcile::{Coverage, ReconcileOutcome, ReconciliationEngine, SweepSummary};
pub use scanner::{ContentScanner, ObservationSet, ObservedComponent, ObservedModel, ScanIter};
pub use types::{ComponentKind, ModelStatus, ScanId, Tier};
