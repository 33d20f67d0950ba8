//! Persistent catalog of models keyed by content hash.
//!
//! This module provides:
//! - Catalog row types and read-interface views
//! - The `CatalogStore` trait the reconciliation engine writes through
//! - A SQLite implementation

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteCatalog;
pub use store::CatalogStore;
pub use types::{CatalogEntry, Component, ComponentEntry, ComponentKey, Model};
