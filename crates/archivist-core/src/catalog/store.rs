//! Persistence boundary of the catalog.

use super::types::Model;
use crate::error::{ArchivistError, ErrorCode, Result};
use crate::types::ScanId;

/// Storage backend for catalog rows.
///
/// Implementations must apply each [`save`](CatalogStore::save) atomically:
/// readers never see a row whose fields and components disagree.
pub trait CatalogStore: Send + Sync {
    /// All rows carrying the hash. More than one is a duplicate state.
    fn find_by_hash(&self, hash: &str) -> Result<Vec<Model>>;

    /// Load a row by id.
    fn get(&self, id: i64) -> Result<Option<Model>>;

    /// Insert or update a row with its tags and components; returns the row id.
    ///
    /// Without an id the row is resolved by hash, and more than one matching
    /// row fails with [`ArchivistError::DuplicateHash`].
    fn save(&self, model: &Model) -> Result<i64>;

    /// Add an error code to rows, recording the scan that found it.
    fn flag_error(&self, ids: &[i64], code: ErrorCode, scan_id: &ScanId) -> Result<()>;

    /// Remove every error code from a row. Returns false if the row is unknown.
    fn clear_errors(&self, id: i64) -> Result<bool>;

    /// Every row, ordered by id.
    fn list_models(&self) -> Result<Vec<Model>>;

    fn count(&self) -> Result<usize>;

    /// The single row for a hash.
    fn get_by_hash(&self, hash: &str) -> Result<Option<Model>> {
        let mut rows = self.find_by_hash(hash)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            _ => Err(ArchivistError::DuplicateHash {
                hash: hash.to_string(),
                model_ids: rows.iter().filter_map(|m| m.id).collect(),
            }),
        }
    }
}
