//! Sidecar metadata management.
//!
//! Every primary model file has a `<stem>.metadata.json` companion holding its
//! content hash, display name and tags. The manager creates missing sidecars
//! and backfills missing fields. An existing hash is never recomputed, and
//! fields it does not know about are written back untouched.

use crate::config::ArchivistConfig;
use crate::error::{ArchivistError, Result};
use crate::hashing::compute_sha256;
use crate::metadata::atomic::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// On-disk sidecar layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SidecarFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Identity and description of one primary file, after backfilling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarRecord {
    /// Content hash, lowercase hex
    pub sha256: String,
    pub model_name: String,
    pub tags: Vec<String>,
    /// Location of the sidecar file
    pub path: PathBuf,
    /// False when backfilled values could not be written to disk
    pub persisted: bool,
}

/// Creates and repairs sidecar files.
#[derive(Debug, Clone)]
pub struct SidecarManager {
    suffix: String,
}

impl SidecarManager {
    /// Create a manager for sidecars named `<stem><suffix>`.
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &ArchivistConfig) -> Self {
        Self::new(config.sidecar_suffix.clone())
    }

    /// Sidecar location for a primary file.
    pub fn sidecar_path(&self, primary: &Path) -> PathBuf {
        primary.with_file_name(format!("{}{}", file_stem(primary), self.suffix))
    }

    /// Whether a file is a sidecar by name.
    pub fn is_sidecar(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().ends_with(&self.suffix))
            .unwrap_or(false)
    }

    /// Load the sidecar of `primary`, creating or backfilling it as needed.
    ///
    /// A failed write is logged and the in-memory record is still returned
    /// with `persisted = false`; the next pass retries the write.
    pub fn ensure_metadata(&self, primary: &Path) -> Result<SidecarRecord> {
        let path = self.sidecar_path(primary);
        let existing: Option<SidecarFile> =
            read_json(&path).map_err(|e| ArchivistError::Metadata {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let mut changed = existing.is_none();
        let mut data = existing.unwrap_or_default();

        let sha256 = match data.sha256.as_deref().map(str::trim) {
            Some(hash) if !hash.is_empty() => hash.to_lowercase(),
            _ => {
                let hash = compute_sha256(primary)?;
                data.sha256 = Some(hash.clone());
                changed = true;
                hash
            }
        };

        let model_name = match data.model_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                let name = file_stem(primary);
                data.model_name = Some(name.clone());
                changed = true;
                name
            }
        };

        let mut tags = match &data.tags {
            Some(tags) => tags.clone(),
            None => {
                data.tags = Some(Vec::new());
                changed = true;
                Vec::new()
            }
        };
        // Tags are unique per model; a repeat keeps its first position
        let mut seen = HashSet::new();
        tags.retain(|tag| seen.insert(tag.clone()));

        let mut persisted = true;
        if changed {
            info!("Updating metadata for {}", primary.display());
            if let Err(e) = write_json_atomic(&path, &data) {
                warn!("Failed to persist sidecar {}: {}", path.display(), e);
                persisted = false;
            }
        }

        Ok(SidecarRecord {
            sha256,
            model_name,
            tags,
            path,
            persisted,
        })
    }
}

/// File name up to its last extension.
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::compute_sha256;
    use std::fs;
    use tempfile::TempDir;

    fn manager() -> SidecarManager {
        SidecarManager::new(".metadata.json")
    }

    fn write_model(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sidecar_path() {
        let path = manager().sidecar_path(Path::new("/models/loras/style.v2.safetensors"));
        assert_eq!(path, PathBuf::from("/models/loras/style.v2.metadata.json"));
        assert!(manager().is_sidecar(&path));
        assert!(!manager().is_sidecar(Path::new("/models/loras/style.v2.png")));
    }

    #[test]
    fn test_creates_missing_sidecar() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "a.safetensors", b"weights");

        let record = manager().ensure_metadata(&model).unwrap();
        assert_eq!(record.sha256, compute_sha256(&model).unwrap());
        assert_eq!(record.model_name, "a");
        assert!(record.tags.is_empty());
        assert!(record.persisted);

        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(&record.path).unwrap()).unwrap();
        assert_eq!(on_disk["sha256"], Value::String(record.sha256.clone()));
        assert_eq!(on_disk["model_name"], "a");
        assert_eq!(on_disk["tags"], serde_json::json!([]));
    }

    #[test]
    fn test_backfills_hash_once() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "b.safetensors", b"original bytes");
        let sidecar = temp.path().join("b.metadata.json");
        fs::write(&sidecar, r#"{"model_name": "Bee", "tags": ["sdxl"]}"#).unwrap();

        let first = manager().ensure_metadata(&model).unwrap();
        assert_eq!(first.sha256, compute_sha256(&model).unwrap());
        assert_eq!(first.model_name, "Bee");
        assert_eq!(first.tags, vec!["sdxl".to_string()]);

        // Changing the bytes must not change an established identity
        fs::write(&model, b"edited bytes").unwrap();
        let second = manager().ensure_metadata(&model).unwrap();
        assert_eq!(second.sha256, first.sha256);
    }

    #[test]
    fn test_preserves_unknown_fields() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "c.safetensors", b"c");
        let sidecar = temp.path().join("c.metadata.json");
        fs::write(
            &sidecar,
            r#"{"sha256": "feed", "source": {"site": "example", "id": 7}, "notes": "keep"}"#,
        )
        .unwrap();

        let record = manager().ensure_metadata(&model).unwrap();
        assert_eq!(record.sha256, "feed");
        assert_eq!(record.model_name, "c");

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&sidecar).unwrap()).unwrap();
        assert_eq!(on_disk["source"], serde_json::json!({"site": "example", "id": 7}));
        assert_eq!(on_disk["notes"], "keep");
        assert_eq!(on_disk["sha256"], "feed");
        assert_eq!(on_disk["tags"], serde_json::json!([]));
    }

    #[test]
    fn test_complete_sidecar_is_not_rewritten() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "d.safetensors", b"d");
        let sidecar = temp.path().join("d.metadata.json");
        let original = r#"{"sha256":"abc","model_name":"D","tags":[]}"#;
        fs::write(&sidecar, original).unwrap();

        manager().ensure_metadata(&model).unwrap();
        assert_eq!(fs::read_to_string(&sidecar).unwrap(), original);
    }

    #[test]
    fn test_repeated_tags_are_collapsed() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "f.safetensors", b"f");
        let sidecar = temp.path().join("f.metadata.json");
        let original = r#"{"sha256":"abc","model_name":"F","tags":["a","b","a"]}"#;
        fs::write(&sidecar, original).unwrap();

        let record = manager().ensure_metadata(&model).unwrap();
        assert_eq!(record.tags, vec!["a".to_string(), "b".to_string()]);
        // The file itself is left as the user wrote it
        assert_eq!(fs::read_to_string(&sidecar).unwrap(), original);
    }

    #[test]
    fn test_failed_write_still_returns_record() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "g.safetensors", b"g");
        // Occupy the temp file name so the atomic write cannot open it
        let blocked = temp
            .path()
            .join(format!(".g.metadata.json.{}.tmp", std::process::id()));
        fs::create_dir(&blocked).unwrap();

        let record = manager().ensure_metadata(&model).unwrap();
        assert!(!record.persisted);
        assert_eq!(record.sha256, compute_sha256(&model).unwrap());
        assert_eq!(record.model_name, "g");
        assert!(record.tags.is_empty());
        assert!(!temp.path().join("g.metadata.json").exists());

        // Retried once the obstruction is gone
        fs::remove_dir(&blocked).unwrap();
        assert!(manager().ensure_metadata(&model).unwrap().persisted);
        assert!(temp.path().join("g.metadata.json").exists());
    }

    #[test]
    fn test_unreadable_sidecar_is_metadata_error() {
        let temp = TempDir::new().unwrap();
        let model = write_model(temp.path(), "e.safetensors", b"e");
        fs::write(temp.path().join("e.metadata.json"), "[1, 2, 3]").unwrap();

        let result = manager().ensure_metadata(&model);
        assert!(matches!(result, Err(ArchivistError::Metadata { .. })));
    }
}
