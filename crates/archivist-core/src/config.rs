//! Configuration for the archivist core.
//!
//! The core receives an [`ArchivistConfig`] with fully resolved absolute
//! paths; reading configuration files is the caller's job.

use crate::error::{ArchivistError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Scanning constants.
pub struct ScanConfig;

impl ScanConfig {
    /// Streaming chunk size for content hashing (8MB).
    pub const HASH_CHUNK_SIZE: usize = 8 * 1024 * 1024;
    pub const DEFAULT_HASH_WORKERS: usize = 4;
    pub const DEFAULT_SIDECAR_SUFFIX: &'static str = ".metadata.json";
    pub const DEFAULT_EXAMPLES_DIR: &'static str = "examples";
    pub const DEFAULT_MODEL_EXTENSIONS: &'static [&'static str] = &["safetensors", "pth"];
}

/// Extra per-category active directories with their own archive root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraRootSet {
    /// Archive mirrors live at `archive_root/<category>`
    pub archive_root: PathBuf,
    /// Inactive mirrors live at `inactive_root/<category>` when set
    #[serde(default)]
    pub inactive_root: Option<PathBuf>,
    /// Category name to its active directory
    pub categories: BTreeMap<String, PathBuf>,
}

/// Resolved configuration handed to the core by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivistConfig {
    /// Model directory of the consuming application
    pub active_root: PathBuf,
    #[serde(default)]
    pub inactive_root: Option<PathBuf>,
    pub archive_root: PathBuf,
    /// SQLite catalog file
    pub database_path: PathBuf,
    #[serde(default = "default_model_extensions")]
    pub model_extensions: BTreeSet<String>,
    #[serde(default)]
    pub ignore_categories: BTreeSet<String>,
    /// Display labels for categories in the read interface
    #[serde(default)]
    pub category_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_roots: Vec<ExtraRootSet>,
    #[serde(default = "default_examples_dir")]
    pub examples_dir: String,
    #[serde(default = "default_sidecar_suffix")]
    pub sidecar_suffix: String,
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
}

fn default_model_extensions() -> BTreeSet<String> {
    ScanConfig::DEFAULT_MODEL_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_examples_dir() -> String {
    ScanConfig::DEFAULT_EXAMPLES_DIR.to_string()
}

fn default_sidecar_suffix() -> String {
    ScanConfig::DEFAULT_SIDECAR_SUFFIX.to_string()
}

fn default_hash_workers() -> usize {
    ScanConfig::DEFAULT_HASH_WORKERS
}

impl ArchivistConfig {
    /// Create a configuration with default extensions and naming.
    pub fn new(
        active_root: impl Into<PathBuf>,
        archive_root: impl Into<PathBuf>,
        database_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            active_root: active_root.into(),
            inactive_root: None,
            archive_root: archive_root.into(),
            database_path: database_path.into(),
            model_extensions: default_model_extensions(),
            ignore_categories: BTreeSet::new(),
            category_labels: BTreeMap::new(),
            extra_roots: Vec::new(),
            examples_dir: default_examples_dir(),
            sidecar_suffix: default_sidecar_suffix(),
            hash_workers: default_hash_workers(),
        }
    }

    /// Set the inactive (staging) root.
    pub fn with_inactive_root(mut self, inactive_root: impl Into<PathBuf>) -> Self {
        self.inactive_root = Some(inactive_root.into());
        self
    }

    /// Lowercase extensions and strip leading dots.
    pub fn normalize(&mut self) {
        self.model_extensions = self
            .model_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self.ignore_categories = self
            .ignore_categories
            .iter()
            .map(|c| c.to_lowercase())
            .collect();
    }

    /// Check that every path is absolute and the scan settings are usable.
    pub fn validate(&self) -> Result<()> {
        let mut paths: Vec<(&str, &Path)> = vec![
            ("active_root", &self.active_root),
            ("archive_root", &self.archive_root),
            ("database_path", &self.database_path),
        ];
        if let Some(inactive) = &self.inactive_root {
            paths.push(("inactive_root", inactive));
        }
        for extra in &self.extra_roots {
            paths.push(("extra_roots.archive_root", &extra.archive_root));
            if let Some(inactive) = &extra.inactive_root {
                paths.push(("extra_roots.inactive_root", inactive));
            }
            for dir in extra.categories.values() {
                paths.push(("extra_roots.categories", dir));
            }
        }
        for (field, path) in paths {
            if !path.is_absolute() {
                return Err(ArchivistError::config(format!(
                    "{} must be an absolute path, got {}",
                    field,
                    path.display()
                )));
            }
        }

        if self.model_extensions.is_empty() {
            return Err(ArchivistError::config("model_extensions is empty"));
        }
        if self.hash_workers == 0 {
            return Err(ArchivistError::config("hash_workers must be at least 1"));
        }
        if !self.sidecar_suffix.starts_with('.') || self.sidecar_suffix.len() < 2 {
            return Err(ArchivistError::config(format!(
                "sidecar_suffix must start with '.', got {:?}",
                self.sidecar_suffix
            )));
        }
        if self.examples_dir.is_empty() {
            return Err(ArchivistError::config("examples_dir is empty"));
        }
        Ok(())
    }

    /// Whether the file's extension is one of the model extensions.
    pub fn is_model_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                self.model_extensions
                    .contains(&ext.to_string_lossy().to_lowercase())
            })
            .unwrap_or(false)
    }

    /// Whether a category directory is excluded from scanning.
    pub fn is_ignored_category(&self, category: &str) -> bool {
        category.starts_with('.')
            || category == self.examples_dir
            || self.ignore_categories.contains(&category.to_lowercase())
    }

    /// Display label for a category, falling back to its directory name.
    pub fn category_label<'a>(&'a self, category: &'a str) -> &'a str {
        self.category_labels
            .get(category)
            .map(String::as_str)
            .unwrap_or(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ArchivistConfig {
        ArchivistConfig::new("/models", "/archive", "/data/catalog.db")
    }

    #[test]
    fn test_defaults() {
        let config = test_config();
        assert!(config.model_extensions.contains("safetensors"));
        assert_eq!(config.sidecar_suffix, ".metadata.json");
        assert_eq!(config.examples_dir, "examples");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalize_extensions() {
        let mut config = test_config();
        config.model_extensions = [".SafeTensors", "ckpt", " "]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.normalize();
        assert!(config.model_extensions.contains("safetensors"));
        assert!(config.model_extensions.contains("ckpt"));
        assert_eq!(config.model_extensions.len(), 2);
        assert!(config.is_model_file(Path::new("/models/a.SAFETENSORS")));
        assert!(!config.is_model_file(Path::new("/models/a.png")));
    }

    #[test]
    fn test_relative_paths_rejected() {
        let mut config = test_config();
        config.archive_root = PathBuf::from("archive");
        assert!(matches!(
            config.validate(),
            Err(ArchivistError::Config { .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = test_config();
        config.hash_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ignored_categories() {
        let mut config = test_config();
        config.ignore_categories.insert("Configs".to_string());
        config.normalize();
        assert!(config.is_ignored_category("configs"));
        assert!(config.is_ignored_category("examples"));
        assert!(config.is_ignored_category(".cache"));
        assert!(!config.is_ignored_category("checkpoints"));
    }

    #[test]
    fn test_category_label_fallback() {
        let mut config = test_config();
        config
            .category_labels
            .insert("loras".to_string(), "LoRA".to_string());
        assert_eq!(config.category_label("loras"), "LoRA");
        assert_eq!(config.category_label("vae"), "vae");
    }
}
