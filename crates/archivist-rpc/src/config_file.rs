//! Loading the archivist configuration from a TOML file.
//!
//! Paths in the file may be relative (to the file's directory) or start with
//! `~`; the core only ever sees absolute paths.
//!
//! A missing file is replaced by a default one when a model tree can be found
//! next to it.

use anyhow::{bail, Context, Result};
use archivist_core::ArchivistConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_DIR_NAME: &str = "model-archivist";
const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = "catalog.db";

/// `<platform config dir>/model-archivist/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Catalog location used when the file names none.
fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join(DATABASE_FILE_NAME))
}

/// Load the configuration, writing a default file first if none exists.
pub fn load_or_create_config(path: &Path) -> Result<ArchivistConfig> {
    if !path.exists() {
        warn!("Config {} not found, creating a default one", path.display());
        create_default_config(path)?;
    }
    load_config(path)
}

/// Write a default configuration for the first model tree found in the
/// file's directory or the one above it.
fn create_default_config(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let Some(root) = dir
        .ancestors()
        .take(2)
        .find(|candidate| candidate.join("models").is_dir())
    else {
        bail!(
            "Config {} not found and no models directory near it",
            path.display()
        );
    };
    info!("Using {} as the model tree root", root.display());

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(path, default_config_text(root))
        .with_context(|| format!("Failed to write default config {}", path.display()))?;
    Ok(())
}

fn default_config_text(root: &Path) -> String {
    let quoted = |name: &str| toml::Value::String(root.join(name).to_string_lossy().to_string());
    format!(
        r#"# Model archivist configuration

# Tier roots; each holds one directory per category
active_root = {active}
inactive_root = {inactive}
archive_root = {archive}

# SQLite catalog file
database_path = {database}

# File extensions treated as model files
model_extensions = ["safetensors", "pth"]

# Display labels per category directory
[category_labels]
checkpoints = "Checkpoint"
loras = "LoRA"
"#,
        active = quoted("models"),
        inactive = quoted("inactive_models"),
        archive = quoted("model_archive"),
        database = quoted("model_archivist.db"),
    )
}

/// Read, parse and resolve a configuration file.
pub fn load_config(path: &Path) -> Result<ArchivistConfig> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to determine current directory")?
            .join(path)
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let base = path.parent().unwrap_or(Path::new("/"));
    parse_config(&text, base).with_context(|| format!("Invalid config {}", path.display()))
}

/// Parse TOML text, resolving relative paths against `base`.
pub fn parse_config(text: &str, base: &Path) -> Result<ArchivistConfig> {
    let mut table: toml::Table = toml::from_str(text)?;
    if !table.contains_key("database_path") {
        let default = default_database_path()
            .context("database_path is not set and no data directory is available")?;
        table.insert(
            "database_path".to_string(),
            toml::Value::String(default.to_string_lossy().to_string()),
        );
    }

    let mut config: ArchivistConfig = toml::Value::Table(table).try_into()?;
    resolve_paths(&mut config, base);
    Ok(config)
}

fn resolve_paths(config: &mut ArchivistConfig, base: &Path) {
    resolve(&mut config.active_root, base);
    resolve(&mut config.archive_root, base);
    resolve(&mut config.database_path, base);
    if let Some(inactive_root) = config.inactive_root.as_mut() {
        resolve(inactive_root, base);
    }
    for extra in &mut config.extra_roots {
        resolve(&mut extra.archive_root, base);
        if let Some(inactive_root) = extra.inactive_root.as_mut() {
            resolve(inactive_root, base);
        }
        for dir in extra.categories.values_mut() {
            resolve(dir, base);
        }
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            *path = home.join(rest);
            return;
        }
    }
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
