//! Path Locator - resolves which tier directories to scan per category.
//!
//! Categories are the subdirectories of the tier roots (`checkpoints`,
//! `loras`, ...). Every category found on one tier gets a mirror directory on
//! the other tiers so that the scanner can walk them in lock-step.
//!
//! Components are stored under a *location*: for the main root set the
//! directory relative to the tier root (`checkpoints/sd15`), for extra root
//! sets the absolute directory path. Locations never collide across root sets.

use crate::config::ArchivistConfig;
use crate::error::{ArchivistError, Result};
use crate::types::Tier;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories listed during a pass: `(tier, location)` to the names of the
/// subdirectories found there.
pub type Listings = BTreeMap<(Tier, String), BTreeSet<String>>;

/// The directories of one category on every tier of a root set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TierDirs {
    pub category: String,
    /// 0 for the main root set, `n` for `extra_roots[n - 1]`
    pub root_set: usize,
    pub active: PathBuf,
    pub inactive: Option<PathBuf>,
    pub archive: PathBuf,
}

impl TierDirs {
    /// Tier directories in tier order.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &Path)> + '_ {
        [
            Some((Tier::Active, self.active.as_path())),
            self.inactive.as_deref().map(|p| (Tier::Inactive, p)),
            Some((Tier::Archive, self.archive.as_path())),
        ]
        .into_iter()
        .flatten()
    }

    pub fn get(&self, tier: Tier) -> Option<&Path> {
        match tier {
            Tier::Active => Some(&self.active),
            Tier::Inactive => self.inactive.as_deref(),
            Tier::Archive => Some(&self.archive),
        }
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.iter().map(|(tier, _)| tier).collect()
    }

    /// Catalog location of a directory on one tier of this root set.
    pub fn location(&self, tier: Tier, dir: &Path) -> String {
        if self.root_set == 0 {
            if let Some(base) = self.get(tier).and_then(Path::parent) {
                if let Ok(relative) = dir.strip_prefix(base) {
                    return relative_string(relative);
                }
            }
        }
        absolute_string(dir)
    }
}

/// Resolved scan roots, keyed by category name.
#[derive(Debug, Default)]
pub struct CategoryRoots {
    categories: BTreeMap<String, Vec<TierDirs>>,
    issues: Vec<ArchivistError>,
    listings: Listings,
}

impl CategoryRoots {
    fn add(&mut self, dirs: TierDirs) {
        let entry = self.categories.entry(dirs.category.clone()).or_default();
        if !entry.contains(&dirs) {
            entry.push(dirs);
        }
    }

    pub fn get(&self, category: &str) -> Option<&[TierDirs]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[TierDirs])> {
        self.categories
            .iter()
            .map(|(name, dirs)| (name.as_str(), dirs.as_slice()))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Non-fatal problems found while resolving (unreadable roots, failed mkdir).
    pub fn issues(&self) -> &[ArchivistError] {
        &self.issues
    }

    pub fn take_issues(&mut self) -> Vec<ArchivistError> {
        std::mem::take(&mut self.issues)
    }

    /// Tier roots and examples directories listed while resolving.
    pub fn listings(&self) -> &Listings {
        &self.listings
    }

    pub fn take_listings(&mut self) -> Listings {
        std::mem::take(&mut self.listings)
    }
}

/// Resolves category roots from the configuration.
pub struct PathLocator<'a> {
    config: &'a ArchivistConfig,
}

impl<'a> PathLocator<'a> {
    pub fn new(config: &'a ArchivistConfig) -> Self {
        Self { config }
    }

    /// Discover categories on every tier and create missing mirrors.
    ///
    /// Fails when two root sets claim the same archive root, when the active
    /// root is missing, or when a managed root cannot be created.
    pub fn resolve_roots(&self) -> Result<CategoryRoots> {
        self.check_archive_roots()?;

        if !self.config.active_root.is_dir() {
            return Err(ArchivistError::UnresolvableRoot {
                category: "*".to_string(),
                path: self.config.active_root.clone(),
            });
        }
        let mut managed = vec![&self.config.archive_root];
        managed.extend(self.config.inactive_root.as_ref());
        for root in managed {
            std::fs::create_dir_all(root).map_err(|_| ArchivistError::UnresolvableRoot {
                category: "*".to_string(),
                path: root.clone(),
            })?;
        }

        let mut roots = CategoryRoots::default();

        // Start from the active root and mirror outwards, then the reverse
        let mut category_names = BTreeSet::new();
        let mut tier_roots = vec![(Tier::Active, &self.config.active_root)];
        tier_roots.extend(self.config.inactive_root.as_ref().map(|p| (Tier::Inactive, p)));
        tier_roots.push((Tier::Archive, &self.config.archive_root));

        for (tier, root) in tier_roots {
            match list_dir(root) {
                Ok(listing) => {
                    category_names.extend(
                        listing
                            .dirs
                            .iter()
                            .filter(|name| !self.config.is_ignored_category(name))
                            .cloned(),
                    );
                    roots
                        .listings
                        .insert((tier, String::new()), listing.dirs.into_iter().collect());
                }
                Err(e) => {
                    warn!("Cannot list {} root {}: {}", tier, root.display(), e);
                    roots.issues.push(ArchivistError::Inaccessible {
                        tier,
                        path: root.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        for category in category_names {
            let dirs = TierDirs {
                root_set: 0,
                active: self.config.active_root.join(&category),
                inactive: self.config.inactive_root.as_ref().map(|p| p.join(&category)),
                archive: self.config.archive_root.join(&category),
                category,
            };
            ensure_mirrors(&dirs, &mut roots.issues);
            roots.add(dirs);
        }

        for (index, extra) in self.config.extra_roots.iter().enumerate() {
            for (category, active_dir) in &extra.categories {
                if self.config.is_ignored_category(category) {
                    continue;
                }
                let dirs = TierDirs {
                    category: category.clone(),
                    root_set: index + 1,
                    active: active_dir.clone(),
                    inactive: extra.inactive_root.as_ref().map(|p| p.join(category)),
                    archive: extra.archive_root.join(category),
                };
                ensure_mirrors(&dirs, &mut roots.issues);
                roots.add(dirs);
            }
        }

        self.list_examples(&mut roots);

        info!(
            "Resolved {} categories ({} issues)",
            roots.len(),
            roots.issues.len()
        );
        Ok(roots)
    }

    /// List every examples directory next to a tier directory, so that
    /// example assets of models not seen in this pass can still be checked.
    fn list_examples(&self, roots: &mut CategoryRoots) {
        let mut found = Listings::new();
        for dirs in roots.categories.values().flatten() {
            for (tier, tier_dir) in dirs.iter() {
                let Some(base) = tier_dir.parent() else {
                    continue;
                };
                let examples = base.join(&self.config.examples_dir);
                let key = (tier, dirs.location(tier, &examples));
                if found.contains_key(&key) || !examples.is_dir() {
                    continue;
                }
                match list_dir(&examples) {
                    Ok(listing) => {
                        found.insert(key, listing.dirs.into_iter().collect());
                    }
                    Err(e) => warn!("Cannot list {}: {}", examples.display(), e),
                }
            }
        }
        roots.listings.extend(found);
    }

    /// Every root set needs its own archive root.
    fn check_archive_roots(&self) -> Result<()> {
        let mut seen = BTreeSet::from([self.config.archive_root.as_path()]);
        for extra in &self.config.extra_roots {
            if !seen.insert(extra.archive_root.as_path()) {
                return Err(ArchivistError::DuplicateArchive(extra.archive_root.clone()));
            }
        }
        Ok(())
    }
}

/// Create any missing tier directory of a category.
fn ensure_mirrors(dirs: &TierDirs, issues: &mut Vec<ArchivistError>) {
    for (tier, dir) in dirs.iter() {
        if dir.is_dir() {
            continue;
        }
        match std::fs::create_dir_all(dir) {
            Ok(()) => debug!("Created {} mirror {}", tier, dir.display()),
            Err(e) => {
                warn!("Cannot create {} mirror {}: {}", tier, dir.display(), e);
                issues.push(ArchivistError::io_with_path(e, dir));
            }
        }
    }
}

/// Visible entries of one directory, sorted by name.
#[derive(Debug, Default)]
pub(crate) struct DirListing {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<String>,
}

/// List a single directory level.
///
/// Fails only when the directory itself cannot be read; unreadable entries
/// are skipped with a warning. Symlinks to files are listed as files;
/// symlinked directories are not descended into.
pub(crate) fn list_dir(dir: &Path) -> std::io::Result<DirListing> {
    let mut listing = DirListing::default();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    listing.dirs.push(name);
                } else if file_type.is_file() {
                    listing.files.push(entry.into_path());
                } else if file_type.is_symlink() {
                    if entry.path().is_file() {
                        listing.files.push(entry.into_path());
                    } else {
                        debug!("Not following link {}", entry.path().display());
                    }
                }
            }
            Err(e) if e.depth() == 0 => {
                let message = e.to_string();
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(message)));
            }
            Err(e) => warn!("Skipping unreadable entry in {}: {}", dir.display(), e),
        }
    }

    Ok(listing)
}

/// `/`-separated form of a relative path.
pub(crate) fn relative_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn absolute_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
