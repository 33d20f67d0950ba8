//! Content Scanner - walks the tier directories of a category in lock-step.
//!
//! Each directory level is listed on every tier at once. Model files are
//! resolved to a content hash through their sidecar and grouped by hash;
//! companions sharing the model's stem and example assets under
//! `examples/<hash>/` are attached to the group. One [`ObservedModel`] is
//! yielded per distinct hash per level.
//!
//! # Tier symmetry
//!
//! Before descending, any subdirectory present on one tier is created on the
//! others, so every tier has the same directory skeleton.

use crate::config::ArchivistConfig;
use crate::error::{ArchivistError, Result};
use crate::locator::{list_dir, relative_string, Listings, TierDirs};
use crate::metadata::{file_stem, SidecarManager, SidecarRecord};
use crate::types::{ComponentKind, Tier};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One file seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedComponent {
    pub tier: Tier,
    /// Location of the containing directory (see [`TierDirs::location`])
    pub relative_path: String,
    pub file_name: String,
    pub kind: ComponentKind,
    /// Absolute location on disk
    pub path: PathBuf,
}

impl ObservedComponent {
    /// Identity of the component within its model.
    pub fn key(&self) -> (Tier, String, String) {
        (self.tier, self.relative_path.clone(), self.file_name.clone())
    }
}

/// A model as found on disk during one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedModel {
    pub hash: String,
    /// Primary file name without extension
    pub stem: String,
    pub name: String,
    pub tags: Vec<String>,
    pub category: String,
    /// Directory level relative to the category directory
    pub relative_path: String,
    pub components: Vec<ObservedComponent>,
}

impl ObservedModel {
    /// Whether a primary file was seen on the tier.
    pub fn present_on(&self, tier: Tier) -> bool {
        self.components
            .iter()
            .any(|c| c.tier == tier && c.kind == ComponentKind::Primary)
    }

    pub fn primary_paths(&self) -> Vec<PathBuf> {
        self.components
            .iter()
            .filter(|c| c.kind == ComponentKind::Primary)
            .map(|c| c.path.clone())
            .collect()
    }

    fn add_components(&mut self, components: impl IntoIterator<Item = ObservedComponent>) {
        for component in components {
            let key = component.key();
            if !self.components.iter().any(|c| c.key() == key) {
                self.components.push(component);
            }
        }
        self.components.sort_by(|a, b| {
            (a.tier, &a.relative_path, &a.file_name).cmp(&(b.tier, &b.relative_path, &b.file_name))
        });
    }
}

/// Walks tier directories and produces observed models.
pub struct ContentScanner {
    config: Arc<ArchivistConfig>,
    sidecars: SidecarManager,
    pool: rayon::ThreadPool,
}

impl ContentScanner {
    /// Create a scanner with a hashing pool of `config.hash_workers` threads.
    pub fn new(config: Arc<ArchivistConfig>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.hash_workers)
            .thread_name(|i| format!("archivist-hash-{}", i))
            .build()
            .map_err(|e| ArchivistError::config(format!("Failed to build hash pool: {}", e)))?;
        let sidecars = SidecarManager::from_config(&config);

        Ok(Self {
            config,
            sidecars,
            pool,
        })
    }

    pub fn sidecars(&self) -> &SidecarManager {
        &self.sidecars
    }

    /// Scan one root set. The returned iterator is single-use and lazy:
    /// each directory level is read when the previous one is exhausted.
    pub fn scan<'a>(&'a self, dirs: &'a TierDirs) -> ScanIter<'a> {
        info!("Scanning category {} at {}", dirs.category, dirs.active.display());
        ScanIter {
            scanner: self,
            dirs,
            pending: vec![PathBuf::new()],
            ready: VecDeque::new(),
            listings: Listings::new(),
        }
    }
}

/// Lazy, finite sequence of observations for one root set.
///
/// Per-location and per-file problems are yielded as `Err` items and the
/// iteration continues with the rest of the tree.
pub struct ScanIter<'a> {
    scanner: &'a ContentScanner,
    dirs: &'a TierDirs,
    /// Directory levels still to visit, relative to the tier directories
    pending: Vec<PathBuf>,
    ready: VecDeque<Result<ObservedModel>>,
    listings: Listings,
}

impl ScanIter<'_> {
    /// Locations listed successfully so far, with their subdirectories.
    ///
    /// Once the iterator is exhausted this is every location the scan
    /// covered; a known component in any other location was not looked for.
    pub fn listings(&self) -> &Listings {
        &self.listings
    }

    pub fn into_listings(self) -> Listings {
        self.listings
    }
}

impl Iterator for ScanIter<'_> {
    type Item = Result<ObservedModel>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let level = self.pending.pop()?;
            self.scan_level(&level);
        }
    }
}

/// Files of one hash at one level, before they become an [`ObservedModel`].
struct HashGroup {
    stem: String,
    record: SidecarRecord,
    components: Vec<ObservedComponent>,
    primary_paths: Vec<PathBuf>,
    inconsistent: bool,
}

impl ScanIter<'_> {
    fn scan_level(&mut self, level: &Path) {
        let config = &self.scanner.config;
        let mut files: Vec<(Tier, PathBuf)> = Vec::new();
        let mut subdirs: BTreeSet<String> = BTreeSet::new();
        let mut readable: Vec<(Tier, PathBuf, BTreeSet<String>)> = Vec::new();

        for (tier, tier_dir) in self.dirs.iter() {
            let dir = tier_dir.join(level);
            match list_dir(&dir) {
                Ok(listing) => {
                    files.extend(listing.files.into_iter().map(|f| (tier, f)));
                    let found: BTreeSet<String> = listing.dirs.into_iter().collect();
                    subdirs.extend(found.iter().cloned());
                    readable.push((tier, dir, found));
                }
                Err(e) => {
                    warn!("Inaccessible {} location {}: {}", tier, dir.display(), e);
                    self.ready.push_back(Err(ArchivistError::Inaccessible {
                        tier,
                        path: dir,
                        message: e.to_string(),
                    }));
                }
            }
        }

        // Mirror the subdirectory skeleton before descending
        for (tier, dir, mut found) in readable {
            for name in &subdirs {
                if found.contains(name) {
                    continue;
                }
                let sub = dir.join(name);
                match std::fs::create_dir(&sub) {
                    Ok(()) => {
                        debug!("Created {} mirror {}", tier, sub.display());
                        found.insert(name.clone());
                    }
                    Err(e) => {
                        warn!("Cannot create {} mirror {}: {}", tier, sub.display(), e);
                        self.ready
                            .push_back(Err(ArchivistError::io_with_path(e, sub)));
                    }
                }
            }
            let location = self.dirs.location(tier, &dir);
            self.listings.insert((tier, location), found);
        }
        for name in subdirs.iter().rev() {
            self.pending.push(level.join(name));
        }

        let sidecars = &self.scanner.sidecars;
        let (model_files, other_files): (Vec<_>, Vec<_>) = files
            .into_iter()
            .filter(|(_, path)| !sidecars.is_sidecar(path))
            .partition(|(_, path)| config.is_model_file(path));

        // Hashing is the expensive part; run it on the bounded pool
        let resolved: Vec<Result<SidecarRecord>> = self.scanner.pool.install(|| {
            model_files
                .par_iter()
                .map(|(_, path)| sidecars.ensure_metadata(path))
                .collect()
        });

        let mut groups: BTreeMap<String, HashGroup> = BTreeMap::new();
        for ((tier, path), record) in model_files.into_iter().zip(resolved) {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    self.ready.push_back(Err(e));
                    continue;
                }
            };
            let stem = file_stem(&path);
            let group = groups
                .entry(record.sha256.clone())
                .or_insert_with(|| HashGroup {
                    stem: stem.clone(),
                    record: record.clone(),
                    components: Vec::new(),
                    primary_paths: Vec::new(),
                    inconsistent: false,
                });
            if group.stem != stem {
                group.inconsistent = true;
            }
            group.primary_paths.push(path.clone());
            group
                .components
                .push(observe(self.dirs, tier, &path, ComponentKind::Primary));
            if record.path.is_file() {
                group.components.push(observe(
                    self.dirs,
                    tier,
                    &record.path,
                    ComponentKind::Metadata,
                ));
            }
        }

        // Companions attach to the model with the longest matching stem
        for (tier, path) in &other_files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let best = groups
                .values()
                .filter(|g| name.starts_with(&format!("{}.", g.stem)))
                .map(|g| g.stem.len())
                .max();
            let Some(best) = best else {
                continue;
            };
            for group in groups.values_mut().filter(|g| g.stem.len() == best) {
                if name.starts_with(&format!("{}.", group.stem)) {
                    group
                        .components
                        .push(observe(self.dirs, *tier, path, ComponentKind::Auxiliary));
                }
            }
        }

        let level_name = relative_string(level);
        for (hash, mut group) in groups {
            if group.inconsistent {
                warn!("Hash {} has inconsistent file names: {:?}", hash, group.primary_paths);
                self.ready.push_back(Err(ArchivistError::InconsistentFilename {
                    hash,
                    paths: group.primary_paths,
                }));
                continue;
            }

            self.attach_examples(&hash, &mut group.components);

            let mut observed = ObservedModel {
                hash,
                stem: group.stem,
                name: group.record.model_name,
                tags: group.record.tags,
                category: self.dirs.category.clone(),
                relative_path: level_name.clone(),
                components: Vec::new(),
            };
            observed.add_components(group.components);
            debug!(
                "Observed {} ({}) with {} components",
                observed.name,
                observed.hash,
                observed.components.len()
            );
            self.ready.push_back(Ok(observed));
        }
    }

    /// Add files under `<tier parent>/examples/<hash>/` from every tier.
    fn attach_examples(&mut self, hash: &str, components: &mut Vec<ObservedComponent>) {
        let examples_dir = &self.scanner.config.examples_dir;
        for (tier, tier_dir) in self.dirs.iter() {
            let Some(base) = tier_dir.parent() else {
                continue;
            };
            let dir = base.join(examples_dir).join(hash);
            if !dir.exists() {
                continue;
            }
            match list_dir(&dir) {
                Ok(listing) => {
                    let location = self.dirs.location(tier, &dir);
                    self.listings
                        .insert((tier, location), listing.dirs.into_iter().collect());
                    components.extend(
                        listing
                            .files
                            .iter()
                            .map(|f| observe(self.dirs, tier, f, ComponentKind::Example)),
                    );
                }
                Err(e) => {
                    warn!("Inaccessible examples {}: {}", dir.display(), e);
                    self.ready.push_back(Err(ArchivistError::Inaccessible {
                        tier,
                        path: dir,
                        message: e.to_string(),
                    }));
                }
            }
        }
    }
}

fn observe(dirs: &TierDirs, tier: Tier, path: &Path, kind: ComponentKind) -> ObservedComponent {
    let parent = path.parent().unwrap_or(path);
    ObservedComponent {
        tier,
        relative_path: dirs.location(tier, parent),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        kind,
        path: path.to_path_buf(),
    }
}

/// Observations of a whole pass, merged by hash.
///
/// The same model may be seen at several directory levels or through several
/// root sets; the catalog must receive it exactly once per pass.
#[derive(Debug, Default)]
pub struct ObservationSet {
    models: BTreeMap<String, ObservedModel>,
    inconsistent: BTreeMap<String, Vec<PathBuf>>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an observation; a stem mismatch poisons the hash.
    pub fn insert(&mut self, observed: ObservedModel) {
        if let Some(paths) = self.inconsistent.get_mut(&observed.hash) {
            paths.extend(observed.primary_paths());
            return;
        }

        match self.models.get_mut(&observed.hash) {
            None => {
                self.models.insert(observed.hash.clone(), observed);
            }
            Some(existing) if existing.stem == observed.stem => {
                existing.add_components(observed.components);
            }
            Some(_) => {
                let hash = observed.hash.clone();
                let mut paths = observed.primary_paths();
                if let Some(existing) = self.models.remove(&hash) {
                    paths.extend(existing.primary_paths());
                }
                warn!("Hash {} found under different names: {:?}", hash, paths);
                self.inconsistent.insert(hash, paths);
            }
        }
    }

    /// Record a hash the scanner already found inconsistent.
    pub fn mark_inconsistent(&mut self, hash: String, paths: Vec<PathBuf>) {
        let mut all = paths;
        if let Some(existing) = self.models.remove(&hash) {
            all.extend(existing.primary_paths());
        }
        self.inconsistent.entry(hash).or_default().extend(all);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Consistent observations, and poisoned hashes with their file paths.
    pub fn into_parts(self) -> (Vec<ObservedModel>, BTreeMap<String, Vec<PathBuf>>) {
        (self.models.into_values().collect(), self.inconsistent)
    }
}
