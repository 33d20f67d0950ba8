//! Reconciliation Engine - merges observed models into the catalog.
//!
//! One engine lives for exactly one scan pass. Each content hash may be
//! reconciled once; the scanner's [`ObservationSet`](crate::scanner::ObservationSet)
//! merges every sighting of a hash before it gets here. Rows carrying an
//! identity error are never mutated.

use crate::catalog::{CatalogStore, Component, ComponentKey, Model};
use crate::error::{ArchivistError, ErrorCode, Result};
use crate::locator::Listings;
use crate::scanner::{ObservedComponent, ObservedModel};
use crate::types::{ScanId, Tier};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a single reconcile call did to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First sighting of the hash
    Inserted { id: i64 },
    /// Fields or components changed; `retired` components are now not-present
    Updated { id: i64, retired: usize },
    /// Row revisited with nothing to change
    Unchanged { id: i64 },
    /// Row frozen by an identity error
    Blocked { id: i64 },
    /// Several rows share the hash; all of them were flagged
    Duplicate { ids: Vec<i64> },
}

/// Which parts of the storage a pass actually looked at.
///
/// Holds every directory listed during the pass with the names of its
/// subdirectories. A location counts as scanned when it was listed itself,
/// or when its nearest listed ancestor shows it no longer exists. Components
/// anywhere else keep their last known state.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    listings: Listings,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge directory listings; subdirectories of a repeated location are
    /// united.
    pub fn add_listings(
        &mut self,
        listings: impl IntoIterator<Item = ((Tier, String), BTreeSet<String>)>,
    ) {
        for (key, subdirs) in listings {
            self.listings.entry(key).or_default().extend(subdirs);
        }
    }

    /// Record one listed location.
    pub fn record<I, N>(&mut self, tier: Tier, location: &str, subdirs: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let subdirs = subdirs.into_iter().map(Into::into).collect();
        self.add_listings([((tier, location.to_string()), subdirs)]);
    }

    /// Whether the pass knows the current contents of `location` on `tier`.
    pub fn is_location_scanned(&self, tier: Tier, location: &str) -> bool {
        if self.listings.contains_key(&(tier, location.to_string())) {
            return true;
        }

        // Extra root sets use absolute locations; never climb past their root
        let absolute = location.starts_with('/') || Path::new(location).is_absolute();
        let mut child = location;
        while let Some((parent, name)) = split_location(child) {
            if absolute && parent.is_empty() {
                break;
            }
            if let Some(subdirs) = self.listings.get(&(tier, parent.to_string())) {
                return !subdirs.contains(name);
            }
            child = parent;
        }
        false
    }
}

/// `checkpoints/sd15` into `("checkpoints", "sd15")`, `checkpoints` into
/// `("", "checkpoints")`.
fn split_location(location: &str) -> Option<(&str, &str)> {
    if location.is_empty() {
        return None;
    }
    Some(location.rsplit_once('/').unwrap_or(("", location)))
}

/// Totals from the post-pass sweep of unobserved models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub retired_components: usize,
    pub missing_models: usize,
}

/// Merges observations of one pass into a catalog store.
pub struct ReconciliationEngine<'a, S: CatalogStore + ?Sized> {
    store: &'a S,
    scan_id: ScanId,
    coverage: Coverage,
    reconciled: HashSet<String>,
}

impl<'a, S: CatalogStore + ?Sized> ReconciliationEngine<'a, S> {
    pub fn new(store: &'a S, scan_id: ScanId, coverage: Coverage) -> Self {
        Self {
            store,
            scan_id,
            coverage,
            reconciled: HashSet::new(),
        }
    }

    pub fn scan_id(&self) -> &ScanId {
        &self.scan_id
    }

    /// Merge one observed model into the catalog.
    ///
    /// Returns [`ArchivistError::ReconciledTwice`] if the hash was already
    /// handled by this pass; the affected rows are flagged.
    pub fn reconcile(&mut self, observed: &ObservedModel) -> Result<ReconcileOutcome> {
        if !self.reconciled.insert(observed.hash.clone()) {
            return self.reject_repeat(&observed.hash);
        }

        let mut rows = self.store.find_by_hash(&observed.hash)?;
        if rows.len() > 1 {
            let ids: Vec<i64> = rows.iter().filter_map(|m| m.id).collect();
            warn!("Duplicate rows {:?} for hash {}", ids, observed.hash);
            self.store
                .flag_error(&ids, ErrorCode::DuplicateHash, &self.scan_id)?;
            return Ok(ReconcileOutcome::Duplicate { ids });
        }

        match rows.pop() {
            None => self.insert(observed),
            Some(existing) if existing.is_blocked() => {
                let id = row_id(&existing)?;
                warn!(
                    "Model {} ({}) is blocked by {:?}, not updating",
                    id, existing.content_hash, existing.errors
                );
                Ok(ReconcileOutcome::Blocked { id })
            }
            Some(existing) if existing.last_scan_id == self.scan_id.as_str() => {
                self.reject_repeat(&observed.hash)
            }
            Some(existing) => self.update(existing, observed),
        }
    }

    /// Flag every row of a hash found under more than one file name.
    ///
    /// The hash is not reconciled for the rest of the pass.
    pub fn flag_inconsistent(&mut self, hash: &str, paths: &[PathBuf]) -> Result<Vec<i64>> {
        self.reconciled.insert(hash.to_string());
        let ids: Vec<i64> = self
            .store
            .find_by_hash(hash)?
            .iter()
            .filter_map(|m| m.id)
            .collect();
        warn!("Inconsistent file names for {}: {:?}", hash, paths);
        if !ids.is_empty() {
            self.store
                .flag_error(&ids, ErrorCode::InconsistentFilename, &self.scan_id)?;
        }
        Ok(ids)
    }

    /// Retire what this pass should have seen but did not.
    ///
    /// Every unblocked row not reconciled in this pass loses the components
    /// whose location was scanned. A row left without any present primary
    /// file is marked `MODEL_MISSING`.
    pub fn sweep(&mut self) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();

        for existing in self.store.list_models()? {
            if self.reconciled.contains(&existing.content_hash)
                || existing.last_scan_id == self.scan_id.as_str()
                || existing.is_blocked()
            {
                continue;
            }

            let mut model = existing.clone();
            let mut retired = 0;
            for component in &mut model.components {
                if component.present
                    && self
                        .coverage
                        .is_location_scanned(component.tier, &component.relative_path)
                {
                    component.present = false;
                    retired += 1;
                }
            }
            model.refresh_presence();
            if !Tier::ALL.iter().any(|tier| model.has_primary_on(*tier))
                && model.errors.insert(ErrorCode::ModelMissing)
            {
                model.error_scan_id = Some(self.scan_id.to_string());
                summary.missing_models += 1;
            }

            if model.same_state(&existing) {
                continue;
            }
            debug!(
                "Sweeping {} ({}): {} components retired",
                model.name, model.content_hash, retired
            );
            self.store.save(&model)?;
            summary.retired_components += retired;
        }

        if summary.retired_components > 0 || summary.missing_models > 0 {
            info!(
                "Sweep retired {} components, {} models missing",
                summary.retired_components, summary.missing_models
            );
        }
        Ok(summary)
    }

    fn insert(&self, observed: &ObservedModel) -> Result<ReconcileOutcome> {
        let mut model = Model::new(&observed.hash, &observed.name, &observed.category);
        model.relative_path = observed.relative_path.clone();
        model.tags = observed.tags.clone();
        model.last_scan_id = self.scan_id.to_string();
        model.components = observed
            .components
            .iter()
            .map(|seen| self.new_component(seen))
            .collect();
        model.refresh_presence();

        let id = self.store.save(&model)?;
        info!("Added model {} ({}) as {}", model.name, model.content_hash, id);
        Ok(ReconcileOutcome::Inserted { id })
    }

    fn update(&self, existing: Model, observed: &ObservedModel) -> Result<ReconcileOutcome> {
        let mut model = existing.clone();
        model.name = observed.name.clone();
        model.tags = observed.tags.clone();
        model.category = observed.category.clone();
        model.relative_path = observed.relative_path.clone();
        model.last_scan_id = self.scan_id.to_string();

        let mut unseen: HashMap<ComponentKey, &ObservedComponent> = observed
            .components
            .iter()
            .map(|seen| (seen.key(), seen))
            .collect();

        let mut retired = 0;
        for component in &mut model.components {
            if let Some(seen) = unseen.remove(&component.key()) {
                component.kind = seen.kind;
                component.present = true;
                component.last_scan_id = self.scan_id.to_string();
            } else if component.present
                && self
                    .coverage
                    .is_location_scanned(component.tier, &component.relative_path)
            {
                debug!(
                    "Retiring {} {}/{}",
                    component.tier, component.relative_path, component.file_name
                );
                component.present = false;
                retired += 1;
            }
        }
        for seen in &observed.components {
            if unseen.contains_key(&seen.key()) {
                model.components.push(self.new_component(seen));
            }
        }

        model.errors.remove(&ErrorCode::ModelMissing);
        if model.errors.is_empty() {
            model.error_scan_id = None;
        }
        model.refresh_presence();

        let changed = !model.same_state(&existing);
        let id = self.store.save(&model)?;
        if changed {
            debug!("Updated model {} ({})", model.name, model.content_hash);
            Ok(ReconcileOutcome::Updated { id, retired })
        } else {
            Ok(ReconcileOutcome::Unchanged { id })
        }
    }

    fn reject_repeat(&self, hash: &str) -> Result<ReconcileOutcome> {
        let ids: Vec<i64> = self
            .store
            .find_by_hash(hash)?
            .iter()
            .filter_map(|m| m.id)
            .collect();
        warn!("Hash {} reconciled twice in scan {}", hash, self.scan_id);
        if !ids.is_empty() {
            self.store
                .flag_error(&ids, ErrorCode::ReconciledTwice, &self.scan_id)?;
        }
        Err(ArchivistError::ReconciledTwice {
            hash: hash.to_string(),
            scan_id: self.scan_id.to_string(),
        })
    }

    fn new_component(&self, seen: &ObservedComponent) -> Component {
        Component {
            id: None,
            tier: seen.tier,
            relative_path: seen.relative_path.clone(),
            file_name: seen.file_name.clone(),
            kind: seen.kind,
            present: true,
            last_scan_id: self.scan_id.to_string(),
        }
    }
}

fn row_id(model: &Model) -> Result<i64> {
    model
        .id
        .ok_or_else(|| ArchivistError::Other(format!("Unsaved row for {}", model.content_hash)))
}
