//! The archivist service: one object wiring locator, scanner and catalog.
//!
//! Construct it once at startup and share it by reference. Scan passes are
//! serialized; reads may run at any time and see each model either before or
//! after its update, never halfway.

use crate::catalog::{CatalogEntry, CatalogStore, SqliteCatalog};
use crate::config::ArchivistConfig;
use crate::error::{ArchivistError, ErrorCode, Result};
use crate::locator::PathLocator;
use crate::reconcile::{Coverage, ReconcileOutcome, ReconciliationEngine, SweepSummary};
use crate::scanner::{ContentScanner, ObservationSet};
use crate::types::ScanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// A problem recorded during a pass that did not abort it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ArchivistError> for ScanIssue {
    fn from(err: &ArchivistError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Summary of one `reconcile_all` pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: ScanId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub categories: usize,
    pub observed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub duplicates: usize,
    pub blocked: usize,
    pub retired_components: usize,
    pub missing_models: usize,
    pub issues: Vec<ScanIssue>,
}

impl ScanReport {
    fn new(scan_id: ScanId) -> Self {
        Self {
            scan_id,
            started_at: Utc::now(),
            finished_at: None,
            categories: 0,
            observed: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            duplicates: 0,
            blocked: 0,
            retired_components: 0,
            missing_models: 0,
            issues: Vec::new(),
        }
    }

    fn record(&mut self, err: &ArchivistError) {
        self.issues.push(ScanIssue::from(err));
    }

    fn count(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Inserted { .. } => self.inserted += 1,
            ReconcileOutcome::Updated { retired, .. } => {
                self.updated += 1;
                self.retired_components += retired;
            }
            ReconcileOutcome::Unchanged { .. } => self.unchanged += 1,
            ReconcileOutcome::Blocked { .. } => self.blocked += 1,
            ReconcileOutcome::Duplicate { .. } => self.duplicates += 1,
        }
    }

    fn apply_sweep(&mut self, sweep: SweepSummary) {
        self.retired_components += sweep.retired_components;
        self.missing_models += sweep.missing_models;
    }
}

/// Scan-and-reconcile service over a catalog store.
pub struct Archivist<S: CatalogStore = SqliteCatalog> {
    config: Arc<ArchivistConfig>,
    store: S,
    scanner: ContentScanner,
    pass_lock: Mutex<()>,
}

impl Archivist<SqliteCatalog> {
    /// Validate the configuration and open the SQLite catalog it names.
    pub fn open(mut config: ArchivistConfig) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let store = SqliteCatalog::open(&config.database_path)?;
        Self::with_store(config, store)
    }
}

impl<S: CatalogStore> Archivist<S> {
    /// Build the service over an already opened store.
    pub fn with_store(mut config: ArchivistConfig, store: S) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let config = Arc::new(config);
        let scanner = ContentScanner::new(Arc::clone(&config))?;

        Ok(Self {
            config,
            store,
            scanner,
            pass_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ArchivistConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one full scan pass over every category and tier.
    ///
    /// Configuration and database errors abort the pass; everything else is
    /// recorded in the report and on the affected rows.
    pub fn reconcile_all(&self) -> Result<ScanReport> {
        let _pass = self
            .pass_lock
            .lock()
            .map_err(|_| ArchivistError::Other("Scan pass lock poisoned".to_string()))?;

        let scan_id = ScanId::generate();
        let mut report = ScanReport::new(scan_id.clone());
        info!("Starting scan pass {}", scan_id);

        let mut roots = PathLocator::new(&self.config).resolve_roots()?;
        report.categories = roots.len();

        let mut coverage = Coverage::new();
        coverage.add_listings(roots.take_listings());
        for issue in roots.take_issues() {
            report.record(&issue);
        }

        let mut observations = ObservationSet::new();
        for (_, root_sets) in roots.iter() {
            for dirs in root_sets {
                let mut items = self.scanner.scan(dirs);
                for item in items.by_ref() {
                    match item {
                        Ok(observed) => observations.insert(observed),
                        Err(ArchivistError::InconsistentFilename { hash, paths }) => {
                            observations.mark_inconsistent(hash, paths);
                        }
                        Err(e) => report.record(&e),
                    }
                }
                coverage.add_listings(items.into_listings());
            }
        }

        let (models, inconsistent) = observations.into_parts();
        let mut engine = ReconciliationEngine::new(&self.store, scan_id.clone(), coverage);

        for (hash, paths) in inconsistent {
            engine.flag_inconsistent(&hash, &paths)?;
            report.record(&ArchivistError::InconsistentFilename { hash, paths });
        }

        for observed in &models {
            report.observed += 1;
            match engine.reconcile(observed) {
                Ok(outcome) => report.count(&outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to reconcile {}: {}", observed.hash, e);
                    report.record(&e);
                }
            }
        }

        let sweep = engine.sweep()?;
        report.apply_sweep(sweep);
        report.finished_at = Some(Utc::now());

        info!(
            "Scan pass {} done: {} observed, {} inserted, {} updated, {} issues",
            scan_id,
            report.observed,
            report.inserted,
            report.updated,
            report.issues.len()
        );
        Ok(report)
    }

    /// Every catalog row as a read-interface entry.
    pub fn list_models(
        &self,
        include_tags: bool,
        include_components: bool,
    ) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .store
            .list_models()?
            .iter()
            .map(|model| {
                CatalogEntry::from_model(
                    model,
                    self.config.category_label(&model.category),
                    include_tags,
                    include_components,
                )
            })
            .collect())
    }

    /// The entry for one content hash, with tags and components.
    pub fn get_model(&self, hash: &str) -> Result<Option<CatalogEntry>> {
        let hash = hash.trim().to_lowercase();
        Ok(self.store.get_by_hash(&hash)?.map(|model| {
            CatalogEntry::from_model(
                &model,
                self.config.category_label(&model.category),
                true,
                true,
            )
        }))
    }

    /// Operator resolution: drop every error code from a row so the next pass
    /// may update it again.
    pub fn clear_errors(&self, model_id: i64) -> Result<()> {
        if self.store.clear_errors(model_id)? {
            info!("Cleared errors on model {}", model_id);
            Ok(())
        } else {
            Err(ArchivistError::ModelNotFound { model_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelStatus;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_archivist() -> (Archivist, TempDir) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("models").join("checkpoints")).unwrap();
        let config = ArchivistConfig::new(
            root.join("models"),
            root.join("archive"),
            root.join("data").join("catalog.db"),
        );
        (Archivist::open(config).unwrap(), temp)
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        let mut config = ArchivistConfig::new(
            temp.path().join("models"),
            temp.path().join("archive"),
            temp.path().join("catalog.db"),
        );
        config.hash_workers = 0;
        assert!(matches!(
            Archivist::open(config),
            Err(ArchivistError::Config { .. })
        ));
    }

    #[test]
    fn test_reconcile_all_report() {
        let (archivist, temp) = create_test_archivist();
        let checkpoints = temp.path().join("models").join("checkpoints");
        fs::write(checkpoints.join("a.safetensors"), b"a").unwrap();
        fs::write(checkpoints.join("b.safetensors"), b"b").unwrap();

        let report = archivist.reconcile_all().unwrap();
        assert_eq!(report.categories, 1);
        assert_eq!(report.observed, 2);
        assert_eq!(report.inserted, 2);
        assert!(report.issues.is_empty());
        assert!(report.finished_at.is_some());

        let report = archivist.reconcile_all().unwrap();
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.inserted, 0);
    }

    #[test]
    fn test_get_model_and_labels() {
        let (archivist, temp) = create_test_archivist();
        let path = temp.path().join("models").join("checkpoints").join("a.safetensors");
        fs::write(&path, b"a").unwrap();
        archivist.reconcile_all().unwrap();

        let hash = crate::hashing::compute_sha256(&path).unwrap();
        let entry = archivist.get_model(&hash.to_uppercase()).unwrap().unwrap();
        assert_eq!(entry.name, "a");
        assert_eq!(entry.status, ModelStatus::Active);
        assert_eq!(entry.category, "checkpoints");
        assert_eq!(entry.components.map(|c| c.len()), Some(2));
        assert!(archivist.get_model("0000").unwrap().is_none());
    }

    #[test]
    fn test_clear_errors_unknown_model() {
        let (archivist, _temp) = create_test_archivist();
        assert!(matches!(
            archivist.clear_errors(12),
            Err(ArchivistError::ModelNotFound { model_id: 12 })
        ));
    }

    #[test]
    fn test_missing_active_root_is_fatal() {
        let (archivist, temp) = create_test_archivist();
        fs::remove_dir_all(temp.path().join("models")).unwrap();
        assert!(matches!(
            archivist.reconcile_all(),
            Err(ArchivistError::UnresolvableRoot { .. })
        ));
    }
}
