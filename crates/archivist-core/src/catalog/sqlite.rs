//! SQLite catalog store.

use super::store::CatalogStore;
use super::types::{Component, Model};
use crate::error::{ArchivistError, ErrorCode, Result};
use crate::types::ScanId;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

const MODEL_COLUMNS: &str = "id, content_hash, name, category, relative_path,
    active_present, inactive_present, archive_present,
    last_scan_id, errors_json, error_scan_id, updated_at";

/// Catalog backed by a single SQLite file.
///
/// The hash column is indexed but not unique, so a duplicate state can be
/// stored and flagged rather than silently merged.
pub struct SqliteCatalog {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Create or open a catalog at the given path.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ArchivistError::Io {
                    message: format!("Failed to create directory {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;
        debug!("Opened catalog at {}", db_path.display());

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                active_present INTEGER NOT NULL DEFAULT 0,
                inactive_present INTEGER NOT NULL DEFAULT 0,
                archive_present INTEGER NOT NULL DEFAULT 0,
                last_scan_id TEXT NOT NULL,
                errors_json TEXT NOT NULL DEFAULT '[]',
                error_scan_id TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_models_hash ON models(content_hash);

            CREATE TABLE IF NOT EXISTS model_tags (
                model_id INTEGER NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                PRIMARY KEY (model_id, tag)
            );

            CREATE TABLE IF NOT EXISTS components (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_id INTEGER NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                tier TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                present INTEGER NOT NULL DEFAULT 1,
                last_scan_id TEXT NOT NULL,
                UNIQUE (model_id, tier, relative_path, file_name)
            );
            CREATE INDEX IF NOT EXISTS idx_components_model ON components(model_id);
            ",
        )?;
        Ok(())
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ArchivistError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    fn row_to_model(row: &Row) -> rusqlite::Result<Model> {
        let errors_json: String = row.get(9)?;
        let errors = parse_errors(&errors_json, 9)?;

        Ok(Model {
            id: Some(row.get(0)?),
            content_hash: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            relative_path: row.get(4)?,
            tags: Vec::new(),
            active_present: row.get(5)?,
            inactive_present: row.get(6)?,
            archive_present: row.get(7)?,
            last_scan_id: row.get(8)?,
            errors,
            error_scan_id: row.get(10)?,
            updated_at: row.get(11)?,
            components: Vec::new(),
        })
    }

    fn row_to_component(row: &Row) -> rusqlite::Result<Component> {
        let tier: String = row.get(1)?;
        let kind: String = row.get(4)?;

        Ok(Component {
            id: Some(row.get(0)?),
            tier: tier
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(1, tier.clone(), Type::Text))?,
            relative_path: row.get(2)?,
            file_name: row.get(3)?,
            kind: kind
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(4, kind.clone(), Type::Text))?,
            present: row.get(5)?,
            last_scan_id: row.get(6)?,
        })
    }

    fn load_models(conn: &Connection, filter: &str, params: impl Params) -> Result<Vec<Model>> {
        let sql = format!("SELECT {} FROM models {} ORDER BY id", MODEL_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, Self::row_to_model)?;

        let mut models = Vec::new();
        for row in rows {
            models.push(row?);
        }
        for model in &mut models {
            Self::load_children(conn, model)?;
        }
        Ok(models)
    }

    fn load_children(conn: &Connection, model: &mut Model) -> Result<()> {
        let Some(id) = model.id else {
            return Ok(());
        };

        let mut stmt = conn.prepare("SELECT tag FROM model_tags WHERE model_id = ?1 ORDER BY rowid")?;
        let tags = stmt.query_map(params![id], |row| row.get(0))?;
        for tag in tags {
            model.tags.push(tag?);
        }

        let mut stmt = conn.prepare(
            "SELECT id, tier, relative_path, file_name, kind, present, last_scan_id
             FROM components WHERE model_id = ?1 ORDER BY id",
        )?;
        let components = stmt.query_map(params![id], Self::row_to_component)?;
        for component in components {
            model.components.push(component?);
        }
        Ok(())
    }

    fn ids_for_hash(conn: &Connection, hash: &str) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare("SELECT id FROM models WHERE content_hash = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![hash], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn update_fields(
        conn: &Connection,
        id: i64,
        model: &Model,
        errors_json: &str,
        now: &str,
    ) -> Result<usize> {
        let updated = conn.execute(
            "UPDATE models SET
                 content_hash = ?1, name = ?2, category = ?3, relative_path = ?4,
                 active_present = ?5, inactive_present = ?6, archive_present = ?7,
                 last_scan_id = ?8, errors_json = ?9, error_scan_id = ?10, updated_at = ?11
             WHERE id = ?12",
            params![
                model.content_hash,
                model.name,
                model.category,
                model.relative_path,
                model.active_present,
                model.inactive_present,
                model.archive_present,
                model.last_scan_id,
                errors_json,
                model.error_scan_id,
                now,
                id,
            ],
        )?;
        Ok(updated)
    }
}

impl CatalogStore for SqliteCatalog {
    fn find_by_hash(&self, hash: &str) -> Result<Vec<Model>> {
        let conn = self.lock()?;
        Self::load_models(&conn, "WHERE content_hash = ?1", params![hash])
    }

    fn get(&self, id: i64) -> Result<Option<Model>> {
        let conn = self.lock()?;
        let mut models = Self::load_models(&conn, "WHERE id = ?1", params![id])?;
        Ok(models.pop())
    }

    fn save(&self, model: &Model) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let now = chrono::Utc::now().to_rfc3339();
        let errors_json = serde_json::to_string(&model.errors)?;

        let id = match model.id {
            Some(id) => {
                if Self::update_fields(&tx, id, model, &errors_json, &now)? == 0 {
                    return Err(ArchivistError::ModelNotFound { model_id: id });
                }
                id
            }
            None => {
                let ids = Self::ids_for_hash(&tx, &model.content_hash)?;
                match ids.as_slice() {
                    [] => {
                        tx.execute(
                            "INSERT INTO models (content_hash, name, category, relative_path,
                                 active_present, inactive_present, archive_present,
                                 last_scan_id, errors_json, error_scan_id, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                            params![
                                model.content_hash,
                                model.name,
                                model.category,
                                model.relative_path,
                                model.active_present,
                                model.inactive_present,
                                model.archive_present,
                                model.last_scan_id,
                                errors_json,
                                model.error_scan_id,
                                now,
                            ],
                        )?;
                        tx.last_insert_rowid()
                    }
                    [id] => {
                        Self::update_fields(&tx, *id, model, &errors_json, &now)?;
                        *id
                    }
                    _ => {
                        return Err(ArchivistError::DuplicateHash {
                            hash: model.content_hash.clone(),
                            model_ids: ids.clone(),
                        })
                    }
                }
            }
        };

        tx.execute("DELETE FROM model_tags WHERE model_id = ?1", params![id])?;
        for tag in &model.tags {
            tx.execute(
                "INSERT OR IGNORE INTO model_tags (model_id, tag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
        }

        for component in &model.components {
            tx.execute(
                "INSERT INTO components (model_id, tier, relative_path, file_name, kind,
                                         present, last_scan_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(model_id, tier, relative_path, file_name) DO UPDATE SET
                     kind = excluded.kind,
                     present = excluded.present,
                     last_scan_id = excluded.last_scan_id",
                params![
                    id,
                    component.tier.as_str(),
                    component.relative_path,
                    component.file_name,
                    component.kind.as_str(),
                    component.present,
                    component.last_scan_id,
                ],
            )?;
        }

        tx.commit()?;
        debug!("Saved model {} ({})", id, model.content_hash);
        Ok(id)
    }

    fn flag_error(&self, ids: &[i64], code: ErrorCode, scan_id: &ScanId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        for id in ids {
            let errors_json: Option<String> = tx
                .query_row(
                    "SELECT errors_json FROM models WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(errors_json) = errors_json else {
                warn!("Cannot flag unknown model {}", id);
                continue;
            };

            let mut errors = parse_errors(&errors_json, 0)?;
            errors.insert(code);
            tx.execute(
                "UPDATE models SET errors_json = ?1, error_scan_id = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![serde_json::to_string(&errors)?, scan_id.as_str(), now, id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn clear_errors(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE models SET errors_json = '[]', error_scan_id = NULL, updated_at = ?1
             WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }

    fn list_models(&self) -> Result<Vec<Model>> {
        let conn = self.lock()?;
        Self::load_models(&conn, "", [])
    }

    fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM models", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Error codes of a row; an unreadable value fails the read instead of
/// silently unblocking the row.
fn parse_errors(json: &str, column: usize) -> rusqlite::Result<BTreeSet<ErrorCode>> {
    serde_json::from_str(json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
