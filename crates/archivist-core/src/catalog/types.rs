//! Catalog rows and the read-interface views built from them.

use crate::error::ErrorCode;
use crate::types::{ComponentKind, ModelStatus, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity of a component within its model: tier, relative path, file name.
pub type ComponentKey = (Tier, String, String);

/// A file associated with a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: Option<i64>,
    pub tier: Tier,
    pub relative_path: String,
    pub file_name: String,
    pub kind: ComponentKind,
    pub present: bool,
    pub last_scan_id: String,
}

impl Component {
    pub fn key(&self) -> ComponentKey {
        (self.tier, self.relative_path.clone(), self.file_name.clone())
    }
}

/// A catalog row, identified by the content hash of its primary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Row id, `None` until first saved
    pub id: Option<i64>,
    pub content_hash: String,
    pub name: String,
    pub category: String,
    /// Directory level the model was last seen at, relative to its category
    pub relative_path: String,
    pub tags: Vec<String>,
    pub active_present: bool,
    pub inactive_present: bool,
    pub archive_present: bool,
    pub last_scan_id: String,
    pub errors: BTreeSet<ErrorCode>,
    /// Scan that recorded the current errors
    pub error_scan_id: Option<String>,
    pub updated_at: String,
    pub components: Vec<Component>,
}

impl Model {
    /// A fresh, unsaved row.
    pub fn new(
        content_hash: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            content_hash: content_hash.into(),
            name: name.into(),
            category: category.into(),
            relative_path: String::new(),
            tags: Vec::new(),
            active_present: false,
            inactive_present: false,
            archive_present: false,
            last_scan_id: String::new(),
            errors: BTreeSet::new(),
            error_scan_id: None,
            updated_at: String::new(),
            components: Vec::new(),
        }
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus::from_presence(self.active_present, self.inactive_present)
    }

    /// Whether an identity error freezes this row.
    pub fn is_blocked(&self) -> bool {
        self.errors.iter().any(ErrorCode::blocks_mutation)
    }

    /// Whether a present primary file is known on the tier.
    pub fn has_primary_on(&self, tier: Tier) -> bool {
        self.components
            .iter()
            .any(|c| c.tier == tier && c.kind == ComponentKind::Primary && c.present)
    }

    /// Recompute the tier flags from the present primary components.
    pub fn refresh_presence(&mut self) {
        self.active_present = self.has_primary_on(Tier::Active);
        self.inactive_present = self.has_primary_on(Tier::Inactive);
        self.archive_present = self.has_primary_on(Tier::Archive);
    }

    /// Compare everything the read interface exposes, ignoring scan ids and
    /// timestamps.
    pub fn same_state(&self, other: &Model) -> bool {
        fn component_state(c: &Component) -> (ComponentKey, ComponentKind, bool) {
            (c.key(), c.kind, c.present)
        }

        let mut ours: Vec<_> = self.components.iter().map(component_state).collect();
        let mut theirs: Vec<_> = other.components.iter().map(component_state).collect();
        ours.sort();
        theirs.sort();

        self.name == other.name
            && self.category == other.category
            && self.relative_path == other.relative_path
            && self.tags == other.tags
            && self.active_present == other.active_present
            && self.inactive_present == other.inactive_present
            && self.archive_present == other.archive_present
            && self.errors == other.errors
            && ours == theirs
    }
}

/// Component view for the read interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub tier: Tier,
    pub relative_path: String,
    pub file_name: String,
    pub kind: ComponentKind,
    pub present: bool,
}

/// Model view for the read interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub content_hash: String,
    pub name: String,
    /// Display label of the category
    pub category: String,
    pub status: ModelStatus,
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentEntry>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorCode>,
}

impl CatalogEntry {
    pub fn from_model(
        model: &Model,
        category_label: &str,
        include_tags: bool,
        include_components: bool,
    ) -> Self {
        Self {
            id: model.id.map(|id| id.to_string()).unwrap_or_default(),
            content_hash: model.content_hash.clone(),
            name: model.name.clone(),
            category: category_label.to_string(),
            status: model.status(),
            archived: model.archive_present,
            tags: include_tags.then(|| model.tags.clone()),
            components: include_components.then(|| {
                model
                    .components
                    .iter()
                    .map(|c| ComponentEntry {
                        tier: c.tier,
                        relative_path: c.relative_path.clone(),
                        file_name: c.file_name.clone(),
                        kind: c.kind,
                        present: c.present,
                    })
                    .collect()
            }),
            errors: model.errors.iter().copied().collect(),
        }
    }
}
