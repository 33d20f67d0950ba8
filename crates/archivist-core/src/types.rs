//! Shared vocabulary: tiers, component kinds, scan identifiers and status.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage location class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In use by the consuming application
    Active,
    /// Staging area, not visible to the application
    Inactive,
    /// Long-term storage
    Archive,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Active, Tier::Inactive, Tier::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Active => "active",
            Tier::Inactive => "inactive",
            Tier::Archive => "archive",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Tier::Active),
            "inactive" => Ok(Tier::Inactive),
            "archive" => Ok(Tier::Archive),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a file plays within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// The weights file the content hash is computed from
    Primary,
    /// The `<stem>.metadata.json` sidecar
    Metadata,
    /// Companion sharing the primary's stem (previews, configs, notes)
    Auxiliary,
    /// File under `examples/<hash>/`
    Example,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Primary => "primary",
            ComponentKind::Metadata => "metadata",
            ComponentKind::Auxiliary => "auxiliary",
            ComponentKind::Example => "example",
        }
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ComponentKind::Primary),
            "metadata" => Ok(ComponentKind::Metadata),
            "auxiliary" => Ok(ComponentKind::Auxiliary),
            "example" => Ok(ComponentKind::Example),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token identifying one scan pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    /// Generate a fresh, pass-unique identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ScanId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived model status for the read interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Active,
    Inactive,
    Undetermined,
}

impl ModelStatus {
    /// Both or neither of the two flags set is undetermined.
    pub fn from_presence(active_present: bool, inactive_present: bool) -> Self {
        match (active_present, inactive_present) {
            (true, false) => ModelStatus::Active,
            (false, true) => ModelStatus::Inactive,
            _ => ModelStatus::Undetermined,
        }
    }
}
