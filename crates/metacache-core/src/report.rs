//! Inconsistency report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::metadata::{InconsistentMetadata, MetadataObjId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Kind label used in report summaries
pub fn object_kind(id: &MetadataObjId) -> &'static str {
    match id {
        MetadataObjId::Table { .. } => "table",
        MetadataObjId::Relationship { .. } => "relationship",
        MetadataObjId::Permission { .. } => "permission",
        MetadataObjId::EventTrigger { .. } => "event_trigger",
        MetadataObjId::ComputedField { .. } => "computed_field",
        MetadataObjId::Function { .. } => "function",
        MetadataObjId::RemoteSchema { .. } => "remote_schema",
    }
}

/// Summary statistics for a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of inconsistent objects
    pub total: usize,

    /// Inconsistent objects per object kind
    pub by_kind: BTreeMap<String, usize>,

    /// Number of tables in the built cache
    pub tables: usize,

    /// Number of functions in the built cache
    pub functions: usize,

    /// Number of remote schemas merged into the served schema
    pub remote_schemas: usize,
}

/// Inconsistency report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InconsistencyReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: ReportSummary,

    /// All inconsistent objects, in the order they were recorded
    pub inconsistencies: Vec<InconsistentMetadata>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl InconsistencyReport {
    /// Create a report from the inconsistencies of one build
    pub fn from_inconsistencies(inconsistencies: Vec<InconsistentMetadata>) -> Self {
        let mut by_kind = BTreeMap::new();
        for inconsistency in &inconsistencies {
            *by_kind
                .entry(object_kind(inconsistency.object_id()).to_string())
                .or_insert(0) += 1;
        }

        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary {
                total: inconsistencies.len(),
                by_kind,
                ..ReportSummary::default()
            },
            inconsistencies,
            metadata: None,
        }
    }

    /// Record the size of the built cache
    pub fn with_cache_counts(
        mut self,
        tables: usize,
        functions: usize,
        remote_schemas: usize,
    ) -> Self {
        self.summary.tables = tables;
        self.summary.functions = functions;
        self.summary.remote_schemas = remote_schemas;
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.summary.total == 0
    }

    /// Replace every metadata definition with `null`
    pub fn redact(&mut self) {
        for inconsistency in &mut self.inconsistencies {
            match inconsistency {
                InconsistentMetadata::InconsistentObject { object, .. } => {
                    object.definition = serde_json::Value::Null;
                }
                InconsistentMetadata::DuplicateObjects { definitions, .. } => {
                    for definition in definitions.iter_mut() {
                        *definition = serde_json::Value::Null;
                    }
                }
            }
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for InconsistencyReport {
    fn default() -> Self {
        Self::from_inconsistencies(Vec::new())
    }
}
