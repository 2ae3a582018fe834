//! Metadata identity, dependencies and inconsistency records
//!
//! Two kinds of identity live here:
//!
//! - [`SchemaObjId`] is a logical address in the dependency graph (a table,
//!   a column, a relationship, a function, ...).
//! - [`MetadataObject`] is the concrete definition that produced an object,
//!   used for error attribution.
//!
//! Collection stages never fail on a single bad definition. They append
//! [`CollectedInfo`] records to a [`Collected`] side channel instead, which the
//! dependency resolver consumes.

use crate::names::{
    ColumnName, ComputedFieldName, ConstraintName, FunctionName, RelName, RemoteSchemaName,
    RoleName, TableName, TriggerName,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of table permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermType {
    Select,
    Insert,
    Update,
    Delete,
}

impl PermType {
    pub const ALL: [PermType; 4] = [Self::Select, Self::Insert, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for PermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-object of a table addressable by the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TableObjId {
    Column(ColumnName),
    ForeignKey(ConstraintName),
    Relationship(RelName),
    ComputedField(ComputedFieldName),
    Permission(RoleName, PermType),
    EventTrigger(TriggerName),
}

impl fmt::Display for TableObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => write!(f, "column {}", name),
            Self::ForeignKey(name) => write!(f, "constraint {}", name),
            Self::Relationship(name) => write!(f, "relationship {}", name),
            Self::ComputedField(name) => write!(f, "computed field {}", name),
            Self::Permission(role, perm) => write!(f, "permission {}.{}", role, perm),
            Self::EventTrigger(name) => write!(f, "event trigger {}", name),
        }
    }
}

/// Logical address of an entity in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaObjId {
    Table { table: TableName },
    TableObj { table: TableName, object: TableObjId },
    Function { function: FunctionName },
    RemoteSchema { remote_schema: RemoteSchemaName },
}

impl SchemaObjId {
    pub fn table(table: impl Into<TableName>) -> Self {
        Self::Table { table: table.into() }
    }

    pub fn table_obj(table: impl Into<TableName>, object: TableObjId) -> Self {
        Self::TableObj {
            table: table.into(),
            object,
        }
    }

    pub fn column(table: impl Into<TableName>, column: impl Into<ColumnName>) -> Self {
        Self::table_obj(table, TableObjId::Column(column.into()))
    }

    pub fn relationship(table: impl Into<TableName>, rel: impl Into<RelName>) -> Self {
        Self::table_obj(table, TableObjId::Relationship(rel.into()))
    }

    pub fn function(function: impl Into<FunctionName>) -> Self {
        Self::Function {
            function: function.into(),
        }
    }

    pub fn remote_schema(name: impl Into<RemoteSchemaName>) -> Self {
        Self::RemoteSchema {
            remote_schema: name.into(),
        }
    }

    /// Table this object belongs to, if any
    pub fn owning_table(&self) -> Option<&TableName> {
        match self {
            Self::Table { table } | Self::TableObj { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Whether removing `self` removes `other` as well.
    ///
    /// A table induces every one of its sub-objects; everything else only
    /// induces itself.
    pub fn induces(&self, other: &SchemaObjId) -> bool {
        match (self, other) {
            (Self::Table { table: dropped }, Self::TableObj { table, .. }) => dropped == table,
            _ => self == other,
        }
    }
}

impl fmt::Display for SchemaObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table { table } => write!(f, "table {}", table),
            Self::TableObj { table, object } => write!(f, "{} in table {}", object, table),
            Self::Function { function } => write!(f, "function {}", function),
            Self::RemoteSchema { remote_schema } => write!(f, "remote schema {}", remote_schema),
        }
    }
}

/// Why one schema object depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyReason {
    Table,
    Column,
    Relationship,
    ComputedField,
    RemoteTable,
    LeftColumn,
    RightColumn,
    UsingColumn,
    ForeignKey,
    Payload,
    Parent,
    Function,
    ReturnType,
    ArgumentType,
}

/// One dependency edge target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaDependency {
    pub target: SchemaObjId,
    pub reason: DependencyReason,
}

impl SchemaDependency {
    pub fn new(target: SchemaObjId, reason: DependencyReason) -> Self {
        Self { target, reason }
    }
}

/// Identity of a piece of source metadata
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataObjId {
    Table { table: TableName },
    Relationship { table: TableName, name: RelName },
    Permission { table: TableName, role: RoleName, permission: PermType },
    EventTrigger { table: TableName, name: TriggerName },
    ComputedField { table: TableName, name: ComputedFieldName },
    Function { function: FunctionName },
    RemoteSchema { name: RemoteSchemaName },
}

impl MetadataObjId {
    /// Schema object this metadata defines
    pub fn schema_obj_id(&self) -> SchemaObjId {
        match self {
            Self::Table { table } => SchemaObjId::table(table.clone()),
            Self::Relationship { table, name } => {
                SchemaObjId::table_obj(table.clone(), TableObjId::Relationship(name.clone()))
            }
            Self::Permission { table, role, permission } => SchemaObjId::table_obj(
                table.clone(),
                TableObjId::Permission(role.clone(), *permission),
            ),
            Self::EventTrigger { table, name } => {
                SchemaObjId::table_obj(table.clone(), TableObjId::EventTrigger(name.clone()))
            }
            Self::ComputedField { table, name } => {
                SchemaObjId::table_obj(table.clone(), TableObjId::ComputedField(name.clone()))
            }
            Self::Function { function } => SchemaObjId::function(function.clone()),
            Self::RemoteSchema { name } => SchemaObjId::remote_schema(name.clone()),
        }
    }
}

impl fmt::Display for MetadataObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table { table } => write!(f, "table {}", table),
            Self::Relationship { table, name } => write!(f, "relationship {}.{}", table, name),
            Self::Permission { table, role, permission } => {
                write!(f, "{} permission for role {} on {}", permission, role, table)
            }
            Self::EventTrigger { table, name } => write!(f, "event trigger {}.{}", table, name),
            Self::ComputedField { table, name } => write!(f, "computed field {}.{}", table, name),
            Self::Function { function } => write!(f, "function {}", function),
            Self::RemoteSchema { name } => write!(f, "remote schema {}", name),
        }
    }
}

/// A definition-bearing unit of tracked metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataObject {
    pub id: MetadataObjId,
    pub definition: serde_json::Value,
}

impl MetadataObject {
    pub fn new(id: MetadataObjId, definition: serde_json::Value) -> Self {
        Self { id, definition }
    }

    /// Build a metadata object from any serializable definition
    pub fn from_definition<T: Serialize>(id: MetadataObjId, definition: &T) -> Self {
        let definition = serde_json::to_value(definition).unwrap_or(serde_json::Value::Null);
        Self { id, definition }
    }
}

/// A recorded, non-fatal failure to incorporate metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InconsistentMetadata {
    /// One object could not be built
    InconsistentObject {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
        object: MetadataObject,
    },
    /// Several definitions share one identity
    DuplicateObjects {
        id: MetadataObjId,
        definitions: Vec<serde_json::Value>,
    },
}

impl InconsistentMetadata {
    pub fn object(object: MetadataObject, reason: impl Into<String>) -> Self {
        Self::InconsistentObject {
            reason: reason.into(),
            detail: None,
            object,
        }
    }

    pub fn with_detail(
        object: MetadataObject,
        reason: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self::InconsistentObject {
            reason: reason.into(),
            detail: Some(detail),
            object,
        }
    }

    pub fn duplicates(id: MetadataObjId, definitions: Vec<serde_json::Value>) -> Self {
        Self::DuplicateObjects { id, definitions }
    }

    /// Identity of the offending object
    pub fn object_id(&self) -> &MetadataObjId {
        match self {
            Self::InconsistentObject { object, .. } => &object.id,
            Self::DuplicateObjects { id, .. } => id,
        }
    }

    /// Human-readable reason
    pub fn reason(&self) -> String {
        match self {
            Self::InconsistentObject { reason, .. } => reason.clone(),
            Self::DuplicateObjects { id, definitions } => {
                format!("multiple definitions ({}) for {}", definitions.len(), id)
            }
        }
    }
}

/// Identities of all objects in a list of inconsistencies
pub fn inconsistent_object_ids(
    inconsistencies: &[InconsistentMetadata],
) -> BTreeSet<MetadataObjId> {
    inconsistencies.iter().map(|i| i.object_id().clone()).collect()
}

/// One record on the collection side channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectedInfo {
    Inconsistency(InconsistentMetadata),
    /// `object` (addressed as `id`) requires every target in `dependencies`
    Dependency {
        object: MetadataObject,
        id: SchemaObjId,
        dependencies: Vec<SchemaDependency>,
    },
}

/// Append-only side channel threaded through the collection stages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    infos: Vec<CollectedInfo>,
}

impl Collected {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object that could not be built
    pub fn inconsistent(&mut self, object: MetadataObject, reason: impl Into<String>) {
        self.infos
            .push(CollectedInfo::Inconsistency(InconsistentMetadata::object(object, reason)));
    }

    pub fn push_inconsistency(&mut self, inconsistency: InconsistentMetadata) {
        self.infos.push(CollectedInfo::Inconsistency(inconsistency));
    }

    /// Record the dependencies of a successfully built object
    pub fn depends(
        &mut self,
        object: MetadataObject,
        id: SchemaObjId,
        dependencies: Vec<SchemaDependency>,
    ) {
        if dependencies.is_empty() {
            return;
        }
        self.infos.push(CollectedInfo::Dependency {
            object,
            id,
            dependencies,
        });
    }

    pub fn extend(&mut self, other: Collected) {
        self.infos.extend(other.infos);
    }

    pub fn extend_infos(&mut self, infos: impl IntoIterator<Item = CollectedInfo>) {
        self.infos.extend(infos);
    }

    pub fn infos(&self) -> &[CollectedInfo] {
        &self.infos
    }

    pub fn into_infos(self) -> Vec<CollectedInfo> {
        self.infos
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Inconsistencies recorded so far, in insertion order
    pub fn inconsistencies(&self) -> impl Iterator<Item = &InconsistentMetadata> {
        self.infos.iter().filter_map(|info| match info {
            CollectedInfo::Inconsistency(inconsistency) => Some(inconsistency),
            CollectedInfo::Dependency { .. } => None,
        })
    }
}
