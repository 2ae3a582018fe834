//! Catalog snapshot types
//!
//! A [`CatalogSnapshot`] is the raw, denormalized view of tracked metadata
//! read from the persistent store at build time. Extra metadata (relationships,
//! permissions, triggers, ...) keeps its configuration as opaque JSON so that a
//! malformed definition is reported per object instead of failing the read.

use crate::names::{
    ColumnName, ComputedFieldName, ConstraintName, FunctionName, RelName, RemoteSchemaName,
    RoleName, TableName, TriggerName,
};
use crate::metadata::PermType;
use crate::schema::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Physical column as reported by database introspection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: ColumnName,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default)]
    pub nullable: bool,

    /// Ordinal position (1-indexed)
    #[serde(default)]
    pub position: usize,
}

impl RawColumn {
    pub fn new(name: impl Into<ColumnName>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            position: 0,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Foreign-key constraint as reported by database introspection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyMeta {
    pub constraint: ConstraintName,
    pub ref_table: TableName,

    /// Local column -> referenced column
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
}

/// Physical table metadata (raw introspection of one table)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: TableName,

    #[serde(default)]
    pub columns: Vec<RawColumn>,

    #[serde(default)]
    pub primary_key: Vec<ColumnName>,

    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyMeta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableMetadata {
    pub fn new(name: impl Into<TableName>, columns: Vec<RawColumn>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                if c.position == 0 {
                    c.position = i + 1;
                }
                c
            })
            .collect();
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            description: None,
        }
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| ColumnName::new(*c)).collect();
        self
    }

    pub fn with_foreign_key(
        mut self,
        constraint: &str,
        ref_table: &str,
        mapping: &[(&str, &str)],
    ) -> Self {
        self.foreign_keys.push(ForeignKeyMeta {
            constraint: ConstraintName::new(constraint),
            ref_table: TableName::new(ref_table),
            column_mapping: mapping
                .iter()
                .map(|(l, r)| (ColumnName::new(*l), ColumnName::new(*r)))
                .collect(),
        });
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.name.as_str() == name)
    }
}

/// A tracked table and its physical metadata, if the table still exists
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedTable {
    pub name: TableName,

    #[serde(default)]
    pub metadata: Option<TableMetadata>,
}

/// Function volatility classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Volatility {
    Volatile,
    Stable,
    Immutable,
}

impl std::fmt::Display for Volatility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volatile => write!(f, "VOLATILE"),
            Self::Stable => write!(f, "STABLE"),
            Self::Immutable => write!(f, "IMMUTABLE"),
        }
    }
}

/// Type of a function argument or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FunctionType {
    /// A scalar column type
    Scalar(ColumnType),
    /// The row type of a table
    Table(TableName),
}

/// Raw function argument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionArgMeta {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub arg_type: FunctionType,
}

/// Raw function metadata (one overload) as reported by database introspection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFunctionMeta {
    pub name: FunctionName,

    #[serde(default)]
    pub args: Vec<FunctionArgMeta>,

    pub return_type: FunctionType,

    #[serde(default)]
    pub returns_set: bool,

    pub volatility: Volatility,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RawFunctionMeta {
    pub fn new(
        name: impl Into<FunctionName>,
        return_type: FunctionType,
        volatility: Volatility,
    ) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            return_type,
            returns_set: false,
            volatility,
            description: None,
        }
    }

    pub fn with_arg(mut self, name: &str, arg_type: FunctionType) -> Self {
        self.args.push(FunctionArgMeta {
            name: Some(name.to_string()),
            arg_type,
        });
        self
    }

    pub fn returning_set(mut self) -> Self {
        self.returns_set = true;
        self
    }
}

/// Object or array relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelType {
    Object,
    Array,
}

/// Relationship declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub table: TableName,
    pub name: RelName,
    pub rel_type: RelType,

    /// `foreign_key_constraint_on` or `manual_configuration`
    pub using: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl RelationshipDef {
    pub fn new(
        table: impl Into<TableName>,
        name: impl Into<RelName>,
        rel_type: RelType,
        using: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            rel_type,
            using,
            comment: None,
        }
    }
}

/// Permission declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDef {
    pub table: TableName,
    pub role: RoleName,
    pub permission: PermType,
    pub definition: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl PermissionDef {
    pub fn new(
        table: impl Into<TableName>,
        role: impl Into<RoleName>,
        permission: PermType,
        definition: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            role: role.into(),
            permission,
            definition,
            comment: None,
        }
    }
}

/// Event trigger declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTriggerDef {
    pub table: TableName,
    pub name: TriggerName,
    pub configuration: serde_json::Value,
}

impl EventTriggerDef {
    pub fn new(
        table: impl Into<TableName>,
        name: impl Into<TriggerName>,
        configuration: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            configuration,
        }
    }
}

/// Computed field declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedFieldDef {
    pub table: TableName,
    pub name: ComputedFieldName,
    pub definition: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ComputedFieldDef {
    pub fn new(
        table: impl Into<TableName>,
        name: impl Into<ComputedFieldName>,
        definition: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            definition,
            comment: None,
        }
    }
}

/// Remote schema declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSchemaDef {
    pub name: RemoteSchemaName,
    pub definition: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl RemoteSchemaDef {
    pub fn new(name: impl Into<RemoteSchemaName>, definition: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            definition,
            comment: None,
        }
    }
}

/// Tracked function declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFunction {
    pub name: FunctionName,

    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl TrackedFunction {
    pub fn new(name: impl Into<FunctionName>) -> Self {
        Self {
            name: name.into(),
            configuration: serde_json::Value::Null,
        }
    }
}

/// A query listed in an allow-list collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListedQuery {
    pub name: String,
    pub query: String,
}

/// A named collection of allowed queries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowlistCollection {
    pub name: String,

    #[serde(default)]
    pub queries: Vec<ListedQuery>,
}

/// Point-in-time raw metadata read from the persistent store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub tables: Vec<TrackedTable>,

    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,

    #[serde(default)]
    pub permissions: Vec<PermissionDef>,

    #[serde(default)]
    pub event_triggers: Vec<EventTriggerDef>,

    #[serde(default)]
    pub computed_fields: Vec<ComputedFieldDef>,

    #[serde(default)]
    pub remote_schemas: Vec<RemoteSchemaDef>,

    #[serde(default)]
    pub functions: Vec<TrackedFunction>,

    /// Introspection of every function in the database, tracked or not
    #[serde(default)]
    pub function_catalog: Vec<RawFunctionMeta>,

    #[serde(default)]
    pub allowlist: Vec<AllowlistCollection>,
}
