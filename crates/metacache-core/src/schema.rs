//! Resolved table and function info held by the schema cache

use crate::catalog::{FunctionArgMeta, FunctionType, ForeignKeyMeta, RelType, Volatility};
use crate::definitions::{RetryConf, TriggerDefinition};
use crate::metadata::{PermType, TableObjId};
use crate::names::{
    ColumnName, ComputedFieldName, ConstraintName, FunctionName, RelName, RoleName, TableName,
    TriggerName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Portable column type
///
/// Serializes as the lowercase database type name; unknown names are kept
/// verbatim in [`ColumnType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Numeric,
    Boolean,
    Text,
    Varchar,
    Uuid,
    Json,
    Jsonb,
    Date,
    Timestamp,
    Timestamptz,
    Other(String),
}

impl ColumnType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Float => "float8",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Varchar => "varchar",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Timestamptz => "timestamptz",
            Self::Other(name) => name,
        }
    }

    /// GraphQL scalar this column type is served as
    pub fn graphql_scalar(&self) -> &str {
        match self {
            Self::SmallInt | Self::Integer => "Int",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::Text | Self::Varchar => "String",
            other => other.as_str(),
        }
    }
}

impl From<String> for ColumnType {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "smallint" | "int2" => Self::SmallInt,
            "integer" | "int" | "int4" => Self::Integer,
            "bigint" | "int8" => Self::BigInt,
            "float" | "float8" | "double precision" | "real" | "float4" => Self::Float,
            "numeric" | "decimal" => Self::Numeric,
            "boolean" | "bool" => Self::Boolean,
            "text" => Self::Text,
            "varchar" | "character varying" => Self::Varchar,
            "uuid" => Self::Uuid,
            "json" => Self::Json,
            "jsonb" => Self::Jsonb,
            "date" => Self::Date,
            "timestamp" => Self::Timestamp,
            "timestamptz" | "timestamp with time zone" => Self::Timestamptz,
            _ => Self::Other(name),
        }
    }
}

impl From<ColumnType> for String {
    fn from(column_type: ColumnType) -> Self {
        column_type.as_str().to_string()
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: ColumnName,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub position: usize,
}

/// Core info for a table, derived only from its physical metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCoreInfo {
    pub name: TableName,
    pub columns: BTreeMap<ColumnName, ColumnInfo>,
    pub primary_key: Vec<ColumnName>,
    pub foreign_keys: BTreeMap<ConstraintName, ForeignKeyMeta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableCoreInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Columns ordered by their ordinal position
    pub fn ordered_columns(&self) -> Vec<&ColumnInfo> {
        let mut columns: Vec<_> = self.columns.values().collect();
        columns.sort_by_key(|c| (c.position, c.name.clone()));
        columns
    }

    /// Foreign key whose local columns are exactly `columns`
    pub fn foreign_key_on(&self, columns: &[ColumnName]) -> Option<&ForeignKeyMeta> {
        self.foreign_keys.values().find(|fk| {
            fk.column_mapping.len() == columns.len()
                && columns.iter().all(|c| fk.column_mapping.contains_key(c))
        })
    }
}

/// A resolved relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelInfo {
    pub name: RelName,
    pub rel_type: RelType,
    pub remote_table: TableName,

    /// Local column -> remote column
    pub mapping: BTreeMap<ColumnName, ColumnName>,

    /// Constraint backing the relationship, when declared via a foreign key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ConstraintName>,
}

/// Columns a permission grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermInfo {
    pub role: RoleName,
    pub permission: PermType,
    pub columns: BTreeSet<ColumnName>,

    #[serde(default)]
    pub computed_fields: BTreeSet<ComputedFieldName>,

    /// Row filter (select/update/delete) or check (insert)
    #[serde(default)]
    pub filter: serde_json::Value,
}

/// What a computed field returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputedFieldReturn {
    Scalar { column_type: ColumnType },
    Table { table: TableName, returns_set: bool },
}

/// A resolved computed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedFieldInfo {
    pub name: ComputedFieldName,
    pub function: FunctionName,
    pub return_type: ComputedFieldReturn,
}

/// A resolved event trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTriggerInfo {
    pub name: TriggerName,
    pub definition: TriggerDefinition,
    pub webhook: String,
    pub retry_conf: RetryConf,
}

/// A resolved tracked function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: FunctionName,
    pub args: Vec<FunctionArgMeta>,
    pub return_type: FunctionType,
    pub returns_set: bool,
    pub volatility: Volatility,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FunctionInfo {
    /// Table returned by the function, if it returns rows
    pub fn return_table(&self) -> Option<&TableName> {
        match &self.return_type {
            FunctionType::Table(table) => Some(table),
            FunctionType::Scalar(_) => None,
        }
    }
}

/// Fully resolved table: core info plus every kind of extra metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub core: TableCoreInfo,

    #[serde(default)]
    pub relationships: BTreeMap<RelName, RelInfo>,

    #[serde(default)]
    pub computed_fields: BTreeMap<ComputedFieldName, ComputedFieldInfo>,

    #[serde(default)]
    pub permissions: BTreeMap<RoleName, BTreeMap<PermType, PermInfo>>,

    #[serde(default)]
    pub event_triggers: BTreeMap<TriggerName, EventTriggerInfo>,
}

impl TableInfo {
    /// Table with no extra metadata attached
    pub fn from_core(core: TableCoreInfo) -> Self {
        Self {
            core,
            relationships: BTreeMap::new(),
            computed_fields: BTreeMap::new(),
            permissions: BTreeMap::new(),
            event_triggers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &TableName {
        &self.core.name
    }

    pub fn permission(&self, role: &RoleName, permission: PermType) -> Option<&PermInfo> {
        self.permissions.get(role).and_then(|perms| perms.get(&permission))
    }

    /// Whether a sub-object currently exists on this table
    pub fn has_sub_object(&self, object: &TableObjId) -> bool {
        match object {
            TableObjId::Column(name) => self.core.columns.contains_key(name),
            TableObjId::ForeignKey(name) => self.core.foreign_keys.contains_key(name),
            TableObjId::Relationship(name) => self.relationships.contains_key(name),
            TableObjId::ComputedField(name) => self.computed_fields.contains_key(name),
            TableObjId::Permission(role, permission) => {
                self.permission(role, *permission).is_some()
            }

            TableObjId::EventTrigger(name) => self.event_triggers.contains_key(name),
        }
    }

    /// Remove a sub-object built from metadata; returns whether it was present.
    ///
    /// Columns and constraints come from the physical table and are never removed.
    pub fn remove_sub_object(&mut self, object: &TableObjId) -> bool {
        match object {
            TableObjId::Column(_) | TableObjId::ForeignKey(_) => false,
            TableObjId::Relationship(name) => self.relationships.remove(name).is_some(),
            TableObjId::ComputedField(name) => self.computed_fields.remove(name).is_some(),
            TableObjId::Permission(role, permission) => {
                let removed = self
                    .permissions
                    .get_mut(role)
                    .map(|perms| perms.remove(permission).is_some())
                    .unwrap_or(false);
                if self.permissions.get(role).is_some_and(|perms| perms.is_empty()) {
                    self.permissions.remove(role);
                }
                removed
            }
            TableObjId::EventTrigger(name) => self.event_triggers.remove(name).is_some(),
        }
    }

    /// Roles with at least one permission on this table
    pub fn roles(&self) -> impl Iterator<Item = &RoleName> {
        self.permissions.keys()
    }
}
