//! Typed forms of the opaque JSON configurations carried by extra metadata
//!
//! Snapshots keep configurations as `serde_json::Value`; the collector
//! decodes them into these types, and a decode failure becomes one
//! inconsistency for the offending object.

use crate::names::{ColumnName, ComputedFieldName, FunctionName, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Either every column (`"*"`) or an explicit list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Columns {
    All,
    #[default]
    None,
    Only(Vec<ColumnName>),
}

impl Columns {
    /// Resolve against the full column list of a table
    pub fn resolve<'c>(&self, all: impl Iterator<Item = &'c ColumnName>) -> Vec<ColumnName> {
        match self {
            Self::All => all.cloned().collect(),
            Self::None => Vec::new(),
            Self::Only(columns) => columns.clone(),
        }
    }

    /// Explicitly listed columns (empty for `All`)
    pub fn listed(&self) -> &[ColumnName] {
        match self {
            Self::Only(columns) => columns,
            _ => &[],
        }
    }
}

impl TryFrom<serde_json::Value> for Columns {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Self::None),
            serde_json::Value::String(s) if s == "*" => Ok(Self::All),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(name) => Ok(ColumnName::new(name)),
                    other => Err(format!("expected a column name, found {}", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Only),
            other => Err(format!("expected \"*\" or a list of columns, found {}", other)),
        }
    }
}

impl From<Columns> for serde_json::Value {
    fn from(columns: Columns) -> Self {
        match columns {
            Columns::All => serde_json::Value::String("*".to_string()),
            Columns::None => serde_json::Value::Null,
            Columns::Only(columns) => serde_json::Value::Array(
                columns
                    .into_iter()
                    .map(|c| serde_json::Value::String(c.0))
                    .collect(),
            ),
        }
    }
}

/// `foreign_key_constraint_on` target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForeignKeyOn {
    /// Column of this table (object relationship)
    Column(ColumnName),
    /// Column of a remote table pointing back here (array relationship)
    Remote { table: TableName, column: ColumnName },
}

/// Manually configured relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualConfig {
    pub remote_table: TableName,
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
}

/// How a relationship is established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelUsing {
    ForeignKeyConstraintOn(ForeignKeyOn),
    ManualConfiguration(ManualConfig),
}

/// Permission definition body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermDefinition {
    pub columns: Columns,
    pub filter: Option<serde_json::Value>,
    pub check: Option<serde_json::Value>,
    pub computed_fields: Vec<ComputedFieldName>,
}

/// Computed field definition body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedFieldDefinition {
    pub function: FunctionName,

    #[serde(default)]
    pub table_argument: Option<String>,
}

/// Tracked function configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfiguration {
    /// Argument that receives the session variables as JSON
    pub session_argument: Option<String>,
}

/// Columns an event trigger listens on for one operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerOpSpec {
    pub columns: Columns,

    #[serde(default)]
    pub payload: Option<Columns>,
}

/// Operations an event trigger fires on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerDefinition {
    pub insert: Option<TriggerOpSpec>,
    pub update: Option<TriggerOpSpec>,
    pub delete: Option<TriggerOpSpec>,
    pub enable_manual: bool,
}

impl TriggerDefinition {
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, &TriggerOpSpec)> {
        [("insert", &self.insert), ("update", &self.update), ("delete", &self.delete)]
            .into_iter()
            .filter_map(|(op, spec)| spec.as_ref().map(|spec| (op, spec)))
    }
}

/// Delivery retry policy for an event trigger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConf {
    pub num_retries: u32,
    pub interval_sec: u32,
    pub timeout_sec: u32,
}

impl Default for RetryConf {
    fn default() -> Self {
        Self {
            num_retries: 0,
            interval_sec: 10,
            timeout_sec: 60,
        }
    }
}

/// A header either given literally or read from the environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderConf {
    pub name: String,

    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub value_from_env: Option<String>,
}

/// Event trigger configuration body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTriggerConf {
    pub definition: TriggerDefinition,

    #[serde(default)]
    pub webhook: Option<String>,

    #[serde(default)]
    pub webhook_from_env: Option<String>,

    #[serde(default)]
    pub retry_conf: RetryConf,

    #[serde(default)]
    pub headers: Vec<HeaderConf>,
}

/// Remote schema declaration body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSchemaDefinition {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub url_from_env: Option<String>,

    #[serde(default)]
    pub headers: Vec<HeaderConf>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub forward_client_headers: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn columns_accept_star_and_lists() {
        let all: Columns = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(all, Columns::All);

        let some: Columns = serde_json::from_value(json!(["id", "title"])).unwrap();
        assert_eq!(some.listed().len(), 2);

        assert!(serde_json::from_value::<Columns>(json!("id")).is_err());
        assert!(serde_json::from_value::<Columns>(json!([1])).is_err());
    }

    #[test]
    fn relationship_using_forms() {
        let object: RelUsing =
            serde_json::from_value(json!({"foreign_key_constraint_on": "author_id"})).unwrap();
        assert_eq!(
            object,
            RelUsing::ForeignKeyConstraintOn(ForeignKeyOn::Column(ColumnName::new("author_id")))
        );


        let array: RelUsing = serde_json::from_value(json!({
            "foreign_key_constraint_on": {"table": "posts", "column": "author_id"}
        }))
        .unwrap();
        assert!(matches!(array, RelUsing::ForeignKeyConstraintOn(ForeignKeyOn::Remote { .. })));

        let manual: RelUsing = serde_json::from_value(json!({
            "manual_configuration": {"remote_table": "users", "column_mapping": {"author_id": "id"}}
        }))
        .unwrap();
        assert!(matches!(manual, RelUsing::ManualConfiguration(_)));
    }

    #[test]
    fn trigger_operations_iterate_in_order() {
        let conf: EventTriggerConf = serde_json::from_value(json!({
            "definition": {
                "insert": {"columns": "*"},
                "delete": {"columns": ["id"], "payload": ["id"]}
            },
            "webhook": "http://hooks.local/posts"
        }))
        .unwrap();

        let ops: Vec<_> = conf.definition.operations().map(|(op, _)| op).collect();
        assert_eq!(ops, vec!["insert", "delete"]);
        assert_eq!(conf.retry_conf, RetryConf::default());
    }
}
