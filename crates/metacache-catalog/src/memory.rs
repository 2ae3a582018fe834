//! In-memory catalog store
//!
//! Holds a physical database catalog (tables and function overloads) next to
//! the tracked metadata that refers to it. It is used for offline builds of
//! an exported catalog dump and as the store in tests, where wrapped actions
//! mutate the physical catalog the same way DDL would.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metacache_catalog::{CatalogStore, InMemoryCatalogBuilder};
//!
//! let store = InMemoryCatalogBuilder::new()
//!     .with_table(users_table())
//!     .with_table(posts_table())
//!     .build();
//!
//! let snapshot = store.fetch_catalog_snapshot().await?;
//! store.drop_table("users").await;
//! ```

use crate::adapter::{CatalogError, CatalogStore};
use metacache_core::definitions::TriggerDefinition;
use metacache_core::{
    AllowlistCollection, CatalogSnapshot, ColumnInfo, ColumnName, ComputedFieldDef,
    EventTriggerDef, FunctionName, PermissionDef, RawColumn, RawFunctionMeta, RelationshipDef,
    RemoteSchemaDef, RemoteSchemaName, SchemaObjId, TableMetadata, TableName, TableObjId,
    TrackedFunction, TrackedTable, TriggerName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracked metadata as kept by the metadata catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackedMetadata {
    pub tables: Vec<TableName>,
    pub relationships: Vec<RelationshipDef>,
    pub permissions: Vec<PermissionDef>,
    pub event_triggers: Vec<EventTriggerDef>,
    pub computed_fields: Vec<ComputedFieldDef>,
    pub remote_schemas: Vec<RemoteSchemaDef>,
    pub functions: Vec<TrackedFunction>,
    pub allowlist: Vec<AllowlistCollection>,
}

impl TrackedMetadata {
    /// Drop every extra-metadata item defined on `table`
    fn remove_table_extras(&mut self, table: &TableName) {
        self.relationships.retain(|r| &r.table != table);
        self.permissions.retain(|p| &p.table != table);
        self.event_triggers.retain(|t| &t.table != table);
        self.computed_fields.retain(|c| &c.table != table);
    }
}

/// Exported catalog: physical database objects plus tracked metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDump {
    /// Physical tables in the database
    pub tables: Vec<TableMetadata>,

    /// Physical function overloads in the database
    pub functions: Vec<RawFunctionMeta>,

    pub metadata: TrackedMetadata,

    /// Introspection responses keyed by remote schema URL
    pub remote_payloads: BTreeMap<String, serde_json::Value>,
}

impl CatalogDump {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(json).map_err(|e| CatalogError::InvalidDump(e.to_string()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self, CatalogError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::from_json(&contents)
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    physical_tables: BTreeMap<TableName, TableMetadata>,
    physical_functions: Vec<RawFunctionMeta>,
    metadata: TrackedMetadata,
    trigger_views: BTreeMap<(TableName, TriggerName), Vec<ColumnName>>,
    snapshot_failure: Option<CatalogError>,
}

/// Catalog store backed by process memory
///
/// Clones share state, so a clone can be moved into a wrapped action while
/// the original is handed to the schema cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
    snapshot_reads: Arc<AtomicUsize>,
    view_creations: Arc<AtomicUsize>,
}

impl InMemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog from an exported dump
    pub fn from_dump(dump: CatalogDump) -> Self {
        let state = CatalogState {
            physical_tables: dump.tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            physical_functions: dump.functions,
            metadata: dump.metadata,
            ..CatalogState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            ..Self::default()
        }
    }

    /// Export the physical catalog and tracked metadata
    pub async fn dump(&self) -> CatalogDump {
        let state = self.state.read().await;
        CatalogDump {
            tables: state.physical_tables.values().cloned().collect(),
            functions: state.physical_functions.clone(),
            metadata: state.metadata.clone(),
            remote_payloads: BTreeMap::new(),
        }
    }

    // Physical catalog (what DDL in a wrapped action changes)

    /// Create or replace a physical table
    pub async fn create_table(&self, table: TableMetadata) {
        self.state.write().await.physical_tables.insert(table.name.clone(), table);
    }

    /// Drop a physical table; tracked metadata is left as is
    pub async fn drop_table(&self, table: &str) -> bool {
        self.state.write().await.physical_tables.remove(table).is_some()
    }

    /// Add a column to a physical table
    pub async fn add_column(&self, table: &str, column: RawColumn) -> bool {
        let mut state = self.state.write().await;
        let Some(meta) = state.physical_tables.get_mut(table) else {
            return false;
        };
        let mut column = column;
        if column.position == 0 {
            column.position = meta.columns.len() + 1;
        }
        meta.columns.push(column);
        true
    }

    /// Drop a column, along with any key or constraint using it
    pub async fn drop_column(&self, table: &str, column: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(meta) = state.physical_tables.get_mut(table) else {
            return false;
        };
        let before = meta.columns.len();
        meta.columns.retain(|c| c.name.as_str() != column);
        meta.primary_key.retain(|c| c.as_str() != column);
        meta.foreign_keys.retain(|fk| !fk.column_mapping.contains_key(column));
        meta.columns.len() != before
    }

    /// Drop a foreign-key constraint from a physical table
    pub async fn drop_foreign_key(&self, table: &str, constraint: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(meta) = state.physical_tables.get_mut(table) else {
            return false;
        };
        let before = meta.foreign_keys.len();
        meta.foreign_keys.retain(|fk| fk.constraint.as_str() != constraint);
        meta.foreign_keys.len() != before
    }

    /// Create a function overload
    pub async fn create_function(&self, function: RawFunctionMeta) {
        self.state.write().await.physical_functions.push(function);
    }

    /// Replace every overload of a function with a single definition
    pub async fn replace_function(&self, function: RawFunctionMeta) {
        let mut state = self.state.write().await;
        state.physical_functions.retain(|f| f.name != function.name);
        state.physical_functions.push(function);
    }

    /// Drop every overload of a function
    pub async fn drop_function(&self, function: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.physical_functions.len();
        state.physical_functions.retain(|f| f.name.as_str() != function);
        state.physical_functions.len() != before
    }

    // Tracked metadata

    pub async fn track_table(&self, table: impl Into<TableName>) {
        let table = table.into();
        let mut state = self.state.write().await;
        if !state.metadata.tables.contains(&table) {
            state.metadata.tables.push(table);
        }
    }

    pub async fn track_function(&self, function: TrackedFunction) {
        self.state.write().await.metadata.functions.push(function);
    }

    pub async fn add_relationship(&self, relationship: RelationshipDef) {
        self.state.write().await.metadata.relationships.push(relationship);
    }

    pub async fn add_permission(&self, permission: PermissionDef) {
        self.state.write().await.metadata.permissions.push(permission);
    }

    pub async fn add_event_trigger(&self, trigger: EventTriggerDef) {
        self.state.write().await.metadata.event_triggers.push(trigger);
    }

    pub async fn add_computed_field(&self, computed_field: ComputedFieldDef) {
        self.state.write().await.metadata.computed_fields.push(computed_field);
    }

    pub async fn add_remote_schema(&self, remote: RemoteSchemaDef) {
        self.state.write().await.metadata.remote_schemas.push(remote);
    }

    /// Replace the definition of every declaration with this name
    pub async fn update_remote_schema(&self, name: &str, definition: serde_json::Value) -> bool {
        let mut state = self.state.write().await;
        let mut found = false;
        for remote in state.metadata.remote_schemas.iter_mut().filter(|r| r.name.as_str() == name) {
            remote.definition = definition.clone();
            found = true;
        }
        found
    }

    pub async fn remove_remote_schema(&self, name: &RemoteSchemaName) {
        self.state.write().await.metadata.remote_schemas.retain(|r| &r.name != name);
    }

    pub async fn add_allowlist(&self, collection: AllowlistCollection) {
        self.state.write().await.metadata.allowlist.push(collection);
    }

    /// Make every following snapshot read fail (or succeed again with `None`)
    pub async fn fail_snapshot(&self, error: Option<CatalogError>) {
        self.state.write().await.snapshot_failure = error;
    }

    // Inspection

    pub async fn tracked_metadata(&self) -> TrackedMetadata {
        self.state.read().await.metadata.clone()
    }

    pub async fn is_tracked(&self, table: &str) -> bool {
        self.state.read().await.metadata.tables.iter().any(|t| t.as_str() == table)
    }

    /// Tables and triggers that currently have a backing view
    pub async fn trigger_views(&self) -> BTreeSet<(TableName, TriggerName)> {
        self.state.read().await.trigger_views.keys().cloned().collect()
    }

    /// Number of catalog snapshot reads served
    pub fn snapshot_read_count(&self) -> usize {
        self.snapshot_reads.load(Ordering::SeqCst)
    }

    /// Number of trigger views created or replaced
    pub fn view_creation_count(&self) -> usize {
        self.view_creations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalog {
    fn name(&self) -> &'static str {
        "Memory"
    }

    async fn fetch_catalog_snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        let state = self.state.read().await;
        if let Some(error) = &state.snapshot_failure {
            return Err(error.clone());
        }
        self.snapshot_reads.fetch_add(1, Ordering::SeqCst);

        let metadata = &state.metadata;
        Ok(CatalogSnapshot {
            tables: metadata
                .tables
                .iter()
                .map(|name| TrackedTable {
                    name: name.clone(),
                    metadata: state.physical_tables.get(name).cloned(),
                })
                .collect(),
            relationships: metadata.relationships.clone(),
            permissions: metadata.permissions.clone(),
            event_triggers: metadata.event_triggers.clone(),
            computed_fields: metadata.computed_fields.clone(),
            remote_schemas: metadata.remote_schemas.clone(),
            functions: metadata.functions.clone(),
            function_catalog: state.physical_functions.clone(),
            allowlist: metadata.allowlist.clone(),
        })
    }

    async fn fetch_raw_table_metadata(&self) -> Result<Vec<TableMetadata>, CatalogError> {
        Ok(self.state.read().await.physical_tables.values().cloned().collect())
    }

    async fn fetch_raw_function_metadata(&self) -> Result<Vec<RawFunctionMeta>, CatalogError> {
        Ok(self.state.read().await.physical_functions.clone())
    }

    async fn create_or_replace_trigger_view(
        &self,
        table: &TableName,
        columns: &[ColumnInfo],
        trigger: &TriggerName,
        _definition: &TriggerDefinition,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.write().await;
        if !state.physical_tables.contains_key(table) {
            return Err(CatalogError::QueryError(format!("relation \"{}\" does not exist", table)));
        }
        state.trigger_views.insert(
            (table.clone(), trigger.clone()),
            columns.iter().map(|c| c.name.clone()).collect(),
        );
        self.view_creations.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(table = %table, trigger = %trigger, "created trigger view");
        Ok(())
    }

    async fn clear_derived_views(&self) -> Result<(), CatalogError> {
        self.state.write().await.trigger_views.clear();
        Ok(())
    }

    async fn delete_function_record(&self, function: &FunctionName) -> Result<(), CatalogError> {
        self.state.write().await.metadata.functions.retain(|f| &f.name != function);
        Ok(())
    }

    async fn untrack_table(&self, table: &TableName) -> Result<(), CatalogError> {
        let mut state = self.state.write().await;
        state.metadata.tables.retain(|t| t != table);
        state.metadata.remove_table_extras(table);
        state.trigger_views.retain(|(t, _), _| t != table);
        tracing::debug!(table = %table, "untracked table");
        Ok(())
    }

    async fn purge_dependent_object(&self, object: &SchemaObjId) -> Result<(), CatalogError> {
        let mut state = self.state.write().await;
        match object {
            SchemaObjId::Table { table } => {
                state.metadata.tables.retain(|t| t != table);
                state.metadata.remove_table_extras(table);
                state.trigger_views.retain(|(t, _), _| t != table);
            }
            SchemaObjId::TableObj { table, object: sub } => match sub {
                TableObjId::Relationship(name) => {
                    let relationships = &mut state.metadata.relationships;
                    relationships.retain(|r| !(&r.table == table && &r.name == name));
                }
                TableObjId::Permission(role, permission) => {
                    state.metadata.permissions.retain(|p| {
                        !(&p.table == table && &p.role == role && p.permission == *permission)
                    });
                }
                TableObjId::EventTrigger(name) => {
                    let triggers = &mut state.metadata.event_triggers;
                    triggers.retain(|t| !(&t.table == table && &t.name == name));
                    state.trigger_views.remove(&(table.clone(), name.clone()));
                }
                TableObjId::ComputedField(name) => {
                    let fields = &mut state.metadata.computed_fields;
                    fields.retain(|c| !(&c.table == table && &c.name == name));
                }
                TableObjId::Column(_) | TableObjId::ForeignKey(_) => {
                    return Err(CatalogError::Unsupported(format!("cannot purge {}", object)));
                }
            },
            SchemaObjId::Function { function } => {
                state.metadata.functions.retain(|f| &f.name != function);
            }
            SchemaObjId::RemoteSchema { remote_schema } => {
                state.metadata.remote_schemas.retain(|r| &r.name != remote_schema);
            }
        }
        tracing::debug!(object = %object, "purged dependent object");
        Ok(())
    }
}

/// Builder for an [`InMemoryCatalog`] with predefined contents
///
/// # Example
///
/// ```rust,ignore
/// let store = InMemoryCatalogBuilder::new()
///     .with_table(TableMetadata::new("users", columns))
///     .with_relationship(RelationshipDef::new("posts", "author", RelType::Object, using))
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCatalogBuilder {
    dump: CatalogDump,
}

impl InMemoryCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a physical table and track it
    pub fn with_table(mut self, table: TableMetadata) -> Self {
        self.dump.metadata.tables.push(table.name.clone());
        self.dump.tables.push(table);
        self
    }

    /// Add a physical table without tracking it
    pub fn with_untracked_table(mut self, table: TableMetadata) -> Self {
        self.dump.tables.push(table);
        self
    }

    /// Track a table name whether or not it exists physically
    pub fn with_tracked_table(mut self, table: &str) -> Self {
        self.dump.metadata.tables.push(TableName::new(table));
        self
    }

    /// Add a physical function overload without tracking it
    pub fn with_function(mut self, function: RawFunctionMeta) -> Self {
        self.dump.functions.push(function);
        self
    }

    pub fn with_tracked_function(mut self, function: TrackedFunction) -> Self {
        self.dump.metadata.functions.push(function);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.dump.metadata.relationships.push(relationship);
        self
    }

    pub fn with_permission(mut self, permission: PermissionDef) -> Self {
        self.dump.metadata.permissions.push(permission);
        self
    }

    pub fn with_event_trigger(mut self, trigger: EventTriggerDef) -> Self {
        self.dump.metadata.event_triggers.push(trigger);
        self
    }

    pub fn with_computed_field(mut self, computed_field: ComputedFieldDef) -> Self {
        self.dump.metadata.computed_fields.push(computed_field);
        self
    }

    pub fn with_remote_schema(mut self, remote: RemoteSchemaDef) -> Self {
        self.dump.metadata.remote_schemas.push(remote);
        self
    }

    pub fn with_allowlist(mut self, collection: AllowlistCollection) -> Self {
        self.dump.metadata.allowlist.push(collection);
        self
    }

    pub fn build(self) -> InMemoryCatalog {
        InMemoryCatalog::from_dump(self.dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacache_core::{ColumnType, PermType, RelType, RoleName};
    use serde_json::json;

    fn users() -> TableMetadata {
        TableMetadata::new(
            "users",
            vec![
                RawColumn::new("id", ColumnType::Integer).not_null(),
                RawColumn::new("name", ColumnType::Text),
            ],
        )
        .with_primary_key(&["id"])
    }

    fn posts() -> TableMetadata {
        TableMetadata::new(
            "posts",
            vec![
                RawColumn::new("id", ColumnType::Integer).not_null(),
                RawColumn::new("author_id", ColumnType::Integer),
            ],
        )
        .with_foreign_key("posts_author_id_fkey", "users", &[("author_id", "id")])
    }

    #[tokio::test]
    async fn snapshot_joins_tracked_and_physical_tables() {
        let store = InMemoryCatalogBuilder::new()
            .with_table(users())
            .with_tracked_table("ghost")
            .with_untracked_table(posts())
            .build();

        let snapshot = store.fetch_catalog_snapshot().await.unwrap();
        assert_eq!(snapshot.tables.len(), 2);
        assert!(snapshot.tables[0].metadata.is_some());
        assert!(snapshot.tables[1].metadata.is_none());
        assert_eq!(store.snapshot_read_count(), 1);

        let raw = store.fetch_raw_table_metadata().await.unwrap();
        assert_eq!(raw.len(), 2);
    }

    #[tokio::test]
    async fn drop_column_removes_dependent_constraints() {
        let store = InMemoryCatalogBuilder::new().with_table(users()).with_table(posts()).build();

        assert!(store.drop_column("posts", "author_id").await);
        let raw = store.fetch_raw_table_metadata().await.unwrap();
        let posts = raw.iter().find(|t| t.name.as_str() == "posts").unwrap();
        assert!(posts.foreign_keys.is_empty());
        assert!(!store.drop_column("posts", "author_id").await);
    }

    #[tokio::test]
    async fn purge_removes_only_the_named_object() {
        let store = InMemoryCatalogBuilder::new()
            .with_table(users())
            .with_table(posts())
            .with_relationship(RelationshipDef::new(
                "posts",
                "author",
                RelType::Object,
                json!({"foreign_key_constraint_on": "author_id"}),
            ))
            .with_permission(PermissionDef::new(
                "posts",
                "anon",
                PermType::Select,
                json!({"columns": "*"}),
            ))
            .build();

        store
            .purge_dependent_object(&SchemaObjId::relationship("posts", "author"))
            .await
            .unwrap();

        let metadata = store.tracked_metadata().await;
        assert!(metadata.relationships.is_empty());
        assert_eq!(metadata.permissions.len(), 1);
        assert_eq!(metadata.permissions[0].role, RoleName::new("anon"));
    }

    #[tokio::test]
    async fn purging_a_column_is_unsupported() {
        let store = InMemoryCatalogBuilder::new().with_table(users()).build();
        let result = store.purge_dependent_object(&SchemaObjId::column("users", "id")).await;
        assert!(matches!(result, Err(CatalogError::Unsupported(_))));
    }

    #[tokio::test]
    async fn untrack_table_drops_its_extras() {
        let store = InMemoryCatalogBuilder::new()
            .with_table(users())
            .with_permission(PermissionDef::new(
                "users",
                "anon",
                PermType::Select,
                json!({"columns": ["id"]}),
            ))

            .build();

        store.untrack_table(&TableName::new("users")).await.unwrap();
        assert!(!store.is_tracked("users").await);
        assert!(store.tracked_metadata().await.permissions.is_empty());
    }

    #[tokio::test]
    async fn trigger_views_are_recorded_and_cleared() {
        let store = InMemoryCatalogBuilder::new().with_table(users()).build();
        store
            .create_or_replace_trigger_view(
                &TableName::new("users"),
                &[],
                &TriggerName::new("notify"),
                &TriggerDefinition::default(),
            )
            .await
            .unwrap();
        assert_eq!(store.trigger_views().await.len(), 1);
        assert_eq!(store.view_creation_count(), 1);

        store.clear_derived_views().await.unwrap();
        assert!(store.trigger_views().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_failure_injection() {
        let store = InMemoryCatalog::new();
        store
            .fail_snapshot(Some(CatalogError::ConnectionError("down".to_string())))
            .await;
        assert!(store.fetch_catalog_snapshot().await.is_err());

        store.fail_snapshot(None).await;
        assert!(store.fetch_catalog_snapshot().await.is_ok());
    }

    #[test]
    fn dump_parses_from_json() {
        let dump = CatalogDump::from_json(
            r#"{
                "tables": [{"name": "users", "columns": [{"name": "id", "type": "integer"}]}],
                "metadata": {"tables": ["users"]}
            }"#,
        )
        .unwrap();
        assert_eq!(dump.tables.len(), 1);
        assert_eq!(dump.metadata.tables, vec![TableName::new("users")]);
        assert!(matches!(CatalogDump::from_json("{"), Err(CatalogError::InvalidDump(_))));
    }
}
