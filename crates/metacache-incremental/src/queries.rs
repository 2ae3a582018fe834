//! Salsa inputs and tracked functions for the pure build stages
//!
//! Inputs are set from each catalog snapshot, and only when their contents
//! changed, so a rebuild after e.g. a permission change reuses table core
//! infos, functions and the allow-list verbatim.

use metacache_core::{
    AllowlistCollection, CatalogSnapshot, Collected, CollectedInfo, FunctionInfo, FunctionName,
    RawFunctionMeta, TableCoreInfo, TableName, TrackedFunction, TrackedTable,
};
use metacache_engine::{
    build_allowlist, build_functions, build_table_core_infos, build_table_infos,
    catalog_function_names, TableBuild,
};
use salsa::Setter;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::db::MetacacheDatabase;

/// Input: tracked tables with their physical metadata
///
/// Table core infos depend on this input only, including the core metadata
/// token, so bumping the token rebuilds them even when the list is equal.
#[salsa::input(debug)]
pub struct TablesInput {
    #[returns(ref)]
    pub tables: Vec<TrackedTable>,

    /// Core metadata invalidation token
    pub metadata_token: u64,
}

/// Input: extra metadata attached to tables
///
/// A snapshot holding only relationships, permissions, event triggers,
/// computed fields and the function catalog computed fields are checked
/// against.
#[salsa::input(debug)]
pub struct ExtrasInput {
    #[returns(ref)]
    pub snapshot: CatalogSnapshot,
}

/// Input: tracked functions and the introspected function catalog
#[salsa::input(debug)]
pub struct FunctionsInput {
    #[returns(ref)]
    pub tracked: Vec<TrackedFunction>,

    #[returns(ref)]
    pub catalog: Vec<RawFunctionMeta>,
}

/// Input: allow-list collections
#[salsa::input(debug)]
pub struct AllowlistInput {
    #[returns(ref)]
    pub collections: Vec<AllowlistCollection>,
}

/// Core infos of every buildable table, with what went wrong for the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStage {
    pub tables: BTreeMap<TableName, TableCoreInfo>,
    pub collected: Vec<CollectedInfo>,
}

/// Tables with extra metadata attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStage {
    pub build: TableBuild,
    pub collected: Vec<CollectedInfo>,
}

/// Built functions plus the names of every function in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionStage {
    pub functions: BTreeMap<FunctionName, FunctionInfo>,
    pub catalog_functions: BTreeSet<FunctionName>,
    pub collected: Vec<CollectedInfo>,
}

#[cfg(test)]
thread_local! {
    static CORE_EXECUTIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

#[cfg(test)]
fn record_core_execution() {
    CORE_EXECUTIONS.with(|count| count.set(count.get() + 1));
}

#[cfg(not(test))]
fn record_core_execution() {}

/// Tracked function: table core infos
///
/// Recomputed only when the tracked table list or the core metadata token
/// changes.
#[salsa::tracked]
pub fn table_core_infos(db: &dyn salsa::Database, input: TablesInput) -> CoreStage {
    record_core_execution();
    let token = input.metadata_token(db);
    let mut collected = Collected::new();
    let tables = build_table_core_infos(input.tables(db), &mut collected);
    debug!(tables = tables.len(), token, "built table core infos");

    CoreStage {
        tables,
        collected: collected.into_infos(),
    }
}

/// Tracked function: tables with relationships, computed fields, permissions
/// and event triggers attached
#[salsa::tracked]
pub fn table_infos(
    db: &dyn salsa::Database,
    tables: TablesInput,
    extras: ExtrasInput,
) -> TableStage {
    let core = table_core_infos(db, tables);
    let mut collected = Collected::new();
    collected.extend_infos(core.collected);

    let build = build_table_infos(core.tables, extras.snapshot(db), &mut collected);
    debug!(tables = build.tables.len(), collected = collected.len(), "built table infos");

    TableStage {
        build,
        collected: collected.into_infos(),
    }
}

/// Tracked function: tracked functions checked against the function catalog
#[salsa::tracked]
pub fn function_infos(db: &dyn salsa::Database, input: FunctionsInput) -> FunctionStage {
    let mut collected = Collected::new();
    let functions = build_functions(input.tracked(db), input.catalog(db), &mut collected);
    debug!(functions = functions.len(), "built function infos");

    FunctionStage {
        functions,
        catalog_functions: catalog_function_names(input.catalog(db)),
        collected: collected.into_infos(),
    }
}

/// Tracked function: normalised allow-list signatures
#[salsa::tracked]
pub fn allowlist(db: &dyn salsa::Database, input: AllowlistInput) -> BTreeSet<String> {
    build_allowlist(input.collections(db))
}

fn extras_of(snapshot: &CatalogSnapshot) -> CatalogSnapshot {
    CatalogSnapshot {
        relationships: snapshot.relationships.clone(),
        permissions: snapshot.permissions.clone(),
        event_triggers: snapshot.event_triggers.clone(),
        computed_fields: snapshot.computed_fields.clone(),
        function_catalog: snapshot.function_catalog.clone(),
        ..CatalogSnapshot::default()
    }
}

/// Handles to every input of one database
#[derive(Debug, Clone, Copy)]
pub struct QueryInputs {
    pub tables: TablesInput,
    pub extras: ExtrasInput,
    pub functions: FunctionsInput,
    pub allowlist: AllowlistInput,
}

impl QueryInputs {
    /// Create inputs holding a first snapshot
    pub fn new(db: &MetacacheDatabase, snapshot: &CatalogSnapshot, metadata_token: u64) -> Self {
        Self {
            tables: TablesInput::new(db, snapshot.tables.clone(), metadata_token),
            extras: ExtrasInput::new(db, extras_of(snapshot)),
            functions: FunctionsInput::new(
                db,
                snapshot.functions.clone(),
                snapshot.function_catalog.clone(),
            ),
            allowlist: AllowlistInput::new(db, snapshot.allowlist.clone()),
        }
    }

    /// Point the inputs at a new snapshot, touching only fields that changed
    pub fn update(
        &self,
        db: &mut MetacacheDatabase,
        snapshot: &CatalogSnapshot,
        metadata_token: u64,
    ) {
        if self.tables.tables(&*db) != &snapshot.tables {
            self.tables.set_tables(db).to(snapshot.tables.clone());
        }
        if self.tables.metadata_token(&*db) != metadata_token {
            self.tables.set_metadata_token(db).to(metadata_token);
        }

        let extras = extras_of(snapshot);
        if self.extras.snapshot(&*db) != &extras {
            self.extras.set_snapshot(db).to(extras);
        }

        if self.functions.tracked(&*db) != &snapshot.functions {
            self.functions.set_tracked(db).to(snapshot.functions.clone());
        }
        if self.functions.catalog(&*db) != &snapshot.function_catalog {
            self.functions.set_catalog(db).to(snapshot.function_catalog.clone());
        }

        if self.allowlist.collections(&*db) != &snapshot.allowlist {
            self.allowlist.set_collections(db).to(snapshot.allowlist.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacache_core::{ColumnType, PermType, PermissionDef, RawColumn, TableMetadata};
    use serde_json::json;

    fn snapshot() -> CatalogSnapshot {
        let id = RawColumn::new("id", ColumnType::Integer).not_null();
        let users = TableMetadata::new("users", vec![id]).with_primary_key(&["id"]);

        CatalogSnapshot {
            tables: vec![TrackedTable {
                name: TableName::new("users"),
                metadata: Some(users),
            }],
            ..CatalogSnapshot::default()
        }
    }

    #[test]
    fn table_core_infos_are_cached() {
        let db = MetacacheDatabase::default();
        let inputs = QueryInputs::new(&db, &snapshot(), 0);

        let first = table_core_infos(&db, inputs.tables);
        let second = table_core_infos(&db, inputs.tables);
        assert_eq!(first, second);
        assert!(first.tables.contains_key("users"));
        assert!(first.collected.is_empty());
    }

    fn core_executions() -> usize {
        CORE_EXECUTIONS.with(|count| count.get())
    }

    #[test]
    fn permission_change_skips_table_core_infos() {
        let mut db = MetacacheDatabase::default();
        let original = snapshot();
        let inputs = QueryInputs::new(&db, &original, 0);

        let before = core_executions();
        table_infos(&db, inputs.tables, inputs.extras);
        assert_eq!(core_executions(), before + 1);

        let mut changed = original.clone();
        changed.permissions.push(PermissionDef::new(
            "users",
            "anon",
            PermType::Select,
            json!({"columns": ["id"], "filter": {}}),
        ));
        inputs.update(&mut db, &changed, 0);
        assert_eq!(inputs.tables.tables(&db), &original.tables);

        let stage = table_infos(&db, inputs.tables, inputs.extras);
        let users = &stage.build.tables[&TableName::new("users")];
        assert!(users.permission(&"anon".into(), PermType::Select).is_some());
        assert_eq!(core_executions(), before + 1);

        // bumping the metadata token rebuilds them
        inputs.update(&mut db, &changed, 1);
        table_infos(&db, inputs.tables, inputs.extras);
        assert_eq!(core_executions(), before + 2);
    }

    #[test]
    fn missing_table_is_collected() {
        let db = MetacacheDatabase::default();
        let mut broken = snapshot();
        broken.tables[0].metadata = None;
        let inputs = QueryInputs::new(&db, &broken, 0);

        let stage = table_core_infos(&db, inputs.tables);
        assert!(stage.tables.is_empty());
        assert_eq!(stage.collected.len(), 1);
    }
}
