//! Raw metadata diff
//!
//! Compares raw table and function metadata captured before and after a
//! metadata-mutating action. Renames are not detected: a renamed table,
//! column or function shows up as a drop.

use metacache_core::{
    ColumnName, ConstraintName, DependencyGraph, FunctionName, RawFunctionMeta, SchemaObjId,
    TableMetadata, TableName, TableObjId, Volatility,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Changes to one table that exists before and after
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDiff {
    pub table: TableName,
    pub dropped_columns: Vec<ColumnName>,
    pub added_columns: Vec<ColumnName>,

    /// Columns whose type or nullability changed
    pub altered_columns: Vec<ColumnName>,
    pub dropped_foreign_keys: Vec<ConstraintName>,
    pub primary_key_changed: bool,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.dropped_columns.is_empty()
            && self.added_columns.is_empty()
            && self.altered_columns.is_empty()
            && self.dropped_foreign_keys.is_empty()
            && !self.primary_key_changed
    }
}

/// Everything that changed between two raw metadata captures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub dropped_tables: Vec<TableName>,
    pub altered_tables: Vec<TableDiff>,
    pub dropped_functions: Vec<FunctionName>,

    /// Functions with one definition before and several after
    pub overloaded_functions: Vec<FunctionName>,

    /// Functions whose volatility changed, with the new volatility
    pub altered_functions: Vec<(FunctionName, Volatility)>,
}

fn diff_table(before: &TableMetadata, after: &TableMetadata) -> TableDiff {
    let old_columns: BTreeMap<&ColumnName, _> =
        before.columns.iter().map(|c| (&c.name, c)).collect();
    let new_columns: BTreeMap<&ColumnName, _> =
        after.columns.iter().map(|c| (&c.name, c)).collect();

    let dropped_columns = old_columns
        .keys()
        .filter(|name| !new_columns.contains_key(*name))
        .map(|name| (*name).clone())
        .collect();
    let added_columns = new_columns
        .keys()
        .filter(|name| !old_columns.contains_key(*name))
        .map(|name| (*name).clone())
        .collect();
    let altered_columns = old_columns
        .iter()
        .filter_map(|(name, old)| {
            let new = new_columns.get(name)?;
            let changed = old.column_type != new.column_type || old.nullable != new.nullable;
            changed.then(|| (*name).clone())
        })
        .collect();

    let new_constraints: BTreeSet<&ConstraintName> =
        after.foreign_keys.iter().map(|fk| &fk.constraint).collect();
    let dropped_foreign_keys = before
        .foreign_keys
        .iter()
        .filter(|fk| !new_constraints.contains(&fk.constraint))
        .map(|fk| fk.constraint.clone())
        .collect();

    TableDiff {
        table: before.name.clone(),
        dropped_columns,
        added_columns,
        altered_columns,
        dropped_foreign_keys,
        primary_key_changed: before.primary_key != after.primary_key,
    }
}

fn group_functions(
    functions: &[RawFunctionMeta],
) -> BTreeMap<&FunctionName, Vec<&RawFunctionMeta>> {
    let mut grouped: BTreeMap<&FunctionName, Vec<&RawFunctionMeta>> = BTreeMap::new();
    for function in functions {
        grouped.entry(&function.name).or_default().push(function);
    }
    grouped
}

/// Diff raw metadata captured before and after an action
pub fn diff_metadata(
    tables_before: &[TableMetadata],
    tables_after: &[TableMetadata],
    functions_before: &[RawFunctionMeta],
    functions_after: &[RawFunctionMeta],
) -> SchemaDiff {
    let after_by_name: BTreeMap<&TableName, &TableMetadata> =
        tables_after.iter().map(|t| (&t.name, t)).collect();

    let mut diff = SchemaDiff::default();
    for before in tables_before {
        match after_by_name.get(&before.name) {
            None => diff.dropped_tables.push(before.name.clone()),
            Some(after) => {
                let table_diff = diff_table(before, after);
                if !table_diff.is_empty() {
                    diff.altered_tables.push(table_diff);
                }
            }
        }
    }

    let old_functions = group_functions(functions_before);
    let new_functions = group_functions(functions_after);
    for (name, old) in &old_functions {
        match new_functions.get(name) {
            None => diff.dropped_functions.push((*name).clone()),
            Some(new) if old.len() <= 1 && new.len() > 1 => {
                diff.overloaded_functions.push((*name).clone())
            }
            Some(new) => {
                if let ([old], [new]) = (old.as_slice(), new.as_slice()) {
                    if old.volatility != new.volatility {
                        diff.altered_functions.push(((*name).clone(), new.volatility));
                    }
                }
            }
        }
    }

    diff
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.dropped_tables.is_empty()
            && self.altered_tables.is_empty()
            && self.dropped_functions.is_empty()
            && self.overloaded_functions.is_empty()
            && self.altered_functions.is_empty()
    }

    /// Schema objects removed by this diff
    pub fn dropped_objects(&self) -> Vec<SchemaObjId> {
        let tables = self.dropped_tables.iter().map(|t| SchemaObjId::table(t.clone()));
        let columns = self.altered_tables.iter().flat_map(|diff| {
            diff.dropped_columns
                .iter()
                .map(|c| SchemaObjId::column(diff.table.clone(), c.clone()))
        });
        let constraints = self.altered_tables.iter().flat_map(|diff| {
            diff.dropped_foreign_keys.iter().map(|c| {
                SchemaObjId::table_obj(diff.table.clone(), TableObjId::ForeignKey(c.clone()))
            })
        });
        let functions = self.dropped_functions.iter().map(|f| SchemaObjId::function(f.clone()));

        tables.chain(columns).chain(constraints).chain(functions).collect()
    }

    /// Objects that must be purged before the dropped objects can go.
    ///
    /// Sub-objects of a dropped table disappear with it and are not listed.
    pub fn indirect_dependents(&self, graph: &DependencyGraph) -> BTreeSet<SchemaObjId> {
        let roots = self.dropped_objects();
        let dropped_tables: Vec<SchemaObjId> = self
            .dropped_tables
            .iter()
            .map(|t| SchemaObjId::table(t.clone()))
            .collect();

        let mut dependents = graph.dependents_of_all(roots.iter());
        dependents.retain(|object| !dropped_tables.iter().any(|table| table.induces(object)));
        dependents
    }
}
