//! Dependency resolution
//!
//! Every successfully built object recorded the schema objects it requires.
//! Any requirement missing from the build outputs is a dangling dependency:
//! the requiring object is demoted to an inconsistency and removed, which may
//! in turn orphan other objects, so pruning runs to a fixed point. The
//! surviving edges form the dependency graph of the cache.

use metacache_core::{
    CollectedInfo, DependencyGraph, FunctionInfo, FunctionName, InconsistentMetadata,
    MetadataError, MetadataObject, RemoteSchemaContext, RemoteSchemaDef, RemoteSchemaName,
    SchemaDependency, SchemaObjId, TableInfo, TableName,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Fetched remote schemas with the declaration that produced them
pub type RemoteSchemaMap = BTreeMap<RemoteSchemaName, (RemoteSchemaDef, RemoteSchemaContext)>;

/// Intermediate resolved state, before dependency pruning
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutputs {
    pub tables: BTreeMap<TableName, TableInfo>,
    pub functions: BTreeMap<FunctionName, FunctionInfo>,
    pub remote_schemas: RemoteSchemaMap,

    /// Every function in the database, tracked or not
    pub catalog_functions: BTreeSet<FunctionName>,
    pub allowlist: BTreeSet<String>,
}

impl BuildOutputs {
    /// Whether a schema object is present in these outputs
    pub fn contains(&self, id: &SchemaObjId) -> bool {
        match id {
            SchemaObjId::Table { table } => self.tables.contains_key(table),
            SchemaObjId::TableObj { table, object } => {
                self.tables.get(table).is_some_and(|info| info.has_sub_object(object))
            }
            SchemaObjId::Function { function } => {
                self.functions.contains_key(function) || self.catalog_functions.contains(function)
            }
            SchemaObjId::RemoteSchema { remote_schema } => {
                self.remote_schemas.contains_key(remote_schema)
            }
        }
    }

    fn remove(&mut self, id: &SchemaObjId) -> Result<(), MetadataError> {
        match id {
            SchemaObjId::Table { table } => {
                self.tables.remove(table);
            }
            SchemaObjId::TableObj { table, object } => {
                let info = self.tables.get_mut(table).ok_or_else(|| {
                    MetadataError::unexpected(format!(
                        "table \"{}\" is not in the cache while removing {}",
                        table, id
                    ))
                })?;
                info.remove_sub_object(object);
            }
            SchemaObjId::Function { function } => {
                self.functions.remove(function);
            }
            SchemaObjId::RemoteSchema { remote_schema } => {
                self.remote_schemas.remove(remote_schema);
            }
        }
        Ok(())
    }
}

/// Outputs after pruning, with the inconsistencies found along the way
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub outputs: BuildOutputs,
    pub inconsistencies: Vec<InconsistentMetadata>,
    pub graph: DependencyGraph,
}

struct PendingObject {
    object: MetadataObject,
    id: SchemaObjId,
    dependencies: Vec<SchemaDependency>,
}

/// Prune dangling dependencies and build the dependency graph.
///
/// Inconsistencies already on the side channel are carried over first, in
/// insertion order, followed by the ones produced by pruning.
pub fn resolve_dependencies(
    outputs: BuildOutputs,
    infos: Vec<CollectedInfo>,
) -> Result<Resolved, MetadataError> {
    let mut outputs = outputs;
    let mut inconsistencies = Vec::new();
    let mut pending = Vec::new();
    for info in infos {
        match info {
            CollectedInfo::Inconsistency(inconsistency) => inconsistencies.push(inconsistency),
            CollectedInfo::Dependency { object, id, dependencies } => {
                pending.push(PendingObject { object, id, dependencies })
            }
        }
    }

    loop {
        let mut pruned = 0usize;
        let mut survivors = Vec::with_capacity(pending.len());

        for entry in pending {
            let missing = entry
                .dependencies
                .iter()
                .find(|dep| !outputs.contains(&dep.target))
                .cloned();
            match missing {
                Some(dependency) => {
                    debug!(
                        object = %entry.id,
                        target = %dependency.target,
                        "pruning dangling dependency"
                    );
                    outputs.remove(&entry.id)?;
                    inconsistencies.push(InconsistentMetadata::with_detail(
                        entry.object,
                        format!(
                            "depends on nonexistent or inconsistent object: {}",
                            dependency.target
                        ),
                        json!({ "target": dependency.target, "reason": dependency.reason }),
                    ));
                    pruned += 1;
                }
                None => survivors.push(entry),
            }
        }

        pending = survivors;
        if pruned == 0 {
            break;
        }
    }

    let mut graph = DependencyGraph::new();
    for entry in pending {
        graph.add_dependencies(entry.id, entry.dependencies.into_iter().map(|dep| dep.target));
    }

    Ok(Resolved {
        outputs,
        inconsistencies,
        graph,
    })
}
