//! Schema cache build pipeline
//!
//! A build reads one catalog snapshot and runs it through collection,
//! dependency resolution and schema assembly. Pure stages are salsa queries
//! over inputs set from the snapshot; remote schema fetches and trigger view
//! creation go through explicit memo tables. Both live in a build engine
//! shared by every [`RebuildableSchemaCache`] derived from the same initial
//! build, so a rebuild redoes only the work whose inputs or invalidation
//! tokens changed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metacache_incremental::{build_initial_cache, BuildReason, CacheInvalidations};
//!
//! let cache = build_initial_cache(store, introspector, &config).await?;
//! let (cache, applied) = cache
//!     .rebuild(BuildReason::CacheOnly, CacheInvalidations::remote_schema("countries"))
//!     .await?;
//! ```

use metacache_catalog::{CatalogStore, RemoteSchemaIntrospector};
use metacache_core::metadata::inconsistent_object_ids;
use metacache_core::{
    CatalogSnapshot, Collected, Config, DependencyGraph, FunctionInfo, FunctionName,
    GraphQLSchema, InconsistencyReport, InconsistentMetadata, MetadataError, MetadataObjId,
    MetadataObject, RemoteSchemaName, RoleContexts, SchemaObjId, TableInfo, TableName,
    TableObjId, TriggerName,
};
use metacache_engine::{
    assemble_schema, resolve_dependencies, BuildOutputs, PendingTriggerView, RemoteSchemaMap,
    Resolved,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::MetacacheDatabase;
use crate::invalidation::{AppliedInvalidations, CacheInvalidations, InvalidationKeys, TokenEpoch};
use crate::memo::{Dependency, Memo, Tracker};
use crate::queries::{self, QueryInputs};
use crate::remote::{build_remote_schemas, RemoteFetchMemo};

/// Why a build runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildReason {
    /// The catalog changed; derived views are created or replaced
    CatalogUpdate,

    /// Rebuild from the current catalog without database side effects
    CacheOnly,
}

/// Fully resolved schema cache, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCache {
    pub tables: BTreeMap<TableName, TableInfo>,
    pub functions: BTreeMap<FunctionName, FunctionInfo>,
    pub remote_schemas: RemoteSchemaMap,
    pub role_contexts: RoleContexts,

    /// Context served when no role applies (the admin context)
    pub default_context: GraphQLSchema,
    pub allowlist: BTreeSet<String>,
    pub dependency_graph: DependencyGraph,

    /// Every inconsistency found by this build, in discovery order
    pub inconsistencies: Vec<InconsistentMetadata>,
}

impl SchemaCache {
    pub fn inconsistent_object_ids(&self) -> BTreeSet<MetadataObjId> {
        inconsistent_object_ids(&self.inconsistencies)
    }

    /// Whether a schema object is part of this cache
    pub fn contains(&self, id: &SchemaObjId) -> bool {
        match id {
            SchemaObjId::Table { table } => self.tables.contains_key(table),
            SchemaObjId::TableObj { table, object } => {
                self.tables.get(table).is_some_and(|info| info.has_sub_object(object))
            }
            SchemaObjId::Function { function } => self.functions.contains_key(function),
            SchemaObjId::RemoteSchema { remote_schema } => {
                self.remote_schemas.contains_key(remote_schema)
            }
        }
    }

    pub fn report(&self) -> InconsistencyReport {
        InconsistencyReport::from_inconsistencies(self.inconsistencies.clone()).with_cache_counts(
            self.tables.len(),
            self.functions.len(),
            self.remote_schemas.len(),
        )
    }
}

type TriggerViewMemo = Memo<(TableName, TriggerName), PendingTriggerView, Result<(), String>>;

/// Collaborators a build talks to
struct Collaborators {
    store: Arc<dyn CatalogStore>,
    introspector: Arc<dyn RemoteSchemaIntrospector>,
    remote_timeout: Duration,
}

/// Memoised state carried from one build to the next
#[derive(Default)]
struct BuildEngine {
    db: MetacacheDatabase,
    inputs: Option<QueryInputs>,
    remote_fetches: RemoteFetchMemo,
    trigger_views: TriggerViewMemo,
    epoch: TokenEpoch,
}

struct BuildResult {
    cache: SchemaCache,

    /// Remote schemas declared in the snapshot, fetched or not
    declared_remote_schemas: BTreeSet<RemoteSchemaName>,
}

fn trigger_object(snapshot: &CatalogSnapshot, view: &PendingTriggerView) -> MetadataObject {
    let id = MetadataObjId::EventTrigger {
        table: view.table.clone(),
        name: view.trigger.clone(),
    };
    match snapshot
        .event_triggers
        .iter()
        .find(|t| t.table == view.table && t.name == view.trigger)
    {
        Some(definition) => MetadataObject::from_definition(id, definition),
        None => MetadataObject::new(id, json!({ "table": view.table, "name": view.trigger })),
    }
}

impl BuildEngine {
    fn sync_inputs(&mut self, snapshot: &CatalogSnapshot, keys: &InvalidationKeys) -> QueryInputs {
        match self.inputs {
            Some(inputs) => {
                inputs.update(&mut self.db, snapshot, keys.metadata);
                inputs
            }
            None => {
                let inputs = QueryInputs::new(&self.db, snapshot, keys.metadata);
                self.inputs = Some(inputs);
                inputs
            }
        }
    }

    /// Create views for triggers that survived resolution, returning failures
    async fn create_trigger_views(
        &mut self,
        store: &dyn CatalogStore,
        views: &[PendingTriggerView],
        tables: &BTreeMap<TableName, TableInfo>,
        keys: &InvalidationKeys,
    ) -> Vec<(PendingTriggerView, String)> {
        let surviving = views.iter().filter(|view| {
            tables
                .get(&view.table)
                .is_some_and(|table| table.event_triggers.contains_key(&view.trigger))
        });

        let mut live = BTreeSet::new();
        let mut failures = Vec::new();
        for view in surviving {
            let key = (view.table.clone(), view.trigger.clone());
            live.insert(key.clone());

            let outcome = match self.trigger_views.lookup(&key, view, keys) {
                Some(outcome) => {
                    debug!(
                        table = %view.table,
                        trigger = %view.trigger,
                        "trigger view served from memo"
                    );
                    outcome
                }
                None => {
                    debug!(table = %view.table, trigger = %view.trigger, "creating trigger view");
                    let mut tracker = Tracker::new(keys);
                    tracker.depend_on(Dependency::Metadata);
                    let outcome = store
                        .create_or_replace_trigger_view(
                            &view.table,
                            &view.columns,
                            &view.trigger,
                            &view.definition,
                        )
                        .await
                        .map_err(|e| format!("failed to create the trigger view: {}", e));
                    self.trigger_views.insert(key, view.clone(), tracker, outcome.clone());
                    outcome
                }
            };
            if let Err(reason) = outcome {
                failures.push((view.clone(), reason));
            }
        }

        self.trigger_views.retain(|key| live.contains(key));
        let (hits, misses) = self.trigger_views.stats();
        debug!(views = live.len(), hits, misses, "trigger view memo");
        failures
    }

    async fn build(
        &mut self,
        collaborators: &Collaborators,
        reason: BuildReason,
        keys: &InvalidationKeys,
    ) -> Result<BuildResult, MetadataError> {
        let snapshot = collaborators.store.fetch_catalog_snapshot().await?;
        info!(
            store = collaborators.store.name(),
            ?reason,
            tables = snapshot.tables.len(),
            remote_schemas = snapshot.remote_schemas.len(),
            "building schema cache"
        );

        let inputs = self.sync_inputs(&snapshot, keys);
        let table_stage = queries::table_infos(&self.db, inputs.tables, inputs.extras);
        let function_stage = queries::function_infos(&self.db, inputs.functions);
        let allowlist = queries::allowlist(&self.db, inputs.allowlist);

        let mut collected = Collected::new();
        collected.extend_infos(table_stage.collected);
        collected.extend_infos(function_stage.collected);

        let remote_schemas = build_remote_schemas(
            &snapshot.remote_schemas,
            keys,
            &mut self.remote_fetches,
            collaborators.introspector.as_ref(),
            collaborators.remote_timeout,
            &mut collected,
        )
        .await;
        let declared_remote_schemas: BTreeSet<RemoteSchemaName> =
            snapshot.remote_schemas.iter().map(|r| r.name.clone()).collect();
        self.remote_fetches.retain(|name| declared_remote_schemas.contains(name));

        let outputs = BuildOutputs {
            tables: table_stage.build.tables,
            functions: function_stage.functions,
            remote_schemas,
            catalog_functions: function_stage.catalog_functions,
            allowlist,
        };
        let Resolved {
            mut outputs,
            mut inconsistencies,
            mut graph,
        } = resolve_dependencies(outputs, collected.into_infos())?;

        if reason == BuildReason::CatalogUpdate {
            let failures = self
                .create_trigger_views(
                    collaborators.store.as_ref(),
                    &table_stage.build.trigger_views,
                    &outputs.tables,
                    keys,
                )
                .await;
            for (view, failure) in failures {
                let sub_object = TableObjId::EventTrigger(view.trigger.clone());
                if let Some(table) = outputs.tables.get_mut(&view.table) {
                    table.remove_sub_object(&sub_object);
                }
                graph.remove_object(&SchemaObjId::table_obj(view.table.clone(), sub_object));
                let object = trigger_object(&snapshot, &view);
                inconsistencies.push(InconsistentMetadata::object(object, failure));
            }
        } else {
            debug!("cache-only build, skipping trigger views");
        }

        let remote_schemas = std::mem::take(&mut outputs.remote_schemas);
        let (assembled, merge_failures) =
            assemble_schema(&outputs.tables, &outputs.functions, remote_schemas)?;
        inconsistencies.extend(merge_failures);

        for inconsistency in &inconsistencies {
            warn!(
                object = %inconsistency.object_id(),
                reason = %inconsistency.reason(),
                "inconsistent metadata"
            );
        }
        info!(
            tables = outputs.tables.len(),
            functions = outputs.functions.len(),
            remote_schemas = assembled.remote_schemas.len(),
            inconsistencies = inconsistencies.len(),
            "built schema cache"
        );

        Ok(BuildResult {
            cache: SchemaCache {
                tables: outputs.tables,
                functions: outputs.functions,
                remote_schemas: assembled.remote_schemas,
                role_contexts: assembled.role_contexts,
                default_context: assembled.default_context,
                allowlist: outputs.allowlist,
                dependency_graph: graph,
                inconsistencies,
            },
            declared_remote_schemas,
        })
    }
}

/// The last built schema cache with everything needed to rebuild it
///
/// Rebuilding never mutates a value in place; it returns a new one that
/// shares the memoised build engine.
#[derive(Clone)]
pub struct RebuildableSchemaCache {
    cache: Arc<SchemaCache>,
    keys: InvalidationKeys,
    engine: Arc<Mutex<BuildEngine>>,
    collaborators: Arc<Collaborators>,
}

impl fmt::Debug for RebuildableSchemaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildableSchemaCache")
            .field("tables", &self.cache.tables.len())
            .field("functions", &self.cache.functions.len())
            .field("remote_schemas", &self.cache.remote_schemas.len())
            .field("inconsistencies", &self.cache.inconsistencies.len())
            .field("keys", &self.keys)
            .finish()
    }
}

impl RebuildableSchemaCache {
    pub fn schema_cache(&self) -> Arc<SchemaCache> {
        Arc::clone(&self.cache)
    }

    pub fn invalidation_keys(&self) -> &InvalidationKeys {
        &self.keys
    }

    /// Store the cache reads from
    pub fn store(&self) -> Arc<dyn CatalogStore> {
        Arc::clone(&self.collaborators.store)
    }

    /// Rebuild after applying `invalidations`, reusing every memoised result
    /// whose inputs and tokens are unchanged
    pub async fn rebuild(
        &self,
        reason: BuildReason,
        invalidations: CacheInvalidations,
    ) -> Result<(RebuildableSchemaCache, AppliedInvalidations), MetadataError> {
        let (result, mut keys) = {
            let mut engine = self.engine.lock().await;
            let mut keys = self.keys.clone();
            keys.invalidate(&invalidations, &mut engine.epoch);
            let result = engine.build(&self.collaborators, reason, &keys).await?;
            (result, keys)
        };
        keys.prune_remote_schemas(&result.declared_remote_schemas);
        let applied =
            AppliedInvalidations::from_request(&invalidations, &result.declared_remote_schemas);

        let rebuilt = RebuildableSchemaCache {
            cache: Arc::new(result.cache),
            keys,
            engine: Arc::clone(&self.engine),
            collaborators: Arc::clone(&self.collaborators),
        };
        Ok((rebuilt, applied))
    }
}

/// Build the first schema cache of a process
pub async fn build_initial_cache(
    store: Arc<dyn CatalogStore>,
    introspector: Arc<dyn RemoteSchemaIntrospector>,
    config: &Config,
) -> Result<RebuildableSchemaCache, MetadataError> {
    let collaborators = Collaborators {
        store,
        introspector,
        remote_timeout: Duration::from_secs(config.remote_schemas.timeout_seconds),
    };
    let mut engine = BuildEngine::default();
    let mut keys = InvalidationKeys::default();

    let result = engine.build(&collaborators, BuildReason::CatalogUpdate, &keys).await?;
    keys.prune_remote_schemas(&result.declared_remote_schemas);

    Ok(RebuildableSchemaCache {
        cache: Arc::new(result.cache),
        keys,
        engine: Arc::new(Mutex::new(engine)),
        collaborators: Arc::new(collaborators),
    })
}

/// Incremental rebuild of `cache`
pub async fn rebuild(
    cache: &RebuildableSchemaCache,
    reason: BuildReason,
    invalidations: CacheInvalidations,
) -> Result<(RebuildableSchemaCache, AppliedInvalidations), MetadataError> {
    cache.rebuild(reason, invalidations).await
}

/// The schema cache held by `cache`
pub fn current_schema_cache(cache: &RebuildableSchemaCache) -> Arc<SchemaCache> {
    cache.schema_cache()
}
