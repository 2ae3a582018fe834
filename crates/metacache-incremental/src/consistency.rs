//! Consistency checker
//!
//! [`SchemaCacheManager`] owns the installed schema cache and wraps every
//! metadata-mutating action. The action's effect on the raw catalog is
//! diffed, indirect dependents of anything dropped are purged (or the action
//! is refused), the cache is rebuilt, and the result is installed only if it
//! has no inconsistency the previous cache did not have.
//!
//! Readers call [`SchemaCacheManager::schema_cache`] at any time and see
//! either the old or the new cache; writers are serialised.

use arc_swap::ArcSwap;
use metacache_catalog::{CatalogStore, RemoteSchemaIntrospector};
use metacache_core::{
    Config, FunctionName, InconsistentMetadata, MetadataError, RawFunctionMeta, SchemaObjId,
    TableMetadata, TableName, Volatility,
};
use metacache_engine::{diff_metadata, SchemaDiff};
use serde_json::json;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::build::{build_initial_cache, BuildReason, RebuildableSchemaCache, SchemaCache};
use crate::invalidation::{AppliedInvalidations, CacheInvalidations};

/// Raw metadata of the tracked tables and functions at one point in time
struct RawCapture {
    tables: Vec<TableMetadata>,
    functions: Vec<RawFunctionMeta>,
}

/// Functions whose raw metadata the checker watches: tracked functions and
/// functions backing computed fields
fn watched_functions(cache: &SchemaCache) -> BTreeSet<FunctionName> {
    let computed = cache
        .tables
        .values()
        .flat_map(|table| table.computed_fields.values().map(|field| field.function.clone()));
    cache.functions.keys().cloned().chain(computed).collect()
}

async fn capture_raw_metadata(
    store: &dyn CatalogStore,
    cache: &SchemaCache,
) -> Result<RawCapture, MetadataError> {
    let functions = watched_functions(cache);
    let tables = store
        .fetch_raw_table_metadata()
        .await?
        .into_iter()
        .filter(|table| cache.tables.contains_key(&table.name))
        .collect();
    let functions = store
        .fetch_raw_function_metadata()
        .await?
        .into_iter()
        .filter(|function| functions.contains(&function.name))
        .collect();
    Ok(RawCapture { tables, functions })
}

fn dependents_payload(dependents: &BTreeSet<SchemaObjId>) -> serde_json::Value {
    json!(dependents.iter().map(|d| d.to_string()).collect::<Vec<_>>())
}

/// Holder of the installed schema cache
pub struct SchemaCacheManager {
    current: ArcSwap<RebuildableSchemaCache>,
    store: Arc<dyn CatalogStore>,
    writer: Mutex<()>,
}

impl SchemaCacheManager {
    /// Install an already built cache
    pub fn new(cache: RebuildableSchemaCache) -> Self {
        let store = cache.store();
        Self {
            current: ArcSwap::from_pointee(cache),
            store,
            writer: Mutex::new(()),
        }
    }

    /// Build the initial cache and install it
    pub async fn initialize(
        store: Arc<dyn CatalogStore>,
        introspector: Arc<dyn RemoteSchemaIntrospector>,
        config: &Config,
    ) -> Result<Self, MetadataError> {
        let cache = build_initial_cache(store, introspector, config).await?;
        Ok(Self::new(cache))
    }

    /// The installed rebuildable cache
    pub fn current(&self) -> Arc<RebuildableSchemaCache> {
        self.current.load_full()
    }

    pub fn schema_cache(&self) -> Arc<SchemaCache> {
        self.current.load().schema_cache()
    }

    /// Rebuild the installed cache and swap the result in
    pub async fn rebuild(
        &self,
        reason: BuildReason,
        invalidations: CacheInvalidations,
    ) -> Result<AppliedInvalidations, MetadataError> {
        let _writer = self.writer.lock().await;
        let installed = self.current.load_full();
        let (rebuilt, applied) = installed.rebuild(reason, invalidations).await?;
        self.current.store(Arc::new(rebuilt));
        Ok(applied)
    }

    /// Run a metadata-mutating action under the consistency check.
    ///
    /// With `cascade` unset the action is refused when anything it dropped
    /// still has dependents. The action's effects on the store are not rolled
    /// back on refusal; that is left to the caller's transaction.
    pub async fn with_consistency_check<T, F, Fut>(
        &self,
        cascade: bool,
        action: F,
    ) -> Result<T, MetadataError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MetadataError>>,
    {
        let _writer = self.writer.lock().await;
        let installed = self.current.load_full();
        let cache = installed.schema_cache();
        let store = self.store.as_ref();

        store.clear_derived_views().await?;
        let before = capture_raw_metadata(store, &cache).await?;

        let result = action().await?;

        let after = capture_raw_metadata(store, &cache).await?;
        let diff =
            diff_metadata(&before.tables, &after.tables, &before.functions, &after.functions);
        debug!(?diff, "metadata diff");

        if let Some(function) = diff.overloaded_functions.first() {
            return Err(MetadataError::not_supported(format!(
                "the function \"{}\" is tracked or used by a computed field; \
                 overloading it is not supported",
                function
            )));
        }

        let dependents = diff.indirect_dependents(&cache.dependency_graph);
        if !dependents.is_empty() && !cascade {
            info!(dependents = dependents.len(), "refusing action with dependent objects");
            return Err(MetadataError::dependency(format!(
                "cannot drop due to the following dependent objects: {}",
                dependents.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            ))
            .with_internal(dependents_payload(&dependents)));
        }

        check_volatility(&diff, &cache)?;
        self.apply_diff(&diff, &dependents, &cache).await?;

        let (rebuilt, _) = installed
            .rebuild(BuildReason::CatalogUpdate, CacheInvalidations::metadata())
            .await?;
        let new_cache = rebuilt.schema_cache();

        let previous = cache.inconsistent_object_ids();
        let introduced: Vec<&InconsistentMetadata> = new_cache
            .inconsistencies
            .iter()
            .filter(|inconsistency| !previous.contains(inconsistency.object_id()))
            .collect();
        if !introduced.is_empty() {
            warn!(introduced = introduced.len(), "action introduced inconsistent metadata");
            return Err(MetadataError::unexpected("cannot continue due to new inconsistent metadata")
                .with_internal(json!(introduced)));
        }

        self.current.store(Arc::new(rebuilt));
        info!(purged = dependents.len(), "metadata action accepted");
        Ok(result)
    }

    /// Purge dependents, then drop what the diff removed from tracked metadata
    async fn apply_diff(
        &self,
        diff: &SchemaDiff,
        dependents: &BTreeSet<SchemaObjId>,
        cache: &SchemaCache,
    ) -> Result<(), MetadataError> {
        for dependent in dependents {
            info!(object = %dependent, "purging dependent object");
            self.store.purge_dependent_object(dependent).await?;
        }

        for function in &diff.dropped_functions {
            let purged = dependents.contains(&SchemaObjId::function(function.clone()));
            if cache.functions.contains_key(function) && !purged {
                self.store.delete_function_record(function).await?;
            }
        }

        for table in &diff.dropped_tables {
            self.untrack(table).await?;
        }
        Ok(())
    }

    async fn untrack(&self, table: &TableName) -> Result<(), MetadataError> {
        debug!(table = %table, "untracking dropped table");
        self.store.untrack_table(table).await?;
        Ok(())
    }
}

fn check_volatility(diff: &SchemaDiff, cache: &SchemaCache) -> Result<(), MetadataError> {
    let volatile = diff
        .altered_functions
        .iter()
        .find(|(function, volatility)| {
            *volatility == Volatility::Volatile && cache.functions.contains_key(function)
        });
    match volatile {
        Some((function, _)) => Err(MetadataError::not_supported(format!(
            "type of function \"{}\" is altered to \"VOLATILE\" which is not supported now",
            function
        ))),
        None => Ok(()),
    }
}
