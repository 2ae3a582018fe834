//! Remote schema stage
//!
//! Declarations are deduplicated by name, validated, and fetched through the
//! introspector. A fetch is memoised per name together with the request it
//! was made with and the remote's invalidation token; failures are memoised
//! too, so a broken remote is only retried after a token bump or a change to
//! its declaration.

use metacache_catalog::{IntrospectionRequest, RemoteSchemaIntrospector};
use metacache_core::{
    Collected, InconsistentMetadata, MetadataObjId, MetadataObject, RemoteSchemaContext,
    RemoteSchemaDef, RemoteSchemaName,
};
use metacache_engine::align::{group_by, partition_unique};
use metacache_engine::{parse_introspection, resolve_remote_definition, RemoteSchemaMap};
use std::time::Duration;
use tracing::{debug, info};

use crate::invalidation::InvalidationKeys;
use crate::memo::{Dependency, Memo, Tracker};

/// Memoised fetch outcome per remote schema
pub type RemoteFetchMemo =
    Memo<RemoteSchemaName, IntrospectionRequest, Result<RemoteSchemaContext, String>>;

async fn fetch_remote_schema(
    introspector: &dyn RemoteSchemaIntrospector,
    request: &IntrospectionRequest,
) -> Result<RemoteSchemaContext, String> {
    let payload = introspector
        .introspect(request)
        .await
        .map_err(|e| format!("fetching remote schema failed: {}", e))?;
    let schema = parse_introspection(&payload)
        .map_err(|e| format!("invalid introspection response: {}", e))?;

    Ok(RemoteSchemaContext {
        name: request.name.clone(),
        url: request.url.clone(),
        schema,
    })
}

fn remote_object(definition: &RemoteSchemaDef) -> MetadataObject {
    MetadataObject::from_definition(
        MetadataObjId::RemoteSchema {
            name: definition.name.clone(),
        },
        definition,
    )
}

/// Build the remote schema map, recording one inconsistency per failed remote
pub async fn build_remote_schemas(
    definitions: &[RemoteSchemaDef],
    keys: &InvalidationKeys,
    memo: &mut RemoteFetchMemo,
    introspector: &dyn RemoteSchemaIntrospector,
    default_timeout: Duration,
    collected: &mut Collected,
) -> RemoteSchemaMap {
    let (unique, duplicates) = partition_unique(group_by(definitions.iter(), |d| d.name.clone()));
    for (name, group) in duplicates {
        collected.push_inconsistency(InconsistentMetadata::duplicates(
            MetadataObjId::RemoteSchema { name },
            group.iter().map(|d| remote_object(d).definition).collect(),
        ));
    }

    let mut remote_schemas = RemoteSchemaMap::new();
    for (name, definition) in unique {
        let request = match resolve_remote_definition(definition, default_timeout) {
            Ok(request) => request,
            Err(reason) => {
                collected.inconsistent(remote_object(definition), reason);
                continue;
            }
        };

        let outcome = match memo.lookup(&name, &request, keys) {
            Some(outcome) => {
                debug!(remote_schema = %name, "remote schema served from memo");
                outcome
            }
            None => {
                let mut tracker = Tracker::new(keys);
                tracker.depend_on(Dependency::RemoteSchema(name.clone()));
                info!(remote_schema = %name, url = %request.url, "introspecting remote schema");
                let outcome = fetch_remote_schema(introspector, &request).await;
                memo.insert(name.clone(), request, tracker, outcome.clone());
                outcome
            }
        };

        match outcome {
            Ok(context) => {
                remote_schemas.insert(name, (definition.clone(), context));
            }
            Err(reason) => collected.inconsistent(remote_object(definition), reason),
        }
    }

    let (hits, misses) = memo.stats();
    debug!(remote_schemas = remote_schemas.len(), hits, misses, "remote schema memo");
    remote_schemas
}
