//! Integration tests for incremental schema cache builds
//!
//! These drive the whole pipeline against an in-memory catalog store and a
//! static introspector, rebuilding and wrapping metadata actions the way a
//! server would.

mod fixtures;

use fixtures::{
    blog_builder, blog_catalog, countries_payload, introspector, remote, users_post_count,
    COUNTRIES_URL, WEATHER_URL,
};
use metacache_catalog::{CatalogStore, InMemoryCatalog, StaticIntrospector};
use metacache_core::{
    Config, ErrorCode, MetadataObjId, PermType, PermissionDef, RelType, RelationshipDef, RoleName,
    SchemaObjId, TableName, TableObjId, TriggerName, Volatility,
};
use metacache_incremental::{
    build_initial_cache, current_schema_cache, rebuild, AppliedInvalidations, BuildReason,
    CacheInvalidations, RebuildableSchemaCache, SchemaCacheManager,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

async fn manager(store: &InMemoryCatalog, introspector: &StaticIntrospector) -> SchemaCacheManager {
    let (store, introspector) = (Arc::new(store.clone()), Arc::new(introspector.clone()));
    SchemaCacheManager::initialize(store, introspector, &Config::default())
        .await
        .unwrap()
}

async fn initial_cache(
    store: InMemoryCatalog,
    introspector: StaticIntrospector,
) -> RebuildableSchemaCache {
    build_initial_cache(Arc::new(store), Arc::new(introspector), &Config::default())
        .await
        .unwrap()
}

async fn cache_only(
    cache: &RebuildableSchemaCache,
    invalidations: CacheInvalidations,
) -> (RebuildableSchemaCache, AppliedInvalidations) {
    rebuild(cache, BuildReason::CacheOnly, invalidations).await.unwrap()
}

/// A select permission on the untracked `comments` table
fn comments_select(role: &str) -> PermissionDef {
    PermissionDef::new("comments", role, PermType::Select, json!({"columns": "*", "filter": {}}))
}

fn table(name: &str) -> TableName {
    TableName::new(name)
}

// =============================================================================
// Incremental rebuilds
// =============================================================================

#[tokio::test]
async fn test_blog_catalog_builds_consistently() {
    let store = blog_catalog();
    let introspector = introspector();
    let cache = initial_cache(store.clone(), introspector.clone()).await;
    let schema_cache = current_schema_cache(&cache);

    assert!(schema_cache.inconsistencies.is_empty(), "{:?}", schema_cache.inconsistencies);
    assert_eq!(
        schema_cache.tables.keys().map(|t| t.as_str()).collect::<Vec<_>>(),
        vec!["posts", "users"]
    );
    assert!(schema_cache.functions.contains_key("search_posts"));
    assert_eq!(
        schema_cache.remote_schemas.keys().map(|r| r.as_str()).collect::<Vec<_>>(),
        vec!["countries", "weather"]
    );
    assert!(schema_cache.default_context.query_root.contains_key("countries"));
    assert!(schema_cache.role_contexts[&RoleName::new("anon")].query_root.contains_key("forecast"));
    assert!(schema_cache.report().is_consistent());
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let store = blog_catalog();
    let cache = initial_cache(store, introspector()).await;

    let (first, _) = cache_only(&cache, CacheInvalidations::none()).await;
    let (second, _) = cache_only(&first, CacheInvalidations::none()).await;

    assert_eq!(*current_schema_cache(&first), *current_schema_cache(&cache));
    assert_eq!(*current_schema_cache(&second), *current_schema_cache(&first));
    assert_eq!(second.invalidation_keys(), cache.invalidation_keys());
}

#[tokio::test]
async fn test_metadata_token_bump_rebuilds_same_contents() {
    let store = blog_catalog();
    let cache = initial_cache(store, introspector()).await;

    let (rebuilt, applied) = cache_only(&cache, CacheInvalidations::metadata()).await;

    assert!(applied.metadata);
    assert_ne!(rebuilt.invalidation_keys().metadata, cache.invalidation_keys().metadata);
    assert_eq!(current_schema_cache(&rebuilt).tables, current_schema_cache(&cache).tables);
}

#[tokio::test]
async fn test_extra_metadata_on_missing_table_is_isolated() {
    let store = blog_builder()
        .with_permission(comments_select("anon"))
        .with_permission(comments_select("user"))
        .with_relationship(RelationshipDef::new(
            "comments",
            "post",
            RelType::Object,
            json!({"foreign_key_constraint_on": "post_id"}),
        ))
        .build();
    let cache = initial_cache(store, StaticIntrospector::new()).await;
    let schema_cache = cache.schema_cache();

    assert_eq!(schema_cache.inconsistencies.len(), 3);
    for inconsistency in &schema_cache.inconsistencies {
        assert_eq!(inconsistency.reason(), "table \"comments\" does not exist");
    }
    assert!(schema_cache.tables.contains_key("users"));
    assert!(schema_cache.tables[&table("posts")].relationships.contains_key("author"));
}

#[tokio::test]
async fn test_remote_fetches_are_memoised_per_remote() {
    let store = blog_catalog();
    let introspector = introspector();
    let cache = initial_cache(store, introspector.clone()).await;
    assert_eq!(introspector.call_count(COUNTRIES_URL).await, 1);
    assert_eq!(introspector.call_count(WEATHER_URL).await, 1);

    let (cache, _) = cache_only(&cache, CacheInvalidations::none()).await;
    let (cache, _) = cache_only(&cache, CacheInvalidations::metadata()).await;
    assert_eq!(introspector.total_calls().await, 2);

    let (cache, applied) = cache_only(&cache, CacheInvalidations::remote_schema("countries")).await;
    assert_eq!(introspector.call_count(COUNTRIES_URL).await, 2);
    assert_eq!(introspector.call_count(WEATHER_URL).await, 1);
    assert_eq!(applied.remote_schemas.len(), 1);
    assert!(cache.invalidation_keys().remote_schemas.contains_key("countries"));
    assert!(!cache.invalidation_keys().remote_schemas.contains_key("weather"));
}

#[tokio::test]
async fn test_repeated_bumps_from_one_base_refetch() {
    let store = blog_catalog();
    let introspector = introspector();
    let base = initial_cache(store, introspector.clone()).await;
    assert_eq!(introspector.call_count(COUNTRIES_URL).await, 1);

    let (first, _) = cache_only(&base, CacheInvalidations::remote_schema("countries")).await;
    assert_eq!(introspector.call_count(COUNTRIES_URL).await, 2);

    let (second, _) = cache_only(&base, CacheInvalidations::remote_schema("countries")).await;
    assert_eq!(introspector.call_count(COUNTRIES_URL).await, 3);
    assert_ne!(first.invalidation_keys(), second.invalidation_keys());
    assert_eq!(introspector.call_count(WEATHER_URL).await, 1);
}

#[tokio::test]
async fn test_unknown_remote_invalidation_is_not_applied() {
    let store = blog_catalog();
    let cache = initial_cache(store, introspector()).await;

    let (rebuilt, applied) = cache_only(&cache, CacheInvalidations::remote_schema("missing")).await;
    assert!(applied.remote_schemas.is_empty());
    assert!(!rebuilt.invalidation_keys().remote_schemas.contains_key("missing"));
}

#[tokio::test]
async fn test_failed_remote_recovers_after_invalidation() {
    let store = blog_builder().with_remote_schema(remote("countries", COUNTRIES_URL)).build();
    let introspector = StaticIntrospector::new();
    let cache = initial_cache(store, introspector.clone()).await;
    assert_eq!(
        cache.schema_cache().inconsistent_object_ids().into_iter().collect::<Vec<_>>(),
        vec![MetadataObjId::RemoteSchema { name: "countries".into() }]
    );

    // The failure is memoised until the remote's token moves
    introspector.set_payload(COUNTRIES_URL, countries_payload()).await;
    let (cache, _) = cache_only(&cache, CacheInvalidations::none()).await;
    assert_eq!(cache.schema_cache().inconsistencies.len(), 1);

    let (cache, _) = cache_only(&cache, CacheInvalidations::remote_schema("countries")).await;
    assert!(cache.schema_cache().inconsistencies.is_empty());
    assert!(cache.schema_cache().remote_schemas.contains_key("countries"));
}

#[tokio::test]
async fn test_trigger_views_are_recreated_after_checked_action() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;
    let view = (table("posts"), TriggerName::new("notify_new_post"));
    assert!(store.trigger_views().await.contains(&view));

    manager.with_consistency_check(false, || async { Ok(()) }).await.unwrap();
    assert!(store.trigger_views().await.contains(&view));

    // cache-only rebuilds leave the database alone
    let created = store.view_creation_count();
    manager
        .rebuild(BuildReason::CacheOnly, CacheInvalidations::metadata())
        .await
        .unwrap();
    assert_eq!(store.view_creation_count(), created);
}

// =============================================================================
// Consistency checker
// =============================================================================

#[tokio::test]
async fn test_drop_without_cascade_is_refused() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;
    let installed = manager.schema_cache();

    let err = manager
        .with_consistency_check(false, || {
            let store = store.clone();
            async move {
                store.drop_table("users").await;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::DependencyError);
    let internal = err.internal.unwrap();
    let listed: Vec<&str> =
        internal.as_array().unwrap().iter().filter_map(|v| v.as_str()).collect();
    assert!(listed.contains(&"relationship author in table posts"));
    assert!(Arc::ptr_eq(&installed, &manager.schema_cache()));
    assert!(store.is_tracked("users").await);
}

#[tokio::test]
async fn test_drop_with_cascade_purges_dependents() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;

    manager
        .with_consistency_check(true, || {
            let store = store.clone();
            async move {
                store.drop_table("users").await;
                Ok(())
            }
        })
        .await
        .unwrap();

    let schema_cache = manager.schema_cache();
    assert!(!schema_cache.tables.contains_key("users"));
    assert!(schema_cache.inconsistencies.is_empty(), "{:?}", schema_cache.inconsistencies);

    let posts = &schema_cache.tables[&table("posts")];
    assert!(posts.relationships.is_empty());
    assert!(posts.permission(&"anon".into(), PermType::Select).is_some());
    assert!(posts.permission(&"user".into(), PermType::Select).is_none());
    assert!(!store.is_tracked("users").await);

    let purged = SchemaObjId::relationship("posts", "author");
    assert!(!schema_cache.contains(&purged));
    assert!(schema_cache.dependency_graph.dependencies_of(&purged).is_none());
}

#[tokio::test]
async fn test_dropped_column_purges_only_its_dependents() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;

    manager
        .with_consistency_check(true, || {
            let store = store.clone();
            async move {
                store.drop_column("posts", "title").await;
                Ok(())
            }
        })
        .await
        .unwrap();

    let schema_cache = manager.schema_cache();
    let anon = SchemaObjId::table_obj(
        "posts",
        TableObjId::Permission(RoleName::new("anon"), PermType::Select),
    );
    assert!(!schema_cache.contains(&anon));
    assert!(schema_cache.contains(&SchemaObjId::relationship("posts", "author")));
    let posts = &schema_cache.tables[&table("posts")];
    assert!(posts.permission(&"user".into(), PermType::Select).is_some());
    assert!(schema_cache.inconsistencies.is_empty(), "{:?}", schema_cache.inconsistencies);
}

#[tokio::test]
async fn test_new_inconsistency_rejects_action() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;
    let installed = manager.schema_cache();

    let err = manager
        .with_consistency_check(true, || {
            let store = store.clone();
            async move {
                store
                    .add_relationship(RelationshipDef::new(
                        "posts",
                        "editor",
                        RelType::Object,
                        json!({"foreign_key_constraint_on": "editor_id"}),
                    ))
                    .await;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::Unexpected);
    assert_eq!(err.message, "cannot continue due to new inconsistent metadata");
    assert_eq!(err.internal.unwrap().as_array().unwrap().len(), 1);
    assert!(Arc::ptr_eq(&installed, &manager.schema_cache()));
}

#[tokio::test]
async fn test_trigger_views_survive_a_rejected_action() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;
    let view = (table("posts"), TriggerName::new("notify_new_post"));
    let editor = SchemaObjId::relationship("posts", "editor");

    let err = manager
        .with_consistency_check(true, || {
            let store = store.clone();
            async move {
                store
                    .add_relationship(RelationshipDef::new(
                        "posts",
                        "editor",
                        RelType::Object,
                        json!({"foreign_key_constraint_on": "editor_id"}),
                    ))
                    .await;
                Ok(())
            }
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unexpected);

    manager
        .with_consistency_check(true, || {
            let store = store.clone();
            let editor = editor.clone();
            async move {
                store.purge_dependent_object(&editor).await?;
                Ok(())
            }
        })
        .await
        .unwrap();

    let schema_cache = manager.schema_cache();
    assert!(schema_cache.inconsistencies.is_empty(), "{:?}", schema_cache.inconsistencies);
    assert!(schema_cache.tables[&table("posts")].event_triggers.contains_key("notify_new_post"));
    assert!(store.trigger_views().await.contains(&view));
}

#[tokio::test]
async fn test_volatile_computed_field_function_rejects_action() {
    let store = blog_catalog();
    let introspector = introspector();
    let manager = manager(&store, &introspector).await;
    let installed = manager.schema_cache();

    let err = manager
        .with_consistency_check(false, || {
            let store = store.clone();
            async move {
                let mut function = users_post_count();
                function.volatility = Volatility::Volatile;
                store.replace_function(function).await;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::Unexpected);
    let internal = err.internal.unwrap();
    assert_eq!(internal[0]["object"]["id"]["name"], json!("post_count"));
    assert!(Arc::ptr_eq(&installed, &manager.schema_cache()));
}

#[tokio::test]
async fn test_preexisting_inconsistencies_do_not_reject() {
    let store = blog_builder()
        .with_permission(comments_select("anon"))
        .build();
    let manager = manager(&store, &StaticIntrospector::new()).await;
    assert_eq!(manager.schema_cache().inconsistencies.len(), 1);

    let value = manager
        .with_consistency_check(false, || async { Ok("done") })
        .await
        .unwrap();
    assert_eq!(value, "done");
    assert_eq!(manager.schema_cache().inconsistencies.len(), 1);
}
