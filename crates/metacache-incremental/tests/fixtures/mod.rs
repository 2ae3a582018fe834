//! Test fixtures for incremental build tests
//!
//! A blog catalog in an in-memory store: `users` and `posts` joined by
//! `posts.author_id -> users.id`, an `author` relationship, permissions for
//! `anon` and `user`, a `post_count` computed field, a tracked search
//! function, an event trigger and two remote schemas.

use metacache_catalog::{
    InMemoryCatalog, InMemoryCatalogBuilder, StaticIntrospector, StaticIntrospectorBuilder,
};
use metacache_core::{
    ColumnType, ComputedFieldDef, EventTriggerDef, FunctionType, PermType, PermissionDef,
    RawColumn, RawFunctionMeta, RelType, RelationshipDef, RemoteSchemaDef, TableMetadata,
    TableName, TrackedFunction, Volatility,
};
use serde_json::json;

pub const COUNTRIES_URL: &str = "https://countries.example.com/graphql";
pub const WEATHER_URL: &str = "https://weather.example.com/graphql";

pub fn users_table() -> TableMetadata {
    TableMetadata::new(
        "users",
        vec![
            RawColumn::new("id", ColumnType::Integer).not_null(),
            RawColumn::new("name", ColumnType::Text),
        ],
    )
    .with_primary_key(&["id"])
}

pub fn posts_table() -> TableMetadata {
    TableMetadata::new(
        "posts",
        vec![
            RawColumn::new("id", ColumnType::Integer).not_null(),
            RawColumn::new("title", ColumnType::Text).not_null(),
            RawColumn::new("author_id", ColumnType::Integer),
        ],
    )
    .with_primary_key(&["id"])
    .with_foreign_key("posts_author_id_fkey", "users", &[("author_id", "id")])
}

pub fn search_posts() -> RawFunctionMeta {
    let returns = FunctionType::Table(TableName::new("posts"));
    RawFunctionMeta::new("search_posts", returns, Volatility::Stable)
        .with_arg("search", FunctionType::Scalar(ColumnType::Text))
        .returning_set()
}

pub fn users_post_count() -> RawFunctionMeta {
    let returns = FunctionType::Scalar(ColumnType::Integer);
    RawFunctionMeta::new("users_post_count", returns, Volatility::Stable)
        .with_arg("user_row", FunctionType::Table(TableName::new("users")))
}

pub fn author_relationship() -> RelationshipDef {
    RelationshipDef::new(
        "posts",
        "author",
        RelType::Object,
        json!({"foreign_key_constraint_on": "author_id"}),
    )
}

pub fn anon_posts() -> PermissionDef {
    PermissionDef::new(
        "posts",
        "anon",
        PermType::Select,
        json!({"columns": ["id", "title"], "filter": {}}),
    )
}

pub fn user_posts() -> PermissionDef {
    PermissionDef::new(
        "posts",
        "user",
        PermType::Select,
        json!({"columns": "*", "filter": {"author": {"id": {"_eq": "X-Hasura-User-Id"}}}}),
    )
}

pub fn notify_trigger() -> EventTriggerDef {
    EventTriggerDef::new(
        "posts",
        "notify_new_post",
        json!({
            "definition": {"insert": {"columns": "*"}},
            "webhook": "https://hooks.example.com/posts"
        }),
    )
}

pub fn remote(name: &str, url: &str) -> RemoteSchemaDef {
    RemoteSchemaDef::new(name, json!({ "url": url }))
}

/// Blog catalog without remote schemas or triggers
pub fn blog_builder() -> InMemoryCatalogBuilder {
    InMemoryCatalogBuilder::new()
        .with_table(users_table())
        .with_table(posts_table())
        .with_function(search_posts())
        .with_function(users_post_count())
        .with_tracked_function(TrackedFunction::new("search_posts"))
        .with_relationship(author_relationship())
        .with_permission(anon_posts())
        .with_permission(user_posts())
        .with_computed_field(ComputedFieldDef::new(
            "users",
            "post_count",
            json!({"function": "users_post_count"}),
        ))
}

pub fn blog_catalog() -> InMemoryCatalog {
    blog_builder()
        .with_event_trigger(notify_trigger())
        .with_remote_schema(remote("countries", COUNTRIES_URL))
        .with_remote_schema(remote("weather", WEATHER_URL))
        .build()
}

pub fn introspector() -> StaticIntrospector {
    StaticIntrospectorBuilder::new()
        .with_payload(COUNTRIES_URL, countries_payload())
        .with_payload(WEATHER_URL, introspection_with_query_field("forecast", "Forecast"))
        .build()
}

/// Introspection response for a remote exposing `countries`
pub fn countries_payload() -> serde_json::Value {
    introspection_with_query_field("countries", "Country")
}

fn introspection_with_query_field(field: &str, object: &str) -> serde_json::Value {
    json!({
        "data": {
            "__schema": {
                "queryType": {"name": "Query"},
                "mutationType": null,
                "types": [
                    {
                        "kind": "OBJECT",
                        "name": "Query",
                        "fields": [
                            {
                                "name": field,
                                "args": [],
                                "type": {
                                    "kind": "LIST",
                                    "name": null,
                                    "ofType": {"kind": "OBJECT", "name": object, "ofType": null}
                                }
                            }
                        ]
                    },
                    {
                        "kind": "OBJECT",
                        "name": object,
                        "fields": [
                            {
                                "name": "code",
                                "args": [],
                                "type": {"kind": "SCALAR", "name": "ID", "ofType": null}
                            }

                        ]
                    }
                ]
            }
        }
    })
}
