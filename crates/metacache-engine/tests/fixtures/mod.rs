//! Test fixtures for engine integration tests
//!
//! A blog catalog snapshot: `users` and `posts` joined by
//! `posts.author_id -> users.id`, an `author` relationship, permissions for
//! the `anon` and `user` roles and a tracked search function.

use metacache_core::{
    AllowlistCollection, CatalogSnapshot, ColumnType, FunctionType, ListedQuery, PermType,
    PermissionDef, RawColumn, RawFunctionMeta, RelType, RelationshipDef, TableMetadata, TableName,
    TrackedFunction, TrackedTable, Volatility,
};
use serde_json::json;

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

pub fn tracked(table: TableMetadata) -> TrackedTable {
    TrackedTable {
        name: table.name.clone(),
        metadata: Some(table),
    }
}

pub fn blog_snapshot() -> CatalogSnapshot {
    CatalogSnapshot {
        tables: vec![tracked(users_table()), tracked(posts_table())],
        relationships: vec![RelationshipDef::new(
            "posts",
            "author",
            RelType::Object,
            json!({"foreign_key_constraint_on": "author_id"}),
        )],
        permissions: vec![
            PermissionDef::new(
                "posts",
                "anon",
                PermType::Select,
                json!({"columns": ["id", "title"], "filter": {}}),
            ),
            PermissionDef::new(
                "posts",
                "user",
                PermType::Select,
                json!({"columns": "*", "filter": {"author": {"id": {"_eq": "X-Hasura-User-Id"}}}}),
            ),
            PermissionDef::new(
                "users",
                "user",
                PermType::Select,
                json!({"columns": ["id", "name"], "filter": {}}),
            ),
        ],
        functions: vec![TrackedFunction::new("search_posts")],
        function_catalog: vec![search_posts()],
        allowlist: vec![AllowlistCollection {
            name: "web".to_string(),
            queries: vec![ListedQuery {
                name: "titles".to_string(),
                query: "{ posts { id title } }".to_string(),
            }],
        }],
        ..CatalogSnapshot::default()
    }
}

/// Introspection response for a remote exposing `countries`
pub fn countries_payload() -> serde_json::Value {
    introspection_with_query_field("countries", "Country")
}

/// Introspection response whose query root collides with the `posts` table
pub fn colliding_payload() -> serde_json::Value {
    introspection_with_query_field("posts", "Article")
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
