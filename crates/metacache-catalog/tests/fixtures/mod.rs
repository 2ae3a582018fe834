//! Test fixtures for catalog store integration tests
//!
//! A small blog database: `users` and `posts` with a foreign key from
//! `posts.author_id` to `users.id`, plus a set-returning search function.

use metacache_core::{
    ColumnType, FunctionType, RawColumn, RawFunctionMeta, TableMetadata, TableName, Volatility,
};

/// users(id, name, email)
pub fn users_table() -> TableMetadata {
    TableMetadata::new(
        "users",
        vec![
            RawColumn::new("id", ColumnType::Integer).not_null(),
            RawColumn::new("name", ColumnType::Text),
            RawColumn::new("email", ColumnType::Text).not_null(),
        ],
    )
    .with_primary_key(&["id"])
}

/// posts(id, title, author_id -> users.id)
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

/// search_posts(search text) RETURNS SETOF posts STABLE
pub fn search_posts() -> RawFunctionMeta {
    let returns = FunctionType::Table(TableName::new("posts"));
    RawFunctionMeta::new("search_posts", returns, Volatility::Stable)
        .with_arg("search", FunctionType::Scalar(ColumnType::Text))
        .returning_set()
}

/// A minimal introspection response with one query field
pub fn countries_payload() -> serde_json::Value {
    serde_json::json!({
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
                                "name": "countries",
                                "args": [],
                                "type": {
                                    "kind": "LIST",
                                    "name": null,
                                    "ofType": {"kind": "OBJECT", "name": "Country", "ofType": null}
                                }
                            }
                        ]
                    },
                    {
                        "kind": "OBJECT",
                        "name": "Country",
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
