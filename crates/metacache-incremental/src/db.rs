//! Salsa database definition for incremental computation
//!
//! The database memoises the pure stages of a schema cache build. Inputs are
//! set from each catalog snapshot; tracked functions recompute only when the
//! inputs they read have changed.

/// Database trait for metacache incremental computation
///
/// All tracked functions take `&dyn salsa::Database` as their first parameter.
pub trait Db: salsa::Database {}

/// Main Salsa database implementation
///
/// Owned by the build engine of a [`RebuildableSchemaCache`](crate::RebuildableSchemaCache)
/// and reused across rebuilds, so unchanged table, function and allow-list
/// results are served from memo.
#[salsa::db]
#[derive(Default, Clone)]
pub struct MetacacheDatabase {
    storage: salsa::Storage<Self>,
}

#[salsa::db]
impl salsa::Database for MetacacheDatabase {}

impl Db for MetacacheDatabase {}
