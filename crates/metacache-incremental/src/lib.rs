//! Incremental schema cache builds
//!
//! This crate turns the pure stages of `metacache-engine` into an incremental
//! build. A rebuild only recomputes what changed since the previous build.
//!
//! ## Architecture
//!
//! - **Salsa inputs**: tracked tables, extra metadata, functions, allow-list
//! - **Tracked functions**: table core infos, table infos, function infos,
//!   allow-list signatures
//! - **Memo tables**: remote schema fetches and trigger view creation, keyed
//!   by name and invalidated through [`InvalidationKeys`]
//! - **Consistency checker**: [`SchemaCacheManager::with_consistency_check`]
//!   guards metadata-mutating actions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metacache_incremental::{BuildReason, CacheInvalidations, SchemaCacheManager};
//!
//! let manager = SchemaCacheManager::initialize(store, introspector, &config).await?;
//!
//! // Refetch one remote schema
//! manager
//!     .rebuild(BuildReason::CacheOnly, CacheInvalidations::remote_schema("countries"))
//!     .await?;
//!
//! // Drop a table, purging whatever depended on it
//! manager
//!     .with_consistency_check(true, || async { drop_users().await })
//!     .await?;
//! ```

pub mod build;
pub mod consistency;
pub mod db;
pub mod invalidation;
pub mod memo;
pub mod queries;
pub mod remote;

pub use build::{
    build_initial_cache, current_schema_cache, rebuild, BuildReason, RebuildableSchemaCache,
    SchemaCache,
};

pub use consistency::SchemaCacheManager;
pub use db::{Db, MetacacheDatabase};
pub use invalidation::{AppliedInvalidations, CacheInvalidations, InvalidationKeys, TokenEpoch};
pub use memo::{Dependency, Memo, Tracker};
