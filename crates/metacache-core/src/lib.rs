//! Metacache Core
//!
//! Domain model shared by every pipeline stage: identifiers, catalog
//! snapshots, resolved table and function info, served schema contexts,
//! the dependency graph, and inconsistency records.
//! Never rename error codes - they are part of the public API.

pub mod catalog;
pub mod config;
pub mod definitions;
pub mod dependency;
pub mod error;
pub mod graphql;
pub mod metadata;
pub mod names;
pub mod report;
pub mod schema;

pub use catalog::{
    AllowlistCollection, CatalogSnapshot, ComputedFieldDef, EventTriggerDef, ForeignKeyMeta,
    FunctionArgMeta, FunctionType, ListedQuery, PermissionDef, RawColumn, RawFunctionMeta,
    RelType, RelationshipDef, RemoteSchemaDef, TableMetadata, TrackedFunction, TrackedTable,
    Volatility,
};
pub use config::{Config, ConfigError, ConsistencyConfig, RemoteSchemaConfig, ReportConfig};
pub use dependency::DependencyGraph;
pub use error::{ErrorCode, MetadataError, Result};
pub use graphql::{GraphQLSchema, RemoteSchemaContext, RoleContexts, SchemaConflict};
pub use metadata::{
    Collected, CollectedInfo, DependencyReason, InconsistentMetadata, MetadataObjId,
    MetadataObject, PermType, SchemaDependency, SchemaObjId, TableObjId,
};
pub use names::{
    ColumnName, ComputedFieldName, ConstraintName, FunctionName, RelName, RemoteSchemaName,
    RoleName, TableName, TriggerName,
};
pub use report::{InconsistencyReport, ReportVersion};
pub use schema::{
    ColumnInfo, ColumnType, ComputedFieldInfo, EventTriggerInfo, FunctionInfo, PermInfo,
    RelInfo, TableCoreInfo, TableInfo,
};
