//! Collaborator traits consumed by the schema cache
//!
//! The persistent store and the remote-schema transport are outside the
//! core. The build pipeline and the consistency checker only ever talk to
//! them through [`CatalogStore`] and [`RemoteSchemaIntrospector`].

use metacache_core::definitions::TriggerDefinition;
use metacache_core::{
    CatalogSnapshot, ColumnInfo, FunctionName, MetadataError, RawFunctionMeta, RemoteSchemaName,
    SchemaObjId, TableMetadata, TableName, TriggerName,
};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Errors raised by the persistent store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid catalog dump: {0}")]
    InvalidDump(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<CatalogError> for MetadataError {
    fn from(err: CatalogError) -> Self {
        MetadataError::store(err.to_string())
    }
}

/// Errors raised while introspecting a remote schema
///
/// Cloneable so a failed fetch can be memoised like a successful one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timed out after {seconds}s fetching {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A resolved remote-schema introspection call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionRequest {
    pub name: RemoteSchemaName,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl IntrospectionRequest {
    pub fn new(name: impl Into<RemoteSchemaName>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for IntrospectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Persistent store holding tracked metadata and the database catalog
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Get the store name (e.g., "Memory", "Postgres")
    fn name(&self) -> &'static str;

    /// Read the current tracked-metadata state
    async fn fetch_catalog_snapshot(&self) -> Result<CatalogSnapshot, CatalogError>;

    /// Introspect every table in the database, tracked or not
    async fn fetch_raw_table_metadata(&self) -> Result<Vec<TableMetadata>, CatalogError>;

    /// Introspect every function overload in the database, tracked or not
    async fn fetch_raw_function_metadata(&self) -> Result<Vec<RawFunctionMeta>, CatalogError>;

    /// Create (or replace) the view backing an event trigger
    async fn create_or_replace_trigger_view(
        &self,
        table: &TableName,
        columns: &[ColumnInfo],
        trigger: &TriggerName,
        definition: &TriggerDefinition,
    ) -> Result<(), CatalogError>;

    /// Drop every derived view (event trigger views)
    async fn clear_derived_views(&self) -> Result<(), CatalogError>;

    /// Remove a tracked function's metadata record
    async fn delete_function_record(&self, function: &FunctionName) -> Result<(), CatalogError>;

    /// Stop tracking a table and drop the extra metadata defined on it
    async fn untrack_table(&self, table: &TableName) -> Result<(), CatalogError>;

    /// Remove the metadata that defines a dependent schema object
    async fn purge_dependent_object(&self, object: &SchemaObjId) -> Result<(), CatalogError>;
}

/// Transport that fetches a remote schema's introspection response
#[async_trait::async_trait]
pub trait RemoteSchemaIntrospector: Send + Sync {
    /// Return the raw introspection JSON (`{"data": {"__schema": ...}}`)
    async fn introspect(
        &self,
        request: &IntrospectionRequest,
    ) -> Result<serde_json::Value, FetchError>;

}
