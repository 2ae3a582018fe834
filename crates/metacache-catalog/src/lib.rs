//! Catalog collaborators for the schema cache
//!
//! The schema cache reads tracked metadata from a [`CatalogStore`] and
//! fetches remote schemas through a [`RemoteSchemaIntrospector`]. This crate
//! defines both traits and ships offline implementations:
//!
//! - [`InMemoryCatalog`] - physical catalog plus tracked metadata in memory,
//!   loadable from an exported [`CatalogDump`]
//! - [`StaticIntrospector`] - canned introspection responses keyed by URL

pub mod adapter;
pub mod introspector;
pub mod memory;

pub use adapter::{
    CatalogError, CatalogStore, FetchError, IntrospectionRequest, RemoteSchemaIntrospector,
};

pub use introspector::{StaticIntrospector, StaticIntrospectorBuilder};
pub use memory::{CatalogDump, InMemoryCatalog, InMemoryCatalogBuilder, TrackedMetadata};
