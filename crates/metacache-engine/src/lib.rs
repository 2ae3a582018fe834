//! Metacache engine - schema cache build stages
//!
//! This crate implements the pure stages of a schema cache build:
//! - Table and function resolution with inconsistency collection
//! - Remote schema introspection decoding
//! - Dependency resolution and pruning
//! - GraphQL schema assembly per role
//! - Allow-list normalisation
//! - Raw metadata diffing for the consistency check

pub mod align;
pub mod allowlist;
pub mod assembler;
pub mod collector;
pub mod diff;
pub mod introspection;
pub mod resolver;

pub use allowlist::{build_allowlist, normalize_query, query_signature};
pub use assembler::{
    assemble_schema, build_base_contexts, merge_remote_schemas, role_schema, AssembledSchema,
};
pub use collector::{
    build_functions, build_table_core_infos, build_table_infos, catalog_function_names,
    resolve_headers, PendingTriggerView, TableBuild,
};

pub use diff::{diff_metadata, SchemaDiff, TableDiff};
pub use introspection::{parse_introspection, resolve_remote_definition, IntrospectionError};
pub use resolver::{resolve_dependencies, BuildOutputs, RemoteSchemaMap, Resolved};
