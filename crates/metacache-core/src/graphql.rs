//! Served GraphQL schema contexts
//!
//! A [`GraphQLSchema`] is the shape of what one role can query: named type
//! definitions plus query and mutation root fields. Remote schemas are
//! federated by merging their context into each role's context; merges are
//! pure and either produce a new schema or a [`SchemaConflict`].

use crate::names::{RemoteSchemaName, RoleName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Scalars every GraphQL schema has
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// A field with its rendered type reference (e.g. `[users!]!`) and arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub ty: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl FieldDefinition {
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.args.insert(name.into(), ty.into());
        self
    }

    /// Every named type this field mentions
    pub fn referenced_types(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.ty.as_str())
            .chain(self.args.values().map(String::as_str))
            .map(base_type_name)
    }
}

/// Strip list and non-null wrappers from a rendered type reference
pub fn base_type_name(ty: &str) -> &str {
    ty.trim_matches(|c| c == '[' || c == ']' || c == '!')
}

/// A named type definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDefinition {
    Scalar,
    Object { fields: BTreeMap<String, FieldDefinition> },
    Enum { values: BTreeSet<String> },
    InputObject { fields: BTreeMap<String, String> },
    Union { members: BTreeSet<String> },
}

/// Collision found while merging two schemas
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaConflict {
    #[error(
        "types: [ {} ] have mismatch with current graphql schema. \
         HINT: Types must be unique across remote schemas",
        .0.join(", ")
    )]
    TypeMismatch(Vec<String>),

    #[error("duplicate fields in query root: [ {} ]", .0.join(", "))]
    DuplicateQueryFields(Vec<String>),

    #[error("duplicate fields in mutation root: [ {} ]", .0.join(", "))]
    DuplicateMutationFields(Vec<String>),
}

/// One role's served schema
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphQLSchema {
    pub types: BTreeMap<String, TypeDefinition>,
    pub query_root: BTreeMap<String, FieldDefinition>,
    pub mutation_root: BTreeMap<String, FieldDefinition>,
}

impl GraphQLSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a named type is defined here or is a builtin scalar
    pub fn has_type(&self, name: &str) -> bool {
        BUILTIN_SCALARS.contains(&name) || self.types.contains_key(name)
    }

    /// Referenced type names that are neither defined nor builtin
    pub fn undefined_types(&self) -> BTreeSet<String> {
        let object_fields = self.types.values().flat_map(|def| match def {
            TypeDefinition::Object { fields } => fields.values().collect::<Vec<_>>(),
            _ => Vec::new(),
        });
        let mut missing: BTreeSet<String> = object_fields
            .chain(self.query_root.values())
            .chain(self.mutation_root.values())
            .flat_map(|field| field.referenced_types().map(str::to_string).collect::<Vec<_>>())
            .filter(|name| !self.has_type(name))
            .collect();
        for def in self.types.values() {
            let named: Vec<&str> = match def {
                TypeDefinition::InputObject { fields } => {
                    fields.values().map(|ty| base_type_name(ty)).collect()
                }

                TypeDefinition::Union { members } => members.iter().map(String::as_str).collect(),
                _ => continue,
            };
            missing.extend(
                named
                    .into_iter()
                    .filter(|name| !self.has_type(name))
                    .map(str::to_string),
            );
        }
        missing
    }

    /// Merge `other` into a copy of `self`.
    ///
    /// Types present in both must be defined identically; root field names
    /// must be disjoint.
    pub fn merge(&self, other: &GraphQLSchema) -> Result<GraphQLSchema, SchemaConflict> {
        let mismatched: Vec<String> = other
            .types
            .iter()
            .filter(|(name, def)| self.types.get(*name).is_some_and(|existing| existing != *def))
            .map(|(name, _)| name.clone())
            .collect();
        if !mismatched.is_empty() {
            return Err(SchemaConflict::TypeMismatch(mismatched));
        }

        let duplicate_query: Vec<String> = other
            .query_root
            .keys()
            .filter(|name| self.query_root.contains_key(*name))
            .cloned()
            .collect();
        if !duplicate_query.is_empty() {
            return Err(SchemaConflict::DuplicateQueryFields(duplicate_query));
        }

        let duplicate_mutation: Vec<String> = other
            .mutation_root
            .keys()
            .filter(|name| self.mutation_root.contains_key(*name))
            .cloned()
            .collect();
        if !duplicate_mutation.is_empty() {
            return Err(SchemaConflict::DuplicateMutationFields(duplicate_mutation));
        }

        let mut merged = self.clone();
        merged
            .types
            .extend(other.types.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .query_root
            .extend(other.query_root.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .mutation_root
            .extend(other.mutation_root.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(merged)
    }
}

/// Served schema per role
pub type RoleContexts = BTreeMap<RoleName, GraphQLSchema>;

/// A fetched and validated remote schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSchemaContext {
    pub name: RemoteSchemaName,
    pub url: String,
    pub schema: GraphQLSchema,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with(type_name: &str, field: &str) -> GraphQLSchema {
        let mut schema = GraphQLSchema::new();
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldDefinition::new("ID!"));
        schema
            .types
            .insert(type_name.to_string(), TypeDefinition::Object { fields });
        schema
            .query_root
            .insert(field.to_string(), FieldDefinition::new(format!("[{}!]!", type_name)));
        schema
    }

    #[test]
    fn base_type_names() {
        assert_eq!(base_type_name("[users!]!"), "users");
        assert_eq!(base_type_name("String"), "String");
    }

    #[test]
    fn disjoint_schemas_merge() {
        let left = schema_with("Country", "countries");
        let right = schema_with("Weather", "weather");
        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.types.len(), 2);
        assert_eq!(merged.query_root.len(), 2);
    }

    #[test]
    fn identical_types_are_shared() {
        let left = schema_with("Country", "countries");
        let right = schema_with("Country", "country_list");
        assert!(left.merge(&right).is_ok());
    }

    #[test]
    fn conflicting_types_are_rejected() {
        let left = schema_with("Country", "countries");
        let mut right = schema_with("Country", "other");
        right.types.insert("Country".to_string(), TypeDefinition::Scalar);

        let err = left.merge(&right).unwrap_err();
        assert_eq!(err, SchemaConflict::TypeMismatch(vec!["Country".to_string()]));
        assert!(err.to_string().contains("Types must be unique"));
    }

    #[test]
    fn duplicate_root_fields_are_rejected() {
        let left = schema_with("Country", "countries");
        let right = schema_with("Nation", "countries");
        assert_eq!(
            left.merge(&right).unwrap_err(),
            SchemaConflict::DuplicateQueryFields(vec!["countries".to_string()])
        );
    }

    #[test]
    fn undefined_types_are_reported() {
        let mut schema = schema_with("Country", "countries");
        schema
            .query_root
            .insert("capital".to_string(), FieldDefinition::new("City"));
        let missing: Vec<_> = schema.undefined_types().into_iter().collect();
        assert_eq!(missing, vec!["City".to_string()]);
    }
}
