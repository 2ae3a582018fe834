//! Remote schema declarations and introspection payloads
//!
//! A remote declaration is resolved into an [`IntrospectionRequest`] before
//! anything is fetched, and the fetched payload (a standard GraphQL
//! introspection response) is converted into a [`GraphQLSchema`] whose root
//! type fields become query and mutation root fields.

use crate::collector::{env_value, resolve_headers};
use metacache_catalog::IntrospectionRequest;
use metacache_core::definitions::RemoteSchemaDefinition;
use metacache_core::graphql::{FieldDefinition, TypeDefinition, BUILTIN_SCALARS};
use metacache_core::{GraphQLSchema, RemoteSchemaDef};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

/// Why an introspection payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectionError {
    #[error("invalid introspection result: {0}")]
    Decode(String),

    #[error("root type \"{0}\" is not an object type in the introspection result")]
    MissingRootType(String),

    #[error("duplicate type names in introspection result: {}", .0.join(", "))]
    DuplicateTypes(Vec<String>),

    #[error("types referenced but not defined in introspection result: {}", .0.join(", "))]
    UndefinedTypes(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: SchemaData,
}

#[derive(Debug, Deserialize)]
struct SchemaData {
    #[serde(rename = "__schema")]
    schema: IntrospectionSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: NamedRef,

    #[serde(default)]
    mutation_type: Option<NamedRef>,

    types: Vec<FullType>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullType {
    kind: TypeKind,
    name: String,

    #[serde(default)]
    fields: Option<Vec<Field>>,

    #[serde(default)]
    input_fields: Option<Vec<InputValue>>,

    #[serde(default)]
    enum_values: Option<Vec<EnumValue>>,

    #[serde(default)]
    possible_types: Option<Vec<TypeRef>>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,

    #[serde(default)]
    args: Vec<InputValue>,

    #[serde(rename = "type")]
    ty: TypeRef,
}

#[derive(Debug, Deserialize)]
struct InputValue {
    name: String,

    #[serde(rename = "type")]
    ty: TypeRef,
}

#[derive(Debug, Deserialize)]
struct EnumValue {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRef {
    kind: TypeKind,

    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    /// Render as an SDL type reference, e.g. `[Country!]!`
    fn render(&self) -> Result<String, IntrospectionError> {
        let inner = || {
            self.of_type
                .as_deref()
                .ok_or_else(|| {
                    IntrospectionError::Decode("wrapping type without ofType".to_string())
                })
        };
        match self.kind {
            TypeKind::NonNull => Ok(format!("{}!", inner()?.render()?)),
            TypeKind::List => Ok(format!("[{}]", inner()?.render()?)),
            _ => self
                .name
                .clone()
                .ok_or_else(|| {
                    IntrospectionError::Decode("named type reference without a name".to_string())
                }),
        }
    }
}

fn convert_fields(
    fields: Vec<Field>,
) -> Result<BTreeMap<String, FieldDefinition>, IntrospectionError> {
    fields
        .into_iter()
        .map(|field| -> Result<(String, FieldDefinition), IntrospectionError> {
            let definition = field
                .args
                .iter()
                .try_fold(FieldDefinition::new(field.ty.render()?), |def, arg| {
                    Ok::<_, IntrospectionError>(def.with_arg(arg.name.clone(), arg.ty.render()?))
                })?;
            Ok((field.name, definition))
        })
        .collect()
}

fn convert_type(ty: FullType) -> Result<TypeDefinition, IntrospectionError> {
    let definition = match ty.kind {
        TypeKind::Scalar => TypeDefinition::Scalar,
        TypeKind::Object | TypeKind::Interface => TypeDefinition::Object {
            fields: convert_fields(ty.fields.unwrap_or_default())?,
        },
        TypeKind::Union => TypeDefinition::Union {
            members: ty
                .possible_types
                .unwrap_or_default()
                .into_iter()
                .filter_map(|member| member.name)
                .collect(),
        },
        TypeKind::Enum => TypeDefinition::Enum {
            values: ty.enum_values.unwrap_or_default().into_iter().map(|v| v.name).collect(),
        },
        TypeKind::InputObject => TypeDefinition::InputObject {
            fields: ty
                .input_fields
                .unwrap_or_default()
                .into_iter()
                .map(|field| -> Result<(String, String), IntrospectionError> {
                    Ok((field.name, field.ty.render()?))
                })
                .collect::<Result<_, _>>()?,
        },
        TypeKind::List | TypeKind::NonNull => {
            return Err(IntrospectionError::Decode(format!(
                "type \"{}\" is declared with a wrapping kind",
                ty.name
            )))
        }
    };
    Ok(definition)
}

fn take_root(
    schema: &mut GraphQLSchema,
    name: &str,
) -> Result<BTreeMap<String, FieldDefinition>, IntrospectionError> {
    match schema.types.remove(name) {
        Some(TypeDefinition::Object { fields }) => Ok(fields),
        _ => Err(IntrospectionError::MissingRootType(name.to_string())),
    }
}

/// Convert an introspection response into a served-schema fragment.
///
/// Introspection types (`__*`) and built-in scalars are dropped; the root
/// object types are folded into the query and mutation roots.
pub fn parse_introspection(
    payload: &serde_json::Value,
) -> Result<GraphQLSchema, IntrospectionError> {
    let envelope: Envelope = serde_json::from_value(payload.clone())
        .map_err(|e| IntrospectionError::Decode(e.to_string()))?;
    let introspected = envelope.data.schema;

    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<String> = introspected
        .types
        .iter()
        .filter(|ty| !seen.insert(ty.name.as_str()))
        .map(|ty| ty.name.clone())
        .collect();
    if !duplicates.is_empty() {
        return Err(IntrospectionError::DuplicateTypes(duplicates.into_iter().collect()));
    }

    let mut schema = GraphQLSchema::new();
    for ty in introspected.types {
        if ty.name.starts_with("__") || BUILTIN_SCALARS.contains(&ty.name.as_str()) {
            continue;
        }
        let name = ty.name.clone();
        schema.types.insert(name, convert_type(ty)?);
    }

    schema.query_root = take_root(&mut schema, &introspected.query_type.name)?;
    if let Some(mutation) = &introspected.mutation_type {
        schema.mutation_root = take_root(&mut schema, &mutation.name)?;
    }

    let undefined = schema.undefined_types();
    if !undefined.is_empty() {
        return Err(IntrospectionError::UndefinedTypes(undefined.into_iter().collect()));
    }
    Ok(schema)
}

/// Validate a remote declaration and turn it into a fetch request
pub fn resolve_remote_definition(
    remote: &RemoteSchemaDef,
    default_timeout: Duration,
) -> Result<IntrospectionRequest, String> {
    let definition: RemoteSchemaDefinition = serde_json::from_value(remote.definition.clone())
        .map_err(|e| format!("invalid remote schema definition: {}", e))?;

    let url = match (&definition.url, &definition.url_from_env) {
        (Some(url), None) => url.clone(),
        (None, Some(var)) => env_value(var)?,
        _ => return Err("exactly one of \"url\" or \"url_from_env\" is required".to_string()),
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("invalid url \"{}\": only http and https are supported", url));
    }

    let timeout = definition
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);
    let base = IntrospectionRequest::new(remote.name.clone(), url).with_timeout(timeout);
    let request = resolve_headers(&definition.headers)?
        .into_iter()
        .fold(base, |request, (name, value)| request.with_header(name, value));

    Ok(request)
}
