//! Served-schema assembly
//!
//! The base context of every role is derived from the resolved tables and
//! functions alone. Remote schemas are then folded in one at a time, in
//! name order; a remote that conflicts with what is already merged becomes an
//! inconsistency and the accumulators keep their previous value.

use crate::resolver::RemoteSchemaMap;
use metacache_core::graphql::{FieldDefinition, TypeDefinition, BUILTIN_SCALARS};
use metacache_core::schema::ComputedFieldReturn;
use metacache_core::{
    ColumnName, ColumnType, FunctionInfo, FunctionName, FunctionType, GraphQLSchema,
    InconsistentMetadata, MetadataError, MetadataObjId, MetadataObject, PermType, RelType,
    RoleContexts, RoleName, SchemaConflict, TableInfo, TableName,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Everything the served schema is made of after the remote fold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledSchema {
    pub remote_schemas: RemoteSchemaMap,
    pub role_contexts: RoleContexts,
    pub default_context: GraphQLSchema,
}

fn define_type(
    schema: &mut GraphQLSchema,
    name: &str,
    definition: TypeDefinition,
) -> Result<(), MetadataError> {
    match schema.types.get(name) {
        Some(existing) if *existing != definition => Err(MetadataError::unexpected(format!(
            "type \"{}\" is generated twice with different definitions",
            name
        ))),
        Some(_) => Ok(()),
        None => {
            schema.types.insert(name.to_string(), definition);
            Ok(())
        }
    }
}

fn add_root_field(
    root: &mut BTreeMap<String, FieldDefinition>,
    name: String,
    field: FieldDefinition,
) -> Result<(), MetadataError> {
    if root.contains_key(&name) {
        return Err(MetadataError::unexpected(format!(
            "root field \"{}\" is generated twice",
            name
        )));
    }
    root.insert(name, field);
    Ok(())
}

/// Scalar a column type is served as, declaring it when it is not built in
fn scalar_for(
    schema: &mut GraphQLSchema,
    column_type: &ColumnType,
) -> Result<String, MetadataError> {
    let name = column_type.graphql_scalar();
    if !BUILTIN_SCALARS.contains(&name) {
        define_type(schema, name, TypeDefinition::Scalar)?;
    }
    Ok(name.to_string())
}

fn is_visible(table: &TableInfo, role: &RoleName) -> bool {
    role.is_admin() || table.permission(role, PermType::Select).is_some()
}

fn permitted_columns(
    table: &TableInfo,
    role: &RoleName,
    permission: PermType,
) -> Option<BTreeSet<ColumnName>> {
    if role.is_admin() {
        return Some(table.core.columns.keys().cloned().collect());
    }
    table.permission(role, permission).map(|perm| perm.columns.clone())
}

fn visible_table<'t>(
    tables: &'t BTreeMap<TableName, TableInfo>,
    name: &TableName,
    role: &RoleName,
) -> Option<&'t TableInfo> {
    tables.get(name).filter(|table| is_visible(table, role))
}

fn object_type(
    schema: &mut GraphQLSchema,
    table: &TableInfo,
    tables: &BTreeMap<TableName, TableInfo>,
    role: &RoleName,
    columns: &BTreeSet<ColumnName>,
) -> Result<TypeDefinition, MetadataError> {
    let mut fields = BTreeMap::new();

    for column in table.core.ordered_columns() {
        if !columns.contains(&column.name) {
            continue;
        }
        let scalar = scalar_for(schema, &column.column_type)?;
        let ty = if column.nullable { scalar } else { format!("{}!", scalar) };
        fields.insert(column.name.to_string(), FieldDefinition::new(ty));
    }

    for relationship in table.relationships.values() {
        if visible_table(tables, &relationship.remote_table, role).is_none() {
            continue;
        }
        let ty = match relationship.rel_type {
            RelType::Object => relationship.remote_table.to_string(),
            RelType::Array => format!("[{}!]!", relationship.remote_table),
        };
        fields.insert(relationship.name.to_string(), FieldDefinition::new(ty));
    }

    let granted = table.permission(role, PermType::Select).map(|perm| &perm.computed_fields);
    for computed_field in table.computed_fields.values() {
        if !role.is_admin() && !granted.is_some_and(|names| names.contains(&computed_field.name)) {
            continue;
        }
        let ty = match &computed_field.return_type {
            ComputedFieldReturn::Scalar { column_type } => scalar_for(schema, column_type)?,
            ComputedFieldReturn::Table { table: returned, returns_set } => {
                if visible_table(tables, returned, role).is_none() {
                    continue;
                }
                if *returns_set {
                    format!("[{}!]!", returned)
                } else {
                    returned.to_string()
                }
            }
        };
        fields.insert(computed_field.name.to_string(), FieldDefinition::new(ty));
    }

    Ok(TypeDefinition::Object { fields })
}

fn input_type(
    schema: &mut GraphQLSchema,
    table: &TableInfo,
    columns: &BTreeSet<ColumnName>,
) -> Result<TypeDefinition, MetadataError> {
    let mut fields = BTreeMap::new();
    for column in table.core.ordered_columns() {
        if columns.contains(&column.name) {
            fields.insert(column.name.to_string(), scalar_for(schema, &column.column_type)?);
        }
    }
    Ok(TypeDefinition::InputObject { fields })
}

fn add_table(
    schema: &mut GraphQLSchema,
    table: &TableInfo,
    tables: &BTreeMap<TableName, TableInfo>,
    role: &RoleName,
) -> Result<(), MetadataError> {
    let name = table.name().as_str();

    if let Some(columns) = permitted_columns(table, role, PermType::Select) {
        let definition = object_type(schema, table, tables, role, &columns)?;
        define_type(schema, name, definition)?;

        add_root_field(
            &mut schema.query_root,
            name.to_string(),
            FieldDefinition::new(format!("[{}!]!", name))
                .with_arg("limit", "Int")
                .with_arg("offset", "Int"),
        )?;

        let primary_key = &table.core.primary_key;
        if !primary_key.is_empty() && primary_key.iter().all(|c| columns.contains(c)) {
            let mut by_pk = FieldDefinition::new(name);
            for column in primary_key.iter().filter_map(|c| table.core.column(c.as_str())) {
                let scalar = scalar_for(schema, &column.column_type)?;
                by_pk = by_pk.with_arg(column.name.to_string(), format!("{}!", scalar));
            }
            add_root_field(&mut schema.query_root, format!("{}_by_pk", name), by_pk)?;
        }
    }

    if let Some(columns) = permitted_columns(table, role, PermType::Insert) {
        let input = format!("{}_insert_input", name);
        let definition = input_type(schema, table, &columns)?;
        define_type(schema, &input, definition)?;
        add_root_field(
            &mut schema.mutation_root,
            format!("insert_{}", name),
            FieldDefinition::new("Int!").with_arg("objects", format!("[{}!]!", input)),
        )?;
    }

    if let Some(columns) = permitted_columns(table, role, PermType::Update) {
        let input = format!("{}_set_input", name);
        let definition = input_type(schema, table, &columns)?;
        define_type(schema, &input, definition)?;
        add_root_field(
            &mut schema.mutation_root,
            format!("update_{}", name),
            FieldDefinition::new("Int!").with_arg("_set", input),
        )?;
    }

    if role.is_admin() || table.permission(role, PermType::Delete).is_some() {
        add_root_field(
            &mut schema.mutation_root,
            format!("delete_{}", name),
            FieldDefinition::new("Int!"),
        )?;
    }

    Ok(())
}

fn add_function(
    schema: &mut GraphQLSchema,
    function: &FunctionInfo,
    tables: &BTreeMap<TableName, TableInfo>,
    role: &RoleName,
) -> Result<(), MetadataError> {
    let Some(returned) = function.return_table() else {
        return Ok(());
    };
    if visible_table(tables, returned, role).is_none() {
        return Ok(());
    }

    let ty = if function.returns_set {
        format!("[{}!]!", returned)
    } else {
        returned.to_string()
    };
    let mut field = FieldDefinition::new(ty);
    for arg in &function.args {
        if let (Some(arg_name), FunctionType::Scalar(column_type)) = (&arg.name, &arg.arg_type) {
            field = field.with_arg(arg_name.clone(), scalar_for(schema, column_type)?);
        }
    }
    add_root_field(&mut schema.query_root, function.name.to_string(), field)
}

/// Served schema for one role, from tables and functions only
pub fn role_schema(
    role: &RoleName,
    tables: &BTreeMap<TableName, TableInfo>,
    functions: &BTreeMap<FunctionName, FunctionInfo>,
) -> Result<GraphQLSchema, MetadataError> {
    let mut schema = GraphQLSchema::new();
    for table in tables.values() {
        add_table(&mut schema, table, tables, role)?;
    }
    for function in functions.values() {
        add_function(&mut schema, function, tables, role)?;
    }
    Ok(schema)
}

/// Base contexts for `admin` and every role holding a permission.
///
/// The default context is the admin context.
pub fn build_base_contexts(
    tables: &BTreeMap<TableName, TableInfo>,
    functions: &BTreeMap<FunctionName, FunctionInfo>,
) -> Result<(RoleContexts, GraphQLSchema), MetadataError> {
    let mut roles: BTreeSet<RoleName> = tables.values().flat_map(|t| t.roles().cloned()).collect();
    roles.insert(RoleName::admin());

    let contexts = roles
        .into_iter()
        .map(|role| {
            let schema = role_schema(&role, tables, functions)?;
            Ok((role, schema))
        })
        .collect::<Result<RoleContexts, MetadataError>>()?;
    let default_context = contexts.get(&RoleName::admin()).cloned().unwrap_or_default();
    Ok((contexts, default_context))
}

fn merge_into(
    role_contexts: &RoleContexts,
    default_context: &GraphQLSchema,
    remote: &GraphQLSchema,
) -> Result<(RoleContexts, GraphQLSchema), SchemaConflict> {
    let default_context = default_context.merge(remote)?;
    let role_contexts = role_contexts
        .iter()
        .map(|(role, schema)| Ok((role.clone(), schema.merge(remote)?)))
        .collect::<Result<RoleContexts, SchemaConflict>>()?;
    Ok((role_contexts, default_context))
}

/// Fold remote schemas into the base contexts, in name order
pub fn merge_remote_schemas(
    role_contexts: RoleContexts,
    default_context: GraphQLSchema,
    remotes: RemoteSchemaMap,
) -> (AssembledSchema, Vec<InconsistentMetadata>) {
    let mut assembled = AssembledSchema {
        remote_schemas: RemoteSchemaMap::new(),
        role_contexts,
        default_context,
    };
    let mut inconsistencies = Vec::new();

    for (name, (definition, context)) in remotes {
        match merge_into(&assembled.role_contexts, &assembled.default_context, &context.schema) {
            Ok((role_contexts, default_context)) => {
                debug!(remote_schema = %name, "merged remote schema");
                assembled.role_contexts = role_contexts;
                assembled.default_context = default_context;
                assembled.remote_schemas.insert(name, (definition, context));
            }
            Err(conflict) => {
                warn!(
                    remote_schema = %name,
                    error = %conflict,
                    "remote schema conflicts with the served schema"
                );
                let id = MetadataObjId::RemoteSchema { name };
                let object = MetadataObject::from_definition(id, &definition);

                inconsistencies.push(InconsistentMetadata::object(object, conflict.to_string()));
            }
        }
    }

    (assembled, inconsistencies)
}

/// Build base contexts and fold every fetched remote schema into them
pub fn assemble_schema(
    tables: &BTreeMap<TableName, TableInfo>,
    functions: &BTreeMap<FunctionName, FunctionInfo>,
    remotes: RemoteSchemaMap,
) -> Result<(AssembledSchema, Vec<InconsistentMetadata>), MetadataError> {
    let (role_contexts, default_context) = build_base_contexts(tables, functions)?;
    Ok(merge_remote_schemas(role_contexts, default_context, remotes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacache_core::{
        ColumnInfo, ComputedFieldInfo, ComputedFieldName, ConstraintName, PermInfo, RelInfo,
        RelName, RemoteSchemaContext, RemoteSchemaDef, RemoteSchemaName, TableCoreInfo,
        Volatility,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn column(
        name: &str,
        column_type: ColumnType,
        nullable: bool,
        position: usize,
    ) -> (ColumnName, ColumnInfo) {
        let info = ColumnInfo { name: ColumnName::new(name), column_type, nullable, position };
        (ColumnName::new(name), info)
    }

    fn blog_tables() -> BTreeMap<TableName, TableInfo> {
        let users = TableInfo::from_core(TableCoreInfo {
            name: TableName::new("users"),
            columns: [
                column("id", ColumnType::Integer, false, 1),
                column("name", ColumnType::Text, true, 2),
                column("external_id", ColumnType::Uuid, true, 3),
            ]
            .into_iter()
            .collect(),
            primary_key: vec![ColumnName::new("id")],
            foreign_keys: BTreeMap::new(),
            description: None,
        });

        let mut posts = TableInfo::from_core(TableCoreInfo {
            name: TableName::new("posts"),
            columns: [
                column("id", ColumnType::Integer, false, 1),
                column("title", ColumnType::Text, false, 2),
                column("author_id", ColumnType::Integer, true, 3),
            ]
            .into_iter()
            .collect(),
            primary_key: vec![ColumnName::new("id")],
            foreign_keys: BTreeMap::new(),
            description: None,
        });
        posts.relationships.insert(
            RelName::new("author"),
            RelInfo {
                name: RelName::new("author"),
                rel_type: RelType::Object,
                remote_table: TableName::new("users"),
                mapping: [(ColumnName::new("author_id"), ColumnName::new("id"))]
                    .into_iter()
                    .collect(),
                constraint: Some(ConstraintName::new("posts_author_id_fkey")),
            },
        );
        posts.computed_fields.insert(
            ComputedFieldName::new("summary"),
            ComputedFieldInfo {
                name: ComputedFieldName::new("summary"),
                function: FunctionName::new("post_summary"),
                return_type: ComputedFieldReturn::Scalar { column_type: ColumnType::Text },
            },
        );
        posts.permissions.entry(RoleName::new("anon")).or_default().insert(
            PermType::Select,
            PermInfo {
                role: RoleName::new("anon"),
                permission: PermType::Select,
                columns: [ColumnName::new("id"), ColumnName::new("title")].into_iter().collect(),
                computed_fields: BTreeSet::new(),
                filter: json!({}),
            },
        );

        [(TableName::new("users"), users), (TableName::new("posts"), posts)]
            .into_iter()
            .collect()
    }

    fn search_posts() -> BTreeMap<FunctionName, FunctionInfo> {
        let function = FunctionInfo {
            name: FunctionName::new("search_posts"),
            args: vec![metacache_core::FunctionArgMeta {
                name: Some("search".to_string()),
                arg_type: FunctionType::Scalar(ColumnType::Text),
            }],
            return_type: FunctionType::Table(TableName::new("posts")),
            returns_set: true,
            volatility: Volatility::Stable,
            description: None,
        };
        [(function.name.clone(), function)].into_iter().collect()
    }

    fn remote(
        name: &str,
        root_field: &str,
        type_name: &str,
    ) -> (RemoteSchemaName, (RemoteSchemaDef, RemoteSchemaContext)) {
        let mut schema = GraphQLSchema::new();
        schema.types.insert(
            type_name.to_string(),
            TypeDefinition::Object {
                fields: [("code".to_string(), FieldDefinition::new("ID!"))].into_iter().collect(),
            },
        );
        schema
            .query_root
            .insert(root_field.to_string(), FieldDefinition::new(format!("[{}]", type_name)));
        let url = format!("http://{}.local/graphql", name);
        (
            RemoteSchemaName::new(name),
            (
                RemoteSchemaDef::new(name, json!({ "url": url })),
                RemoteSchemaContext { name: RemoteSchemaName::new(name), url, schema },
            ),
        )
    }

    #[test]
    fn admin_sees_everything() {
        let (contexts, default_context) =
            build_base_contexts(&blog_tables(), &search_posts()).unwrap();
        let admin = &contexts[&RoleName::admin()];
        assert_eq!(admin, &default_context);

        let roots: Vec<_> = admin.query_root.keys().cloned().collect();
        assert_eq!(roots, vec!["posts", "posts_by_pk", "search_posts", "users", "users_by_pk"]);
        assert!(admin.mutation_root.contains_key("insert_users"));
        assert!(admin.mutation_root.contains_key("delete_posts"));
        assert_eq!(admin.types.get("uuid"), Some(&TypeDefinition::Scalar));

        let TypeDefinition::Object { fields } = &admin.types["posts"] else {
            panic!("posts is an object type");
        };
        assert_eq!(fields["author"].ty, "users");
        assert_eq!(fields["title"].ty, "String!");
        assert_eq!(fields["summary"].ty, "String");
        assert!(admin.undefined_types().is_empty());
    }

    #[test]
    fn roles_see_only_permitted_fields() {
        let (contexts, _) = build_base_contexts(&blog_tables(), &search_posts()).unwrap();
        let anon = &contexts[&RoleName::new("anon")];

        let TypeDefinition::Object { fields } = &anon.types["posts"] else {
            panic!("posts is an object type");
        };
        // users is not visible to anon, so the author relationship is hidden
        assert_eq!(fields.keys().cloned().collect::<Vec<_>>(), vec!["id", "title"]);
        assert!(!anon.types.contains_key("users"));
        assert!(anon.query_root.contains_key("posts_by_pk"));
        assert!(anon.query_root.contains_key("search_posts"));
        assert!(anon.mutation_root.is_empty());
        assert!(anon.undefined_types().is_empty());
    }

    #[test]
    fn failed_remote_merge_keeps_previous_state() {
        let (contexts, default_context) =
            build_base_contexts(&blog_tables(), &BTreeMap::new()).unwrap();
        let remotes: RemoteSchemaMap = [
            remote("countries", "countries", "Country"),
            remote("nations", "countries", "Nation"),
            remote("weather", "weather", "Weather"),
        ]
        .into_iter()
        .collect();

        let (assembled, inconsistencies) = merge_remote_schemas(contexts, default_context, remotes);

        assert_eq!(
            assembled.remote_schemas.keys().map(RemoteSchemaName::as_str).collect::<Vec<_>>(),
            vec!["countries", "weather"]
        );
        assert_eq!(inconsistencies.len(), 1);
        assert_eq!(
            inconsistencies[0].object_id(),
            &MetadataObjId::RemoteSchema { name: RemoteSchemaName::new("nations") }
        );
        assert!(!assembled.default_context.types.contains_key("Nation"));
        for schema in assembled.role_contexts.values() {
            assert!(schema.query_root.contains_key("weather"));
            assert!(!schema.types.contains_key("Nation"));
        }
    }

    #[test]
    fn remote_colliding_with_base_is_rejected() {
        let remotes = [remote("shadow", "users", "Shadow")].into_iter().collect();
        let (assembled, inconsistencies) =
            assemble_schema(&blog_tables(), &BTreeMap::new(), remotes).unwrap();

        assert!(assembled.remote_schemas.is_empty());
        assert!(inconsistencies[0].reason().contains("duplicate fields in query root"));
    }
}
