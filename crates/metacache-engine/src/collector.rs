//! Metadata collection
//!
//! Turns a [`CatalogSnapshot`] into typed table and function info. Every
//! stage is total: a definition that cannot be built becomes one
//! inconsistency on the [`Collected`] side channel and is left out, and a
//! definition that can be built records the schema objects it depends on so
//! the resolver can prune it later if one of them disappears.
//!
//! Extra metadata is attached in four passes (relationships, computed
//! fields, permissions, event triggers). Each pass aligns the table map with
//! the definitions grouped by table name:
//!
//! - table without definitions: unchanged
//! - table with definitions: definitions are deduplicated, built and attached
//! - definitions for a table that does not exist: one inconsistency each

use crate::align::{align, group_by, keyed, partition_unique, These};
use metacache_core::definitions::{
    ComputedFieldDefinition, EventTriggerConf, ForeignKeyOn, FunctionConfiguration, HeaderConf,
    ManualConfig, PermDefinition, RelUsing, TriggerDefinition,
};
use metacache_core::names::is_graphql_name;
use metacache_core::schema::ComputedFieldReturn;
use metacache_core::{
    CatalogSnapshot, Collected, ColumnInfo, ColumnName, ColumnType, ComputedFieldDef,
    ComputedFieldInfo, ComputedFieldName, DependencyReason, EventTriggerDef, EventTriggerInfo,
    FunctionInfo, FunctionName, FunctionType, InconsistentMetadata, MetadataObjId, MetadataObject,
    PermInfo, PermType, PermissionDef, RawFunctionMeta, RelInfo, RelName, RelType,
    RelationshipDef, RoleName, SchemaDependency, SchemaObjId, TableCoreInfo, TableInfo,
    TableName, TableObjId, TrackedFunction, TrackedTable, TriggerName, Volatility,
};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static TRIGGER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,42}$").expect("trigger name pattern is a valid regex")
});

/// View backing a built event trigger, created only on catalog-driven builds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingTriggerView {
    pub table: TableName,
    pub trigger: TriggerName,
    pub definition: TriggerDefinition,
    pub columns: Vec<ColumnInfo>,
}

/// Tables with all extra metadata attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBuild {
    pub tables: BTreeMap<TableName, TableInfo>,
    pub trigger_views: Vec<PendingTriggerView>,
}

fn no_such_column(table: &TableName, column: &str) -> String {
    format!("column \"{}\" does not exist on table \"{}\"", column, table)
}

pub(crate) fn env_value(var: &str) -> Result<String, String> {
    std::env::var(var).map_err(|_| format!("environment variable \"{}\" is not set", var))
}

/// Resolve literal and environment-sourced header values
pub fn resolve_headers(headers: &[HeaderConf]) -> Result<BTreeMap<String, String>, String> {
    headers
        .iter()
        .map(|header| -> Result<(String, String), String> {
            let value = match (&header.value, &header.value_from_env) {
                (Some(value), None) => value.clone(),
                (None, Some(var)) => env_value(var)?,
                _ => {
                    return Err(format!(
                        "header \"{}\" needs exactly one of \"value\" or \"value_from_env\"",
                        header.name
                    ))
                }
            };
            Ok((header.name.clone(), value))
        })
        .collect()
}

fn single_overload<'c>(
    catalog: &'c [RawFunctionMeta],
    name: &FunctionName,
) -> Result<&'c RawFunctionMeta, String> {
    let mut overloads = catalog.iter().filter(|f| &f.name == name);
    match (overloads.next(), overloads.next()) {
        (None, _) => Err(format!("no such function exists in the database: \"{}\"", name)),
        (Some(function), None) => Ok(function),
        (Some(_), Some(_)) => Err(format!(
            "function \"{}\" is overloaded. Overloaded functions are not supported",
            name
        )),
    }
}

// =============================================================================
// Tables
// =============================================================================

fn table_object(table: &TableName) -> MetadataObject {
    MetadataObject::new(MetadataObjId::Table { table: table.clone() }, json!({ "table": table }))
}

/// Build core info for every tracked table that exists physically
pub fn build_table_core_infos(
    tables: &[TrackedTable],
    collected: &mut Collected,
) -> BTreeMap<TableName, TableCoreInfo> {
    let (unique, duplicates) = partition_unique(group_by(tables.iter(), |t| t.name.clone()));
    for (name, group) in duplicates {
        collected.push_inconsistency(InconsistentMetadata::duplicates(
            MetadataObjId::Table { table: name.clone() },
            group.iter().map(|_| json!({ "table": name })).collect(),
        ));
    }

    keyed(unique, |name, tracked| {
        let Some(meta) = &tracked.metadata else {
            collected.inconsistent(
                table_object(name),
                format!("no such table/view exists in the database: \"{}\"", name),
            );
            return None;
        };
        if !is_graphql_name(name.as_str()) {
            collected.inconsistent(
                table_object(name),
                format!("table name \"{}\" is not a valid GraphQL name", name),
            );
            return None;
        }

        Some(TableCoreInfo {
            name: name.clone(),
            columns: meta
                .columns
                .iter()
                .map(|c| {
                    let info = ColumnInfo {
                        name: c.name.clone(),
                        column_type: c.column_type.clone(),
                        nullable: c.nullable,
                        position: c.position,
                    };
                    (c.name.clone(), info)
                })
                .collect(),
            primary_key: meta.primary_key.clone(),
            foreign_keys: meta
                .foreign_keys
                .iter()
                .map(|fk| (fk.constraint.clone(), fk.clone()))
                .collect(),
            description: meta.description.clone(),
        })
    })
}

/// A kind of extra metadata attached to a table
trait ExtraMetadata: Clone {
    type Key: Ord + Clone;

    fn table(&self) -> &TableName;
    fn key(&self) -> Self::Key;
    fn metadata_object(&self) -> MetadataObject;
}

impl ExtraMetadata for RelationshipDef {
    type Key = RelName;

    fn table(&self) -> &TableName {
        &self.table
    }

    fn key(&self) -> RelName {
        self.name.clone()
    }

    fn metadata_object(&self) -> MetadataObject {
        MetadataObject::from_definition(
            MetadataObjId::Relationship { table: self.table.clone(), name: self.name.clone() },
            self,
        )
    }
}

impl ExtraMetadata for ComputedFieldDef {
    type Key = ComputedFieldName;

    fn table(&self) -> &TableName {
        &self.table
    }

    fn key(&self) -> ComputedFieldName {
        self.name.clone()
    }

    fn metadata_object(&self) -> MetadataObject {
        MetadataObject::from_definition(
            MetadataObjId::ComputedField { table: self.table.clone(), name: self.name.clone() },
            self,
        )
    }
}

impl ExtraMetadata for PermissionDef {
    type Key = (RoleName, PermType);

    fn table(&self) -> &TableName {
        &self.table
    }

    fn key(&self) -> (RoleName, PermType) {
        (self.role.clone(), self.permission)
    }

    fn metadata_object(&self) -> MetadataObject {
        MetadataObject::from_definition(
            MetadataObjId::Permission {
                table: self.table.clone(),
                role: self.role.clone(),
                permission: self.permission,
            },
            self,
        )
    }
}

impl ExtraMetadata for EventTriggerDef {
    type Key = TriggerName;

    fn table(&self) -> &TableName {
        &self.table
    }

    fn key(&self) -> TriggerName {
        self.name.clone()
    }

    fn metadata_object(&self) -> MetadataObject {
        MetadataObject::from_definition(
            MetadataObjId::EventTrigger { table: self.table.clone(), name: self.name.clone() },
            self,
        )
    }
}

/// Align one kind of extra metadata with the table map and build it.
///
/// Duplicate definitions of one key are reported once and none of them is
/// built; construction of their metadata objects is deferred until the
/// duplicate decision is made.
fn collect_extras<D: ExtraMetadata, O>(
    tables: &BTreeMap<TableName, TableInfo>,
    definitions: &[D],
    collected: &mut Collected,
    mut build: impl FnMut(&TableInfo, &D) -> Result<(O, Vec<SchemaDependency>), String>,
) -> BTreeMap<TableName, BTreeMap<D::Key, O>> {
    let existing: BTreeMap<TableName, &TableInfo> =
        tables.iter().map(|(name, info)| (name.clone(), info)).collect();
    let grouped = group_by(definitions.iter().cloned(), |d| d.table().clone());

    let mut built = BTreeMap::new();
    for (table_name, aligned) in align(existing, grouped) {
        match aligned {
            These::This(_) => {}
            These::That(orphans) => {
                for definition in orphans {
                    collected.inconsistent(
                        definition.metadata_object(),
                        format!("table \"{}\" does not exist", table_name),
                    );
                }
            }
            These::These(table, definitions) => {
                let (unique, duplicates) = partition_unique(group_by(definitions, |d| d.key()));
                for group in duplicates.into_values() {
                    let Some(first) = group.first() else { continue };
                    collected.push_inconsistency(InconsistentMetadata::duplicates(
                        first.metadata_object().id,
                        group.iter().map(|d| d.metadata_object().definition).collect(),
                    ));
                }

                let outputs = keyed(unique, |_, definition| {
                    let object = definition.metadata_object();
                    match build(table, &definition) {
                        Ok((output, dependencies)) => {
                            let id = object.id.schema_obj_id();
                            collected.depends(object, id, dependencies);
                            Some(output)
                        }
                        Err(reason) => {
                            tracing::debug!(
                                object = %object.id,
                                %reason,
                                "metadata object is inconsistent"
                            );
                            collected.inconsistent(object, reason);
                            None
                        }
                    }
                });
                built.insert(table_name, outputs);
            }
        }
    }
    built
}

/// Attach relationships, computed fields, permissions and event triggers
pub fn build_table_infos(
    core_infos: BTreeMap<TableName, TableCoreInfo>,
    snapshot: &CatalogSnapshot,
    collected: &mut Collected,
) -> TableBuild {
    let mut tables: BTreeMap<TableName, TableInfo> = core_infos
        .into_iter()
        .map(|(name, core)| (name, TableInfo::from_core(core)))
        .collect();

    let relationships = collect_extras(&tables, &snapshot.relationships, collected, |table, def| {
        build_relationship(table, &tables, def)
    });
    for (table_name, built) in relationships {
        if let Some(info) = tables.get_mut(&table_name) {
            info.relationships.extend(built);
        }
    }

    let computed_fields =
        collect_extras(&tables, &snapshot.computed_fields, collected, |table, def| {
            build_computed_field(table, def, &snapshot.function_catalog)
        });
    for (table_name, built) in computed_fields {
        if let Some(info) = tables.get_mut(&table_name) {
            info.computed_fields.extend(built);
        }
    }

    let permissions = collect_extras(&tables, &snapshot.permissions, collected, |table, def| {
        build_permission(table, &tables, def)
    });
    for (table_name, built) in permissions {
        if let Some(info) = tables.get_mut(&table_name) {
            for ((role, permission), perm) in built {
                info.permissions.entry(role).or_default().insert(permission, perm);
            }
        }
    }

    let mut trigger_views = Vec::new();
    let triggers =
        collect_extras(&tables, &snapshot.event_triggers, collected, build_event_trigger);

    for (table_name, built) in triggers {
        if let Some(info) = tables.get_mut(&table_name) {
            for (name, (trigger, view)) in built {
                info.event_triggers.insert(name, trigger);
                trigger_views.push(view);
            }
        }
    }

    TableBuild { tables, trigger_views }
}

// =============================================================================
// Relationships
// =============================================================================

fn build_relationship(
    table: &TableInfo,
    tables: &BTreeMap<TableName, TableInfo>,
    def: &RelationshipDef,
) -> Result<(RelInfo, Vec<SchemaDependency>), String> {
    let table_name = table.name();
    if !is_graphql_name(def.name.as_str()) {
        return Err(format!("relationship name \"{}\" is not a valid GraphQL name", def.name));
    }
    if table.core.has_column(def.name.as_str()) {
        return Err(format!(
            "relationship name \"{}\" conflicts with a column of table \"{}\"",
            def.name, table_name
        ));
    }

    let using: RelUsing = serde_json::from_value(def.using.clone())
        .map_err(|e| format!("invalid relationship configuration: {}", e))?;

    let mut deps = Vec::new();
    let info = match using {
        RelUsing::ForeignKeyConstraintOn(ForeignKeyOn::Column(column)) => {
            if def.rel_type != RelType::Object {
                return Err(
                    "a foreign key column of this table can only define an object relationship"
                        .to_string(),
                );
            }
            if !table.core.has_column(column.as_str()) {
                return Err(no_such_column(table_name, column.as_str()));
            }
            let fk = table
                .core
                .foreign_key_on(std::slice::from_ref(&column))
                .ok_or_else(|| {
                    format!(
                        "no foreign key constraint exists on column \"{}\" of table \"{}\"",
                        column, table_name
                    )
                })?;

            deps.push(SchemaDependency::new(
                SchemaObjId::table(fk.ref_table.clone()),
                DependencyReason::RemoteTable,
            ));
            deps.push(SchemaDependency::new(
                SchemaObjId::column(table_name.clone(), column.clone()),
                DependencyReason::UsingColumn,
            ));
            deps.push(SchemaDependency::new(
                SchemaObjId::table_obj(
                    table_name.clone(),
                    TableObjId::ForeignKey(fk.constraint.clone()),
                ),
                DependencyReason::ForeignKey,
            ));
            deps.extend(fk.column_mapping.values().map(|remote| {
                SchemaDependency::new(
                    SchemaObjId::column(fk.ref_table.clone(), remote.clone()),
                    DependencyReason::RightColumn,
                )
            }));

            RelInfo {
                name: def.name.clone(),
                rel_type: RelType::Object,
                remote_table: fk.ref_table.clone(),
                mapping: fk.column_mapping.clone(),
                constraint: Some(fk.constraint.clone()),
            }
        }
        RelUsing::ForeignKeyConstraintOn(ForeignKeyOn::Remote { table: remote, column }) => {
            if def.rel_type != RelType::Array {
                return Err(
                    "a foreign key column of another table can only define an array relationship"
                        .to_string(),
                );
            }
            deps.push(SchemaDependency::new(
                SchemaObjId::table(remote.clone()),
                DependencyReason::RemoteTable,
            ));
            deps.push(SchemaDependency::new(
                SchemaObjId::column(remote.clone(), column.clone()),
                DependencyReason::UsingColumn,
            ));

            // A missing remote table is left to the resolver
            let mut mapping = BTreeMap::new();
            let mut constraint = None;
            if let Some(remote_info) = tables.get(&remote) {
                let fk = remote_info
                    .core
                    .foreign_key_on(std::slice::from_ref(&column))
                    .filter(|fk| &fk.ref_table == table_name)
                    .ok_or_else(|| {
                        format!(
                            "no foreign key constraint on \"{}\".\"{}\" references table \"{}\"",
                            remote, column, table_name
                        )
                    })?;
                for (remote_column, local_column) in &fk.column_mapping {
                    if !table.core.has_column(local_column.as_str()) {
                        return Err(no_such_column(table_name, local_column.as_str()));
                    }
                    deps.push(SchemaDependency::new(
                        SchemaObjId::column(table_name.clone(), local_column.clone()),
                        DependencyReason::LeftColumn,
                    ));
                    mapping.insert(local_column.clone(), remote_column.clone());
                }
                deps.push(SchemaDependency::new(
                    SchemaObjId::table_obj(
                        remote.clone(),
                        TableObjId::ForeignKey(fk.constraint.clone()),
                    ),
                    DependencyReason::ForeignKey,
                ));
                constraint = Some(fk.constraint.clone());
            }

            RelInfo {
                name: def.name.clone(),
                rel_type: RelType::Array,
                remote_table: remote,
                mapping,
                constraint,
            }
        }
        RelUsing::ManualConfiguration(ManualConfig { remote_table, column_mapping }) => {
            if column_mapping.is_empty() {
                return Err("column_mapping of a manual relationship cannot be empty".to_string());
            }
            deps.push(SchemaDependency::new(
                SchemaObjId::table(remote_table.clone()),
                DependencyReason::RemoteTable,
            ));

            for (local, remote) in &column_mapping {
                if !table.core.has_column(local.as_str()) {
                    return Err(no_such_column(table_name, local.as_str()));
                }
                deps.push(SchemaDependency::new(
                    SchemaObjId::column(table_name.clone(), local.clone()),
                    DependencyReason::LeftColumn,
                ));
                deps.push(SchemaDependency::new(
                    SchemaObjId::column(remote_table.clone(), remote.clone()),
                    DependencyReason::RightColumn,
                ));
            }

            RelInfo {
                name: def.name.clone(),
                rel_type: def.rel_type,
                remote_table,
                mapping: column_mapping,
                constraint: None,
            }
        }
    };

    Ok((info, deps))
}

// =============================================================================
// Computed fields
// =============================================================================

fn build_computed_field(
    table: &TableInfo,
    def: &ComputedFieldDef,
    function_catalog: &[RawFunctionMeta],
) -> Result<(ComputedFieldInfo, Vec<SchemaDependency>), String> {
    let table_name = table.name();
    if !is_graphql_name(def.name.as_str()) {
        return Err(format!("computed field name \"{}\" is not a valid GraphQL name", def.name));
    }
    if table.core.has_column(def.name.as_str())
        || table.relationships.contains_key(def.name.as_str())
    {
        return Err(format!(
            "computed field name \"{}\" conflicts with an existing field of table \"{}\"",
            def.name, table_name
        ));
    }

    let definition: ComputedFieldDefinition = serde_json::from_value(def.definition.clone())
        .map_err(|e| format!("invalid computed field definition: {}", e))?;
    let function = single_overload(function_catalog, &definition.function)?;
    if function.volatility == Volatility::Volatile {
        return Err(format!(
            "function \"{}\" is VOLATILE; computed fields require STABLE or IMMUTABLE functions",
            function.name
        ));
    }

    let table_argument = match &definition.table_argument {
        Some(argument) => function
            .args
            .iter()
            .find(|a| a.name.as_deref() == Some(argument.as_str()))
            .ok_or_else(|| {
                format!(
                    "function \"{}\" has no argument named \"{}\"",
                    function.name, argument
                )
            })?,
        None => function
            .args
            .first()
            .ok_or_else(|| format!("function \"{}\" has no input arguments", function.name))?,
    };
    if table_argument.arg_type != FunctionType::Table(table_name.clone()) {
        return Err(format!(
            "the table argument of function \"{}\" must be of type \"{}\"",
            function.name, table_name
        ));
    }

    let mut deps = vec![
        SchemaDependency::new(
            SchemaObjId::function(function.name.clone()),
            DependencyReason::Function,
        ),
        SchemaDependency::new(SchemaObjId::table(table_name.clone()), DependencyReason::Table),
    ];
    let return_type = match &function.return_type {
        FunctionType::Scalar(_) if function.returns_set => {
            return Err(format!(
                "function \"{}\" returns a set of scalars, which is not supported",
                function.name
            ))
        }
        FunctionType::Scalar(column_type) => ComputedFieldReturn::Scalar {
            column_type: column_type.clone(),
        },
        FunctionType::Table(returned) => {
            deps.push(SchemaDependency::new(
                SchemaObjId::table(returned.clone()),
                DependencyReason::ReturnType,
            ));
            ComputedFieldReturn::Table {
                table: returned.clone(),
                returns_set: function.returns_set,
            }
        }
    };

    let info = ComputedFieldInfo {
        name: def.name.clone(),
        function: function.name.clone(),
        return_type,
    };
    Ok((info, deps))
}

// =============================================================================
// Permissions
// =============================================================================

fn build_permission(
    table: &TableInfo,
    tables: &BTreeMap<TableName, TableInfo>,
    def: &PermissionDef,
) -> Result<(PermInfo, Vec<SchemaDependency>), String> {
    if def.role.is_admin() {
        return Err("permissions cannot be defined for the admin role".to_string());
    }
    let definition: PermDefinition = serde_json::from_value(def.definition.clone())
        .map_err(|e| format!("invalid permission definition: {}", e))?;

    let table_name = table.name();
    let mut deps = Vec::new();

    let columns: BTreeSet<ColumnName> = if def.permission == PermType::Delete {
        BTreeSet::new()
    } else {
        // Listed columns are dependencies; "*" follows the table
        for column in definition.columns.listed() {
            if !table.core.has_column(column.as_str()) {
                return Err(no_such_column(table_name, column.as_str()));
            }
            deps.push(SchemaDependency::new(
                SchemaObjId::column(table_name.clone(), column.clone()),
                DependencyReason::Column,
            ));
        }
        definition.columns.resolve(table.core.columns.keys()).into_iter().collect()
    };

    for computed_field in &definition.computed_fields {
        if !table.computed_fields.contains_key(computed_field) {
            return Err(format!(
                "computed field \"{}\" does not exist on table \"{}\"",
                computed_field, table_name
            ));
        }
        deps.push(SchemaDependency::new(
            SchemaObjId::table_obj(
                table_name.clone(),
                TableObjId::ComputedField(computed_field.clone()),
            ),
            DependencyReason::ComputedField,
        ));
    }

    let filter = match def.permission {
        PermType::Insert => definition.check,
        _ => definition.filter,
    }
    .unwrap_or_else(|| json!({}));
    bool_exp_dependencies(table, tables, &filter, &mut deps)?;

    let info = PermInfo {
        role: def.role.clone(),
        permission: def.permission,
        columns,
        computed_fields: definition.computed_fields.into_iter().collect(),
        filter,
    };
    Ok((info, deps))
}

/// Record every column, relationship and computed field a boolean expression uses
fn bool_exp_dependencies(
    table: &TableInfo,
    tables: &BTreeMap<TableName, TableInfo>,
    exp: &Value,
    deps: &mut Vec<SchemaDependency>,
) -> Result<(), String> {
    let Value::Object(fields) = exp else {
        return Err(format!("expected a boolean expression object, found {}", exp));
    };
    let table_name = table.name();

    for (key, value) in fields {
        match key.as_str() {
            "_and" | "_or" => {
                let Value::Array(items) = value else {
                    return Err(format!("\"{}\" expects a list of boolean expressions", key));
                };
                for item in items {
                    bool_exp_dependencies(table, tables, item, deps)?;
                }
            }
            "_not" => bool_exp_dependencies(table, tables, value, deps)?,
            "_exists" => {
                let target = value
                    .get("_table")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "\"_exists\" requires a \"_table\"".to_string())?;
                let target_info = tables
                    .get(target)
                    .ok_or_else(|| format!("table \"{}\" does not exist", target))?;
                deps.push(SchemaDependency::new(
                    SchemaObjId::table(target_info.name().clone()),
                    DependencyReason::Table,
                ));
                if let Some(condition) = value.get("_where") {
                    bool_exp_dependencies(target_info, tables, condition, deps)?;
                }
            }
            name => {
                if table.core.has_column(name) {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::column(table_name.clone(), name),
                        DependencyReason::Column,
                    ));
                } else if let Some(relationship) = table.relationships.get(name) {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::relationship(table_name.clone(), relationship.name.clone()),
                        DependencyReason::Relationship,
                    ));
                    if let Some(remote) = tables.get(&relationship.remote_table) {
                        bool_exp_dependencies(remote, tables, value, deps)?;
                    }
                } else if table.computed_fields.contains_key(name) {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::table_obj(
                            table_name.clone(),
                            TableObjId::ComputedField(ComputedFieldName::new(name)),
                        ),
                        DependencyReason::ComputedField,
                    ));
                } else {
                    return Err(format!(
                        "\"{}\" is not a column, relationship or computed field of table \"{}\"",
                        name, table_name
                    ));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Event triggers
// =============================================================================

fn build_event_trigger(
    table: &TableInfo,
    def: &EventTriggerDef,
) -> Result<((EventTriggerInfo, PendingTriggerView), Vec<SchemaDependency>), String> {
    let table_name = table.name();
    if !TRIGGER_NAME.is_match(def.name.as_str()) {
        return Err(format!(
            "invalid trigger name \"{}\": use at most 42 alphanumeric characters, \
             underscores or hyphens",
            def.name
        ));
    }

    let conf: EventTriggerConf = serde_json::from_value(def.configuration.clone())
        .map_err(|e| format!("invalid event trigger configuration: {}", e))?;
    let webhook = match (&conf.webhook, &conf.webhook_from_env) {
        (Some(url), None) => url.clone(),
        (None, Some(var)) => env_value(var)?,
        _ => {
            return Err(
                "exactly one of \"webhook\" or \"webhook_from_env\" is required".to_string(),
            )
        }
    };
    resolve_headers(&conf.headers)?;

    if conf.definition.operations().next().is_none() && !conf.definition.enable_manual {
        return Err("event trigger must fire on at least one operation".to_string());
    }

    let mut deps = Vec::new();
    for (operation, spec) in conf.definition.operations() {
        for column in spec.columns.listed() {
            if !table.core.has_column(column.as_str()) {
                return Err(format!(
                    "{} ({} operation)",
                    no_such_column(table_name, column.as_str()),
                    operation
                ));
            }
            deps.push(SchemaDependency::new(
                SchemaObjId::column(table_name.clone(), column.clone()),
                DependencyReason::Column,
            ));
        }
        for column in spec.payload.iter().flat_map(|payload| payload.listed()) {
            if !table.core.has_column(column.as_str()) {
                return Err(format!(
                    "{} ({} payload)",
                    no_such_column(table_name, column.as_str()),
                    operation
                ));

            }
            deps.push(SchemaDependency::new(
                SchemaObjId::column(table_name.clone(), column.clone()),
                DependencyReason::Payload,
            ));
        }
    }

    let view = PendingTriggerView {
        table: table_name.clone(),
        trigger: def.name.clone(),
        definition: conf.definition.clone(),
        columns: table.core.ordered_columns().into_iter().cloned().collect(),
    };
    let info = EventTriggerInfo {
        name: def.name.clone(),
        definition: conf.definition,
        webhook,
        retry_conf: conf.retry_conf,
    };
    Ok(((info, view), deps))
}

// =============================================================================
// Functions
// =============================================================================

/// Build every tracked function against the introspected function catalog
pub fn build_functions(
    tracked: &[TrackedFunction],
    function_catalog: &[RawFunctionMeta],
    collected: &mut Collected,
) -> BTreeMap<FunctionName, FunctionInfo> {
    let (unique, duplicates) = partition_unique(group_by(tracked.iter(), |f| f.name.clone()));
    for (name, group) in duplicates {
        collected.push_inconsistency(InconsistentMetadata::duplicates(
            MetadataObjId::Function { function: name },
            group
                .iter()
                .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
                .collect(),
        ));
    }

    keyed(unique, |name, function| {
        let object = MetadataObject::from_definition(
            MetadataObjId::Function {
                function: name.clone(),
            },
            function,
        );
        match build_function(function, function_catalog) {
            Ok((info, dependencies)) => {
                collected.depends(object, SchemaObjId::function(name.clone()), dependencies);
                Some(info)
            }
            Err(reason) => {
                collected.inconsistent(object, reason);
                None
            }
        }
    })
}

fn build_function(
    tracked: &TrackedFunction,
    function_catalog: &[RawFunctionMeta],
) -> Result<(FunctionInfo, Vec<SchemaDependency>), String> {
    let name = &tracked.name;
    if !is_graphql_name(name.as_str()) {
        return Err(format!("function name \"{}\" is not a valid GraphQL name", name));
    }
    let raw = single_overload(function_catalog, name)?;
    if raw.volatility == Volatility::Volatile {
        return Err(format!(
            "function \"{}\" is VOLATILE; only STABLE or IMMUTABLE functions can be tracked",
            name
        ));
    }

    let configuration: FunctionConfiguration = if tracked.configuration.is_null() {
        FunctionConfiguration::default()
    } else {
        serde_json::from_value(tracked.configuration.clone())
            .map_err(|e| format!("invalid function configuration: {}", e))?
    };
    if let Some(session_argument) = &configuration.session_argument {
        let argument = raw
            .args
            .iter()
            .find(|a| a.name.as_deref() == Some(session_argument.as_str()))
            .ok_or_else(|| {
                format!(
                    "session argument \"{}\" is not an argument of function \"{}\"",
                    session_argument, name
                )
            })?;
        if !matches!(
            argument.arg_type,
            FunctionType::Scalar(ColumnType::Json | ColumnType::Jsonb)
        ) {
            return Err(format!(
                "session argument \"{}\" must be of type json or jsonb",
                session_argument
            ));
        }
    }

    let FunctionType::Table(return_table) = &raw.return_type else {
        return Err(format!("function \"{}\" must return a table row type", name));
    };

    let mut deps = vec![SchemaDependency::new(
        SchemaObjId::table(return_table.clone()),
        DependencyReason::ReturnType,
    )];
    for argument in &raw.args {
        if let FunctionType::Table(table) = &argument.arg_type {
            deps.push(SchemaDependency::new(
                SchemaObjId::table(table.clone()),
                DependencyReason::ArgumentType,
            ));
        }
    }

    let info = FunctionInfo {
        name: name.clone(),
        args: raw.args.clone(),
        return_type: raw.return_type.clone(),
        returns_set: raw.returns_set,
        volatility: raw.volatility,
        description: raw.description.clone(),
    };
    Ok((info, deps))
}

/// Names of every function in the introspected catalog
pub fn catalog_function_names(function_catalog: &[RawFunctionMeta]) -> BTreeSet<FunctionName> {
    function_catalog.iter().map(|f| f.name.clone()).collect()
}
