//! Live-database introspection over pg_catalog: one query per object class,
//! an identity cache for qualified-name lookups, and lazy view-field
//! inference.

pub mod view_fields;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Deserialize;
use tracing::error;

use crate::error::PgSyncError;
use crate::ident::SqlId;
use crate::parser::IdentityKind;
use crate::template::Rendered;
use crate::wire::{Connection, FromRow, QueryOptions, QueryType, Row, TextDecoders};

pub use view_fields::{infer_view_fields, ViewField};

/// Render a `text[]` parameter value for `= ANY($N)` filters.
pub fn array_param<S: AsRef<str>>(items: &[S]) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        for c in item.as_ref().chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }
    out.push('}');
    out
}

async fn fetch_catalog<T: FromRow>(
    conn: &mut Connection,
    sql: &str,
    params: Vec<Option<String>>,
    what: &str,
) -> Result<Vec<T>, PgSyncError> {
    let rendered = Rendered {
        sql: sql.to_string(),
        params,
    };
    let rows = match conn
        .query_rendered(QueryType::Row, rendered, QueryOptions::default())
        .await
    {
        Ok(output) => output.into_rows(),
        Err(err) => {
            error!("Could not load {what}");
            return Err(err);
        }
    };
    rows.iter().map(T::from_row).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgBaseType {
    pub oid: u32,
    pub name: String,
    pub schema: String,
    pub array_oid: u32,
}

impl FromRow for PgBaseType {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        Ok(Self {
            oid: row.try_get("oid")?,
            name: row.try_get("name")?,
            schema: row.try_get("schema")?,
            array_oid: row.try_get("array_oid")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgEnumType {
    pub oid: u32,
    pub name: String,
    pub schema: String,
    pub array_oid: u32,
    pub labels: Vec<String>,
}

impl FromRow for PgEnumType {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        Ok(Self {
            oid: row.try_get("oid")?,
            name: row.try_get("name")?,
            schema: row.try_get("schema")?,
            array_oid: row.try_get("array_oid")?,
            labels: row.try_get_json("labels")?,
        })
    }
}

/// One attribute of a composite type or table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PgField {
    pub name: String,
    /// `pg_attribute.attnum`, zero for composite attributes where the
    /// cascade machinery never needs it.
    #[serde(default)]
    pub num: i32,
    pub type_oid: u32,
    pub nullable: bool,
    pub ndims: i32,
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub identity: IdentityKind,
    #[serde(default)]
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgCompositeType {
    pub oid: u32,
    pub name: String,
    pub schema: String,
    pub array_oid: u32,
    pub fields: Vec<PgField>,
}

impl FromRow for PgCompositeType {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        Ok(Self {
            oid: row.try_get("oid")?,
            name: row.try_get("name")?,
            schema: row.try_get("schema")?,
            array_oid: row.try_get("array_oid")?,
            fields: row.try_get_json("fields")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgTable {
    pub oid: u32,
    pub name: String,
    pub schema: String,
    pub row_type_oid: u32,
    pub fields: Vec<PgField>,
    pub primary_key: Vec<String>,
    pub pk_name: Option<String>,
}

impl FromRow for PgTable {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        Ok(Self {
            oid: row.try_get("oid")?,
            name: row.try_get("name")?,
            schema: row.try_get("schema")?,
            row_type_oid: row.try_get("row_type_oid")?,
            fields: row.try_get_json("fields")?,
            primary_key: row.try_get_json("primary_key")?,
            pk_name: row.try_get("pk_name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgView {
    pub oid: u32,
    pub name: String,
    pub schema: String,
    pub definition: String,
}

impl FromRow for PgView {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        Ok(Self {
            oid: row.try_get("oid")?,
            name: row.try_get("name")?,
            schema: row.try_get("schema")?,
            definition: row.try_get("definition")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgRoutine {
    pub oid: u32,
    pub kind: RoutineKind,
    pub schema: String,
    pub name: String,
    pub param_names: Option<Vec<String>>,
    pub param_types: Vec<u32>,
    /// `proallargtypes`, present only when output parameters exist.
    pub all_param_types: Option<Vec<u32>>,
    /// `i`/`o`/`b`/`v`/`t` per parameter; absent when all are plain inputs.
    pub param_kinds: Option<Vec<String>>,
    pub num_default_params: i32,
    pub return_type_oid: u32,
    pub returns_set: bool,
    /// Element type of the variadic parameter, zero when not variadic.
    pub variadic_type_oid: u32,
}

impl PgRoutine {
    pub fn id(&self) -> SqlId {
        SqlId::new(self.schema.as_str(), self.name.as_str())
    }

    /// Input parameters only, in declaration order.
    pub fn input_params(&self) -> Vec<(Option<String>, u32)> {
        match &self.param_kinds {
            None => self
                .param_types
                .iter()
                .enumerate()
                .map(|(i, oid)| (self.param_name(i), *oid))
                .collect(),
            Some(kinds) => kinds
                .iter()
                .enumerate()
                .filter(|(_, kind)| matches!(kind.as_str(), "i" | "b" | "v"))
                .zip(self.param_types.iter())
                .map(|((i, _), oid)| (self.param_name(i), *oid))
                .collect(),
        }
    }

    /// Output parameters (`OUT`, `INOUT`, `TABLE`), in declaration order.
    pub fn output_params(&self) -> Vec<(Option<String>, u32)> {
        let (Some(kinds), Some(all_types)) = (&self.param_kinds, &self.all_param_types) else {
            return Vec::new();
        };
        kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| matches!(kind.as_str(), "o" | "b" | "t"))
            .filter_map(|(i, _)| {
                all_types
                    .get(i)
                    .map(|oid| (self.param_name(i), *oid))
            })
            .collect()
    }

    fn param_name(&self, index: usize) -> Option<String> {
        self.param_names
            .as_ref()
            .and_then(|names| names.get(index))
            .filter(|name| !name.is_empty())
            .cloned()
    }
}

impl FromRow for PgRoutine {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            oid: row.try_get("oid")?,
            kind: if kind == "p" {
                RoutineKind::Procedure
            } else {
                RoutineKind::Function
            },
            schema: row.try_get("schema")?,
            name: row.try_get("name")?,
            param_names: row.try_get("param_names")?,
            param_types: row.try_get("param_types")?,
            all_param_types: row.try_get("all_param_types")?,
            param_kinds: row.try_get("param_kinds")?,
            num_default_params: row.try_get("num_default_params")?,
            return_type_oid: row.try_get("return_type_oid")?,
            returns_set: row.try_get("returns_set")?,
            variadic_type_oid: row.try_get("variadic_type_oid")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgCast {
    pub oid: u32,
    pub source_oid: u32,
    pub target_oid: u32,
    pub function_oid: u32,
    pub context: String,
    pub method: String,
}

impl FromRow for PgCast {
    fn from_row(row: &Row) -> Result<Self, PgSyncError> {
        Ok(Self {
            oid: row.try_get("oid")?,
            source_oid: row.try_get("source_oid")?,
            target_oid: row.try_get("target_oid")?,
            function_oid: row.try_get("function_oid")?,
            context: row.try_get("context")?,
            method: row.try_get("method")?,
        })
    }
}

pub async fn get_schemas(conn: &mut Connection) -> Result<Vec<String>, PgSyncError> {
    let rendered = Rendered {
        sql: include_str!("../../queries/schemas.pgsql").to_string(),
        params: Vec::new(),
    };
    let rows = match conn
        .query_rendered(QueryType::Row, rendered, QueryOptions::default())
        .await
    {
        Ok(output) => output.into_rows(),
        Err(err) => {
            error!("Could not load schemas");
            return Err(err);
        }
    };
    rows.iter().map(|row| row.try_get("name")).collect()
}

pub async fn get_base_types(conn: &mut Connection) -> Result<Vec<PgBaseType>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/base_types.pgsql"),
        Vec::new(),
        "base types",
    )
    .await
}

pub async fn get_enum_types(
    conn: &mut Connection,
    schemas: &[String],
) -> Result<Vec<PgEnumType>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/enum_types.pgsql"),
        vec![Some(array_param(schemas))],
        "enum types",
    )
    .await
}

pub async fn get_composite_types(
    conn: &mut Connection,
    schemas: &[String],
) -> Result<Vec<PgCompositeType>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/composite_types.pgsql"),
        vec![Some(array_param(schemas))],
        "composite types",
    )
    .await
}

pub async fn get_tables(
    conn: &mut Connection,
    schemas: &[String],
) -> Result<Vec<PgTable>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/tables.pgsql"),
        vec![Some(array_param(schemas))],
        "tables",
    )
    .await
}

pub async fn get_views(
    conn: &mut Connection,
    schemas: &[String],
) -> Result<Vec<PgView>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/views.pgsql"),
        vec![Some(array_param(schemas))],
        "views",
    )
    .await
}

pub async fn get_routines(
    conn: &mut Connection,
    schemas: &[String],
) -> Result<Vec<PgRoutine>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/routines.pgsql"),
        vec![Some(array_param(schemas))],
        "routines",
    )
    .await
}

pub async fn get_casts(conn: &mut Connection) -> Result<Vec<PgCast>, PgSyncError> {
    fetch_catalog(
        conn,
        include_str!("../../queries/casts.pgsql"),
        Vec::new(),
        "casts",
    )
    .await
}

/// Everything the diff engine and generator need to know about the live
/// database. Discarded and rebuilt at each run.
#[derive(Debug, Clone, Default)]
pub struct DatabaseCatalog {
    pub schemas: Vec<String>,
    pub base_types: Vec<PgBaseType>,
    pub enum_types: Vec<PgEnumType>,
    pub composite_types: Vec<PgCompositeType>,
    pub tables: Vec<PgTable>,
    pub views: Vec<PgView>,
    pub routines: Vec<PgRoutine>,
    pub casts: Vec<PgCast>,
}

pub async fn get_catalog(conn: &mut Connection) -> Result<DatabaseCatalog, PgSyncError> {
    let schemas = get_schemas(conn).await?;
    let base_types = get_base_types(conn).await?;
    let enum_types = get_enum_types(conn, &schemas).await?;
    let composite_types = get_composite_types(conn, &schemas).await?;
    let tables = get_tables(conn, &schemas).await?;
    let views = get_views(conn, &schemas).await?;
    let routines = get_routines(conn, &schemas).await?;
    let casts = get_casts(conn).await?;
    Ok(DatabaseCatalog {
        schemas,
        base_types,
        enum_types,
        composite_types,
        tables,
        views,
        routines,
        casts,
    })
}

impl DatabaseCatalog {
    pub fn find_table(&self, id: &SqlId) -> Option<&PgTable> {
        self.tables
            .iter()
            .find(|t| t.schema == id.schema && t.name == id.name)
    }

    pub fn find_view(&self, id: &SqlId) -> Option<&PgView> {
        self.views
            .iter()
            .find(|v| v.schema == id.schema && v.name == id.name)
    }

    pub fn find_composite(&self, id: &SqlId) -> Option<&PgCompositeType> {
        self.composite_types
            .iter()
            .find(|c| c.schema == id.schema && c.name == id.name)
    }

    pub fn find_routine(&self, id: &SqlId) -> Option<&PgRoutine> {
        self.routines
            .iter()
            .find(|r| r.schema == id.schema && r.name == id.name)
    }

    /// Qualified name of a type OID, searching every class of type we know,
    /// including table row types.
    pub fn type_name(&self, oid: u32) -> Option<SqlId> {
        if let Some(t) = self.base_types.iter().find(|t| t.oid == oid) {
            return Some(SqlId::new(t.schema.as_str(), t.name.as_str()));
        }
        if let Some(t) = self.enum_types.iter().find(|t| t.oid == oid) {
            return Some(SqlId::new(t.schema.as_str(), t.name.as_str()));
        }
        if let Some(t) = self.composite_types.iter().find(|t| t.oid == oid) {
            return Some(SqlId::new(t.schema.as_str(), t.name.as_str()));
        }
        if let Some(t) = self.tables.iter().find(|t| t.row_type_oid == oid) {
            return Some(SqlId::new(t.schema.as_str(), t.name.as_str()));
        }
        None
    }

    /// Element type for a discovered array OID.
    pub fn array_element(&self, oid: u32) -> Option<u32> {
        if let Some(t) = self.base_types.iter().find(|t| t.array_oid == oid) {
            return Some(t.oid);
        }
        if let Some(t) = self.enum_types.iter().find(|t| t.array_oid == oid) {
            return Some(t.oid);
        }
        if let Some(t) = self.composite_types.iter().find(|t| t.array_oid == oid) {
            return Some(t.oid);
        }
        None
    }

    /// Teach the wire decoder about database-discovered types: arrays of
    /// user-defined elements, and the field layout of every composite and
    /// table row type so record literals decode into structured values.
    pub fn register_decoders(&self, decoders: &mut TextDecoders) {
        for t in &self.base_types {
            decoders.register_array(t.array_oid, t.oid);
        }
        for t in &self.enum_types {
            decoders.register_array(t.array_oid, t.oid);
        }
        for t in &self.composite_types {
            decoders.register_array(t.array_oid, t.oid);
            decoders.register_composite(t.oid, t.fields.iter().map(|f| f.type_oid).collect());
        }
        for t in &self.tables {
            decoders.register_composite(
                t.row_type_oid,
                t.fields.iter().map(|f| f.type_oid).collect(),
            );
        }
    }

    /// Group every object by schema for the binding generator.
    pub fn namespaces(&self) -> BTreeMap<String, Namespace<'_>> {
        fn entry<'a, 'b>(
            map: &'b mut BTreeMap<String, Namespace<'a>>,
            schema: &str,
        ) -> &'b mut Namespace<'a> {
            map.entry(schema.to_string())
                .or_insert_with(|| Namespace::new(schema))
        }
        let mut namespaces: BTreeMap<String, Namespace<'_>> = BTreeMap::new();
        for routine in &self.routines {
            let ns = entry(&mut namespaces, &routine.schema);
            ns.names.insert(routine.name.clone());
            ns.routines.push(routine);
        }
        for composite in &self.composite_types {
            let ns = entry(&mut namespaces, &composite.schema);
            ns.names.insert(composite.name.clone());
            ns.composite_types.push(composite);
        }
        for enum_type in &self.enum_types {
            let ns = entry(&mut namespaces, &enum_type.schema);
            ns.names.insert(enum_type.name.clone());
            ns.enum_types.push(enum_type);
        }
        for table in &self.tables {
            let ns = entry(&mut namespaces, &table.schema);
            ns.names.insert(table.name.clone());
            ns.tables.push(table);
        }
        for view in &self.views {
            let ns = entry(&mut namespaces, &view.schema);
            ns.names.insert(view.name.clone());
            ns.views.push(view);
        }
        namespaces
    }
}

/// One schema's introspected objects, the generator's unit of work.
#[derive(Debug, Clone)]
pub struct Namespace<'a> {
    pub schema: String,
    pub routines: Vec<&'a PgRoutine>,
    pub composite_types: Vec<&'a PgCompositeType>,
    pub enum_types: Vec<&'a PgEnumType>,
    pub tables: Vec<&'a PgTable>,
    pub views: Vec<&'a PgView>,
    pub names: BTreeSet<String>,
}

impl<'a> Namespace<'a> {
    fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            routines: Vec::new(),
            composite_types: Vec::new(),
            enum_types: Vec::new(),
            tables: Vec::new(),
            views: Vec::new(),
            names: BTreeSet::new(),
        }
    }
}

/// Object classes an identity lookup can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Table,
    View,
    CompositeType,
    EnumType,
    Routine,
    Extension,
    Cast,
}

impl ObjectClass {
    pub fn of(kind: &crate::parser::StatementKind) -> Self {
        use crate::parser::StatementKind;
        match kind {
            StatementKind::Table { .. } => ObjectClass::Table,
            StatementKind::View { .. } => ObjectClass::View,
            StatementKind::CompositeType { .. } => ObjectClass::CompositeType,
            StatementKind::EnumType { .. } => ObjectClass::EnumType,
            StatementKind::Routine { .. } => ObjectClass::Routine,
            StatementKind::Extension => ObjectClass::Extension,
            StatementKind::Cast { .. } => ObjectClass::Cast,
        }
    }
}

/// Memoized `(class, qualified name) -> OID` lookups against pg_catalog.
/// Entries are dropped after every DROP the diff engine issues.
#[derive(Debug, Default)]
pub struct IdentityCache {
    cache: HashMap<(ObjectClass, SqlId), Option<u32>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(
        &mut self,
        conn: &mut Connection,
        class: ObjectClass,
        id: &SqlId,
    ) -> Result<Option<u32>, PgSyncError> {
        if let Some(cached) = self.cache.get(&(class, id.clone())) {
            return Ok(*cached);
        }
        let (sql, params) = match class {
            ObjectClass::Table => (
                include_str!("../../queries/identity_class.pgsql"),
                vec![
                    Some(id.schema.clone()),
                    Some(id.name.clone()),
                    Some("{r,p}".to_string()),
                ],
            ),
            ObjectClass::View => (
                include_str!("../../queries/identity_class.pgsql"),
                vec![
                    Some(id.schema.clone()),
                    Some(id.name.clone()),
                    Some("{v}".to_string()),
                ],
            ),
            ObjectClass::CompositeType | ObjectClass::EnumType => (
                include_str!("../../queries/identity_type.pgsql"),
                vec![Some(id.schema.clone()), Some(id.name.clone())],
            ),
            ObjectClass::Routine => (
                include_str!("../../queries/identity_proc.pgsql"),
                vec![Some(id.schema.clone()), Some(id.name.clone())],
            ),
            ObjectClass::Extension => (
                include_str!("../../queries/identity_extension.pgsql"),
                vec![Some(id.name.clone())],
            ),
            ObjectClass::Cast => {
                return Err(PgSyncError::General(
                    "Casts are identified by source and target type, not by name".to_string(),
                ))
            }
        };
        let rendered = Rendered {
            sql: sql.to_string(),
            params,
        };
        let rows = conn
            .query_rendered(QueryType::Row, rendered, QueryOptions::default())
            .await?
            .into_rows();
        let oid = match rows.first() {
            Some(row) => Some(row.try_get::<u32>("oid")?),
            None => None,
        };
        self.cache.insert((class, id.clone()), oid);
        Ok(oid)
    }

    /// Forget every class entry for a name. Called after `DROP` statements,
    /// which may remove more objects than the one named (cascades).
    pub fn invalidate(&mut self, id: &SqlId) {
        self.cache.retain(|(_, cached), _| cached != id);
    }

    /// Drop the entire cache, used after cascade drops where the affected
    /// set is not known precisely.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod test {
    use super::array_param;

    #[test]
    fn array_param_should_quote_items() {
        assert_eq!("{}", array_param::<&str>(&[]));
        assert_eq!("{\"public\"}", array_param(&["public"]));
        assert_eq!(
            "{\"a\",\"odd \\\"schema\\\"\"}",
            array_param(&["a", "odd \"schema\""])
        );
    }
}
