//! Diff engine: per existing object, decide whether to CREATE, ALTER,
//! DROP-and-recreate, or skip, and compute the cascade of dependent drops
//! through pg_depend.

pub mod table;

use std::collections::HashSet;
use std::fmt::Write as _;

use tracing::{debug, warn};

use crate::error::PgSyncError;
use crate::ident::{quote_ident, SqlId, TypeId};
use crate::introspect::{DatabaseCatalog, IdentityCache, ObjectClass, PgField};
use crate::parser::{ColumnDef, IdentityKind, Statement, StatementKind};
use crate::sql;
use crate::template::{unsafe_kw, Rendered, Template};
use crate::wire::{Connection, QueryOptions, QueryType};

pub use table::{classify_columns, resolve_type_oid, ColumnChange};

/// Schema used to apply the new version of a routine for signature
/// comparison; created and dropped around each comparison.
const SCRATCH_SCHEMA: &str = "pgsync_tmp";

/// Stateful planner for one migration run. The identity cache memoizes
/// existence checks; `dropped` dedups cascade drops across statements.
pub struct DiffEngine {
    catalog: DatabaseCatalog,
    identity: IdentityCache,
    dropped: HashSet<String>,
}

impl DiffEngine {
    pub fn new(catalog: DatabaseCatalog) -> Self {
        Self {
            catalog,
            identity: IdentityCache::new(),
            dropped: HashSet::new(),
        }
    }

    pub fn catalog(&self) -> &DatabaseCatalog {
        &self.catalog
    }

    /// Produce the (possibly empty) list of SQL statements that reconcile
    /// one parsed statement with the live database.
    pub async fn plan(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
    ) -> Result<Vec<Template>, PgSyncError> {
        if let StatementKind::Cast { .. } = statement.kind {
            return self.plan_cast(conn, statement).await;
        }
        let class = ObjectClass::of(&statement.kind);
        let existing = self.identity.lookup(conn, class, &statement.id).await?;
        let Some(oid) = existing else {
            debug!(object = %statement.id, "does not exist, creating");
            return Ok(vec![Template::raw(statement.raw_text.clone())]);
        };
        match &statement.kind {
            StatementKind::Extension => Ok(Vec::new()),
            StatementKind::EnumType { labels } => self.plan_enum(conn, statement, oid, labels).await,
            StatementKind::CompositeType { columns } => {
                self.plan_composite(conn, statement, oid, columns).await
            }
            StatementKind::Routine { is_procedure, .. } => {
                self.plan_routine(conn, statement, oid, *is_procedure).await
            }
            StatementKind::View { body, .. } => self.plan_view(conn, statement, oid, body).await,
            StatementKind::Table {
                columns,
                primary_key,
            } => self.plan_table(conn, statement, oid, columns, primary_key).await,
            StatementKind::Cast { .. } => unreachable!("handled above"),
        }
    }

    async fn plan_enum(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        oid: u32,
        labels: &[String],
    ) -> Result<Vec<Template>, PgSyncError> {
        let existing = self
            .catalog
            .enum_types
            .iter()
            .find(|t| t.oid == oid)
            .map(|t| t.labels.clone())
            .unwrap_or_default();
        if existing == labels {
            return Ok(Vec::new());
        }
        if labels.len() > existing.len() && labels.starts_with(&existing) {
            let mut statements = Vec::new();
            for label in &labels[existing.len()..] {
                statements.push(sql!(
                    "ALTER TYPE " {&statement.id} " ADD VALUE " {crate::template::val(label.as_str())} ";"
                ));
            }
            return Ok(statements);
        }
        let mut statements = self.cascade_drops(conn, oid, None).await?;
        if let Some(drop) = self.drop_once(sql!("DROP TYPE " {&statement.id} " CASCADE;"), &statement.id) {
            statements.push(drop);
        }
        statements.push(Template::raw(statement.raw_text.clone()));
        self.identity.clear();
        Ok(statements)
    }

    async fn plan_composite(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        oid: u32,
        columns: &[ColumnDef],
    ) -> Result<Vec<Template>, PgSyncError> {
        let unchanged = self
            .catalog
            .composite_types
            .iter()
            .find(|t| t.oid == oid)
            .map(|t| {
                t.fields.len() == columns.len()
                    && t.fields.iter().zip(columns).all(|(field, column)| {
                        field.name == column.name
                            && resolve_type_oid(&self.catalog, &column.type_id)
                                == Some(field.type_oid)
                    })
            })
            .unwrap_or(false);
        if unchanged {
            return Ok(Vec::new());
        }
        let mut statements = self.cascade_drops(conn, oid, None).await?;
        if let Some(drop) = self.drop_once(sql!("DROP TYPE " {&statement.id} " CASCADE;"), &statement.id) {
            statements.push(drop);
        }
        statements.push(Template::raw(statement.raw_text.clone()));
        self.identity.clear();
        Ok(statements)
    }

    /// Signature comparison protocol: apply the new routine into a scratch
    /// schema, compare both pg_proc rows in a single query, and drop the
    /// scratch schema whatever happens.
    async fn plan_routine(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        oid: u32,
        is_procedure: bool,
    ) -> Result<Vec<Template>, PgSyncError> {
        conn.execute_simple(&format!(
            "DROP SCHEMA IF EXISTS {SCRATCH_SCHEMA} CASCADE; CREATE SCHEMA {SCRATCH_SCHEMA};"
        ))
        .await?;
        let comparison = self.compare_routine(conn, statement, oid).await;
        let cleanup = conn
            .execute_simple(&format!("DROP SCHEMA IF EXISTS {SCRATCH_SCHEMA} CASCADE;"))
            .await;
        let has_changes = comparison?;
        cleanup?;

        if !has_changes {
            return Ok(Vec::new());
        }
        let keyword = if is_procedure { "PROCEDURE" } else { "ROUTINE" };
        let mut statements = self.cascade_drops(conn, oid, None).await?;
        if let Some(drop) = self.drop_once(
            sql!("DROP " {unsafe_kw(keyword)} " " {&statement.id} " CASCADE;"),
            &statement.id,
        ) {
            statements.push(drop);
        }
        statements.push(Template::raw(statement.raw_text.clone()));
        self.identity.clear();
        Ok(statements)
    }

    async fn compare_routine(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        oid: u32,
    ) -> Result<bool, PgSyncError> {
        let matcher = statement.id.to_regex()?;
        let scratch_name = format!("{SCRATCH_SCHEMA}.{}", quote_ident(&statement.id.name));
        let rewritten = matcher
            .replace(&statement.raw_text, scratch_name.as_str())
            .into_owned();
        conn.execute_simple(&rewritten).await?;

        let rendered = Rendered {
            sql: include_str!("../../queries/compare_routines.pgsql").to_string(),
            params: vec![Some(oid.to_string()), Some(SCRATCH_SCHEMA.to_string())],
        };
        let rows = conn
            .query_rendered(QueryType::Row, rendered, QueryOptions::default())
            .await?
            .into_rows();
        match rows.first() {
            Some(row) => row.try_get("has_changes"),
            None => Ok(true),
        }
    }

    async fn plan_view(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        oid: u32,
        body: &str,
    ) -> Result<Vec<Template>, PgSyncError> {
        let existing_def = self
            .catalog
            .views
            .iter()
            .find(|v| v.oid == oid)
            .map(|v| v.definition.clone());
        let unchanged = existing_def
            .map(|def| same_query(&def, body))
            .unwrap_or(false);
        if unchanged {
            return Ok(Vec::new());
        }
        let mut statements = self.cascade_drops(conn, oid, None).await?;
        if let Some(drop) = self.drop_once(sql!("DROP VIEW " {&statement.id} " CASCADE;"), &statement.id) {
            statements.push(drop);
        }
        statements.push(Template::raw(statement.raw_text.clone()));
        self.identity.clear();
        Ok(statements)
    }

    async fn plan_table(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        oid: u32,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> Result<Vec<Template>, PgSyncError> {
        let Some(existing) = self
            .catalog
            .tables
            .iter()
            .find(|t| t.oid == oid)
            .cloned()
        else {
            warn!(table = %statement.id, "table exists but was not introspected, skipping");
            return Ok(Vec::new());
        };
        let mut statements: Vec<Template> = Vec::new();
        let changes = classify_columns(&self.catalog, &existing, columns);
        let mut cascaded = false;
        for change in &changes {
            match change {
                ColumnChange::Added(column) => {
                    let mut definition = String::new();
                    column_definition(column, &mut definition)?;
                    statements.push(sql!(
                        "ALTER TABLE " {&statement.id} " ADD COLUMN " {unsafe_kw(definition)} ";"
                    ));
                }
                ColumnChange::Dropped(field) => {
                    let drops = self.cascade_drops(conn, oid, Some(field.num)).await?;
                    cascaded = cascaded || !drops.is_empty();
                    statements.extend(drops);
                    statements.push(sql!(
                        "ALTER TABLE " {&statement.id} " DROP COLUMN "
                        {unsafe_kw(quote_ident(&field.name))} ";"
                    ));
                }
                ColumnChange::TypeChanged {
                    desired,
                    existing: field,
                    new_type_oid,
                } => {
                    let drops = self
                        .plan_type_change(conn, statement, oid, desired, field, *new_type_oid)
                        .await?;
                    cascaded = true;
                    statements.extend(drops);
                }
                ColumnChange::CollationChanged { desired, .. } => {
                    let collation = desired
                        .collation
                        .as_ref()
                        .map(|c| quote_ident(&c.name))
                        .unwrap_or_else(|| "\"default\"".to_string());
                    statements.push(sql!(
                        "ALTER TABLE " {&statement.id} " ALTER COLUMN "
                        {unsafe_kw(quote_ident(&desired.name))} " TYPE "
                        {unsafe_kw(desired.type_id.sql_spelling())} " COLLATE "
                        {unsafe_kw(collation)} ";"
                    ));
                }
            }
        }

        // Nullability and default tweaks on columns that otherwise survived.
        for column in columns {
            let Some(field) = existing.fields.iter().find(|f| f.name == column.name) else {
                continue;
            };
            let treated = changes.iter().any(|c| {
                matches!(c, ColumnChange::TypeChanged { desired, .. } if desired.name == column.name)
            });
            if treated {
                continue;
            }
            if field.nullable != column.nullable {
                statements.push(sql!(
                    "ALTER TABLE " {&statement.id} " ALTER COLUMN "
                    {unsafe_kw(quote_ident(&column.name))} " "
                    {unsafe_kw(if column.nullable { "DROP NOT NULL" } else { "SET NOT NULL" })} ";"
                ));
            }
            if field.has_default != column.has_default && column.identity == IdentityKind::None {
                match &column.default_expr {
                    Some(expression) if column.has_default => statements.push(sql!(
                        "ALTER TABLE " {&statement.id} " ALTER COLUMN "
                        {unsafe_kw(quote_ident(&column.name))} " SET DEFAULT "
                        {unsafe_kw(expression.clone())} ";"
                    )),
                    _ => statements.push(sql!(
                        "ALTER TABLE " {&statement.id} " ALTER COLUMN "
                        {unsafe_kw(quote_ident(&column.name))} " DROP DEFAULT;"
                    )),
                }
            }
        }

        if existing.primary_key != primary_key {
            if let Some(pk_name) = &existing.pk_name {
                statements.push(sql!(
                    "ALTER TABLE " {&statement.id} " DROP CONSTRAINT "
                    {unsafe_kw(quote_ident(pk_name))} ";"
                ));
            }
            if !primary_key.is_empty() {
                let column_list = primary_key
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                statements.push(sql!(
                    "ALTER TABLE " {&statement.id} " ADD PRIMARY KEY ("
                    {unsafe_kw(column_list)} ");"
                ));
            }
        }

        if cascaded {
            self.identity.clear();
        }
        Ok(statements)
    }

    /// A column type change: prefer an in-place `ALTER COLUMN TYPE` when a
    /// cast context exists, drop-and-readd otherwise. `bigint` columns
    /// holding epoch milliseconds convert to `timestamptz` in place.
    async fn plan_type_change(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
        table_oid: u32,
        desired: &ColumnDef,
        field: &PgField,
        new_type_oid: Option<u32>,
    ) -> Result<Vec<Template>, PgSyncError> {
        let column = quote_ident(&desired.name);
        let spelling = desired.type_id.sql_spelling();

        let old_is_bigint = field.type_oid == crate::wire::text::oid::INT8;
        let new_is_timestamptz = new_type_oid == Some(crate::wire::text::oid::TIMESTAMPTZ);
        if old_is_bigint && new_is_timestamptz {
            return Ok(vec![sql!(
                "ALTER TABLE " {&statement.id} " ALTER COLUMN " {unsafe_kw(column.clone())}
                " TYPE timestamptz USING to_timestamp(" {unsafe_kw(column)} " / 1000);"
            )]);
        }

        let castable = match new_type_oid {
            Some(new_oid) => self.cast_exists(conn, field.type_oid, new_oid).await?,
            None => false,
        };
        if castable {
            return Ok(vec![sql!(
                "ALTER TABLE " {&statement.id} " ALTER COLUMN " {unsafe_kw(column.clone())}
                " TYPE " {unsafe_kw(spelling.clone())} " USING " {unsafe_kw(column)} "::"
                {unsafe_kw(spelling)} ";"
            )]);
        }

        // No valid cast context: drop the column, cascading its dependents,
        // and add it back with the new type.
        let mut statements = self.cascade_drops(conn, table_oid, Some(field.num)).await?;
        statements.push(sql!(
            "ALTER TABLE " {&statement.id} " DROP COLUMN " {unsafe_kw(column)} ";"
        ));
        let mut definition = String::new();
        column_definition(desired, &mut definition)?;
        statements.push(sql!(
            "ALTER TABLE " {&statement.id} " ADD COLUMN " {unsafe_kw(definition)} ";"
        ));
        Ok(statements)
    }

    async fn cast_exists(
        &mut self,
        conn: &mut Connection,
        source: u32,
        target: u32,
    ) -> Result<bool, PgSyncError> {
        let rendered = Rendered {
            sql: include_str!("../../queries/cast_context.pgsql").to_string(),
            params: vec![Some(source.to_string()), Some(target.to_string())],
        };
        let rows = conn
            .query_rendered(QueryType::Row, rendered, QueryOptions::default())
            .await?
            .into_rows();
        Ok(!rows.is_empty())
    }

    async fn plan_cast(
        &mut self,
        conn: &mut Connection,
        statement: &Statement,
    ) -> Result<Vec<Template>, PgSyncError> {
        let StatementKind::Cast {
            source,
            target,
            context,
            ..
        } = &statement.kind
        else {
            return Ok(Vec::new());
        };
        let (Some(source_oid), Some(target_oid)) = (
            resolve_type_oid(&self.catalog, source),
            resolve_type_oid(&self.catalog, target),
        ) else {
            // Types created earlier in this run are not in the snapshot;
            // apply the declaration and let the server validate it.
            return Ok(vec![Template::raw(statement.raw_text.clone())]);
        };
        let rendered = Rendered {
            sql: include_str!("../../queries/cast_context.pgsql").to_string(),
            params: vec![Some(source_oid.to_string()), Some(target_oid.to_string())],
        };
        let rows = conn
            .query_rendered(QueryType::Row, rendered, QueryOptions::default())
            .await?
            .into_rows();
        let Some(row) = rows.first() else {
            return Ok(vec![Template::raw(statement.raw_text.clone())]);
        };
        let live_context: String = row.try_get("context")?;
        if live_context == context.as_ref() {
            return Ok(Vec::new());
        }
        Ok(vec![
            sql!(
                "DROP CAST (" {unsafe_kw(source.sql_spelling())} " AS "
                {unsafe_kw(target.sql_spelling())} ");"
            ),
            Template::raw(statement.raw_text.clone()),
        ])
    }

    /// Drop casts present in the database but no longer declared anywhere.
    pub fn orphan_cast_drops(&self, declared: &[&Statement]) -> Vec<Template> {
        let declared_pairs: HashSet<(u32, u32)> = declared
            .iter()
            .filter_map(|statement| match &statement.kind {
                StatementKind::Cast { source, target, .. } => Some((
                    resolve_type_oid(&self.catalog, source)?,
                    resolve_type_oid(&self.catalog, target)?,
                )),
                _ => None,
            })
            .collect();
        let mut drops = Vec::new();
        for cast in &self.catalog.casts {
            if declared_pairs.contains(&(cast.source_oid, cast.target_oid)) {
                continue;
            }
            let (Some(source), Some(target)) = (
                self.catalog.type_name(cast.source_oid),
                self.catalog.type_name(cast.target_oid),
            ) else {
                continue;
            };
            drops.push(sql!(
                "DROP CAST (" {unsafe_kw(TypeId::new(source).sql_spelling())} " AS "
                {unsafe_kw(TypeId::new(target).sql_spelling())} ");"
            ));
        }
        drops
    }

    /// Walk pg_depend downstream of an object (optionally restricted to one
    /// column) and emit DROPs for dependents in reverse dependency order,
    /// each at most once per run.
    async fn cascade_drops(
        &mut self,
        conn: &mut Connection,
        root_oid: u32,
        column: Option<i32>,
    ) -> Result<Vec<Template>, PgSyncError> {
        let rendered = Rendered {
            sql: include_str!("../../queries/dependents.pgsql").to_string(),
            params: vec![
                Some(root_oid.to_string()),
                Some(column.unwrap_or(0).to_string()),
            ],
        };
        let rows = conn
            .query_rendered(QueryType::Row, rendered, QueryOptions::default())
            .await?
            .into_rows();

        let mut drops = Vec::new();
        for row in &rows {
            let catalog: String = row.try_get("catalog")?;
            let oid: u32 = row.try_get("oid")?;
            let template = match catalog.as_str() {
                "pg_class" => self.class_drop(conn, oid).await?,
                "pg_proc" => self.proc_drop(conn, oid).await?,
                "pg_type" => self.type_drop(conn, oid).await?,
                "pg_attrdef" => self.attrdef_drop(conn, oid).await?,
                _ => None,
            };
            if let Some(template) = template {
                drops.push(template);
            }
        }
        if !drops.is_empty() {
            self.identity.clear();
        }
        Ok(drops)
    }

    fn drop_once(&mut self, template: Template, id: &SqlId) -> Option<Template> {
        self.identity.invalidate(id);
        if self.dropped.insert(id.to_string()) {
            Some(template)
        } else {
            None
        }
    }

    async fn class_drop(
        &mut self,
        conn: &mut Connection,
        oid: u32,
    ) -> Result<Option<Template>, PgSyncError> {
        let Some(row) = describe(conn, include_str!("../../queries/describe_class.pgsql"), oid)
            .await?
        else {
            return Ok(None);
        };
        let kind: String = row.try_get("kind")?;
        let id = SqlId::new(
            row.try_get::<String>("schema")?,
            row.try_get::<String>("name")?,
        );
        let template = match kind.as_str() {
            "r" => sql!("DROP TABLE " {&id} " CASCADE;"),
            "v" => sql!("DROP VIEW " {&id} " CASCADE;"),
            _ => return Ok(None),
        };
        Ok(self.drop_once(template, &id))
    }

    async fn proc_drop(
        &mut self,
        conn: &mut Connection,
        oid: u32,
    ) -> Result<Option<Template>, PgSyncError> {
        let Some(row) = describe(conn, include_str!("../../queries/describe_proc.pgsql"), oid)
            .await?
        else {
            return Ok(None);
        };
        let kind: String = row.try_get("kind")?;
        let id = SqlId::new(
            row.try_get::<String>("schema")?,
            row.try_get::<String>("name")?,
        );
        let args: String = row.try_get("args")?;
        let keyword = if kind == "p" { "PROCEDURE" } else { "FUNCTION" };
        let template = sql!(
            "DROP " {unsafe_kw(keyword)} " " {&id} "(" {unsafe_kw(args)} ") CASCADE;"
        );
        Ok(self.drop_once(template, &id))
    }

    async fn type_drop(
        &mut self,
        conn: &mut Connection,
        oid: u32,
    ) -> Result<Option<Template>, PgSyncError> {
        let Some(row) = describe(conn, include_str!("../../queries/describe_type.pgsql"), oid)
            .await?
        else {
            return Ok(None);
        };
        let name: String = row.try_get("name")?;
        if name.starts_with('_') {
            // Array companions go away with their element type.
            return Ok(None);
        }
        let id = SqlId::new(row.try_get::<String>("schema")?, name);
        Ok(self.drop_once(sql!("DROP TYPE " {&id} " CASCADE;"), &id))
    }

    async fn attrdef_drop(
        &mut self,
        conn: &mut Connection,
        oid: u32,
    ) -> Result<Option<Template>, PgSyncError> {
        let Some(row) = describe(
            conn,
            include_str!("../../queries/describe_attrdef.pgsql"),
            oid,
        )
        .await?
        else {
            return Ok(None);
        };
        let table = SqlId::new(
            row.try_get::<String>("schema")?,
            row.try_get::<String>("table")?,
        );
        let column: String = row.try_get("column")?;
        let key = SqlId::new(table.schema.clone(), format!("{}.{column}", table.name));
        let template = sql!(
            "ALTER TABLE " {&table} " ALTER COLUMN " {unsafe_kw(quote_ident(&column))}
            " DROP DEFAULT;"
        );
        Ok(self.drop_once(template, &key))
    }
}

async fn describe(
    conn: &mut Connection,
    sql: &str,
    oid: u32,
) -> Result<Option<crate::wire::Row>, PgSyncError> {
    let rendered = Rendered {
        sql: sql.to_string(),
        params: vec![Some(oid.to_string())],
    };
    Ok(conn
        .query_rendered(QueryType::Row, rendered, QueryOptions::default())
        .await?
        .into_rows()
        .into_iter()
        .next())
}

/// Compare two query texts by parse fingerprint, falling back to
/// whitespace-normalized equality when either side fails to parse.
pub fn same_query(a: &str, b: &str) -> bool {
    match (pg_query::fingerprint(a), pg_query::fingerprint(b)) {
        (Ok(fa), Ok(fb)) => fa.hex == fb.hex,
        _ => normalize_whitespace(a) == normalize_whitespace(b),
    }
}

fn normalize_whitespace(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_lowercase()
}

/// Render one column definition for `ADD COLUMN`.
fn column_definition(column: &ColumnDef, w: &mut String) -> Result<(), PgSyncError> {
    write!(
        w,
        "{} {}",
        quote_ident(&column.name),
        column.type_id.sql_spelling()
    )?;
    if let Some(collation) = &column.collation {
        if collation.name != "default" {
            write!(w, " COLLATE {}", quote_ident(&collation.name))?;
        }
    }
    if !column.nullable {
        w.push_str(" NOT NULL");
    }
    if let Some(expression) = &column.default_expr {
        write!(w, " DEFAULT {expression}")?;
    }
    match column.identity {
        IdentityKind::None => {}
        identity => {
            write!(w, " GENERATED {} AS IDENTITY", identity.as_ref())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::ident::TypeId;
    use crate::parser::{ColumnDef, IdentityKind};

    use super::{column_definition, normalize_whitespace, same_query};

    #[test]
    fn same_query_should_ignore_formatting() {
        assert!(same_query(
            "SELECT a,\n       b FROM t WHERE x = 1",
            "select a, b from t where x = 1"
        ));
        assert!(!same_query("SELECT a FROM t", "SELECT b FROM t"));
    }

    #[test]
    fn normalize_should_collapse_whitespace_and_semicolons() {
        assert_eq!(
            "select 1",
            normalize_whitespace("  SELECT\n 1 ;")
        );
    }

    #[test]
    fn column_definition_should_include_constraints() {
        let column = ColumnDef {
            name: "name".to_string(),
            type_id: TypeId::parse("text").unwrap(),
            nullable: false,
            has_default: true,
            default_expr: Some("''".to_string()),
            identity: IdentityKind::None,
            is_primary_key: false,
            refs: Vec::new(),
            collation: None,
        };
        let mut out = String::new();
        column_definition(&column, &mut out).unwrap();
        assert_eq!("name text NOT NULL DEFAULT ''", out);

        let column = ColumnDef {
            name: "id".to_string(),
            type_id: TypeId::parse("int8").unwrap(),
            nullable: false,
            has_default: false,
            default_expr: None,
            identity: IdentityKind::Always,
            is_primary_key: true,
            refs: Vec::new(),
            collation: None,
        };
        let mut out = String::new();
        column_definition(&column, &mut out).unwrap();
        assert_eq!("id int8 NOT NULL GENERATED ALWAYS AS IDENTITY", out);
    }

}
