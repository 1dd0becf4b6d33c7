//! View output-field inference. First attempt: parse the view's subquery and
//! propagate types and nullability from the source tables, marking columns
//! from the outer side of a join nullable. Fallback: prepare the statement
//! server-side and read the result descriptors, with nullability unknown
//! (treated as nullable).

use pg_query::protobuf::JoinType;
use pg_query::NodeEnum;
use tracing::debug;

use crate::error::PgSyncError;
use crate::introspect::{DatabaseCatalog, PgTable};
use crate::wire::Connection;

/// One output column of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewField {
    pub name: String,
    pub type_oid: u32,
    pub nullable: bool,
}

/// Infer the output fields of a view from its definition text.
pub async fn infer_view_fields(
    conn: &mut Connection,
    catalog: &DatabaseCatalog,
    definition: &str,
) -> Result<Vec<ViewField>, PgSyncError> {
    if let Some(fields) = fields_from_parse(catalog, definition) {
        return Ok(fields);
    }
    debug!("view definition resisted static inference, describing server-side");
    let descriptors = conn.describe(definition.trim_end_matches(';')).await?;
    Ok(descriptors
        .into_iter()
        .map(|d| ViewField {
            name: d.name,
            type_oid: d.type_oid,
            nullable: true,
        })
        .collect())
}

/// A table pulled into the FROM clause, with the alias it answers to and
/// whether an outer join can null its columns.
struct FromSource<'a> {
    alias: String,
    table: &'a PgTable,
    forced_nullable: bool,
}

fn fields_from_parse(catalog: &DatabaseCatalog, definition: &str) -> Option<Vec<ViewField>> {
    let result = pg_query::parse(definition).ok()?;
    let raw_stmt = result.protobuf.stmts.first()?;
    let NodeEnum::SelectStmt(select) = raw_stmt.stmt.as_ref()?.node.as_ref()? else {
        return None;
    };

    let mut sources: Vec<FromSource<'_>> = Vec::new();
    for node in &select.from_clause {
        collect_sources(catalog, node.node.as_ref()?, false, &mut sources)?;
    }

    let mut fields = Vec::new();
    for target_node in &select.target_list {
        let Some(NodeEnum::ResTarget(target)) = target_node.node.as_ref() else {
            return None;
        };
        let value = target.val.as_ref()?.node.as_ref()?;
        match value {
            NodeEnum::ColumnRef(column_ref) => {
                let mut parts = Vec::new();
                let mut star = false;
                for field in &column_ref.fields {
                    match field.node.as_ref() {
                        Some(NodeEnum::String(s)) => parts.push(s.sval.clone()),
                        Some(NodeEnum::AStar(_)) => star = true,
                        _ => return None,
                    }
                }
                if star {
                    expand_star(&sources, parts.first().map(String::as_str), &mut fields)?;
                    continue;
                }
                let (qualifier, column) = match parts.as_slice() {
                    [column] => (None, column.as_str()),
                    [qualifier, column] => (Some(qualifier.as_str()), column.as_str()),
                    _ => return None,
                };
                let (source, field) = resolve_column(&sources, qualifier, column)?;
                let name = if target.name.is_empty() {
                    column.to_string()
                } else {
                    target.name.clone()
                };
                fields.push(ViewField {
                    name,
                    type_oid: field.type_oid,
                    nullable: field.nullable || source.forced_nullable,
                });
            }
            // Expressions need server typing, punt the whole view.
            _ => return None,
        }
    }
    Some(fields)
}

/// Walk a FROM item, flattening joins. Returns `None` for constructs the
/// static pass cannot model (subqueries, functions in FROM, CTE refs).
fn collect_sources<'a>(
    catalog: &'a DatabaseCatalog,
    node: &NodeEnum,
    forced_nullable: bool,
    sources: &mut Vec<FromSource<'a>>,
) -> Option<()> {
    match node {
        NodeEnum::RangeVar(rv) => {
            let id = crate::ident::SqlId::new(rv.schemaname.as_str(), rv.relname.as_str());
            let table = catalog.find_table(&id)?;
            let alias = rv
                .alias
                .as_ref()
                .map(|a| a.aliasname.clone())
                .unwrap_or_else(|| rv.relname.clone());
            sources.push(FromSource {
                alias,
                table,
                forced_nullable,
            });
            Some(())
        }
        NodeEnum::JoinExpr(join) => {
            let (left_nullable, right_nullable) = match join.jointype() {
                JoinType::JoinInner => (false, false),
                JoinType::JoinLeft => (false, true),
                JoinType::JoinRight => (true, false),
                JoinType::JoinFull => (true, true),
                _ => return None,
            };
            collect_sources(
                catalog,
                join.larg.as_ref()?.node.as_ref()?,
                forced_nullable || left_nullable,
                sources,
            )?;
            collect_sources(
                catalog,
                join.rarg.as_ref()?.node.as_ref()?,
                forced_nullable || right_nullable,
                sources,
            )
        }
        _ => None,
    }
}

fn resolve_column<'a>(
    sources: &'a [FromSource<'a>],
    qualifier: Option<&str>,
    column: &str,
) -> Option<(&'a FromSource<'a>, &'a crate::introspect::PgField)> {
    let candidates = sources
        .iter()
        .filter(|s| qualifier.map(|q| s.alias == q).unwrap_or(true));
    for source in candidates {
        if let Some(field) = source.table.fields.iter().find(|f| f.name == column) {
            return Some((source, field));
        }
    }
    None
}

fn expand_star(
    sources: &[FromSource<'_>],
    qualifier: Option<&str>,
    fields: &mut Vec<ViewField>,
) -> Option<()> {
    let matched: Vec<&FromSource<'_>> = sources
        .iter()
        .filter(|s| qualifier.map(|q| s.alias == q).unwrap_or(true))
        .collect();
    if matched.is_empty() {
        return None;
    }
    for source in matched {
        for field in &source.table.fields {
            fields.push(ViewField {
                name: field.name.clone(),
                type_oid: field.type_oid,
                nullable: field.nullable || source.forced_nullable,
            });
        }
    }
    Some(())
}

#[cfg(test)]
mod test {
    use crate::introspect::{DatabaseCatalog, PgField, PgTable};
    use crate::parser::IdentityKind;

    use super::fields_from_parse;

    fn field(name: &str, type_oid: u32, nullable: bool) -> PgField {
        PgField {
            name: name.to_string(),
            num: 0,
            type_oid,
            nullable,
            ndims: 0,
            has_default: false,
            identity: IdentityKind::None,
            collation: None,
        }
    }

    fn catalog() -> DatabaseCatalog {
        DatabaseCatalog {
            tables: vec![
                PgTable {
                    oid: 1,
                    name: "users".to_string(),
                    schema: "public".to_string(),
                    row_type_oid: 100,
                    fields: vec![field("id", 20, false), field("name", 25, false)],
                    primary_key: vec!["id".to_string()],
                    pk_name: Some("pk".to_string()),
                },
                PgTable {
                    oid: 2,
                    name: "orders".to_string(),
                    schema: "public".to_string(),
                    row_type_oid: 101,
                    fields: vec![field("id", 20, false), field("note", 25, true)],
                    primary_key: vec!["id".to_string()],
                    pk_name: Some("pk".to_string()),
                },
            ],
            ..DatabaseCatalog::default()
        }
    }

    #[test]
    fn plain_columns_should_propagate_types_and_nullability() {
        let fields =
            fields_from_parse(&catalog(), "SELECT u.id, u.name AS label FROM users u").unwrap();
        assert_eq!(2, fields.len());
        assert_eq!("id", fields[0].name);
        assert_eq!(20, fields[0].type_oid);
        assert!(!fields[0].nullable);
        assert_eq!("label", fields[1].name);
    }

    #[test]
    fn left_join_should_null_the_outer_side() {
        let fields = fields_from_parse(
            &catalog(),
            "SELECT u.id, o.id AS order_id FROM users u LEFT JOIN orders o ON o.id = u.id",
        )
        .unwrap();
        assert!(!fields[0].nullable);
        assert!(fields[1].nullable, "outer-join column acquires nullability");
    }

    #[test]
    fn star_over_single_table_should_expand() {
        let fields = fields_from_parse(&catalog(), "SELECT * FROM orders").unwrap();
        assert_eq!(vec!["id", "note"], fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>());
        assert!(fields[1].nullable);
    }

    #[test]
    fn expressions_should_force_the_server_fallback() {
        assert!(fields_from_parse(&catalog(), "SELECT count(*) FROM users").is_none());
        assert!(fields_from_parse(&catalog(), "SELECT id + 1 FROM users").is_none());
    }

    #[test]
    fn unknown_tables_should_force_the_server_fallback() {
        assert!(fields_from_parse(&catalog(), "SELECT x FROM mystery").is_none());
    }
}
