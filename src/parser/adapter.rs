//! pg_query AST to statement-record conversion.

use std::path::Path;

use lazy_regex::{lazy_regex, Lazy, Regex};
use pg_query::protobuf::{ConstrType, FunctionParameterMode};
use pg_query::NodeEnum;
use tracing::{debug, warn};

use crate::error::PgSyncError;
use crate::ident::{SqlId, TypeId};
use crate::parser::scanner::{split_statements, StatementSpan};

use crate::parser::{
    CastContext, ColumnDef, IdentityKind, ReturnType, RoutineParam, Statement, StatementKind,
};

static VIEW_BODY: Lazy<Regex> = lazy_regex!(
    r#"(?is)^\s*CREATE(?:\s+OR\s+REPLACE)?\s+(?:TEMP(?:ORARY)?\s+)?(?:RECURSIVE\s+)?VIEW\s+.*?\sAS\s+(.*?)(?:\s+WITH\s+(?:CASCADED\s+|LOCAL\s+)?CHECK\s+OPTION)?\s*;?\s*$"#
);

/// Parse a whole source file into statement records.
pub fn parse_sql(source: &str, path: &Path) -> Result<Vec<Statement>, PgSyncError> {
    let mut statements = Vec::new();
    for span in split_statements(source) {
        if let Some(statement) = parse_span(&span, source, path)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

fn parse_span(
    span: &StatementSpan,
    source: &str,
    path: &Path,
) -> Result<Option<Statement>, PgSyncError> {
    let result = match pg_query::parse(&span.sql) {
        Ok(result) => result,
        Err(error) => return Err(annotate_parse_error(error, span, source, path)),
    };
    let Some(raw_stmt) = result.protobuf.stmts.first() else {
        return Ok(None);
    };
    let Some(node) = raw_stmt.stmt.as_ref().and_then(|s| s.node.as_ref()) else {
        return Ok(None);
    };

    let parsed = match node {
        NodeEnum::CreateFunctionStmt(stmt) => convert_routine(stmt, span),
        NodeEnum::CreateStmt(stmt) => convert_table(stmt, span),
        NodeEnum::CompositeTypeStmt(stmt) => convert_composite(stmt, span),
        NodeEnum::CreateEnumStmt(stmt) => convert_enum(stmt, span),
        NodeEnum::ViewStmt(stmt) => convert_view(stmt, &result, span),
        NodeEnum::CreateExtensionStmt(stmt) => convert_extension(stmt, span),
        NodeEnum::CreateCastStmt(stmt) => convert_cast(stmt, span),
        // Indexes, triggers and sequences are the external planner's job.
        NodeEnum::IndexStmt(_) | NodeEnum::CreateTrigStmt(_) | NodeEnum::CreateSeqStmt(_) => {
            return Ok(None);
        }
        other => {
            debug!(statement = ?std::mem::discriminant(other), "skipping unrecognized statement");
            return Ok(None);
        }
    }?;
    Ok(parsed.map(|(kind, id)| {
        Statement::new(kind, id, span.sql.clone(), path.to_path_buf(), span.line)
    }))
}

type Converted = Result<Option<(StatementKind, SqlId)>, PgSyncError>;

fn convert_routine(stmt: &pg_query::protobuf::CreateFunctionStmt, span: &StatementSpan) -> Converted {
    let id = id_from_name_list(&stmt.funcname)?;
    let mut in_params = Vec::new();
    let mut out_columns: Vec<ColumnDef> = Vec::new();
    let mut table_columns: Vec<ColumnDef> = Vec::new();
    let mut default_params = 0usize;

    for node in &stmt.parameters {
        let Some(NodeEnum::FunctionParameter(param)) = node.node.as_ref() else {
            continue;
        };
        let Some(type_name) = param.arg_type.as_ref() else {
            warn!(statement = %span.sql, "skipping malformed routine parameter");
            continue;
        };
        let type_id = TypeId::from_ast(type_name)?;
        let name = (!param.name.is_empty()).then(|| param.name.clone());
        match param.mode() {
            FunctionParameterMode::FuncParamIn | FunctionParameterMode::FuncParamDefault => {
                if param.defexpr.is_some() {
                    default_params += 1;
                }
                in_params.push(RoutineParam {
                    name,
                    type_id,
                    variadic: false,
                });
            }
            FunctionParameterMode::FuncParamVariadic => in_params.push(RoutineParam {
                name,
                type_id,
                variadic: true,
            }),
            FunctionParameterMode::FuncParamInout => {
                if param.defexpr.is_some() {
                    default_params += 1;
                }
                in_params.push(RoutineParam {
                    name: name.clone(),
                    type_id: type_id.clone(),
                    variadic: false,
                });
                out_columns.push(out_column(name, type_id));
            }
            FunctionParameterMode::FuncParamOut => {
                out_columns.push(out_column(name, type_id));
            }
            FunctionParameterMode::FuncParamTable => {
                table_columns.push(out_column(name, type_id));
            }
            FunctionParameterMode::Undefined => {}
        }
    }

    let mut returns_set = false;
    let (out_params, return_type) = if !table_columns.is_empty() {
        returns_set = true;
        (None, ReturnType::Columns(table_columns))
    } else if !out_columns.is_empty() {
        (Some(out_columns.clone()), ReturnType::Columns(out_columns))
    } else {
        match stmt.return_type.as_ref() {
            Some(type_name) => {
                returns_set = type_name.setof;
                let type_id = TypeId::from_ast(type_name)?;
                if type_id.id.name == "trigger" {
                    (None, ReturnType::None)
                } else {
                    (None, ReturnType::Type(type_id))
                }
            }
            None => (None, ReturnType::None),
        }
    };

    Ok(Some((
        StatementKind::Routine {
            in_params,
            out_params,
            return_type,
            returns_set,
            is_procedure: stmt.is_procedure,
            default_params,
        },
        id,
    )))
}

fn out_column(name: Option<String>, type_id: TypeId) -> ColumnDef {
    ColumnDef {
        name: name.unwrap_or_default(),
        type_id,
        nullable: true,
        has_default: false,
        default_expr: None,
        identity: IdentityKind::None,
        is_primary_key: false,
        refs: Vec::new(),
        collation: None,
    }
}

/// Deparse an expression node by grafting it into a throwaway `SELECT`.
fn deparse_expr(node: &pg_query::protobuf::Node) -> Option<String> {
    let mut result = pg_query::parse("SELECT NULL").ok()?;
    if let Some(stmt) = result.protobuf.stmts.first_mut() {
        if let Some(stmt_node) = stmt.stmt.as_mut() {
            if let Some(NodeEnum::SelectStmt(select)) = stmt_node.node.as_mut() {
                if let Some(first_target) = select.target_list.first_mut() {
                    if let Some(NodeEnum::ResTarget(res)) = first_target.node.as_mut() {
                        res.val = Some(Box::new(node.clone()));
                    }
                }
            }
        }
    }
    let sql = pg_query::deparse(&result.protobuf).ok()?;
    Some(sql.strip_prefix("SELECT ").unwrap_or(&sql).to_string())
}

fn convert_table(stmt: &pg_query::protobuf::CreateStmt, span: &StatementSpan) -> Converted {
    let id = id_from_relation(stmt.relation.as_ref())?;
    let mut columns = Vec::new();
    let mut primary_key: Vec<String> = Vec::new();

    for elt in &stmt.table_elts {
        match elt.node.as_ref() {
            Some(NodeEnum::ColumnDef(col)) => {
                let Some(type_name) = col.type_name.as_ref() else {
                    warn!(
                        column = %col.colname,
                        statement = %span.sql,
                        "skipping column without a type"
                    );
                    continue;
                };
                if col.colname.is_empty() {
                    warn!(statement = %span.sql, "skipping column without a name");
                    continue;
                }
                let mut column = ColumnDef {
                    name: col.colname.clone(),
                    type_id: TypeId::from_ast(type_name)?,
                    nullable: !col.is_not_null,
                    has_default: false,
                    default_expr: None,
                    identity: IdentityKind::None,
                    is_primary_key: false,
                    refs: Vec::new(),
                    collation: collation_id(col.coll_clause.as_deref()),
                };
                for con_node in &col.constraints {
                    let Some(NodeEnum::Constraint(con)) = con_node.node.as_ref() else {
                        continue;
                    };
                    match con.contype() {
                        ConstrType::ConstrNotnull => column.nullable = false,
                        ConstrType::ConstrDefault => {
                            column.has_default = true;
                            column.default_expr =
                                con.raw_expr.as_ref().and_then(|expr| deparse_expr(expr));
                        }
                        ConstrType::ConstrIdentity => {
                            column.identity = match con.generated_when.as_str() {
                                "a" => IdentityKind::Always,
                                _ => IdentityKind::Default,
                            };
                            column.nullable = false;
                        }
                        ConstrType::ConstrPrimary => {
                            column.is_primary_key = true;
                            column.nullable = false;
                            primary_key.push(column.name.clone());
                        }
                        ConstrType::ConstrForeign => {
                            if let Ok(target) = id_from_relation(con.pktable.as_ref()) {
                                column.refs.push(target);
                            }
                        }
                        _ => {}
                    }
                }
                columns.push(column);
            }
            Some(NodeEnum::Constraint(con)) if con.contype() == ConstrType::ConstrPrimary => {
                for key in &con.keys {
                    if let Some(NodeEnum::String(s)) = key.node.as_ref() {
                        primary_key.push(s.sval.clone());
                        if let Some(column) = columns.iter_mut().find(|c| c.name == s.sval) {
                            column.is_primary_key = true;
                            column.nullable = false;
                        }
                    }
                }
            }
            Some(NodeEnum::Constraint(con)) if con.contype() == ConstrType::ConstrForeign => {
                if let Ok(target) = id_from_relation(con.pktable.as_ref()) {
                    for key in &con.fk_attrs {
                        if let Some(NodeEnum::String(s)) = key.node.as_ref() {
                            if let Some(column) = columns.iter_mut().find(|c| c.name == s.sval) {
                                column.refs.push(target.clone());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(Some((
        StatementKind::Table {
            columns,
            primary_key,
        },
        id,
    )))
}

fn convert_composite(stmt: &pg_query::protobuf::CompositeTypeStmt, span: &StatementSpan) -> Converted {
    let id = id_from_relation(stmt.typevar.as_ref())?;
    let mut columns = Vec::new();
    for node in &stmt.coldeflist {
        let Some(NodeEnum::ColumnDef(col)) = node.node.as_ref() else {
            continue;
        };
        let Some(type_name) = col.type_name.as_ref() else {
            warn!(
                column = %col.colname,
                statement = %span.sql,
                "skipping composite attribute without a type"
            );
            continue;
        };
        if col.colname.is_empty() {
            warn!(statement = %span.sql, "skipping composite attribute without a name");
            continue;
        }
        columns.push(ColumnDef {
            name: col.colname.clone(),
            type_id: TypeId::from_ast(type_name)?,
            nullable: true,
            has_default: false,
            default_expr: None,
            identity: IdentityKind::None,
            is_primary_key: false,
            refs: Vec::new(),
            collation: collation_id(col.coll_clause.as_deref()),
        });
    }
    Ok(Some((StatementKind::CompositeType { columns }, id)))
}

fn convert_enum(stmt: &pg_query::protobuf::CreateEnumStmt, _span: &StatementSpan) -> Converted {
    let id = id_from_name_list(&stmt.type_name)?;
    let mut labels = Vec::new();
    for node in &stmt.vals {
        if let Some(NodeEnum::String(s)) = node.node.as_ref() {
            labels.push(s.sval.clone());
        }
    }
    Ok(Some((StatementKind::EnumType { labels }, id)))
}

fn convert_view(
    stmt: &pg_query::protobuf::ViewStmt,
    result: &pg_query::ParseResult,
    span: &StatementSpan,
) -> Converted {
    let id = id_from_relation(stmt.view.as_ref())?;
    let mut refs = Vec::new();
    for table in result.tables() {
        if let Ok(table_id) = SqlId::parse(&table) {
            if table_id != id && !table_id.is_catalog() {
                refs.push(table_id);
            }
        }
    }
    for function in result.functions() {
        if let Ok(function_id) = SqlId::parse(&function) {
            if !function_id.is_catalog() {
                refs.push(function_id);
            }
        }
    }
    refs.sort();
    refs.dedup();

    let body = VIEW_BODY
        .captures(&span.sql)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| span.sql.clone());

    Ok(Some((StatementKind::View { refs, body }, id)))
}

fn convert_extension(
    stmt: &pg_query::protobuf::CreateExtensionStmt,
    _span: &StatementSpan,
) -> Converted {
    Ok(Some((
        StatementKind::Extension,
        SqlId::new("pg_catalog", stmt.extname.as_str()),
    )))
}

fn convert_cast(stmt: &pg_query::protobuf::CreateCastStmt, _span: &StatementSpan) -> Converted {
    use pg_query::protobuf::CoercionContext;

    let source = stmt
        .sourcetype
        .as_ref()
        .map(TypeId::from_ast)
        .transpose()?
        .ok_or_else(|| PgSyncError::General("CREATE CAST without a source type".to_string()))?;
    let target = stmt
        .targettype
        .as_ref()
        .map(TypeId::from_ast)
        .transpose()?
        .ok_or_else(|| PgSyncError::General("CREATE CAST without a target type".to_string()))?;
    let function = match stmt.func.as_ref() {
        Some(func) => Some(id_from_name_list(&func.objname)?),
        None => None,
    };
    let context = match stmt.context() {
        CoercionContext::CoercionImplicit => CastContext::Implicit,
        CoercionContext::CoercionAssignment => CastContext::Assignment,
        _ => CastContext::Explicit,
    };
    let id = SqlId::new(
        "pg_catalog",
        format!("cast ({} as {})", source.id, target.id),
    );
    Ok(Some((
        StatementKind::Cast {
            source,
            target,
            function,
            context,
        },
        id,
    )))
}

fn collation_id(clause: Option<&pg_query::protobuf::CollateClause>) -> Option<SqlId> {
    let clause = clause?;
    let mut parts = Vec::new();
    for node in &clause.collname {
        if let Some(NodeEnum::String(s)) = node.node.as_ref() {
            parts.push(s.sval.clone());
        }
    }
    match parts.as_slice() {
        [name] => Some(SqlId::new("pg_catalog", name.as_str())),
        [schema, name] => Some(SqlId::new(schema.as_str(), name.as_str())),
        _ => None,
    }
}

fn id_from_relation(relation: Option<&pg_query::protobuf::RangeVar>) -> Result<SqlId, PgSyncError> {
    let relation = relation
        .ok_or_else(|| PgSyncError::General("Statement is missing a target relation".to_string()))?;
    Ok(SqlId::new(relation.schemaname.as_str(), relation.relname.as_str()))
}

fn id_from_name_list(names: &[pg_query::protobuf::Node]) -> Result<SqlId, PgSyncError> {
    let mut parts = Vec::new();
    for node in names {
        if let Some(NodeEnum::String(s)) = node.node.as_ref() {
            parts.push(s.sval.clone());
        }
    }
    match parts.as_slice() {
        [name] => Ok(SqlId::unqualified(name.as_str())),
        [schema, name] => Ok(SqlId::new(schema.as_str(), name.as_str())),
        other => Err(PgSyncError::General(format!(
            "Unexpected qualified name parts: {other:?}"
        ))),
    }
}

/// Turn a pg_query error into a source-annotated code frame with two lines of
/// context on either side of the failure.
fn annotate_parse_error(
    error: pg_query::Error,
    span: &StatementSpan,
    source: &str,
    path: &Path,
) -> PgSyncError {
    let offset = span.offset;
    let line = source[..offset.min(source.len())].matches('\n').count() + 1;
    let line_start = source[..offset.min(source.len())]
        .rfind('\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    let column = offset.saturating_sub(line_start) + 1;

    let mut frame = String::new();
    let first = line.saturating_sub(2).max(1);
    for (number, text) in source
        .lines()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .skip(first - 1)
        .take(5)
    {
        let marker = if number == line { ">" } else { " " };
        frame.push_str(&format!("{marker} {number:>4} | {text}\n"));
    }
    frame.push_str(&format!("error: {error}"));

    PgSyncError::Parse {
        path: path.to_path_buf(),
        line,
        column,
        frame,
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::ident::SqlId;
    use crate::parser::{IdentityKind, ReturnType, StatementKind};

    use super::parse_sql;

    fn parse_one(sql: &str) -> crate::parser::Statement {
        let mut statements = parse_sql(sql, Path::new("test.pgsql")).unwrap();
        assert_eq!(1, statements.len(), "expected one statement from {sql}");
        statements.remove(0)
    }

    #[test]
    fn table_should_capture_columns_and_primary_key() {
        let statement = parse_one(
            "CREATE TABLE app.users (
                id bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                name text NOT NULL,
                bio varchar(400) DEFAULT '',
                org_id int REFERENCES app.orgs (id)
            );",
        );
        assert_eq!(SqlId::new("app", "users"), statement.id);
        let StatementKind::Table {
            columns,
            primary_key,
        } = &statement.kind
        else {
            panic!("not a table");
        };
        assert_eq!(4, columns.len());
        assert_eq!(vec!["id".to_string()], *primary_key);
        assert_eq!(IdentityKind::Always, columns[0].identity);
        assert!(columns[0].is_primary_key);
        assert!(!columns[1].nullable);
        assert!(columns[2].has_default);
        assert_eq!(vec![400], columns[2].type_id.modifiers);
        assert_eq!(vec![SqlId::new("app", "orgs")], columns[3].refs);
    }

    #[test]
    fn table_level_primary_key_should_mark_columns() {
        let statement = parse_one(
            "CREATE TABLE pairs (a int, b int, PRIMARY KEY (a, b));",
        );
        let StatementKind::Table {
            columns,
            primary_key,
        } = &statement.kind
        else {
            panic!("not a table");
        };
        assert_eq!(vec!["a".to_string(), "b".to_string()], *primary_key);
        assert!(columns.iter().all(|c| c.is_primary_key && !c.nullable));
    }

    #[test]
    fn routine_should_split_in_and_out_params() {
        let statement = parse_one(
            "CREATE FUNCTION add_user(name text, age int DEFAULT 18, OUT id bigint)
             RETURNS bigint LANGUAGE sql AS $$ SELECT 1 $$;",
        );
        let StatementKind::Routine {
            in_params,
            out_params,
            default_params,
            is_procedure,
            ..
        } = &statement.kind
        else {
            panic!("not a routine");
        };
        assert_eq!(2, in_params.len());
        assert_eq!(1, *default_params);
        assert_eq!(1, out_params.as_ref().map(Vec::len).unwrap_or(0));
        assert!(!is_procedure);
    }

    #[test]
    fn routine_returning_table_should_set_returns_set() {
        let statement = parse_one(
            "CREATE FUNCTION list_users() RETURNS TABLE(id bigint, name text)
             LANGUAGE sql AS $$ SELECT 1, 'x' $$;",
        );
        let StatementKind::Routine {
            return_type,
            returns_set,
            ..
        } = &statement.kind
        else {
            panic!("not a routine");
        };
        assert!(returns_set);
        let ReturnType::Columns(columns) = return_type else {
            panic!("expected table columns");
        };
        assert_eq!(2, columns.len());
    }

    #[test]
    fn routine_returning_setof_should_set_returns_set() {
        let statement = parse_one(
            "CREATE FUNCTION f() RETURNS setof int LANGUAGE sql AS $$ SELECT 1 $$;",
        );
        let StatementKind::Routine {
            return_type,
            returns_set,
            ..
        } = &statement.kind
        else {
            panic!("not a routine");
        };
        assert!(returns_set);
        assert!(matches!(return_type, ReturnType::Type(t) if t.id.name == "int4"));
    }

    #[test]
    fn procedure_should_have_no_return_type() {
        let statement =
            parse_one("CREATE PROCEDURE cleanup() LANGUAGE sql AS $$ DELETE FROM t $$;");
        let StatementKind::Routine {
            return_type,
            is_procedure,
            ..
        } = &statement.kind
        else {
            panic!("not a routine");
        };
        assert!(is_procedure);
        assert_eq!(ReturnType::None, *return_type);
    }

    #[test]
    fn composite_should_keep_attribute_order() {
        let statement = parse_one("CREATE TYPE addr AS (street text, zip text);");
        let StatementKind::CompositeType { columns } = &statement.kind else {
            panic!("not a composite");
        };
        assert_eq!(
            vec!["street".to_string(), "zip".to_string()],
            columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn enum_should_keep_label_order() {
        let statement = parse_one("CREATE TYPE status AS ENUM ('new', 'open', 'done');");
        let StatementKind::EnumType { labels } = &statement.kind else {
            panic!("not an enum");
        };
        assert_eq!(vec!["new", "open", "done"], labels.as_slice());
    }

    #[test]
    fn view_should_capture_refs_and_body() {
        let statement = parse_one(
            "CREATE VIEW active_users AS SELECT u.id, lower(u.name) FROM users u WHERE u.active;",
        );
        let StatementKind::View { refs, body } = &statement.kind else {
            panic!("not a view");
        };
        assert!(refs.contains(&SqlId::unqualified("users")));
        assert!(body.starts_with("SELECT"));
        assert!(!body.to_lowercase().contains("create view"));
    }

    #[test]
    fn extension_should_parse_name() {
        let statement = parse_one("CREATE EXTENSION pg_trgm;");
        assert!(matches!(statement.kind, StatementKind::Extension));
        assert_eq!("pg_trgm", statement.id.name);
    }

    #[test]
    fn indexes_and_triggers_should_be_ignored() {
        let statements = parse_sql(
            "CREATE INDEX idx ON t (a); CREATE SEQUENCE s; CREATE TABLE t (a int);",
            Path::new("test.pgsql"),
        )
        .unwrap();
        assert_eq!(1, statements.len());
    }

    #[test]
    fn cast_should_capture_types_function_and_context() {
        let statement = parse_one(
            "CREATE CAST (bigint AS money_cents) WITH FUNCTION to_cents(bigint) AS IMPLICIT;",
        );
        let StatementKind::Cast {
            source,
            target,
            function,
            context,
        } = &statement.kind
        else {
            panic!("not a cast");
        };
        assert_eq!("int8", source.id.name);
        assert_eq!("money_cents", target.id.name);
        assert_eq!(Some(SqlId::unqualified("to_cents")), *function);
        assert_eq!("i", context.as_ref());
    }

    #[test]
    fn parse_error_should_carry_a_code_frame() {
        let error = parse_sql("CREATE TABLE broken (;", Path::new("bad.pgsql")).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("bad.pgsql"), "got: {message}");
    }
}
