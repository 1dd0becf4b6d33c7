//! Dependency linking: resolve cross-references between parsed statements
//! into a DAG and produce a deterministic topological order.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::error::PgSyncError;
use crate::ident::SqlId;
use crate::parser::{ReturnType, Statement, StatementKind};

/// Statements ordered so that every dependency precedes its dependents.
/// Ties are broken by `(schema, name)` ascending.
#[derive(Debug)]
pub struct TopologicalSet {
    statements: Vec<Statement>,
}

impl TopologicalSet {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
        self.statements.iter()
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }

    pub fn position(&self, id: &SqlId) -> Option<usize> {
        self.statements.iter().position(|s| s.id == *id)
    }
}

impl<'a> IntoIterator for &'a TopologicalSet {
    type Item = &'a Statement;
    type IntoIter = std::slice::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Resolve references, annotate `deps_out`/`deps_in`, and order the set.
pub fn link(mut statements: Vec<Statement>) -> Result<TopologicalSet, PgSyncError> {
    let mut index: HashMap<SqlId, usize> = HashMap::with_capacity(statements.len());
    for (i, statement) in statements.iter().enumerate() {
        if index.insert(statement.id.clone(), i).is_some() {
            return Err(PgSyncError::General(format!(
                "Duplicate definition of {} ({})",
                statement.id,
                statement.kind_name()
            )));
        }
    }

    // Type statements matched against view bodies to catch casts the
    // reference walk cannot see.
    let type_matchers: Vec<(SqlId, regex::Regex)> = statements
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                StatementKind::CompositeType { .. } | StatementKind::EnumType { .. }
            )
        })
        .filter_map(|s| s.id.to_regex().ok().map(|re| (s.id.clone(), re)))
        .collect();

    for i in 0..statements.len() {
        let deps = collect_deps(&statements[i], &index, &type_matchers);
        let own_id = statements[i].id.clone();
        for dep in &deps {
            if let Some(&target) = index.get(dep) {
                statements[target].deps_in.push(own_id.clone());
            }
        }
        statements[i].deps_out = deps;
    }

    kahn_order(statements, &index)
}

/// Candidate references for one statement, resolved against the set. Type
/// references that resolve to nothing are assumed to be base types; relation
/// references that resolve to nothing are warned about.
fn collect_deps(
    statement: &Statement,
    index: &HashMap<SqlId, usize>,
    type_matchers: &[(SqlId, regex::Regex)],
) -> Vec<SqlId> {
    let mut deps: Vec<SqlId> = Vec::new();
    let push_type = |type_id: &SqlId, deps: &mut Vec<SqlId>| {
        if index.contains_key(type_id) {
            deps.push(type_id.clone());
        }
    };
    match &statement.kind {
        StatementKind::Routine {
            in_params,
            return_type,
            ..
        } => {
            for param in in_params {
                push_type(&param.type_id.id, &mut deps);
            }
            match return_type {
                ReturnType::Type(type_id) => push_type(&type_id.id, &mut deps),
                ReturnType::Columns(columns) => {
                    for column in columns {
                        push_type(&column.type_id.id, &mut deps);
                    }
                }
                ReturnType::None => {}
            }
        }
        StatementKind::Table { columns, .. } | StatementKind::CompositeType { columns } => {
            for column in columns {
                push_type(&column.type_id.id, &mut deps);
                for target in &column.refs {
                    if index.contains_key(target) {
                        deps.push(target.clone());
                    } else {
                        warn!(
                            statement = %statement.id,
                            reference = %target,
                            "unresolved foreign-key reference"
                        );
                    }
                }
            }
        }
        StatementKind::View { refs, body } => {
            for target in refs {
                if index.contains_key(target) {
                    deps.push(target.clone());
                } else {
                    warn!(
                        statement = %statement.id,
                        reference = %target,
                        "unresolved view reference"
                    );
                }
            }
            for (type_id, matcher) in type_matchers {
                if matcher.is_match(body) {
                    deps.push(type_id.clone());
                }
            }
        }
        StatementKind::Cast {
            source,
            target,
            function,
            ..
        } => {
            push_type(&source.id, &mut deps);
            push_type(&target.id, &mut deps);
            if let Some(function) = function {
                if index.contains_key(function) {
                    deps.push(function.clone());
                } else {
                    warn!(
                        statement = %statement.id,
                        reference = %function,
                        "unresolved cast function reference"
                    );
                }
            }
        }
        StatementKind::EnumType { .. } | StatementKind::Extension => {}
    }
    deps.retain(|dep| *dep != statement.id);
    deps.sort();
    deps.dedup();
    deps
}

fn kahn_order(
    statements: Vec<Statement>,
    index: &HashMap<SqlId, usize>,
) -> Result<TopologicalSet, PgSyncError> {
    let n = statements.len();
    let mut remaining_deps: Vec<BTreeSet<usize>> = statements
        .iter()
        .map(|s| {
            s.deps_out
                .iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect()
        })
        .collect();

    // Ready statements keyed by (schema, name) for the deterministic
    // tie-break.
    let mut ready: BTreeSet<(SqlId, usize)> = BTreeSet::new();
    for (i, statement) in statements.iter().enumerate() {
        if remaining_deps[i].is_empty() {
            ready.insert((statement.id.clone(), i));
        }
    }

    let mut placed: Vec<bool> = vec![false; n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    while order.len() < n {
        let next = ready.iter().next().cloned();
        match next {
            Some(entry) => {
                ready.remove(&entry);
                let (_, i) = entry;
                placed[i] = true;
                order.push(i);
                for (j, deps) in remaining_deps.iter_mut().enumerate() {
                    if !placed[j] && deps.remove(&i) && deps.is_empty() {
                        ready.insert((statements[j].id.clone(), j));
                    }
                }
            }
            None => {
                // A cycle. Break it at the back-edge leaving the
                // highest-indexed view or routine still in play.
                let candidate = (0..n)
                    .rev()
                    .filter(|i| !placed[*i] && !remaining_deps[*i].is_empty())
                    .find(|i| {
                        matches!(
                            statements[*i].kind,
                            StatementKind::View { .. } | StatementKind::Routine { .. }
                        )
                    });
                let Some(i) = candidate else {
                    let stuck = (0..n)
                        .find(|i| !placed[*i])
                        .map(|i| statements[i].id.clone())
                        .unwrap_or_else(|| SqlId::unqualified("unknown"));
                    return Err(PgSyncError::DependencyCycle(stuck));
                };
                let broken = remaining_deps[i]
                    .iter()
                    .next_back()
                    .copied()
                    .unwrap_or_default();
                warn!(
                    statement = %statements[i].id,
                    dependency = %statements[broken].id,
                    "breaking dependency cycle; the reference resolves at apply time"
                );
                remaining_deps[i].remove(&broken);
                if remaining_deps[i].is_empty() {
                    ready.insert((statements[i].id.clone(), i));
                }
            }
        }
    }

    let mut slots: Vec<Option<Statement>> = statements.into_iter().map(Some).collect();
    let ordered = order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect();
    Ok(TopologicalSet {
        statements: ordered,
    })
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::ident::SqlId;
    use crate::parser::parse_sql;

    use super::link;

    fn linked(sql: &str) -> Vec<String> {
        let statements = parse_sql(sql, Path::new("test.pgsql")).unwrap();
        link(statements)
            .unwrap()
            .iter()
            .map(|s| s.id.to_string())
            .collect()
    }

    #[test]
    fn dependencies_should_precede_dependents() {
        let order = linked(
            "CREATE TABLE b (id int primary key, a_id int references a(id));
             CREATE TABLE a (id int primary key);",
        );
        assert_eq!(vec!["public.a", "public.b"], order);
    }

    #[test]
    fn ties_should_break_by_schema_then_name() {
        let order = linked(
            "CREATE TABLE zed (id int);
             CREATE TABLE aaa.last (id int);
             CREATE TABLE mid (id int);",
        );
        assert_eq!(vec!["aaa.last", "public.mid", "public.zed"], order);
    }

    #[test]
    fn routine_should_follow_its_types() {
        let order = linked(
            "CREATE FUNCTION get_addr() RETURNS addr LANGUAGE sql AS $$ SELECT null $$;
             CREATE TYPE addr AS (street text, zip text);",
        );
        assert_eq!(vec!["public.addr", "public.get_addr"], order);
    }

    #[test]
    fn view_should_follow_referenced_tables_and_cast_types() {
        let order = linked(
            "CREATE VIEW v AS SELECT kind::status FROM t;
             CREATE TABLE t (kind text);
             CREATE TYPE status AS ENUM ('a', 'b');",
        );
        let v = order.iter().position(|s| s == "public.v").unwrap();
        let t = order.iter().position(|s| s == "public.t").unwrap();
        let status = order.iter().position(|s| s == "public.status").unwrap();
        assert!(t < v);
        assert!(status < v);
    }

    #[test]
    fn view_cycle_should_break_with_a_warning_not_an_error() {
        let statements = parse_sql(
            "CREATE VIEW v1 AS SELECT * FROM v2;
             CREATE VIEW v2 AS SELECT * FROM v1;",
            Path::new("test.pgsql"),
        )
        .unwrap();
        let set = link(statements).unwrap();
        assert_eq!(2, set.len());
    }

    #[test]
    fn transitive_chain_should_be_fully_ordered() {
        let order = linked(
            "CREATE VIEW report AS SELECT * FROM users;
             CREATE TABLE users (id bigint primary key, addr addr);
             CREATE TYPE addr AS (street text, zip text);",
        );
        assert_eq!(
            vec!["public.addr", "public.users", "public.report"],
            order
        );
    }

    #[test]
    fn sample_schema_should_order_every_dependency() {
        let source = include_str!("../test-files/blog-schema.pgsql");
        let statements = parse_sql(source, Path::new("blog-schema.pgsql")).unwrap();
        let set = link(statements).unwrap();
        assert_eq!(8, set.len());

        let position = |name: &str| {
            set.position(&SqlId::unqualified(name))
                .unwrap_or_else(|| panic!("{name} missing from the set"))
        };
        assert!(position("author_profile") < position("authors"));
        assert!(position("authors") < position("posts"));
        assert!(position("post_status") < position("posts"));
        assert!(position("posts") < position("published_posts"));
        assert!(position("post_status") < position("published_posts"));

        // Every transitive dependency precedes its dependents.
        for (i, statement) in set.iter().enumerate() {
            for dep in &statement.deps_out {
                let dep_position = set.position(dep).expect("dep must be in the set");
                assert!(dep_position < i, "{dep} must precede {}", statement.id);
            }
        }
    }

    #[test]
    fn duplicate_ids_should_be_rejected() {
        let statements = parse_sql(
            "CREATE TABLE t (a int); CREATE TABLE t (b int);",
            Path::new("test.pgsql"),
        )
        .unwrap();
        assert!(link(statements).is_err());
    }

    #[test]
    fn deps_should_be_annotated_both_ways() {
        let statements = parse_sql(
            "CREATE TABLE a (id int primary key);
             CREATE TABLE b (a_id int references a(id));",
            Path::new("test.pgsql"),
        )
        .unwrap();
        let set = link(statements).unwrap();
        let a = &set.statements()[set.position(&SqlId::unqualified("a")).unwrap()];
        let b = &set.statements()[set.position(&SqlId::unqualified("b")).unwrap()];
        assert_eq!(vec![SqlId::unqualified("a")], b.deps_out);
        assert_eq!(vec![SqlId::unqualified("b")], a.deps_in);
    }
}
