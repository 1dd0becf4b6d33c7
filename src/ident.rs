use std::fmt::{Display, Formatter, Write};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PgSyncError;

/// Schemas whose members are never treated as user objects.
pub const CATALOG_SCHEMAS: [&str; 2] = ["pg_catalog", "information_schema"];

/// A schema-qualified object name. A missing schema is canonicalized to
/// `public` at construction, so equality and hashing never have to special
/// case unqualified names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SqlId {
    pub schema: String,
    pub name: String,
}

impl SqlId {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        let schema = schema.into();
        Self {
            schema: if schema.is_empty() {
                "public".to_string()
            } else {
                schema
            },
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self::new("public", name)
    }

    /// Parse a dotted, possibly quoted, qualified name.
    pub fn parse(input: &str) -> Result<Self, PgSyncError> {
        let parts = split_qualified(input);
        match parts.as_slice() {
            [name] => Ok(Self::unqualified(name.as_str())),
            [schema, name] => Ok(Self::new(schema.as_str(), name.as_str())),
            _ => Err(PgSyncError::General(format!(
                "Invalid qualified name: {input:?}"
            ))),
        }
    }

    pub fn is_catalog(&self) -> bool {
        CATALOG_SCHEMAS.contains(&self.schema.as_str())
    }

    /// The escaped form of the schema side alone.
    pub fn quoted_schema(&self) -> String {
        quote_ident(&self.schema)
    }

    /// The escaped form of the name side alone.
    pub fn quoted_name(&self) -> String {
        quote_ident(&self.name)
    }

    /// A regex matching both the quoted and unquoted occurrence of this name
    /// in SQL source, with the schema qualification optional.
    pub fn to_regex(&self) -> Result<Regex, PgSyncError> {
        let schema = regex::escape(&self.schema);
        let name = regex::escape(&self.name);
        let pattern = format!(
            r#"(?:(?:"{schema}"|\b{schema})\s*\.\s*)?(?:"{name}"|\b{name}\b)"#
        );
        Regex::new(&pattern)
            .map_err(|error| PgSyncError::General(format!("Invalid identifier regex: {error}")))
    }
}

impl Display for SqlId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

/// Quote an identifier when it contains anything outside `[a-z0-9_$]` or does
/// not start with a letter or underscore. Embedded quotes are doubled.
pub fn quote_ident(ident: &str) -> String {
    let safe = !ident.is_empty()
        && ident
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c == '_')
            .unwrap_or(false)
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
    if safe {
        return ident.to_string();
    }
    let mut quoted = String::with_capacity(ident.len() + 2);
    quoted.push('"');
    for c in ident.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Split a dotted name, honoring double-quoted segments.
fn split_qualified(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            '.' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => {
                if in_quotes {
                    current.push(c);
                } else {
                    current.push(c.to_ascii_lowercase());
                }
            }
        }
    }
    parts.push(current);
    parts
}

/// A type name plus its ordered modifiers and per-dimension array bounds
/// (`-1` for an unspecified bound).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId {
    pub id: SqlId,
    pub modifiers: Vec<i32>,
    pub array_bounds: Vec<i32>,
}

impl TypeId {
    pub fn new(id: SqlId) -> Self {
        Self {
            id,
            modifiers: Vec::new(),
            array_bounds: Vec::new(),
        }
    }

    /// Parse a PostgreSQL type string such as `pg_catalog.varchar(40)[][]`.
    pub fn parse(input: &str) -> Result<Self, PgSyncError> {
        let mut rest = input.trim();
        let mut array_bounds = Vec::new();
        while let Some(open) = rest.rfind('[') {
            if !rest.ends_with(']') {
                break;
            }
            let inner = &rest[open + 1..rest.len() - 1];
            let bound = if inner.is_empty() {
                -1
            } else {
                inner.trim().parse::<i32>().map_err(|_| {
                    PgSyncError::General(format!("Invalid array bound in type: {input:?}"))
                })?
            };
            array_bounds.insert(0, bound);
            rest = rest[..open].trim_end();
        }
        let mut modifiers = Vec::new();
        if let Some(open) = rest.find('(') {
            let close = rest.rfind(')').ok_or_else(|| {
                PgSyncError::General(format!("Unbalanced type modifiers in {input:?}"))
            })?;
            for raw in rest[open + 1..close].split(',') {
                modifiers.push(raw.trim().parse::<i32>().map_err(|_| {
                    PgSyncError::General(format!("Invalid type modifier in {input:?}"))
                })?);
            }
            rest = rest[..open].trim_end();
        }
        Ok(Self {
            id: SqlId::parse(rest)?,
            modifiers,
            array_bounds,
        })
    }

    /// Build a type identifier from a parsed `TypeName` node.
    pub fn from_ast(type_name: &pg_query::protobuf::TypeName) -> Result<Self, PgSyncError> {
        let mut names = Vec::new();
        for node in &type_name.names {
            if let Some(pg_query::NodeEnum::String(s)) = &node.node {
                names.push(s.sval.clone());
            }
        }
        let id = match names.as_slice() {
            [name] => SqlId::unqualified(name.as_str()),
            [schema, name] => SqlId::new(schema.as_str(), name.as_str()),
            _ => {
                return Err(PgSyncError::General(format!(
                    "Unexpected type name parts: {names:?}"
                )))
            }
        };
        let mut modifiers = Vec::new();
        for node in &type_name.typmods {
            match &node.node {
                Some(pg_query::NodeEnum::Integer(integer)) => modifiers.push(integer.ival),
                Some(pg_query::NodeEnum::AConst(a_const)) => {
                    if let Some(pg_query::protobuf::a_const::Val::Ival(ival)) = &a_const.val {
                        modifiers.push(ival.ival);
                    }
                }
                _ => {}
            }
        }
        let mut array_bounds = Vec::new();
        for node in &type_name.array_bounds {
            if let Some(pg_query::NodeEnum::Integer(integer)) = &node.node {
                array_bounds.push(integer.ival);
            }
        }
        Ok(Self {
            id,
            modifiers,
            array_bounds,
        })
    }

    pub fn is_array(&self) -> bool {
        !self.array_bounds.is_empty()
    }

    /// Spelling for composed DDL. Catalog and `public` types render bare so
    /// base types parsed without a schema stay valid; other schemas render
    /// qualified.
    pub fn sql_spelling(&self) -> String {
        let mut out = String::new();
        if self.id.schema != "pg_catalog" && self.id.schema != "public" {
            out.push_str(&quote_ident(&self.id.schema));
            out.push('.');
        }
        out.push_str(&quote_ident(&self.id.name));
        if !self.modifiers.is_empty() {
            out.push('(');
            for (i, modifier) in self.modifiers.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{modifier}");
            }
            out.push(')');
        }
        for bound in &self.array_bounds {
            if *bound < 0 {
                out.push_str("[]");
            } else {
                let _ = write!(out, "[{bound}]");
            }
        }
        out
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.modifiers.is_empty() {
            f.write_char('(')?;
            for (i, modifier) in self.modifiers.iter().enumerate() {
                if i > 0 {
                    f.write_char(',')?;
                }
                write!(f, "{modifier}")?;
            }
            f.write_char(')')?;
        }
        for bound in &self.array_bounds {
            if *bound < 0 {
                f.write_str("[]")?;
            } else {
                write!(f, "[{bound}]")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::{quote_ident, SqlId, TypeId};

    #[rstest]
    #[case("users", "public", "users")]
    #[case("auth.users", "auth", "users")]
    #[case("\"Auth\".\"Users\"", "Auth", "Users")]
    #[case("\"odd.name\"", "public", "odd.name")]
    fn parse_should_canonicalize_schema(
        #[case] input: &str,
        #[case] schema: &str,
        #[case] name: &str,
    ) {
        let id = SqlId::parse(input).unwrap();
        assert_eq!(schema, id.schema);
        assert_eq!(name, id.name);
    }

    #[test]
    fn parse_should_round_trip_through_display() {
        for raw in ["users", "auth.users", "\"Weird Name\"", "s.\"A\"\"B\""] {
            let id = SqlId::parse(raw).unwrap();
            let rendered = id.to_string();
            assert_eq!(id, SqlId::parse(&rendered).unwrap(), "round trip of {raw}");
        }
    }

    #[rstest]
    #[case("users", "users")]
    #[case("user table", "\"user table\"")]
    #[case("Users", "\"Users\"")]
    #[case("1users", "\"1users\"")]
    #[case("he\"llo", "\"he\"\"llo\"")]
    fn quote_ident_should_only_quote_unsafe_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(expected, quote_ident(input));
    }

    #[test]
    fn to_regex_should_match_quoted_and_unquoted_forms() {
        let id = SqlId::new("public", "users");
        let re = id.to_regex().unwrap();
        assert!(re.is_match("select * from public.users"));
        assert!(re.is_match("select * from \"public\".\"users\""));
        assert!(re.is_match("select * from users"));
        assert!(!re.is_match("select * from users_archive"));
    }

    #[rstest]
    #[case("text", "public", "text", 0, 0)]
    #[case("pg_catalog.varchar(40)", "pg_catalog", "varchar", 1, 0)]
    #[case("pg_catalog.varchar(40)[][]", "pg_catalog", "varchar", 1, 2)]
    #[case("numeric(10,2)", "public", "numeric", 2, 0)]
    #[case("int4[3]", "public", "int4", 0, 1)]
    fn type_id_parse_should_extract_modifiers_and_bounds(
        #[case] input: &str,
        #[case] schema: &str,
        #[case] name: &str,
        #[case] modifier_count: usize,
        #[case] bound_count: usize,
    ) {
        let type_id = TypeId::parse(input).unwrap();
        assert_eq!(schema, type_id.id.schema);
        assert_eq!(name, type_id.id.name);
        assert_eq!(modifier_count, type_id.modifiers.len());
        assert_eq!(bound_count, type_id.array_bounds.len());
    }

    #[test]
    fn type_id_display_should_round_trip() {
        let type_id = TypeId::parse("pg_catalog.varchar(40)[][]").unwrap();
        assert_eq!(type_id, TypeId::parse(&type_id.to_string()).unwrap());
        assert_eq!(vec![-1, -1], type_id.array_bounds);
    }
}
