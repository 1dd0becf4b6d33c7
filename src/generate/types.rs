//! OID-to-Rust type mapping and identifier sanitization for generated code.

use heck::{ToPascalCase, ToSnakeCase};

use crate::bindings::FieldKind;
use crate::introspect::DatabaseCatalog;
use crate::wire::text::oid;

/// A rendered Rust type path for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct RustType {
    pub path: String,
}

pub struct TypeMap<'a> {
    catalog: &'a DatabaseCatalog,
}

/// Builtin array OIDs and their element types, matching the wire decoder's
/// built-in registry.
const BUILTIN_ARRAYS: &[(u32, u32)] = &[
    (oid::BOOL_ARRAY, oid::BOOL),
    (oid::CHAR_ARRAY, oid::BPCHAR),
    (oid::NAME_ARRAY, oid::NAME),
    (oid::INT2_ARRAY, oid::INT2),
    (oid::INT4_ARRAY, oid::INT4),
    (oid::INT8_ARRAY, oid::INT8),
    (oid::TEXT_ARRAY, oid::TEXT),
    (oid::VARCHAR_ARRAY, oid::VARCHAR),
    (oid::FLOAT4_ARRAY, oid::FLOAT4),
    (oid::FLOAT8_ARRAY, oid::FLOAT8),
    (oid::OID_ARRAY, oid::OID),
];

const RANGE_OIDS: &[u32] = &[
    oid::INT4_RANGE,
    oid::INT8_RANGE,
    oid::NUM_RANGE,
    oid::TS_RANGE,
    oid::TSTZ_RANGE,
    oid::DATE_RANGE,
];

impl<'a> TypeMap<'a> {
    pub fn new(catalog: &'a DatabaseCatalog) -> Self {
        Self { catalog }
    }

    /// The Rust type used for a field of the given OID, wrapped in `Option`
    /// when nullable.
    pub fn rust_type(&self, type_oid: u32, nullable: bool) -> RustType {
        let inner = self.scalar_path(type_oid);
        let path = if nullable {
            format!("Option<{inner}>")
        } else {
            inner
        };
        RustType { path }
    }

    fn scalar_path(&self, type_oid: u32) -> String {
        if let Some(path) = builtin_path(type_oid) {
            return path.to_string();
        }
        if let Some(elem) = self.array_element(type_oid) {
            return format!("Vec<{}>", self.scalar_path(elem));
        }
        if RANGE_OIDS.contains(&type_oid) {
            return "pgsync::wire::text::PgRange".to_string();
        }
        if let Some(t) = self.catalog.enum_types.iter().find(|t| t.oid == type_oid) {
            return format!(
                "super::{}::{}",
                rust_field_name(&t.schema),
                rust_type_name(&t.name)
            );
        }
        if let Some(t) = self
            .catalog
            .composite_types
            .iter()
            .find(|t| t.oid == type_oid)
        {
            return format!(
                "super::{}::{}",
                rust_field_name(&t.schema),
                rust_type_name(&t.name)
            );
        }
        if let Some(t) = self
            .catalog
            .tables
            .iter()
            .find(|t| t.row_type_oid == type_oid)
        {
            return format!(
                "super::{}::{}",
                rust_field_name(&t.schema),
                rust_type_name(&t.name)
            );
        }
        // Unknown types decode as raw text.
        "String".to_string()
    }

    fn array_element(&self, type_oid: u32) -> Option<u32> {
        BUILTIN_ARRAYS
            .iter()
            .find(|(array, _)| *array == type_oid)
            .map(|(_, elem)| *elem)
            .or_else(|| self.catalog.array_element(type_oid))
    }

    /// Decode hint for the row mapper.
    pub fn field_kind(&self, type_oid: u32) -> FieldKind {
        if matches!(type_oid, oid::TIMESTAMP | oid::TIMESTAMPTZ) {
            return FieldKind::Timestamp;
        }
        if RANGE_OIDS.contains(&type_oid) {
            return FieldKind::Range;
        }
        if self.array_element(type_oid).is_some() {
            return FieldKind::Array;
        }
        if self
            .catalog
            .composite_types
            .iter()
            .any(|t| t.oid == type_oid)
        {
            return FieldKind::Composite;
        }
        if self
            .catalog
            .tables
            .iter()
            .any(|t| t.row_type_oid == type_oid)
        {
            return FieldKind::Table;
        }
        FieldKind::Scalar
    }
}

fn builtin_path(type_oid: u32) -> Option<&'static str> {
    let path = match type_oid {
        oid::BOOL => "bool",
        oid::INT2 => "i16",
        oid::INT4 => "i32",
        oid::INT8 => "i64",
        oid::OID => "u32",
        oid::FLOAT4 => "f32",
        oid::FLOAT8 => "f64",
        oid::TEXT | oid::NAME | oid::BPCHAR | oid::VARCHAR | oid::NUMERIC | oid::MONEY
        | oid::INET | oid::CIDR | oid::UUID => "String",
        oid::BYTEA => "Vec<u8>",
        oid::JSON | oid::JSONB => "serde_json::Value",
        oid::TIMESTAMP => "chrono::NaiveDateTime",
        oid::TIMESTAMPTZ => "chrono::DateTime<chrono::FixedOffset>",
        oid::DATE => "chrono::NaiveDate",
        oid::TIME => "chrono::NaiveTime",
        oid::INTERVAL => "pgsync::wire::text::PgInterval",
        _ => return None,
    };
    Some(path)
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "static", "struct", "trait", "true", "type", "unsafe", "use",
    "where", "while", "yield",
];

/// A safe Rust field/module identifier for a database name. Keywords get a
/// raw-identifier prefix; anything unrepresentable is replaced with `_`.
pub fn rust_field_name(name: &str) -> String {
    let snake = sanitize(&name.to_snake_case());
    if RUST_KEYWORDS.contains(&snake.as_str()) {
        return format!("r#{snake}");
    }
    if matches!(snake.as_str(), "self" | "super" | "crate" | "Self") {
        return format!("{snake}_");
    }
    snake
}

/// A PascalCase Rust type name for a database name.
pub fn rust_type_name(name: &str) -> String {
    sanitize(&name.to_pascal_case())
}

fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::{rust_field_name, rust_type_name};

    #[rstest]
    #[case("user_id", "user_id")]
    #[case("userId", "user_id")]
    #[case("type", "r#type")]
    #[case("2fast", "_2fast")]
    #[case("odd name", "odd_name")]
    fn field_names_should_be_valid_rust(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(expected, rust_field_name(input));
    }

    #[rstest]
    #[case("user_account", "UserAccount")]
    #[case("status", "Status")]
    #[case("HTTPCode", "HttpCode")]
    fn type_names_should_be_pascal_case(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(expected, rust_type_name(input));
    }
}
