//! Table column diffing: classify per-column changes and emit the minimal
//! `ALTER TABLE` sequence for each.

use crate::introspect::{DatabaseCatalog, PgField, PgTable};
use crate::parser::ColumnDef;

/// What happened to one column between the live table and the desired one.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange<'a> {
    Added(&'a ColumnDef),
    Dropped(&'a PgField),
    TypeChanged {
        desired: &'a ColumnDef,
        existing: &'a PgField,
        new_type_oid: Option<u32>,
    },
    CollationChanged {
        desired: &'a ColumnDef,
        existing: &'a PgField,
    },
}

/// Classify every column of the desired table against the live one.
pub fn classify_columns<'a>(
    catalog: &DatabaseCatalog,
    existing: &'a PgTable,
    desired: &'a [ColumnDef],
) -> Vec<ColumnChange<'a>> {
    let mut changes = Vec::new();
    for field in &existing.fields {
        if !desired.iter().any(|c| c.name == field.name) {
            changes.push(ColumnChange::Dropped(field));
        }
    }
    for column in desired {
        let Some(field) = existing.fields.iter().find(|f| f.name == column.name) else {
            changes.push(ColumnChange::Added(column));
            continue;
        };
        let new_type_oid = resolve_type_oid(catalog, &column.type_id);
        match new_type_oid {
            Some(oid) if oid == field.type_oid => {}
            _ => {
                changes.push(ColumnChange::TypeChanged {
                    desired: column,
                    existing: field,
                    new_type_oid,
                });
                continue;
            }
        }
        let desired_collation = column.collation.as_ref().map(|c| c.name.as_str());
        let existing_collation = field
            .collation
            .as_deref()
            .filter(|name| *name != "default");
        if desired_collation != existing_collation {
            changes.push(ColumnChange::CollationChanged {
                desired: column,
                existing: field,
            });
        }
    }
    changes
}

/// Resolve a declared type to the live type OID it should have:
/// user-defined types by qualified name, base types by canonical name,
/// arrays through the element's array OID.
pub fn resolve_type_oid(catalog: &DatabaseCatalog, type_id: &crate::ident::TypeId) -> Option<u32> {
    let name = canonical_type_name(&type_id.id.name);
    let scalar = find_scalar_oid(catalog, &type_id.id.schema, name)?;
    if type_id.is_array() {
        return catalog
            .base_types
            .iter()
            .find(|t| t.oid == scalar)
            .map(|t| t.array_oid)
            .or_else(|| {
                catalog
                    .enum_types
                    .iter()
                    .find(|t| t.oid == scalar)
                    .map(|t| t.array_oid)
            })
            .or_else(|| {
                catalog
                    .composite_types
                    .iter()
                    .find(|t| t.oid == scalar)
                    .map(|t| t.array_oid)
            });
    }
    Some(scalar)
}

fn find_scalar_oid(catalog: &DatabaseCatalog, schema: &str, name: &str) -> Option<u32> {
    let user_match = |s: &str, n: &str| s == schema && n == name;
    if let Some(t) = catalog
        .enum_types
        .iter()
        .find(|t| user_match(&t.schema, &t.name))
    {
        return Some(t.oid);
    }
    if let Some(t) = catalog
        .composite_types
        .iter()
        .find(|t| user_match(&t.schema, &t.name))
    {
        return Some(t.oid);
    }
    if let Some(t) = catalog
        .tables
        .iter()
        .find(|t| user_match(&t.schema, &t.name))
    {
        return Some(t.row_type_oid);
    }
    // Base types: exact schema match first, then by bare name, the way an
    // unqualified reference resolves through the default search path.
    if let Some(t) = catalog
        .base_types
        .iter()
        .find(|t| user_match(&t.schema, &t.name))
    {
        return Some(t.oid);
    }
    catalog
        .base_types
        .iter()
        .find(|t| t.name == name && t.schema == "pg_catalog")
        .map(|t| t.oid)
}

/// Map SQL-standard spellings onto the catalog names `pg_type` uses.
pub fn canonical_type_name(name: &str) -> &str {
    match name {
        "int" | "integer" => "int4",
        "bigint" => "int8",
        "smallint" => "int2",
        "boolean" => "bool",
        "real" => "float4",
        "double precision" => "float8",
        "character varying" => "varchar",
        "character" => "bpchar",
        "decimal" => "numeric",
        "serial" => "int4",
        "bigserial" => "int8",
        "smallserial" => "int2",
        other => other,
    }
}

#[cfg(test)]
mod test {
    use crate::ident::{SqlId, TypeId};
    use crate::introspect::{DatabaseCatalog, PgBaseType, PgField, PgTable};
    use crate::parser::{ColumnDef, IdentityKind};

    use super::{classify_columns, ColumnChange};

    fn base_type(oid: u32, name: &str, array_oid: u32) -> PgBaseType {
        PgBaseType {
            oid,
            name: name.to_string(),
            schema: "pg_catalog".to_string(),
            array_oid,
        }
    }

    fn catalog() -> DatabaseCatalog {
        DatabaseCatalog {
            base_types: vec![
                base_type(20, "int8", 1016),
                base_type(23, "int4", 1007),
                base_type(25, "text", 1009),
                base_type(1184, "timestamptz", 1185),
            ],
            ..DatabaseCatalog::default()
        }
    }

    fn field(name: &str, type_oid: u32) -> PgField {
        PgField {
            name: name.to_string(),
            num: 1,
            type_oid,
            nullable: true,
            ndims: 0,
            has_default: false,
            identity: IdentityKind::None,
            collation: None,
        }
    }

    fn column(name: &str, type_name: &str) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            type_id: TypeId::new(SqlId::new("pg_catalog", type_name)),
            nullable: true,
            has_default: false,
            default_expr: None,
            identity: IdentityKind::None,
            is_primary_key: false,
            refs: Vec::new(),
            collation: None,
        }
    }

    fn table(fields: Vec<PgField>) -> PgTable {
        PgTable {
            oid: 99,
            name: "t".to_string(),
            schema: "public".to_string(),
            row_type_oid: 100,
            fields,
            primary_key: Vec::new(),
            pk_name: None,
        }
    }

    #[test]
    fn identical_columns_should_report_no_changes() {
        let existing = table(vec![field("id", 20), field("name", 25)]);
        let desired = vec![column("id", "int8"), column("name", "text")];
        assert!(classify_columns(&catalog(), &existing, &desired).is_empty());
    }

    #[test]
    fn added_and_dropped_columns_should_be_classified() {
        let existing = table(vec![field("id", 20), field("legacy", 25)]);
        let desired = vec![column("id", "int8"), column("name", "text")];
        let changes = classify_columns(&catalog(), &existing, &desired);
        assert_eq!(2, changes.len());
        assert!(matches!(&changes[0], ColumnChange::Dropped(f) if f.name == "legacy"));
        assert!(matches!(&changes[1], ColumnChange::Added(c) if c.name == "name"));
    }

    #[test]
    fn type_change_should_carry_the_new_oid() {
        let existing = table(vec![field("created", 20)]);
        let desired = vec![column("created", "timestamptz")];
        let changes = classify_columns(&catalog(), &existing, &desired);
        let [ColumnChange::TypeChanged { new_type_oid, .. }] = changes.as_slice() else {
            panic!("expected a type change");
        };
        assert_eq!(Some(1184), *new_type_oid);
    }

    #[test]
    fn spelling_aliases_should_not_count_as_changes() {
        let existing = table(vec![field("id", 20)]);
        let mut desired = column("id", "bigint");
        desired.type_id = TypeId::new(SqlId::unqualified("bigint"));
        assert!(classify_columns(&catalog(), &existing, &[desired]).is_empty());
    }

    #[test]
    fn array_types_should_resolve_through_the_element() {
        let existing = table(vec![field("tags", 1009)]);
        let mut desired = column("tags", "text");
        desired.type_id.array_bounds.push(-1);
        assert!(classify_columns(&catalog(), &existing, &[desired]).is_empty());
    }
}
