//! Binding generation: walk the introspected namespaces and emit typed Rust
//! bindings for every routine, composite, enum, table, and view, plus a
//! companion type-data file carrying the runtime OID map.

mod types;

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::config::{FieldCase, GenerateConfig};
use crate::error::PgSyncError;
use crate::introspect::{
    DatabaseCatalog, Namespace, PgCompositeType, PgRoutine, PgTable, RoutineKind, ViewField,
};
use crate::parser::IdentityKind;

pub use types::{rust_field_name, rust_type_name, RustType, TypeMap};

/// Everything the generator produces.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedOutput {
    /// The bindings module.
    pub bindings: String,
    /// Companion type-data file with the runtime OID map.
    pub type_data: String,
}

/// OID of the anonymous `record` pseudo-type.
const RECORD_OID: u32 = 2249;

pub struct Generator<'a> {
    catalog: &'a DatabaseCatalog,
    view_fields: &'a HashMap<u32, Vec<ViewField>>,
    config: &'a GenerateConfig,
    types: TypeMap<'a>,
}

impl<'a> Generator<'a> {
    pub fn new(
        catalog: &'a DatabaseCatalog,
        view_fields: &'a HashMap<u32, Vec<ViewField>>,
        config: &'a GenerateConfig,
    ) -> Self {
        Self {
            catalog,
            view_fields,
            config,
            types: TypeMap::new(catalog),
        }
    }

    pub fn generate(&self) -> Result<GeneratedOutput, PgSyncError> {
        let mut out = String::new();
        out.push_str("// Generated by pgsync. Do not edit.\n");
        out.push_str("#![allow(dead_code, unused_imports, clippy::all)]\n\n");

        for (schema, namespace) in self.catalog.namespaces() {
            self.emit_namespace(&mut out, &schema, &namespace)?;
        }
        Ok(GeneratedOutput {
            bindings: out,
            type_data: self.emit_type_data(),
        })
    }

    fn emit_namespace(
        &self,
        out: &mut String,
        schema: &str,
        namespace: &Namespace<'a>,
    ) -> Result<(), PgSyncError> {
        writeln!(out, "pub mod {} {{", rust_field_name(schema))?;
        out.push_str("    use pgsync::bindings::{self, FieldKind, RoutineBinding, RowMapper};\n");
        out.push_str("    use pgsync::wire::{FromPgValue, FromRow, PgValue, Row};\n");
        out.push_str("    use pgsync::error::PgSyncError;\n\n");

        for enum_type in &namespace.enum_types {
            self.emit_enum(out, enum_type.name.as_str(), &enum_type.labels)?;
        }
        for composite in order_composites(&namespace.composite_types) {
            self.emit_composite(out, composite)?;
        }
        for table in &namespace.tables {
            self.emit_table(out, table)?;
        }
        for view in &namespace.views {
            self.emit_view(out, view.name.as_str(), view.oid)?;
        }
        for routine in &namespace.routines {
            self.emit_routine(out, schema, routine)?;
        }

        out.push_str("}\n\n");
        Ok(())
    }

    fn emit_enum(
        &self,
        out: &mut String,
        name: &str,
        labels: &[String],
    ) -> Result<(), PgSyncError> {
        let type_name = rust_type_name(name);
        writeln!(out, "    #[derive(Debug, Clone, Copy, PartialEq, Eq)]")?;
        writeln!(out, "    pub enum {type_name} {{")?;
        for label in labels {
            writeln!(out, "        {},", rust_type_name(label))?;
        }
        out.push_str("    }\n\n");

        writeln!(out, "    impl {type_name} {{")?;
        writeln!(out, "        pub fn as_sql(&self) -> &'static str {{")?;
        out.push_str("            match self {\n");
        for label in labels {
            writeln!(
                out,
                "                {type_name}::{} => \"{}\",",
                rust_type_name(label),
                label.replace('"', "\\\"")
            )?;
        }
        out.push_str("            }\n        }\n");
        writeln!(out, "        pub fn from_sql(raw: &str) -> Option<Self> {{")?;
        out.push_str("            match raw {\n");
        for label in labels {
            writeln!(
                out,
                "                \"{}\" => Some({type_name}::{}),",
                label.replace('"', "\\\""),
                rust_type_name(label)
            )?;
        }
        out.push_str("                _ => None,\n            }\n        }\n    }\n\n");

        writeln!(out, "    impl FromPgValue for {type_name} {{")?;
        out.push_str(
            "        fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {\n",
        );
        out.push_str("            match value {\n");
        writeln!(
            out,
            "                PgValue::Text(raw) => {type_name}::from_sql(raw).ok_or_else(|| {{"
        )?;
        writeln!(
            out,
            "                    PgSyncError::Wire(format!(\"Unknown {name} label: {{raw:?}}\"))"
        )?;
        out.push_str("                }),\n");
        out.push_str(
            "                other => Err(PgSyncError::Wire(format!(\"Expected text, found {other:?}\"))),\n",
        );
        out.push_str("            }\n        }\n    }\n\n");
        Ok(())
    }

    fn emit_fields_struct(
        &self,
        out: &mut String,
        type_name: &str,
        sql_type_name: &str,
        fields: &[(String, u32, bool)],
    ) -> Result<(), PgSyncError> {
        writeln!(out, "    #[derive(Debug, Clone, PartialEq)]")?;
        writeln!(out, "    pub struct {type_name} {{")?;
        for (name, oid, nullable) in fields {
            let not_null_override = self
                .config
                .not_null_composite_fields
                .applies(sql_type_name, name);
            let rust_type = self
                .types
                .rust_type(*oid, *nullable && !not_null_override);
            writeln!(
                out,
                "        pub {}: {},",
                self.field_name(name),
                rust_type.path
            )?;
        }
        out.push_str("    }\n\n");

        writeln!(out, "    impl FromRow for {type_name} {{")?;
        out.push_str("        fn from_row(row: &Row) -> Result<Self, PgSyncError> {\n");
        out.push_str("            Ok(Self {\n");
        for (name, _, _) in fields {
            writeln!(
                out,
                "                {}: row.try_get(\"{}\")?,",
                self.field_name(name),
                name.replace('"', "\\\"")
            )?;
        }
        out.push_str("            })\n        }\n    }\n\n");
        Ok(())
    }

    fn emit_row_mapper(
        &self,
        out: &mut String,
        type_name: &str,
        fields: &[(String, u32, bool)],
    ) -> Result<(), PgSyncError> {
        writeln!(
            out,
            "    pub const {}_MAPPER: RowMapper = RowMapper {{",
            constant_name(type_name)
        )?;
        out.push_str("        fields: &[\n");
        for (name, oid, _) in fields {
            writeln!(
                out,
                "            (\"{}\", FieldKind::{:?}),",
                name.replace('"', "\\\""),
                self.types.field_kind(*oid)
            )?;
        }
        out.push_str("        ],\n    };\n\n");
        Ok(())
    }

    /// `FromPgValue` for a record-shaped type: fields are pulled
    /// positionally from the decoded composite, validated against the row
    /// mapper.
    fn emit_record_decoder(
        &self,
        out: &mut String,
        type_name: &str,
        fields: &[(String, u32, bool)],
    ) -> Result<(), PgSyncError> {
        writeln!(out, "    impl FromPgValue for {type_name} {{")?;
        out.push_str(
            "        fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {\n",
        );
        writeln!(
            out,
            "            let values = bindings::record_fields(value, &{}_MAPPER)?;",
            constant_name(type_name)
        )?;
        out.push_str("            Ok(Self {\n");
        for (i, (name, _, _)) in fields.iter().enumerate() {
            writeln!(
                out,
                "                {}: FromPgValue::from_value(&values[{i}])?,",
                self.field_name(name)
            )?;
        }
        out.push_str("            })\n        }\n    }\n\n");
        Ok(())
    }

    fn emit_composite(
        &self,
        out: &mut String,
        composite: &PgCompositeType,
    ) -> Result<(), PgSyncError> {
        let type_name = rust_type_name(&composite.name);
        let fields: Vec<(String, u32, bool)> = composite
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.type_oid, f.nullable))
            .collect();
        self.emit_fields_struct(out, &type_name, &composite.name, &fields)?;
        self.emit_row_mapper(out, &type_name, &fields)?;
        self.emit_record_decoder(out, &type_name, &fields)?;
        Ok(())
    }

    fn emit_table(&self, out: &mut String, table: &PgTable) -> Result<(), PgSyncError> {
        let type_name = rust_type_name(&table.name);
        let fields: Vec<(String, u32, bool)> = table
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.type_oid, f.nullable))
            .collect();
        self.emit_fields_struct(out, &type_name, &table.name, &fields)?;
        self.emit_row_mapper(out, &type_name, &fields)?;
        self.emit_record_decoder(out, &type_name, &fields)?;

        // Insert shape: identity-always columns are generated by the
        // database; not-null columns without a default are required.
        writeln!(out, "    #[derive(Debug, Clone, PartialEq)]")?;
        writeln!(out, "    pub struct {type_name}Insert {{")?;
        for field in &table.fields {
            if field.identity == IdentityKind::Always {
                continue;
            }
            let required = !field.nullable && !field.has_default;
            let rust_type = self.types.rust_type(field.type_oid, !required);
            writeln!(
                out,
                "        pub {}: {},",
                self.field_name(&field.name),
                rust_type.path
            )?;
        }
        out.push_str("    }\n\n");

        // Upsert shape: insert shape plus the generated or defaulted
        // primary-key columns needed to target the conflict row.
        writeln!(out, "    #[derive(Debug, Clone, PartialEq)]")?;
        writeln!(out, "    pub struct {type_name}Upsert {{")?;
        for field in &table.fields {
            let in_insert = field.identity != IdentityKind::Always;
            let is_pk = table.primary_key.contains(&field.name);
            if !in_insert && !is_pk {
                continue;
            }
            let required = is_pk || (!field.nullable && !field.has_default);
            let rust_type = self.types.rust_type(field.type_oid, !required);
            writeln!(
                out,
                "        pub {}: {},",
                self.field_name(&field.name),
                rust_type.path
            )?;
        }
        out.push_str("    }\n\n");
        Ok(())
    }

    fn emit_view(&self, out: &mut String, name: &str, oid: u32) -> Result<(), PgSyncError> {
        let Some(fields) = self.view_fields.get(&oid) else {
            return Ok(());
        };
        let type_name = rust_type_name(name);
        let shaped: Vec<(String, u32, bool)> = fields
            .iter()
            .map(|f| (f.name.clone(), f.type_oid, f.nullable))
            .collect();
        self.emit_fields_struct(out, &type_name, name, &shaped)?;
        Ok(())
    }

    fn emit_routine(
        &self,
        out: &mut String,
        schema: &str,
        routine: &PgRoutine,
    ) -> Result<(), PgSyncError> {
        let type_prefix = rust_type_name(&routine.name);
        let inputs = routine.input_params();
        let defaults = routine.num_default_params.max(0) as usize;
        let min_args = inputs.len().saturating_sub(defaults);
        let named = inputs.iter().all(|(name, _)| name.is_some()) && !inputs.is_empty();

        // Parameter shape: a named record when parameter names exist,
        // otherwise a positional tuple. Defaulted parameters sit at the
        // tail as options.
        if named {
            writeln!(out, "    #[derive(Debug, Clone, PartialEq)]")?;
            writeln!(out, "    pub struct {type_prefix}Params {{")?;
            for (i, (name, oid)) in inputs.iter().enumerate() {
                let optional = i >= min_args;
                let rust_type = self.types.rust_type(*oid, optional);
                writeln!(
                    out,
                    "        pub {}: {},",
                    self.field_name(name.as_deref().unwrap_or_default()),
                    rust_type.path
                )?;
            }
            out.push_str("    }\n\n");
        } else if !inputs.is_empty() {
            let tuple: Vec<String> = inputs
                .iter()
                .enumerate()
                .map(|(i, (_, oid))| self.types.rust_type(*oid, i >= min_args).path)
                .collect();
            writeln!(
                out,
                "    pub type {type_prefix}Params = ({});\n",
                tuple.join(", ")
            )?;
        }

        // Result shape for record-returning routines without a named
        // composite: built from the output parameters.
        let outputs = routine.output_params();
        let returns_row = self.returns_row(routine);
        if returns_row
            && (routine.return_type_oid == RECORD_OID || !outputs.is_empty())
            && self.catalog.type_name(routine.return_type_oid).is_none()
        {
            let shaped: Vec<(String, u32, bool)> = outputs
                .iter()
                .enumerate()
                .map(|(i, (name, oid))| {
                    (
                        name.clone().unwrap_or_else(|| format!("column{}", i + 1)),
                        *oid,
                        true,
                    )
                })
                .collect();
            if !shaped.is_empty() {
                self.emit_fields_struct(
                    out,
                    &format!("{type_prefix}Row"),
                    &routine.name,
                    &shaped,
                )?;
            }
        }

        let bind_fn = self.bind_function(routine, returns_row);
        writeln!(
            out,
            "    pub fn {}() -> RoutineBinding {{",
            rust_field_name(&routine.name)
        )?;
        write!(
            out,
            "        bindings::{bind_fn}(\"{}\", \"{}\").arity({}, {})",
            schema.replace('"', "\\\""),
            routine.name.replace('"', "\\\""),
            min_args,
            inputs.len()
        )?;
        if named {
            let names: Vec<String> = inputs
                .iter()
                .map(|(name, _)| format!("\"{}\"", name.clone().unwrap_or_default()))
                .collect();
            write!(out, "\n            .named_args(&[{}])", names.join(", "))?;
        }
        if returns_row {
            write!(out, "\n            .returns_record()")?;
        }
        out.push_str("\n    }\n\n");
        Ok(())
    }

    fn returns_row(&self, routine: &PgRoutine) -> bool {
        if routine.kind == RoutineKind::Procedure {
            return false;
        }
        if routine.return_type_oid == RECORD_OID {
            return true;
        }
        if !routine.output_params().is_empty() {
            return true;
        }
        self.catalog
            .composite_types
            .iter()
            .any(|t| t.oid == routine.return_type_oid)
            || self
                .catalog
                .tables
                .iter()
                .any(|t| t.row_type_oid == routine.return_type_oid)
    }

    /// The binding function, from `(kind, returnsRow, returnsSet)`, unless
    /// an override pattern matches the qualified name.
    fn bind_function(&self, routine: &PgRoutine, returns_row: bool) -> &'static str {
        let qualified = format!("{}.{}", routine.schema, routine.name);
        for (pattern, choice) in &self.config.function_overrides {
            let matched = glob::Pattern::new(pattern)
                .map(|p| p.matches(&qualified))
                .unwrap_or(false);
            if matched {
                return match choice.as_str() {
                    "procedure" => "bind_procedure",
                    "query_row_list" => "bind_query_row_list",
                    "query_row_or_null" => "bind_query_row_or_null",
                    "query_value_list" => "bind_query_value_list",
                    _ => "bind_query_value",
                };
            }
        }
        match (routine.kind, returns_row, routine.returns_set) {
            (RoutineKind::Procedure, _, _) => "bind_procedure",
            (_, true, true) => "bind_query_row_list",
            (_, true, false) => "bind_query_row_or_null",
            (_, false, true) => "bind_query_value_list",
            (_, false, false) => "bind_query_value",
        }
    }

    fn field_name(&self, name: &str) -> String {
        match self.config.field_case {
            FieldCase::Preserve => rust_field_name(name),
            FieldCase::Camel => {
                use heck::ToLowerCamelCase;
                let camel = name.to_lower_camel_case();
                rust_field_name(&camel)
            }
        }
    }

    fn emit_type_data(&self) -> String {
        let mut out = String::new();
        out.push_str("// Generated by pgsync. Runtime type data.\n");
        out.push_str("#![allow(dead_code)]\n\n");
        out.push_str("pub static TYPE_OIDS: &[(&str, u32)] = &[\n");
        for t in &self.catalog.enum_types {
            let _ = writeln!(out, "    (\"{}.{}\", {}),", t.schema, t.name, t.oid);
        }
        for t in &self.catalog.composite_types {
            let _ = writeln!(out, "    (\"{}.{}\", {}),", t.schema, t.name, t.oid);
        }
        out.push_str("];\n\n");
        out.push_str(
            "pub fn register(decoders: &mut pgsync::wire::TextDecoders) {\n",
        );
        for t in &self.catalog.enum_types {
            let _ = writeln!(
                out,
                "    decoders.register_array({}, {});",
                t.array_oid, t.oid
            );
        }
        for t in &self.catalog.composite_types {
            let _ = writeln!(
                out,
                "    decoders.register_array({}, {});",
                t.array_oid, t.oid
            );
        }
        out.push_str("}\n");
        out
    }
}

/// Order composites so referenced composites come before the types using
/// them.
fn order_composites<'a>(
    composites: &[&'a PgCompositeType],
) -> Vec<&'a PgCompositeType> {
    let mut ordered: Vec<&PgCompositeType> = Vec::with_capacity(composites.len());
    let mut remaining: Vec<&PgCompositeType> = composites.to_vec();
    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !c.fields.iter().any(|f| {
                    remaining
                        .iter()
                        .any(|other| other.oid != c.oid && other.oid == f.type_oid)
                })
            })
            .map(|(i, _)| i)
            .collect();
        if ready.is_empty() {
            // Mutually recursive composites cannot exist in PostgreSQL;
            // emit the rest in catalog order.
            ordered.extend(remaining.drain(..));
            break;
        }
        let mut batch: Vec<&PgCompositeType> = Vec::with_capacity(ready.len());
        for index in ready.into_iter().rev() {
            batch.push(remaining.remove(index));
        }
        batch.reverse();
        ordered.extend(batch);
    }
    ordered
}

fn constant_name(type_name: &str) -> String {
    use heck::ToShoutySnakeCase;
    type_name.to_shouty_snake_case()
}

/// Convenience wrapper producing both output files.
pub fn generate_bindings(
    catalog: &DatabaseCatalog,
    view_fields: &HashMap<u32, Vec<ViewField>>,
    config: &GenerateConfig,
) -> Result<GeneratedOutput, PgSyncError> {
    Generator::new(catalog, view_fields, config).generate()
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use crate::config::GenerateConfig;
    use crate::introspect::{
        DatabaseCatalog, PgBaseType, PgCompositeType, PgEnumType, PgField, PgRoutine, PgTable,
        RoutineKind,
    };
    use crate::parser::IdentityKind;

    use super::generate_bindings;

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
            base_types: vec![
                PgBaseType {
                    oid: 20,
                    name: "int8".to_string(),
                    schema: "pg_catalog".to_string(),
                    array_oid: 1016,
                },
                PgBaseType {
                    oid: 25,
                    name: "text".to_string(),
                    schema: "pg_catalog".to_string(),
                    array_oid: 1009,
                },
            ],
            enum_types: vec![PgEnumType {
                oid: 16400,
                name: "status".to_string(),
                schema: "public".to_string(),
                array_oid: 16401,
                labels: vec!["new".to_string(), "done".to_string()],
            }],
            composite_types: vec![PgCompositeType {
                oid: 16410,
                name: "addr".to_string(),
                schema: "public".to_string(),
                array_oid: 16411,
                fields: vec![field("street", 25, true), field("zip", 25, true)],
            }],
            tables: vec![PgTable {
                oid: 16420,
                name: "users".to_string(),
                schema: "public".to_string(),
                row_type_oid: 16421,
                fields: vec![
                    {
                        let mut id = field("id", 20, false);
                        id.identity = IdentityKind::Always;
                        id
                    },
                    field("name", 25, false),
                    {
                        let mut bio = field("bio", 25, false);
                        bio.has_default = true;
                        bio
                    },
                    field("profile", 16410, true),
                ],
                primary_key: vec!["id".to_string()],
                pk_name: Some("users_pkey".to_string()),
            }],
            routines: vec![
                PgRoutine {
                    oid: 16430,
                    kind: RoutineKind::Function,
                    schema: "public".to_string(),
                    name: "get_user".to_string(),
                    param_names: Some(vec!["user_id".to_string()]),
                    param_types: vec![20],
                    all_param_types: None,
                    param_kinds: None,
                    num_default_params: 0,
                    return_type_oid: 16421,
                    returns_set: false,
                    variadic_type_oid: 0,
                },
                PgRoutine {
                    oid: 16431,
                    kind: RoutineKind::Function,
                    schema: "public".to_string(),
                    name: "count_users".to_string(),
                    param_names: None,
                    param_types: vec![],
                    all_param_types: None,
                    param_kinds: None,
                    num_default_params: 0,
                    return_type_oid: 20,
                    returns_set: false,
                    variadic_type_oid: 0,
                },
                PgRoutine {
                    oid: 16432,
                    kind: RoutineKind::Function,
                    schema: "public".to_string(),
                    name: "list_ids".to_string(),
                    param_names: None,
                    param_types: vec![],
                    all_param_types: None,
                    param_kinds: None,
                    num_default_params: 0,
                    return_type_oid: 20,
                    returns_set: true,
                    variadic_type_oid: 0,
                },
            ],
            ..DatabaseCatalog::default()
        }
    }

    fn generated() -> String {
        generate_bindings(&catalog(), &HashMap::new(), &GenerateConfig::default())
            .unwrap()
            .bindings
    }

    #[test]
    fn enums_should_become_unit_variant_enums() {
        let code = generated();
        assert!(code.contains("pub enum Status {"), "got:\n{code}");
        assert!(code.contains("New,"));
        assert!(code.contains("Done,"));
        assert!(code.contains("\"new\" => Some(Status::New)"));
    }

    #[test]
    fn composites_should_become_structs_with_mappers() {
        let code = generated();
        assert!(code.contains("pub struct Addr {"));
        assert!(code.contains("pub street: Option<String>,"));
        assert!(code.contains("pub const ADDR_MAPPER: RowMapper"));
        assert!(code.contains("(\"street\", FieldKind::Scalar)"));
    }

    #[test]
    fn record_types_should_decode_through_their_mappers() {
        let code = generated();
        assert!(
            code.contains("impl FromPgValue for Addr {"),
            "got:\n{code}"
        );
        assert!(code.contains("bindings::record_fields(value, &ADDR_MAPPER)?"));
        assert!(code.contains("street: FromPgValue::from_value(&values[0])?,"));
        // Table row types get the same treatment.
        assert!(code.contains("impl FromPgValue for Users {"));
        assert!(code.contains("bindings::record_fields(value, &USERS_MAPPER)?"));
    }

    #[test]
    fn composite_fields_should_reference_the_generated_struct() {
        let code = generated();
        assert!(
            code.contains("pub profile: Option<super::public::Addr>,"),
            "got:\n{code}"
        );
        assert!(code.contains("(\"profile\", FieldKind::Composite)"));
    }

    #[test]
    fn tables_should_emit_three_shapes() {
        let code = generated();
        assert!(code.contains("pub struct Users {"));
        assert!(code.contains("pub struct UsersInsert {"));
        assert!(code.contains("pub struct UsersUpsert {"));
        // Identity-always column is generated, not insertable.
        let insert_start = code.find("pub struct UsersInsert").unwrap();
        let insert_end = code[insert_start..].find('}').unwrap() + insert_start;
        let insert_block = &code[insert_start..insert_end];
        assert!(!insert_block.contains("pub id:"), "got:\n{insert_block}");
        // Required without a default, optional with one.
        assert!(insert_block.contains("pub name: String,"));
        assert!(insert_block.contains("pub bio: Option<String>,"));
        // Upsert adds back the identity primary key.
        let upsert_start = code.find("pub struct UsersUpsert").unwrap();
        let upsert_end = code[upsert_start..].find('}').unwrap() + upsert_start;
        let upsert_block = &code[upsert_start..upsert_end];
        assert!(upsert_block.contains("pub id: i64,"));
    }

    #[test]
    fn binding_choice_should_follow_kind_and_shape() {
        let code = generated();
        assert!(
            code.contains("bindings::bind_query_row_or_null(\"public\", \"get_user\")"),
            "got:\n{code}"
        );
        assert!(code.contains("bindings::bind_query_value(\"public\", \"count_users\")"));
        assert!(code.contains("bindings::bind_query_value_list(\"public\", \"list_ids\")"));
        assert!(code.contains(".returns_record()"));
    }

    #[test]
    fn named_params_should_become_a_record() {
        let code = generated();
        assert!(code.contains("pub struct GetUserParams {"));
        assert!(code.contains("pub user_id: i64,"));
    }

    #[test]
    fn type_data_should_list_oids_and_register_arrays() {
        let output =
            generate_bindings(&catalog(), &HashMap::new(), &GenerateConfig::default()).unwrap();
        assert!(output.type_data.contains("(\"public.status\", 16400)"));
        assert!(output.type_data.contains("decoders.register_array(16401, 16400);"));
    }
}
