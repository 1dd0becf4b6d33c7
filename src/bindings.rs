//! Runtime support for generated bindings. Generated stubs build a
//! [RoutineBinding] describing the routine's shape, then execute it through
//! a [crate::wire::Connection].

use crate::error::PgSyncError;
use crate::ident::quote_ident;
use crate::template::Rendered;
use crate::wire::{Connection, FromRow, PgValue, QueryOptions, QueryType, Row};

/// Which wire call shape a routine binds to, chosen by the generator from
/// `(routine kind, returns row, returns set)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    Procedure,
    QueryRowList,
    QueryRowOrNull,
    QueryValueList,
    QueryValue,
}

/// Per-field decode hint carried by generated row mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Timestamp,
    Array,
    Range,
    Composite,
    Table,
}

/// Field names plus decode hints for one generated record type.
#[derive(Debug, Clone, Copy)]
pub struct RowMapper {
    pub fields: &'static [(&'static str, FieldKind)],
}

/// Validate a decoded composite against its row mapper and expose the field
/// values positionally. Generated `FromPgValue` impls for composite and
/// table row types decode through this.
pub fn record_fields<'a>(
    value: &'a PgValue,
    mapper: &RowMapper,
) -> Result<&'a [PgValue], PgSyncError> {
    match value {
        PgValue::Composite(values) if values.len() == mapper.fields.len() => Ok(values),
        PgValue::Composite(values) => Err(PgSyncError::Wire(format!(
            "Composite value has {} fields, expected {}",
            values.len(),
            mapper.fields.len()
        ))),
        other => Err(PgSyncError::Wire(format!(
            "Expected a composite value, found {other:?}"
        ))),
    }
}

/// Text encoding of one routine argument.
pub trait ToPgText {
    fn to_pg_text(&self) -> Option<String>;
}

macro_rules! impl_to_pg_text {
    ($($ty:ty),*) => {
        $(impl ToPgText for $ty {
            fn to_pg_text(&self) -> Option<String> {
                Some(self.to_string())
            }
        })*
    };
}

impl_to_pg_text!(bool, i16, i32, i64, f32, f64, String, u32);

impl ToPgText for &str {
    fn to_pg_text(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl<T: ToPgText> ToPgText for Option<T> {
    fn to_pg_text(&self) -> Option<String> {
        self.as_ref().and_then(ToPgText::to_pg_text)
    }
}

/// A callable description of one database routine.
#[derive(Debug, Clone)]
pub struct RoutineBinding {
    schema: &'static str,
    name: &'static str,
    kind: BindKind,
    min_args: usize,
    max_args: usize,
    named_args: Option<&'static [&'static str]>,
    returns_record: bool,
}

pub fn bind_procedure(schema: &'static str, name: &'static str) -> RoutineBinding {
    RoutineBinding::new(schema, name, BindKind::Procedure)
}

pub fn bind_query_row_list(schema: &'static str, name: &'static str) -> RoutineBinding {
    RoutineBinding::new(schema, name, BindKind::QueryRowList)
}

pub fn bind_query_row_or_null(schema: &'static str, name: &'static str) -> RoutineBinding {
    RoutineBinding::new(schema, name, BindKind::QueryRowOrNull)
}

pub fn bind_query_value_list(schema: &'static str, name: &'static str) -> RoutineBinding {
    RoutineBinding::new(schema, name, BindKind::QueryValueList)
}

pub fn bind_query_value(schema: &'static str, name: &'static str) -> RoutineBinding {
    RoutineBinding::new(schema, name, BindKind::QueryValue)
}

impl RoutineBinding {
    fn new(schema: &'static str, name: &'static str, kind: BindKind) -> Self {
        Self {
            schema,
            name,
            kind,
            min_args: 0,
            max_args: 0,
            named_args: None,
            returns_record: false,
        }
    }

    pub fn arity(mut self, min: usize, max: usize) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    pub fn named_args(mut self, names: &'static [&'static str]) -> Self {
        self.named_args = Some(names);
        self
    }

    pub fn returns_record(mut self) -> Self {
        self.returns_record = true;
        self
    }

    pub fn kind(&self) -> BindKind {
        self.kind
    }

    /// The SQL invoking this routine with `arg_count` arguments. Optional
    /// trailing arguments use named notation when parameter names exist.
    pub fn invocation_sql(&self, arg_count: usize) -> Result<String, PgSyncError> {
        if arg_count < self.min_args || arg_count > self.max_args {
            return Err(PgSyncError::General(format!(
                "{}.{} expects between {} and {} arguments, got {arg_count}",
                self.schema, self.name, self.min_args, self.max_args
            )));
        }
        let mut args = String::new();
        for i in 0..arg_count {
            if i > 0 {
                args.push_str(", ");
            }
            match self.named_args {
                Some(names) if i >= self.min_args => {
                    let name = names.get(i).copied().unwrap_or_default();
                    args.push_str(&format!("{} => ${}", quote_ident(name), i + 1));
                }
                _ => args.push_str(&format!("${}", i + 1)),
            }
        }
        let target = format!(
            "{}.{}({args})",
            quote_ident(self.schema),
            quote_ident(self.name)
        );
        let sql = match self.kind {
            BindKind::Procedure => format!("CALL {target}"),
            BindKind::QueryRowList | BindKind::QueryRowOrNull => {
                format!("SELECT * FROM {target}")
            }
            BindKind::QueryValueList | BindKind::QueryValue => format!("SELECT {target}"),
        };
        Ok(sql)
    }

    async fn run(
        &self,
        conn: &mut Connection,
        args: Vec<Option<String>>,
        query_type: QueryType,
    ) -> Result<crate::wire::QueryOutput, PgSyncError> {
        let rendered = Rendered {
            sql: self.invocation_sql(args.len())?,
            params: args,
        };
        conn.query_rendered(query_type, rendered, QueryOptions::default())
            .await
    }

    pub async fn call_procedure(
        &self,
        conn: &mut Connection,
        args: Vec<Option<String>>,
    ) -> Result<(), PgSyncError> {
        self.run(conn, args, QueryType::Void).await.map(|_| ())
    }

    pub async fn query_rows<T: FromRow>(
        &self,
        conn: &mut Connection,
        args: Vec<Option<String>>,
    ) -> Result<Vec<T>, PgSyncError> {
        let rows = self.run(conn, args, QueryType::Row).await?.into_rows();
        rows.iter().map(T::from_row).collect()
    }

    pub async fn query_row_or_null<T: FromRow>(
        &self,
        conn: &mut Connection,
        args: Vec<Option<String>>,
    ) -> Result<Option<T>, PgSyncError> {
        let rows: Vec<Row> = self.run(conn, args, QueryType::Row).await?.into_rows();
        rows.first().map(T::from_row).transpose()
    }

    pub async fn query_values(
        &self,
        conn: &mut Connection,
        args: Vec<Option<String>>,
    ) -> Result<Vec<PgValue>, PgSyncError> {
        Ok(self.run(conn, args, QueryType::Value).await?.into_values())
    }

    pub async fn query_value(
        &self,
        conn: &mut Connection,
        args: Vec<Option<String>>,
    ) -> Result<Option<PgValue>, PgSyncError> {
        Ok(self
            .run(conn, args, QueryType::Value)
            .await?
            .into_values()
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod test {
    use super::{
        bind_procedure, bind_query_row_list, bind_query_value, record_fields, FieldKind,
        RowMapper,
    };
    use crate::wire::PgValue;

    #[test]
    fn invocation_should_use_positional_placeholders() {
        let binding = bind_query_value("public", "add_numbers").arity(2, 2);
        assert_eq!(
            "SELECT public.add_numbers($1, $2)",
            binding.invocation_sql(2).unwrap()
        );
    }

    #[test]
    fn optional_args_should_use_named_notation() {
        let binding = bind_query_row_list("public", "search")
            .arity(1, 3)
            .named_args(&["term", "max_rows", "start_at"]);
        assert_eq!(
            "SELECT * FROM public.search($1, max_rows => $2)",
            binding.invocation_sql(2).unwrap()
        );
    }

    #[test]
    fn procedures_should_render_call() {
        let binding = bind_procedure("app", "cleanup").arity(0, 0);
        assert_eq!("CALL app.cleanup()", binding.invocation_sql(0).unwrap());
    }

    #[test]
    fn arity_should_be_enforced() {
        let binding = bind_query_value("public", "f").arity(1, 2);
        assert!(binding.invocation_sql(0).is_err());
        assert!(binding.invocation_sql(3).is_err());
    }

    #[test]
    fn record_fields_should_check_shape_against_the_mapper() {
        const MAPPER: RowMapper = RowMapper {
            fields: &[("street", FieldKind::Scalar), ("zip", FieldKind::Scalar)],
        };
        let value = PgValue::Composite(vec![
            PgValue::Text("main st".to_string()),
            PgValue::Null,
        ]);
        let fields = record_fields(&value, &MAPPER).unwrap();
        assert_eq!(2, fields.len());

        let short = PgValue::Composite(vec![PgValue::Null]);
        assert!(record_fields(&short, &MAPPER).is_err());
        assert!(record_fields(&PgValue::Int4(1), &MAPPER).is_err());
    }
}
