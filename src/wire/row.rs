use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::PgSyncError;
use crate::wire::protocol::FieldDescription;
use crate::wire::text::PgValue;

/// One decoded result row with its shared field descriptors.
#[derive(Debug, Clone)]
pub struct Row {
    fields: Arc<Vec<FieldDescription>>,
    values: Vec<PgValue>,
}

impl Row {
    pub fn new(fields: Arc<Vec<FieldDescription>>, values: Vec<PgValue>) -> Self {
        Self { fields, values }
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<PgValue> {
        self.values
    }

    pub fn try_get<T: FromPgValue>(&self, name: &str) -> Result<T, PgSyncError> {
        let index = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| PgSyncError::Wire(format!("Result has no column named {name:?}")))?;
        T::from_value(&self.values[index])
            .map_err(|error| PgSyncError::Wire(format!("Column {name:?}: {error}")))
    }

    /// Decode a `json`/`jsonb` column into a deserializable shape.
    pub fn try_get_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, PgSyncError> {
        let value: serde_json::Value = self.try_get(name)?;
        serde_json::from_value(value).map_err(|error| {
            PgSyncError::Wire(format!("Column {name:?} has unexpected JSON shape: {error}"))
        })
    }
}

/// Conversion from a decoded wire value into a concrete Rust type.
pub trait FromPgValue: Sized {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError>;
}

fn mismatch<T>(expected: &str, value: &PgValue) -> Result<T, PgSyncError> {
    Err(PgSyncError::Wire(format!(
        "Expected {expected}, found {value:?}"
    )))
}

impl FromPgValue for bool {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Bool(b) => Ok(*b),
            other => mismatch("bool", other),
        }
    }
}

impl FromPgValue for i16 {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Int2(v) => Ok(*v),
            other => mismatch("int2", other),
        }
    }
}

impl FromPgValue for i32 {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Int2(v) => Ok(*v as i32),
            PgValue::Int4(v) => Ok(*v),
            other => mismatch("int4", other),
        }
    }
}

impl FromPgValue for i64 {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Int2(v) => Ok(*v as i64),
            PgValue::Int4(v) => Ok(*v as i64),
            PgValue::Int8(v) => Ok(*v),
            other => mismatch("int8", other),
        }
    }
}

impl FromPgValue for u32 {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide)
            .map_err(|_| PgSyncError::Wire(format!("OID out of range: {wide}")))
    }
}

impl FromPgValue for f32 {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Float4(v) => Ok(*v),
            other => mismatch("float4", other),
        }
    }
}

impl FromPgValue for f64 {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Float4(v) => Ok(*v as f64),
            PgValue::Float8(v) => Ok(*v),
            other => mismatch("float8", other),
        }
    }
}

impl FromPgValue for String {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Text(s) => Ok(s.clone()),
            other => mismatch("text", other),
        }
    }
}

impl FromPgValue for serde_json::Value {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Json(v) => Ok(v.clone()),
            other => mismatch("json", other),
        }
    }
}

impl FromPgValue for chrono::NaiveDateTime {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Timestamp(v) => Ok(*v),
            other => mismatch("timestamp", other),
        }
    }
}

impl FromPgValue for chrono::DateTime<chrono::FixedOffset> {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::TimestampTz(v) => Ok(*v),
            other => mismatch("timestamptz", other),
        }
    }
}

impl FromPgValue for chrono::NaiveDate {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Date(v) => Ok(*v),
            other => mismatch("date", other),
        }
    }
}

impl FromPgValue for chrono::NaiveTime {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Time(v) => Ok(*v),
            other => mismatch("time", other),
        }
    }
}

impl FromPgValue for crate::wire::text::PgInterval {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Interval(v) => Ok(v.clone()),
            other => mismatch("interval", other),
        }
    }
}

impl FromPgValue for crate::wire::text::PgRange {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Range(v) => Ok(v.clone()),
            other => mismatch("range", other),
        }
    }
}

impl FromPgValue for Vec<u8> {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Bytea(v) => Ok(v.clone()),
            other => mismatch("bytea", other),
        }
    }
}

impl<T: FromPgValue> FromPgValue for Option<T> {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromPgValue> FromPgValue for Vec<T> {
    fn from_value(value: &PgValue) -> Result<Self, PgSyncError> {
        match value {
            PgValue::Array(items) => items.iter().map(T::from_value).collect(),
            other => mismatch("array", other),
        }
    }
}

/// Row-to-struct mapping, implemented by introspection result shapes.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, PgSyncError>;
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{FromPgValue, Row};
    use crate::wire::protocol::FieldDescription;
    use crate::wire::text::PgValue;

    fn field(name: &str, type_oid: u32) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_len: -1,
            type_mod: -1,
            format: 0,
        }
    }

    #[test]
    fn try_get_should_find_columns_by_name() {
        let row = Row::new(
            Arc::new(vec![field("oid", 26), field("name", 25)]),
            vec![PgValue::Int8(42), PgValue::Text("users".to_string())],
        );
        assert_eq!(42u32, row.try_get::<u32>("oid").unwrap());
        assert_eq!("users".to_string(), row.try_get::<String>("name").unwrap());
        assert!(row.try_get::<String>("missing").is_err());
    }

    #[test]
    fn option_should_map_null() {
        assert_eq!(None, Option::<i32>::from_value(&PgValue::Null).unwrap());
        assert_eq!(
            Some(7),
            Option::<i32>::from_value(&PgValue::Int4(7)).unwrap()
        );
    }

    #[test]
    fn vec_should_decode_array_items() {
        let value = PgValue::Array(vec![
            PgValue::Text("a".to_string()),
            PgValue::Text("b".to_string()),
        ]);
        assert_eq!(
            vec!["a".to_string(), "b".to_string()],
            Vec::<String>::from_value(&value).unwrap()
        );
    }
}
