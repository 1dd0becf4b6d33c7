//! Text-mode result decoding: one decoder per base type OID.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::PgSyncError;

/// Well-known type OIDs used by the built-in registry.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const REGPROC: u32 = 24;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const POINT: u32 = 600;
    pub const CIDR: u32 = 650;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const CIRCLE: u32 = 718;
    pub const MONEY: u32 = 790;
    pub const INET: u32 = 869;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const INTERVAL: u32 = 1186;
    pub const NUMERIC: u32 = 1700;
    pub const UUID: u32 = 2950;
    pub const JSONB: u32 = 3802;

    pub const BOOL_ARRAY: u32 = 1000;
    pub const NAME_ARRAY: u32 = 1003;
    pub const INT2_ARRAY: u32 = 1005;
    pub const INT4_ARRAY: u32 = 1007;
    pub const TEXT_ARRAY: u32 = 1009;
    pub const VARCHAR_ARRAY: u32 = 1015;
    pub const INT8_ARRAY: u32 = 1016;
    pub const FLOAT4_ARRAY: u32 = 1021;
    pub const FLOAT8_ARRAY: u32 = 1022;
    pub const OID_ARRAY: u32 = 1028;
    pub const CHAR_ARRAY: u32 = 1002;

    pub const INT4_RANGE: u32 = 3904;
    pub const NUM_RANGE: u32 = 3906;
    pub const TS_RANGE: u32 = 3908;
    pub const TSTZ_RANGE: u32 = 3910;
    pub const DATE_RANGE: u32 = 3912;
    pub const INT8_RANGE: u32 = 3926;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgInterval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgRange {
    pub lower: Option<Box<PgValue>>,
    pub upper: Option<Box<PgValue>>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
    pub empty: bool,
}

/// A decoded result value. Unknown OIDs fall back to [PgValue::Text] with the
/// raw wire text.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Interval(PgInterval),
    Json(serde_json::Value),
    Bytea(Vec<u8>),
    Point(f64, f64),
    Circle { x: f64, y: f64, radius: f64 },
    Array(Vec<PgValue>),
    Range(PgRange),
    /// Fields of a registered composite or table row type, in attribute
    /// order.
    Composite(Vec<PgValue>),
}

impl PgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TextKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    Json,
    Bytea,
    Point,
    Circle,
}

/// Registry mapping base type OIDs to decoders, array OIDs to their element
/// OID, range OIDs to their subtype OID, and composite OIDs to their ordered
/// field type OIDs.
#[derive(Debug, Clone)]
pub struct TextDecoders {
    scalars: HashMap<u32, TextKind>,
    array_elems: HashMap<u32, u32>,
    range_subtypes: HashMap<u32, u32>,
    composites: HashMap<u32, Vec<u32>>,
}

impl Default for TextDecoders {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TextDecoders {
    pub fn with_builtins() -> Self {
        use TextKind::*;
        let scalars = HashMap::from([
            (oid::BOOL, Bool),
            (oid::INT2, Int2),
            (oid::INT4, Int4),
            (oid::INT8, Int8),
            (oid::OID, Int8),
            (oid::REGPROC, Text),
            (oid::FLOAT4, Float4),
            (oid::FLOAT8, Float8),
            (oid::TEXT, Text),
            (oid::NAME, Text),
            (oid::BPCHAR, Text),
            (oid::VARCHAR, Text),
            (oid::NUMERIC, Text),
            (oid::MONEY, Text),
            (oid::INET, Text),
            (oid::CIDR, Text),
            (oid::UUID, Text),
            (oid::TIMESTAMP, Timestamp),
            (oid::TIMESTAMPTZ, TimestampTz),
            (oid::DATE, Date),
            (oid::TIME, Time),
            (oid::INTERVAL, Interval),
            (oid::JSON, Json),
            (oid::JSONB, Json),
            (oid::BYTEA, Bytea),
            (oid::POINT, Point),
            (oid::CIRCLE, Circle),
        ]);
        let array_elems = HashMap::from([
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
        ]);
        let range_subtypes = HashMap::from([
            (oid::INT4_RANGE, oid::INT4),
            (oid::INT8_RANGE, oid::INT8),
            (oid::NUM_RANGE, oid::NUMERIC),
            (oid::TS_RANGE, oid::TIMESTAMP),
            (oid::TSTZ_RANGE, oid::TIMESTAMPTZ),
            (oid::DATE_RANGE, oid::DATE),
        ]);
        Self {
            scalars,
            array_elems,
            range_subtypes,
            composites: HashMap::new(),
        }
    }

    /// Register a database-discovered array type (e.g. an enum's array OID).
    pub fn register_array(&mut self, array_oid: u32, elem_oid: u32) {
        self.array_elems.insert(array_oid, elem_oid);
    }

    pub fn register_range(&mut self, range_oid: u32, subtype_oid: u32) {
        self.range_subtypes.insert(range_oid, subtype_oid);
    }

    /// Register a composite or table row type with its ordered field OIDs so
    /// record literals decode into structured values.
    pub fn register_composite(&mut self, composite_oid: u32, field_oids: Vec<u32>) {
        self.composites.insert(composite_oid, field_oids);
    }

    pub fn decode(&self, type_oid: u32, text: &str) -> Result<PgValue, PgSyncError> {
        if let Some(elem) = self.array_elems.get(&type_oid) {
            return self.decode_array(*elem, text);
        }
        if let Some(subtype) = self.range_subtypes.get(&type_oid) {
            return self.decode_range(*subtype, text);
        }
        if let Some(field_oids) = self.composites.get(&type_oid) {
            return self.decode_composite(field_oids, text);
        }
        let Some(kind) = self.scalars.get(&type_oid) else {
            return Ok(PgValue::Text(text.to_string()));
        };
        let parse_error =
            |what: &str| PgSyncError::Wire(format!("Malformed {what} in result: {text:?}"));
        let value = match kind {
            TextKind::Bool => PgValue::Bool(text == "t" || text == "true"),
            TextKind::Int2 => PgValue::Int2(text.parse().map_err(|_| parse_error("int2"))?),
            TextKind::Int4 => PgValue::Int4(text.parse().map_err(|_| parse_error("int4"))?),
            TextKind::Int8 => PgValue::Int8(text.parse().map_err(|_| parse_error("int8"))?),
            TextKind::Float4 => PgValue::Float4(text.parse().map_err(|_| parse_error("float4"))?),
            TextKind::Float8 => PgValue::Float8(text.parse().map_err(|_| parse_error("float8"))?),
            TextKind::Text => PgValue::Text(text.to_string()),
            TextKind::Timestamp => PgValue::Timestamp(
                NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                    .map_err(|_| parse_error("timestamp"))?,
            ),
            TextKind::TimestampTz => PgValue::TimestampTz(
                DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                    .map_err(|_| parse_error("timestamptz"))?,
            ),
            TextKind::Date => PgValue::Date(
                NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| parse_error("date"))?,
            ),
            TextKind::Time => PgValue::Time(
                NaiveTime::parse_from_str(text, "%H:%M:%S%.f").map_err(|_| parse_error("time"))?,
            ),
            TextKind::Interval => PgValue::Interval(parse_interval(text)?),
            TextKind::Json => PgValue::Json(
                serde_json::from_str(text).map_err(|_| parse_error("json"))?,
            ),
            TextKind::Bytea => PgValue::Bytea(parse_bytea(text)?),
            TextKind::Point => {
                let (x, y) = parse_point(text)?;
                PgValue::Point(x, y)
            }
            TextKind::Circle => {
                let (center, radius) = text
                    .strip_prefix('<')
                    .and_then(|t| t.strip_suffix('>'))
                    .and_then(|t| t.rsplit_once(','))
                    .ok_or_else(|| parse_error("circle"))?;
                let (x, y) = parse_point(center)?;
                PgValue::Circle {
                    x,
                    y,
                    radius: radius.trim().parse().map_err(|_| parse_error("circle"))?,
                }
            }
        };
        Ok(value)
    }

    fn decode_array(&self, elem_oid: u32, text: &str) -> Result<PgValue, PgSyncError> {
        let items = split_array_text(text)?;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ArrayItem::Null => values.push(PgValue::Null),
                ArrayItem::Value(raw) => values.push(self.decode(elem_oid, &raw)?),
                ArrayItem::Nested(raw) => values.push(self.decode_array(elem_oid, &raw)?),
            }
        }
        Ok(PgValue::Array(values))
    }

    fn decode_composite(
        &self,
        field_oids: &[u32],
        text: &str,
    ) -> Result<PgValue, PgSyncError> {
        let raw_fields = split_record_text(text)?;
        if raw_fields.len() != field_oids.len() {
            return Err(PgSyncError::Wire(format!(
                "Record has {} fields, expected {}: {text:?}",
                raw_fields.len(),
                field_oids.len()
            )));
        }
        let mut values = Vec::with_capacity(field_oids.len());
        for (raw, oid) in raw_fields.into_iter().zip(field_oids) {
            match raw {
                None => values.push(PgValue::Null),
                Some(raw) => values.push(self.decode(*oid, &raw)?),
            }
        }
        Ok(PgValue::Composite(values))
    }

    fn decode_range(&self, subtype_oid: u32, text: &str) -> Result<PgValue, PgSyncError> {
        if text == "empty" {
            return Ok(PgValue::Range(PgRange {
                lower: None,
                upper: None,
                lower_inclusive: false,
                upper_inclusive: false,
                empty: true,
            }));
        }
        let bytes = text.as_bytes();
        if bytes.len() < 2 {
            return Err(PgSyncError::Wire(format!("Malformed range: {text:?}")));
        }
        let lower_inclusive = bytes[0] == b'[';
        let upper_inclusive = bytes[bytes.len() - 1] == b']';
        let inner = &text[1..text.len() - 1];
        let (lower_raw, upper_raw) = split_range_bounds(inner)
            .ok_or_else(|| PgSyncError::Wire(format!("Malformed range: {text:?}")))?;
        let decode_bound = |raw: &str| -> Result<Option<Box<PgValue>>, PgSyncError> {
            if raw.is_empty() {
                return Ok(None);
            }
            let unquoted = raw.trim_matches('"');
            Ok(Some(Box::new(self.decode(subtype_oid, unquoted)?)))
        };
        Ok(PgValue::Range(PgRange {
            lower: decode_bound(lower_raw)?,
            upper: decode_bound(upper_raw)?,
            lower_inclusive,
            upper_inclusive,
            empty: false,
        }))
    }
}

fn parse_point(text: &str) -> Result<(f64, f64), PgSyncError> {
    let error = || PgSyncError::Wire(format!("Malformed point in result: {text:?}"));
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(error)?;
    let (x, y) = inner.split_once(',').ok_or_else(error)?;
    Ok((
        x.trim().parse().map_err(|_| error())?,
        y.trim().parse().map_err(|_| error())?,
    ))
}

fn parse_bytea(text: &str) -> Result<Vec<u8>, PgSyncError> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| PgSyncError::Wire(format!("Unsupported bytea encoding: {text:?}")))?;
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| PgSyncError::Wire(format!("Malformed bytea: {text:?}")))
        })
        .collect()
}

/// Parse `1 year 2 mons 3 days 04:05:06.789` style interval output.
fn parse_interval(text: &str) -> Result<PgInterval, PgSyncError> {
    let error = || PgSyncError::Wire(format!("Malformed interval in result: {text:?}"));
    let mut interval = PgInterval {
        months: 0,
        days: 0,
        micros: 0,
    };
    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            // hh:mm:ss[.frac] block, possibly negative
            let negative = token.starts_with('-');
            let clock = token.trim_start_matches('-');
            let mut parts = clock.split(':');
            let hours: i64 = parts.next().ok_or_else(error)?.parse().map_err(|_| error())?;
            let minutes: i64 = parts.next().ok_or_else(error)?.parse().map_err(|_| error())?;
            let seconds_raw = parts.next().unwrap_or("0");
            let (secs, frac) = match seconds_raw.split_once('.') {
                Some((s, f)) => (s, f),
                None => (seconds_raw, ""),
            };
            let seconds: i64 = secs.parse().map_err(|_| error())?;
            let mut micros = ((hours * 60 + minutes) * 60 + seconds) * 1_000_000;
            if !frac.is_empty() {
                let padded = format!("{frac:0<6}");
                micros += padded[..6].parse::<i64>().map_err(|_| error())?;
            }
            interval.micros = if negative { -micros } else { micros };
            continue;
        }
        let amount: i64 = token.parse().map_err(|_| error())?;
        let unit = tokens.next().ok_or_else(error)?;
        match unit.trim_end_matches('s') {
            "year" => interval.months += amount as i32 * 12,
            "mon" | "month" => interval.months += amount as i32,
            "day" => interval.days += amount as i32,
            "week" => interval.days += amount as i32 * 7,
            _ => return Err(error()),
        }
    }
    Ok(interval)
}

enum ArrayItem {
    Null,
    Value(String),
    Nested(String),
}

/// Split `{a,"b c",NULL,{1,2}}` into items, honoring quotes and nesting.
fn split_array_text(text: &str) -> Result<Vec<ArrayItem>, PgSyncError> {
    let error = || PgSyncError::Wire(format!("Malformed array in result: {text:?}"));
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(error)?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut depth = 0usize;
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' if depth == 0 => {
                quoted = !quoted;
                was_quoted = true;
            }
            '\\' if quoted => {
                current.push(chars.next().ok_or_else(error)?);
            }
            '{' if !quoted => {
                depth += 1;
                current.push(c);
            }
            '}' if !quoted => {
                depth = depth.checked_sub(1).ok_or_else(error)?;
                current.push(c);
            }
            ',' if !quoted && depth == 0 => {
                items.push(take_array_item(&mut current, &mut was_quoted));
            }
            _ => current.push(c),
        }
    }
    items.push(take_array_item(&mut current, &mut was_quoted));
    Ok(items)
}

fn take_array_item(current: &mut String, was_quoted: &mut bool) -> ArrayItem {
    let raw = std::mem::take(current);
    let quoted = std::mem::take(was_quoted);
    if !quoted && raw == "NULL" {
        ArrayItem::Null
    } else if !quoted && raw.starts_with('{') {
        ArrayItem::Nested(raw)
    } else {
        ArrayItem::Value(raw)
    }
}

/// Split a `(f1,"f 2",,...)` record literal into per-field raw text.
/// An empty unquoted field is NULL; quoted fields honor `""` and backslash
/// escapes. Nested records arrive quoted, so their text recurses through
/// [TextDecoders::decode] with the field's own OID.
fn split_record_text(text: &str) -> Result<Vec<Option<String>>, PgSyncError> {
    let error = || PgSyncError::Wire(format!("Malformed record in result: {text:?}"));
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(error)?;
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' => {
                quoted = true;
                was_quoted = true;
            }
            '\\' if quoted => {
                current.push(chars.next().ok_or_else(error)?);
            }
            ',' if !quoted => {
                fields.push(take_record_field(&mut current, &mut was_quoted));
            }
            _ => current.push(c),
        }
    }
    fields.push(take_record_field(&mut current, &mut was_quoted));
    Ok(fields)
}

fn take_record_field(current: &mut String, was_quoted: &mut bool) -> Option<String> {
    let raw = std::mem::take(current);
    let quoted = std::mem::take(was_quoted);
    if !quoted && raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

fn split_range_bounds(inner: &str) -> Option<(&str, &str)> {
    let mut quoted = false;
    for (i, c) in inner.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => return Some((&inner[..i], &inner[i + 1..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::{oid, PgValue, TextDecoders};

    #[test]
    fn decode_should_cover_scalar_types() {
        let decoders = TextDecoders::with_builtins();
        assert_eq!(
            PgValue::Bool(true),
            decoders.decode(oid::BOOL, "t").unwrap()
        );
        assert_eq!(
            PgValue::Int8(-42),
            decoders.decode(oid::INT8, "-42").unwrap()
        );
        assert_eq!(
            PgValue::Float8(1.5),
            decoders.decode(oid::FLOAT8, "1.5").unwrap()
        );
        assert_eq!(
            PgValue::Text("0f0a".to_string()),
            decoders.decode(oid::UUID, "0f0a").unwrap()
        );
        assert_eq!(
            PgValue::Bytea(vec![0xde, 0xad]),
            decoders.decode(oid::BYTEA, "\\xdead").unwrap()
        );
    }

    #[test]
    fn decode_unknown_oid_should_return_raw_text() {
        let decoders = TextDecoders::with_builtins();
        assert_eq!(
            PgValue::Text("whatever".to_string()),
            decoders.decode(987654, "whatever").unwrap()
        );
    }

    #[test]
    fn decode_timestamp_should_parse_fractional_seconds() {
        let decoders = TextDecoders::with_builtins();
        let PgValue::Timestamp(ts) = decoders
            .decode(oid::TIMESTAMP, "2024-03-01 10:20:30.5")
            .unwrap()
        else {
            panic!("not a timestamp");
        };
        assert_eq!("2024-03-01 10:20:30.500", ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string());
    }

    #[rstest]
    #[case("{}", 0)]
    #[case("{1,2,3}", 3)]
    #[case("{1,NULL,3}", 3)]
    fn decode_array_should_split_items(#[case] text: &str, #[case] count: usize) {
        let decoders = TextDecoders::with_builtins();
        let PgValue::Array(items) = decoders.decode(oid::INT4_ARRAY, text).unwrap() else {
            panic!("not an array");
        };
        assert_eq!(count, items.len());
    }

    #[test]
    fn decode_array_should_honor_quotes_and_nulls() {
        let decoders = TextDecoders::with_builtins();
        let PgValue::Array(items) = decoders
            .decode(oid::TEXT_ARRAY, "{\"a, b\",NULL,\"NULL\",plain}")
            .unwrap()
        else {
            panic!("not an array");
        };
        assert_eq!(
            vec![
                PgValue::Text("a, b".to_string()),
                PgValue::Null,
                PgValue::Text("NULL".to_string()),
                PgValue::Text("plain".to_string()),
            ],
            items
        );
    }

    #[test]
    fn decode_nested_array_should_recurse() {
        let decoders = TextDecoders::with_builtins();
        let PgValue::Array(items) = decoders
            .decode(oid::INT4_ARRAY, "{{1,2},{3,4}}")
            .unwrap()
        else {
            panic!("not an array");
        };
        assert_eq!(
            vec![
                PgValue::Array(vec![PgValue::Int4(1), PgValue::Int4(2)]),
                PgValue::Array(vec![PgValue::Int4(3), PgValue::Int4(4)]),
            ],
            items
        );
    }

    #[test]
    fn decode_interval_should_combine_units() {
        let decoders = TextDecoders::with_builtins();
        let PgValue::Interval(interval) = decoders
            .decode(oid::INTERVAL, "1 year 2 mons 3 days 04:05:06.5")
            .unwrap()
        else {
            panic!("not an interval");
        };
        assert_eq!(14, interval.months);
        assert_eq!(3, interval.days);
        assert_eq!((4 * 3600 + 5 * 60 + 6) * 1_000_000 + 500_000, interval.micros);
    }

    #[test]
    fn decode_registered_composite_should_yield_structured_fields() {
        let mut decoders = TextDecoders::with_builtins();
        decoders.register_composite(16410, vec![oid::INT4, oid::TEXT]);
        let PgValue::Composite(fields) = decoders
            .decode(16410, "(7,\"a, \"\"quoted\"\" b\")")
            .unwrap()
        else {
            panic!("not a composite");
        };
        assert_eq!(
            vec![
                PgValue::Int4(7),
                PgValue::Text("a, \"quoted\" b".to_string()),
            ],
            fields
        );
    }

    #[test]
    fn decode_composite_should_treat_empty_fields_as_null() {
        let mut decoders = TextDecoders::with_builtins();
        decoders.register_composite(16410, vec![oid::INT4, oid::TEXT]);
        let PgValue::Composite(fields) = decoders.decode(16410, "(,hi)").unwrap() else {
            panic!("not a composite");
        };
        assert_eq!(vec![PgValue::Null, PgValue::Text("hi".to_string())], fields);
    }

    #[test]
    fn decode_nested_composite_should_recurse_through_field_oids() {
        let mut decoders = TextDecoders::with_builtins();
        decoders.register_composite(16410, vec![oid::INT4, oid::TEXT]);
        decoders.register_composite(16420, vec![16410, oid::BOOL]);
        let PgValue::Composite(fields) = decoders
            .decode(16420, "(\"(1,x)\",t)")
            .unwrap()
        else {
            panic!("not a composite");
        };
        assert_eq!(
            vec![
                PgValue::Composite(vec![PgValue::Int4(1), PgValue::Text("x".to_string())]),
                PgValue::Bool(true),
            ],
            fields
        );
    }

    #[test]
    fn decode_composite_array_should_combine_registries() {
        let mut decoders = TextDecoders::with_builtins();
        decoders.register_composite(16410, vec![oid::INT4, oid::TEXT]);
        decoders.register_array(16411, 16410);
        let PgValue::Array(items) = decoders
            .decode(16411, "{\"(1,a)\",\"(2,b)\"}")
            .unwrap()
        else {
            panic!("not an array");
        };
        assert_eq!(2, items.len());
        assert!(matches!(&items[0], PgValue::Composite(fields) if fields.len() == 2));
    }

    #[test]
    fn decode_range_should_expose_bounds() {
        let decoders = TextDecoders::with_builtins();
        let PgValue::Range(range) = decoders.decode(oid::INT4_RANGE, "[1,10)").unwrap() else {
            panic!("not a range");
        };
        assert!(range.lower_inclusive);
        assert!(!range.upper_inclusive);
        assert_eq!(Some(Box::new(PgValue::Int4(1))), range.lower);
        assert_eq!(Some(Box::new(PgValue::Int4(10))), range.upper);

        let PgValue::Range(range) = decoders.decode(oid::INT4_RANGE, "empty").unwrap() else {
            panic!("not a range");
        };
        assert!(range.empty);
    }
}
