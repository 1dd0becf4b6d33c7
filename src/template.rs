use std::fmt::Write as _;

use crate::error::PgSyncError;
use crate::ident::{quote_ident, SqlId};

/// A raw value carried by a literal token.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl LiteralValue {
    /// The wire representation pushed into a query's parameter list. `NULL`
    /// becomes an absent parameter.
    pub fn to_param_text(&self) -> Option<String> {
        match self {
            LiteralValue::Null => None,
            LiteralValue::Bool(b) => Some(if *b { "t".to_string() } else { "f".to_string() }),
            LiteralValue::Int(i) => Some(i.to_string()),
            LiteralValue::Float(f) => Some(f.to_string()),
            LiteralValue::Text(s) => Some(s.clone()),
        }
    }

    fn render_inline(&self, out: &mut String) {
        match self {
            LiteralValue::Null => out.push_str("NULL"),
            LiteralValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            LiteralValue::Int(i) => {
                let _ = write!(out, "{i}");
            }
            LiteralValue::Float(f) => {
                let _ = write!(out, "{f}");
            }
            LiteralValue::Text(s) => {
                out.push('\'');
                for c in s.chars() {
                    if c == '\'' {
                        out.push('\'');
                    }
                    out.push(c);
                }
                out.push('\'');
            }
        }
    }
}

impl From<&str> for LiteralValue {
    fn from(value: &str) -> Self {
        LiteralValue::Text(value.to_string())
    }
}

impl From<String> for LiteralValue {
    fn from(value: String) -> Self {
        LiteralValue::Text(value)
    }
}

impl From<i32> for LiteralValue {
    fn from(value: i32) -> Self {
        LiteralValue::Int(value as i64)
    }
}

impl From<i64> for LiteralValue {
    fn from(value: i64) -> Self {
        LiteralValue::Int(value)
    }
}

impl From<f64> for LiteralValue {
    fn from(value: f64) -> Self {
        LiteralValue::Float(value)
    }
}

impl From<bool> for LiteralValue {
    fn from(value: bool) -> Self {
        LiteralValue::Bool(value)
    }
}

impl<T: Into<LiteralValue>> From<Option<T>> for LiteralValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => LiteralValue::Null,
        }
    }
}

/// A value interpolated into a template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Template(Template),
    /// One or more identifiers joined by `.`, each escaped on render.
    Id(Vec<String>),
    Literal {
        value: LiteralValue,
        inline: bool,
    },
    Join {
        items: Vec<TemplateValue>,
        separator: Box<TemplateValue>,
    },
    /// Verbatim text, for keyword splicing only.
    Unsafe(String),
    /// A sequence of values rendered as plain concatenation.
    Seq(Vec<TemplateValue>),
    Empty,
}

impl From<Template> for TemplateValue {
    fn from(value: Template) -> Self {
        TemplateValue::Template(value)
    }
}

impl From<&SqlId> for TemplateValue {
    fn from(value: &SqlId) -> Self {
        TemplateValue::Id(vec![value.schema.clone(), value.name.clone()])
    }
}

impl From<SqlId> for TemplateValue {
    fn from(value: SqlId) -> Self {
        TemplateValue::Id(vec![value.schema, value.name])
    }
}

/// Dotted identifier token.
pub fn id<I, S>(parts: I) -> TemplateValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    TemplateValue::Id(parts.into_iter().map(Into::into).collect())
}

/// Inline quoted literal.
pub fn val(value: impl Into<LiteralValue>) -> TemplateValue {
    TemplateValue::Literal {
        value: value.into(),
        inline: true,
    }
}

/// Positional (`$N`) parameter literal.
pub fn param(value: impl Into<LiteralValue>) -> TemplateValue {
    TemplateValue::Literal {
        value: value.into(),
        inline: false,
    }
}

/// Join a list of values with a separator.
pub fn join(separator: &str, items: Vec<TemplateValue>) -> TemplateValue {
    TemplateValue::Join {
        items,
        separator: Box::new(TemplateValue::Unsafe(separator.to_string())),
    }
}

/// Verbatim keyword splice.
pub fn unsafe_kw(text: impl Into<String>) -> TemplateValue {
    TemplateValue::Unsafe(text.into())
}

/// Parenthesized comma join.
pub fn list(items: Vec<TemplateValue>) -> TemplateValue {
    TemplateValue::Seq(vec![
        TemplateValue::Unsafe("(".to_string()),
        join(", ", items),
        TemplateValue::Unsafe(")".to_string()),
    ])
}

/// Intermediate piece used by the `sql!` macro.
#[derive(Debug)]
pub enum Part {
    Text(String),
    Value(TemplateValue),
}

/// A parameterized SQL fragment: literal segments interleaved with
/// interpolated values, `segments.len() == values.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<String>,
    values: Vec<TemplateValue>,
}

/// Rendered SQL plus the ordered positional parameters captured on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl Template {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            segments: vec![sql.into()],
            values: Vec::new(),
        }
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        let mut segments = vec![String::new()];
        let mut values = Vec::new();
        for part in parts {
            match part {
                Part::Text(text) => {
                    segments
                        .last_mut()
                        .map(|s| s.push_str(&text))
                        .unwrap_or_default();
                }
                Part::Value(value) => {
                    values.push(value);
                    segments.push(String::new());
                }
            }
        }
        Self { segments, values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.segments.iter().all(|s| s.trim().is_empty())
    }

    /// The trailing run of spaces on the line preceding the first
    /// substitution, used by the re-indentation heuristic.
    fn captured_indent(&self) -> Option<String> {
        if self.values.is_empty() {
            return None;
        }
        let first = self.segments.first()?;
        let tail = match first.rfind('\n') {
            Some(pos) => &first[pos + 1..],
            None => first.as_str(),
        };
        tail.chars()
            .all(|c| c == ' ')
            .then(|| tail.to_string())
    }

    /// Render without capturing parameters; every literal is inlined.
    pub fn render_inline(&self) -> Result<String, PgSyncError> {
        let mut out = String::new();
        self.render_into(&mut out, &mut None, true)?;
        Ok(out)
    }

    /// Render for query execution: non-inline literals allocate `$N`
    /// placeholders in order, nested templates share the same list.
    pub fn render(&self) -> Result<Rendered, PgSyncError> {
        let mut out = String::new();
        let mut params = Some(Vec::new());
        self.render_into(&mut out, &mut params, true)?;
        Ok(Rendered {
            sql: out,
            params: params.unwrap_or_default(),
        })
    }

    fn render_into(
        &self,
        out: &mut String,
        params: &mut Option<Vec<Option<String>>>,
        reindent: bool,
    ) -> Result<(), PgSyncError> {
        for (i, segment) in self.segments.iter().enumerate() {
            out.push_str(segment);
            if let Some(value) = self.values.get(i) {
                render_value(value, out, params, reindent)?;
            }
        }
        Ok(())
    }
}

fn render_value(
    value: &TemplateValue,
    out: &mut String,
    params: &mut Option<Vec<Option<String>>>,
    reindent: bool,
) -> Result<(), PgSyncError> {
    match value {
        TemplateValue::Empty => {}
        TemplateValue::Unsafe(text) => out.push_str(text),
        TemplateValue::Id(parts) => {
            if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
                return Err(PgSyncError::General(
                    "Cannot render an empty identifier".to_string(),
                ));
            }
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(&quote_ident(part));
            }
        }
        TemplateValue::Literal { value, inline } => match params {
            Some(captured) if !*inline => {
                captured.push(value.to_param_text());
                let _ = write!(out, "${}", captured.len());
            }
            _ => value.render_inline(out),
        },
        TemplateValue::Join { items, separator } => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    render_value(separator, out, params, reindent)?;
                }
                render_value(item, out, params, reindent)?;
            }
        }
        TemplateValue::Seq(items) => {
            for item in items {
                render_value(item, out, params, reindent)?;
            }
        }
        TemplateValue::Template(template) => {
            let insertion_indent = current_indent(out);
            let child_indent = template.captured_indent();
            let needs_reindent = reindent
                && child_indent.is_some()
                && child_indent.as_deref() != Some(insertion_indent.as_str());
            if !needs_reindent {
                template.render_into(out, params, reindent)?;
                return Ok(());
            }
            let mut child = String::new();
            template.render_into(&mut child, params, reindent)?;
            out.push_str(&reindent_block(
                &child,
                child_indent.as_deref().unwrap_or(""),
                &insertion_indent,
            ));
        }
    }
    Ok(())
}

/// The run of spaces at the insertion point, i.e. after the last newline of
/// what has been rendered so far.
fn current_indent(out: &str) -> String {
    let tail = match out.rfind('\n') {
        Some(pos) => &out[pos + 1..],
        None => out,
    };
    if tail.chars().all(|c| c == ' ') {
        tail.to_string()
    } else {
        String::new()
    }
}

/// Strip leading empty lines, then swap the child's own indentation for the
/// parent's on every line after the first.
fn reindent_block(block: &str, child_indent: &str, parent_indent: &str) -> String {
    let trimmed = block.trim_start_matches(|c| c == '\n' || c == '\r');
    let mut result = String::with_capacity(trimmed.len());
    for (i, line) in trimmed.split('\n').enumerate() {
        if i > 0 {
            result.push('\n');
            if line.trim().is_empty() {
                continue;
            }
            result.push_str(parent_indent);
            result.push_str(line.strip_prefix(child_indent).unwrap_or(line));
        } else {
            result.push_str(line.strip_prefix(child_indent).unwrap_or(line));
        }
    }
    result
}

/// Build a [Template] from alternating string literals and `{value}` groups.
#[macro_export]
macro_rules! sql {
    ($($part:tt)*) => {{
        let mut parts: Vec<$crate::template::Part> = Vec::new();
        $crate::sql_parts!(parts; $($part)*);
        $crate::template::Template::from_parts(parts)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! sql_parts {
    ($parts:ident;) => {};
    ($parts:ident; $lit:literal $($rest:tt)*) => {
        $parts.push($crate::template::Part::Text($lit.to_string()));
        $crate::sql_parts!($parts; $($rest)*);
    };
    ($parts:ident; {$value:expr} $($rest:tt)*) => {
        $parts.push($crate::template::Part::Value(($value).into()));
        $crate::sql_parts!($parts; $($rest)*);
    };
}

#[cfg(test)]
mod test {
    use super::{id, join, list, param, unsafe_kw, val, Template, TemplateValue};
    use crate::ident::SqlId;

    #[test]
    fn render_should_allocate_positional_params_in_order() {
        let template = sql!(
            "INSERT INTO " {&SqlId::new("public", "users")} " (name, age) VALUES ("
            {param("alice")} ", " {param(42)} ")"
        );
        let rendered = template.render().unwrap();
        assert_eq!(
            "INSERT INTO public.users (name, age) VALUES ($1, $2)",
            rendered.sql
        );
        assert_eq!(
            vec![Some("alice".to_string()), Some("42".to_string())],
            rendered.params
        );
    }

    #[test]
    fn render_inline_should_quote_literals() {
        let template = sql!("SELECT " {val("it's")} ", " {val(1)} ", " {val(Option::<i32>::None)});
        assert_eq!("SELECT 'it''s', 1, NULL", template.render_inline().unwrap());
    }

    #[test]
    fn nested_templates_should_share_the_parameter_list() {
        let inner = sql!("age > " {param(18)});
        let template = sql!("SELECT * FROM t WHERE " {inner} " AND name = " {param("bob")});
        let rendered = template.render().unwrap();
        assert_eq!("SELECT * FROM t WHERE age > $1 AND name = $2", rendered.sql);
        assert_eq!(2, rendered.params.len());
    }

    #[test]
    fn join_with_no_items_should_render_empty() {
        let template = sql!("SELECT " {join(", ", vec![])} "1");
        assert_eq!("SELECT 1", template.render_inline().unwrap());
    }

    #[test]
    fn seq_should_concatenate_without_separator() {
        let template = sql!({TemplateValue::Seq(vec![unsafe_kw("a"), unsafe_kw("b")])});
        assert_eq!("ab", template.render_inline().unwrap());
    }

    #[test]
    fn list_should_render_parenthesized_join() {
        let template = sql!("VALUES " {list(vec![val(1), val(2)])});
        assert_eq!("VALUES (1, 2)", template.render_inline().unwrap());
    }

    #[test]
    fn id_should_escape_each_part() {
        let template = sql!("DROP TABLE " {id(["My Schema", "users"])});
        assert_eq!(
            "DROP TABLE \"My Schema\".users",
            template.render_inline().unwrap()
        );
    }

    #[test]
    fn reindent_should_align_nested_blocks_to_the_parent() {
        let inner = Template::from_parts(vec![
            super::Part::Text("\n\nSELECT 1\n  FROM t\n".to_string()),
            super::Part::Value(unsafe_kw("")),
        ]);
        let outer = sql!("DO $$\n    " {inner} "$$");
        let rendered = outer.render_inline().unwrap();
        assert_eq!("DO $$\n    SELECT 1\n      FROM t\n$$", rendered);
    }

    #[test]
    fn empty_template_should_report_empty() {
        assert!(Template::raw("  \n ").is_empty());
        assert!(!sql!("SELECT 1").is_empty());
    }
}
