//! SQL statement parsing: splitting source files into statement spans and
//! lifting pg_query syntax trees into typed statement records.

mod adapter;
pub mod scanner;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ident::{SqlId, TypeId};

pub use adapter::parse_sql;
pub use scanner::{split_statements, StatementSpan};

/// Identity kind of a table column. The serde aliases match the single-char
/// spellings of `pg_attribute.attidentity`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum IdentityKind {
    #[default]
    #[serde(alias = "")]
    #[strum(serialize = "")]
    None,
    #[serde(alias = "a")]
    #[strum(serialize = "ALWAYS")]
    Always,
    #[serde(alias = "d")]
    #[strum(serialize = "BY DEFAULT")]
    Default,
}

/// One column of a table, composite type, or `TABLE(...)` return clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_id: TypeId,
    pub nullable: bool,
    pub has_default: bool,
    /// Deparsed `DEFAULT` expression, when one was declared.
    pub default_expr: Option<String>,
    pub identity: IdentityKind,
    pub is_primary_key: bool,
    /// Foreign-key targets declared inline on this column.
    pub refs: Vec<SqlId>,
    pub collation: Option<SqlId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutineParam {
    pub name: Option<String>,
    pub type_id: TypeId,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnType {
    Type(TypeId),
    /// `RETURNS TABLE(...)` columns.
    Columns(Vec<ColumnDef>),
    /// Procedures and trigger functions.
    None,
}

/// Payload of a parsed statement, one variant per recognized object class.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Table {
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
    },
    Routine {
        in_params: Vec<RoutineParam>,
        /// `None` when the routine declares a plain return type instead.
        out_params: Option<Vec<ColumnDef>>,
        return_type: ReturnType,
        returns_set: bool,
        is_procedure: bool,
        default_params: usize,
    },
    CompositeType {
        columns: Vec<ColumnDef>,
    },
    EnumType {
        labels: Vec<String>,
    },
    View {
        /// References captured from the subquery, excluding catalog
        /// namespaces and the view itself.
        refs: Vec<SqlId>,
        /// The subquery text, without the `CREATE VIEW ... AS` prefix.
        body: String,
    },
    Extension,
    Cast {
        source: TypeId,
        target: TypeId,
        /// Conversion function, absent for binary-coercible casts.
        function: Option<SqlId>,
        context: CastContext,
    },
}

/// `pg_cast.castcontext` spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum CastContext {
    #[strum(serialize = "i")]
    Implicit,
    #[strum(serialize = "a")]
    Assignment,
    #[strum(serialize = "e")]
    Explicit,
}

impl StatementKind {
    /// Human-readable object class, used in error messages and file names.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StatementKind::Table { .. } => "table",
            StatementKind::Routine { is_procedure: true, .. } => "procedure",
            StatementKind::Routine { .. } => "function",
            StatementKind::CompositeType { .. } => "composite type",
            StatementKind::EnumType { .. } => "enum type",
            StatementKind::View { .. } => "view",
            StatementKind::Extension => "extension",
            StatementKind::Cast { .. } => "cast",
        }
    }
}

/// A parsed statement: payload, identity, provenance, and the dependency
/// edges the linker fills in.
#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub id: SqlId,
    pub raw_text: String,
    pub source_file: PathBuf,
    pub source_line: usize,
    /// Statements this one depends on.
    pub deps_out: Vec<SqlId>,
    /// Statements depending on this one.
    pub deps_in: Vec<SqlId>,
}

impl Statement {
    pub fn new(
        kind: StatementKind,
        id: SqlId,
        raw_text: String,
        source_file: PathBuf,
        source_line: usize,
    ) -> Self {
        Self {
            kind,
            id,
            raw_text,
            source_file,
            source_line,
            deps_out: Vec::new(),
            deps_in: Vec::new(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.kind_name()
    }
}
