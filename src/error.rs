use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::ident::SqlId;

/// Fields of a server `ErrorResponse`, kept verbatim so callers can surface
/// severity, sqlstate, detail, hint and statement position to the developer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerError {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based character offset into the failing statement, when the server
    /// reports one.
    pub position: Option<usize>,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

#[derive(Debug, ThisError)]
pub enum PgSyncError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
    #[error("{0}")]
    General(String),
    #[error("Wire protocol failure: {0}")]
    Wire(String),
    #[error("{0} is not supported by the wire client")]
    Unsupported(String),
    #[error("Query was aborted")]
    Aborted,
    #[error("{0}")]
    Server(ServerError),
    #[error("Parse error in {path}:{line}:{column}\n{frame}")]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        frame: String,
    },
    #[error("Dependency cycle detected involving {0}")]
    DependencyCycle(SqlId),
    #[error("Failed to apply {kind} {name}: {message}{location}")]
    Apply {
        kind: String,
        name: SqlId,
        message: String,
        location: String,
    },
    #[error("Migration plan refused due to hazards: {}", .0.join(", "))]
    Hazards(Vec<String>),
    #[error("Planner exited with status {status}: {message}")]
    Planner { status: i32, message: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Parse error for {object_name}. {error}")]
    PgQuery {
        object_name: SqlId,
        error: pg_query::Error,
    },
}

impl PgSyncError {
    /// Stable machine-readable code for each error kind.
    pub fn code(&self) -> &'static str {
        match self {
            PgSyncError::IO(_) => "IO_ERROR",
            PgSyncError::Fmt(_) => "FMT_ERROR",
            PgSyncError::General(_) => "GENERAL_ERROR",
            PgSyncError::Wire(_) | PgSyncError::Unsupported(_) => "PG_NATIVE_ERROR",
            PgSyncError::Aborted => "ABORTED",
            PgSyncError::Server(_) => "PG_RESULT_ERROR",
            PgSyncError::Parse { .. } | PgSyncError::PgQuery { .. } => "PARSE_ERROR",
            PgSyncError::DependencyCycle(_) => "DEPENDENCY_CYCLE",
            PgSyncError::Apply { .. } => "MIGRATION_ERROR",
            PgSyncError::Hazards(_) => "MIGRATION_HAZARDS",
            PgSyncError::Planner { .. } => "PLANNER_ERROR",
            PgSyncError::Config(_) => "CONFIG_ERROR",
        }
    }
}
