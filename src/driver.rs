//! Migration driver: runs the topologically ordered statement set with
//! bounded concurrency. Each statement waits for its dependencies'
//! completion signals, asks the diff engine for a plan, applies it, then
//! signals its own dependents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_regex::{lazy_regex, Lazy, Regex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cancel::{AbortHandle, AbortSignal};
use crate::diff::DiffEngine;
use crate::error::PgSyncError;
use crate::ident::SqlId;
use crate::linker::TopologicalSet;
use crate::parser::{Statement, StatementKind};
use crate::wire::{ConnectionPool, QueryOptions, QueryType};

static LINE_PREFIX: Lazy<Regex> = lazy_regex!(r"^LINE \d+:\s*");

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Directory receiving the numbered per-statement schema files.
    pub schema_dir: PathBuf,
    pub abort: Option<AbortSignal>,
}

#[derive(Debug, Default, PartialEq)]
pub struct MigrationReport {
    /// Number of SQL statements actually sent to the server.
    pub applied: usize,
    /// Statements that needed no change.
    pub unchanged: usize,
}

/// Apply the ordered statement set against the database behind `pool`.
/// A single failure aborts every in-flight statement and surfaces the
/// formatted error; completed creations stay in place (DDL here is not
/// wrapped in a transaction).
pub async fn run_migration(
    pool: &ConnectionPool,
    engine: Arc<Mutex<DiffEngine>>,
    set: TopologicalSet,
    options: &MigrationOptions,
) -> Result<MigrationReport, PgSyncError> {
    prepare_schema_dir(&options.schema_dir).await?;

    let statements: Arc<Vec<Statement>> = Arc::new(set.into_statements());
    let index: HashMap<SqlId, usize> = statements
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.clone(), i))
        .collect();

    // One readiness channel per statement; `Some(true)` releases dependents,
    // `Some(false)` poisons them.
    let mut senders = Vec::with_capacity(statements.len());
    let mut receivers = Vec::with_capacity(statements.len());
    for _ in statements.iter() {
        let (tx, rx) = watch::channel(None::<bool>);
        senders.push(tx);
        receivers.push(rx);
    }

    let (internal_abort, internal_signal) = AbortHandle::new();
    let internal_abort = Arc::new(internal_abort);
    if let Some(mut caller_signal) = options.abort.clone() {
        let forward = internal_abort.clone();
        tokio::spawn(async move {
            caller_signal.aborted().await;
            forward.abort();
        });
    }

    let mut tasks: JoinSet<Result<usize, PgSyncError>> = JoinSet::new();
    let mut senders: Vec<Option<watch::Sender<Option<bool>>>> =
        senders.into_iter().map(Some).collect();
    for (i, statement) in statements.iter().enumerate() {
        let dep_receivers: Vec<watch::Receiver<Option<bool>>> = statement
            .deps_out
            .iter()
            .filter_map(|dep| index.get(dep).map(|j| receivers[*j].clone()))
            .collect();
        let own_sender = senders[i].take().ok_or_else(|| {
            PgSyncError::General("Statement scheduled twice".to_string())
        })?;
        let statements = statements.clone();
        let pool = pool.clone();
        let engine = engine.clone();
        let schema_dir = options.schema_dir.clone();
        let abort = internal_signal.clone();
        tasks.spawn(apply_statement(
            statements,
            i,
            dep_receivers,
            own_sender,
            pool,
            engine,
            schema_dir,
            abort,
        ));
    }

    let mut report = MigrationReport::default();
    let mut first_error: Option<PgSyncError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(applied)) => {
                report.applied += applied;
                if applied == 0 {
                    report.unchanged += 1;
                }
            }
            Ok(Err(error)) => {
                internal_abort.abort();
                first_error.get_or_insert(error);
            }
            Err(join_error) => {
                internal_abort.abort();
                first_error.get_or_insert(PgSyncError::General(format!(
                    "Migration task panicked: {join_error}"
                )));
            }
        }
    }
    if let Some(error) = first_error {
        return Err(error);
    }

    // Routines and declared casts are settled; sweep casts that no source
    // file declares any more.
    let declared: Vec<&Statement> = statements
        .iter()
        .filter(|s| matches!(s.kind, StatementKind::Cast { .. }))
        .collect();
    let orphan_drops = engine.lock().await.orphan_cast_drops(&declared);
    if !orphan_drops.is_empty() {
        let mut conn = pool.acquire().await?;
        for template in orphan_drops {
            conn.query(QueryType::Void, &template, QueryOptions::default())
                .await?;
            report.applied += 1;
        }
    }

    info!(
        applied = report.applied,
        unchanged = report.unchanged,
        "migration complete"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn apply_statement(
    statements: Arc<Vec<Statement>>,
    index: usize,
    mut dep_receivers: Vec<watch::Receiver<Option<bool>>>,
    own_sender: watch::Sender<Option<bool>>,
    pool: ConnectionPool,
    engine: Arc<Mutex<DiffEngine>>,
    schema_dir: PathBuf,
    mut abort: AbortSignal,
) -> Result<usize, PgSyncError> {
    let statement = &statements[index];

    for receiver in &mut dep_receivers {
        let outcome = loop {
            if let Some(outcome) = *receiver.borrow_and_update() {
                break outcome;
            }
            tokio::select! {
                _ = abort.aborted() => {
                    let _ = own_sender.send(Some(false));
                    return Err(PgSyncError::Aborted);
                }
                changed = receiver.changed() => {
                    if changed.is_err() {
                        let _ = own_sender.send(Some(false));
                        return Err(PgSyncError::Aborted);
                    }
                }
            }
        };
        if !outcome {
            // A dependency failed or was skipped; propagate silently, the
            // originating statement carries the error.
            let _ = own_sender.send(Some(false));
            return Ok(0);
        }
    }
    if abort.is_aborted() {
        let _ = own_sender.send(Some(false));
        return Err(PgSyncError::Aborted);
    }

    let result = plan_and_apply(statement, &pool, &engine, &abort).await;
    match result {
        Ok(applied) => {
            if let Err(error) = write_schema_file(&schema_dir, index, statement).await {
                let _ = own_sender.send(Some(false));
                return Err(error);
            }
            let _ = own_sender.send(Some(true));
            Ok(applied)
        }
        Err(error) => {
            let _ = own_sender.send(Some(false));
            Err(format_apply_error(statement, error))
        }
    }
}

async fn plan_and_apply(
    statement: &Statement,
    pool: &ConnectionPool,
    engine: &Arc<Mutex<DiffEngine>>,
    abort: &AbortSignal,
) -> Result<usize, PgSyncError> {
    let mut conn = pool.acquire().await?;
    let plan = {
        let mut engine = engine.lock().await;
        engine.plan(&mut conn, statement).await?
    };
    if plan.is_empty() {
        debug!(object = %statement.id, "unchanged");
        return Ok(0);
    }
    let applied = plan.len();
    for template in plan {
        conn.query(
            QueryType::Void,
            &template,
            QueryOptions {
                row_sink: None,
                abort: Some(abort.clone()),
            },
        )
        .await?;
    }
    Ok(applied)
}

async fn prepare_schema_dir(dir: &Path) -> Result<(), PgSyncError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().map(|e| e == "sql").unwrap_or(false) {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    tokio::fs::write(
        dir.join("../pre-plan.sql"),
        "SET check_function_bodies = off;\n",
    )
    .await?;
    Ok(())
}

/// One numbered file per statement, consumed by the external planner.
async fn write_schema_file(
    dir: &Path,
    index: usize,
    statement: &Statement,
) -> Result<(), PgSyncError> {
    let file_name = match statement.kind {
        StatementKind::Extension => {
            format!("{:03}-extension-{}.sql", index, safe_name(&statement.id.name))
        }
        _ => format!(
            "{:03}-{}-{}.sql",
            index,
            safe_name(&statement.id.schema),
            safe_name(&statement.id.name)
        ),
    };
    let source = format!(
        "-- file://{}#L{}\n{}\n",
        statement.source_file.display(),
        statement.source_line,
        statement.raw_text
    );
    tokio::fs::write(dir.join(file_name), source).await?;
    Ok(())
}

fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Attach object and source context to a failed apply. The server message
/// loses its `ERROR:` and `LINE N:` prefixes; the source frame points at
/// the failing line computed from the statement position.
fn format_apply_error(statement: &Statement, error: PgSyncError) -> PgSyncError {
    let PgSyncError::Server(server) = error else {
        return error;
    };
    let mut message = server.message.trim().to_string();
    if let Some(stripped) = message.strip_prefix("ERROR:") {
        message = stripped.trim_start().to_string();
    }
    message = LINE_PREFIX.replace(&message, "").into_owned();

    let mut line = statement.source_line;
    if let Some(position) = server.position {
        let offset = position.saturating_sub(1).min(statement.raw_text.len());
        line += statement.raw_text[..offset].matches('\n').count();
    }
    PgSyncError::Apply {
        kind: statement.kind_name().to_string(),
        name: statement.id.clone(),
        message,
        location: format!(" ({}:{line})", statement.source_file.display()),
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use crate::error::{PgSyncError, ServerError};
    use crate::ident::SqlId;
    use crate::parser::{Statement, StatementKind};

    use super::format_apply_error;

    fn statement() -> Statement {
        Statement::new(
            StatementKind::Table {
                columns: Vec::new(),
                primary_key: Vec::new(),
            },
            SqlId::new("public", "users"),
            "CREATE TABLE users (\n  id int,\n  broken xyz\n);".to_string(),
            PathBuf::from("sql/users.pgsql"),
            10,
        )
    }

    #[test]
    fn apply_error_should_strip_prefixes_and_point_at_the_source() {
        let error = PgSyncError::Server(ServerError {
            severity: "ERROR".to_string(),
            sqlstate: "42704".to_string(),
            message: "ERROR: type \"xyz\" does not exist".to_string(),
            detail: None,
            hint: None,
            position: Some(34),
        });
        let formatted = format_apply_error(&statement(), error);
        let PgSyncError::Apply {
            kind,
            name,
            message,
            location,
        } = formatted
        else {
            panic!("expected an apply error");
        };
        assert_eq!("table", kind);
        assert_eq!(SqlId::new("public", "users"), name);
        assert_eq!("type \"xyz\" does not exist", message);
        assert!(location.contains("sql/users.pgsql:12"), "got {location}");
    }

    #[test]
    fn non_server_errors_should_pass_through() {
        let error = format_apply_error(&statement(), PgSyncError::Aborted);
        assert!(matches!(error, PgSyncError::Aborted));
    }
}
