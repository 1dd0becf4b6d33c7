//! End-to-end orchestration: discover and parse SQL sources, expand plugin
//! output, link, reconcile against the live database, invoke the external
//! planner, re-introspect, and emit bindings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cancel::AbortSignal;
use crate::config::Config;
use crate::diff::DiffEngine;
use crate::driver::{run_migration, MigrationOptions, MigrationReport};
use crate::error::PgSyncError;
use crate::introspect::{get_catalog, infer_view_fields, ViewField};
use crate::linker::{link, TopologicalSet};
use crate::parser::{parse_sql, Statement};
use crate::planner::{run_planner, PlanOutput, PlannerConfig};
use crate::source::discover_sql_files;
use crate::wire::ConnectionPool;

#[derive(Debug)]
pub struct SyncReport {
    pub statements: usize,
    pub migration: MigrationReport,
    pub plan: PlanOutput,
    pub bindings_path: PathBuf,
}

/// What a `plan` run produced: the reconciliation outcome plus the external
/// planner's classified output, with no bindings generated.
#[derive(Debug)]
pub struct PlanReport {
    pub statements: usize,
    pub migration: MigrationReport,
    pub plan: PlanOutput,
}

pub struct Pipeline {
    config: Config,
    project_root: PathBuf,
    pub abort: Option<AbortSignal>,
}

impl Pipeline {
    pub fn new(config: Config, project_root: PathBuf) -> Self {
        Self {
            config,
            project_root,
            abort: None,
        }
    }

    fn schema_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.workdir).join("schema")
    }

    fn pool(&self) -> Result<ConnectionPool, PgSyncError> {
        let dsn = self.config.dsn()?;
        let session = self.config.session_params()?;
        let idle_timeout = self.config.wire.idle_timeout_ms.map(Duration::from_millis);
        Ok(ConnectionPool::with_idle_timeout(
            dsn,
            session,
            self.config.pool.size,
            idle_timeout,
        ))
    }

    /// Parse every SQL source, expand plugin SQL, and link the result.
    pub async fn load_statements(&self) -> Result<TopologicalSet, PgSyncError> {
        let mut exclude = self.config.schema.exclude.clone();
        exclude.push(format!(
            "{}/**",
            self.config.workdir.to_string_lossy().trim_start_matches("./")
        ));
        let files = discover_sql_files(
            &self.project_root,
            &self.config.schema.include,
            &exclude,
        )
        .await?;
        info!(files = files.len(), "parsing schema sources");

        let mut statements: Vec<Statement> = Vec::new();
        for path in &files {
            let source = tokio::fs::read_to_string(path).await?;
            statements.extend(parse_sql(&source, path)?);
        }

        // Plugin SQL joins the same pipeline; name collisions with user
        // statements are reported, never merged.
        if let Some(plugin_dir) = &self.config.generate.plugin_sql_dir {
            let plugin_dir = self.project_root.join(plugin_dir);
            if plugin_dir.is_dir() {
                let plugin_files = discover_sql_files(
                    &plugin_dir,
                    &["**/*.pgsql".to_string(), "**/*.sql".to_string()],
                    &[],
                )
                .await?;
                for path in &plugin_files {
                    let source = tokio::fs::read_to_string(path).await?;
                    for statement in parse_sql(&source, path)? {
                        if statements.iter().any(|s| s.id == statement.id) {
                            error!(
                                object = %statement.id,
                                plugin_file = %path.display(),
                                "plugin output collides with a user statement, skipping"
                            );
                            continue;
                        }
                        statements.push(statement);
                    }
                }
            }
        }

        link(statements)
    }

    /// Reconcile the statement set into the workdir and run the external
    /// planner over the schema files the driver wrote. Shared between
    /// `sync` and `plan`.
    async fn reconcile(
        &self,
        pool: &ConnectionPool,
    ) -> Result<(usize, MigrationReport, PlanOutput), PgSyncError> {
        let set = self.load_statements().await?;
        let statement_count = set.len();

        let catalog = {
            let mut conn = pool.acquire().await?;
            let catalog = get_catalog(&mut conn).await?;
            catalog.register_decoders(conn.decoders_mut());
            catalog
        };
        let engine = Arc::new(Mutex::new(DiffEngine::new(catalog)));

        let options = MigrationOptions {
            schema_dir: self.schema_dir(),
            abort: self.abort.clone(),
        };
        let migration = run_migration(pool, engine, set, &options).await?;

        let planner_config = PlannerConfig {
            command: self.config.planner.command.clone(),
            allow_hazards: self.config.migration.allow_hazards.clone(),
        };
        let plan = run_planner(
            &planner_config,
            &self.schema_dir(),
            &self.config.dsn()?.keyword_string(),
        )
        .await?;
        Ok((statement_count, migration, plan))
    }

    /// Reconcile, plan, and generate: the `sync` command.
    pub async fn sync(&self) -> Result<SyncReport, PgSyncError> {
        let pool = self.pool()?;
        let (statements, migration, plan) = self.reconcile(&pool).await?;
        let bindings_path = self.generate_bindings(&pool).await?;
        pool.close_all().await;
        Ok(SyncReport {
            statements,
            migration,
            plan,
            bindings_path,
        })
    }

    /// Reconcile into the workdir and run the external planner, but do not
    /// generate bindings: the `plan` command.
    pub async fn plan(&self) -> Result<PlanReport, PgSyncError> {
        let pool = self.pool()?;
        let (statements, migration, plan) = self.reconcile(&pool).await?;
        pool.close_all().await;
        Ok(PlanReport {
            statements,
            migration,
            plan,
        })
    }

    /// Introspect and emit bindings without reconciling: the `generate`
    /// command.
    pub async fn generate(&self) -> Result<PathBuf, PgSyncError> {
        let pool = self.pool()?;
        let path = self.generate_bindings(&pool).await?;
        pool.close_all().await;
        Ok(path)
    }

    async fn generate_bindings(&self, pool: &ConnectionPool) -> Result<PathBuf, PgSyncError> {
        let mut conn = pool.acquire().await?;
        let catalog = get_catalog(&mut conn).await?;
        catalog.register_decoders(conn.decoders_mut());

        let mut view_fields: HashMap<u32, Vec<ViewField>> = HashMap::new();
        for view in &catalog.views {
            match infer_view_fields(&mut conn, &catalog, &view.definition).await {
                Ok(fields) => {
                    view_fields.insert(view.oid, fields);
                }
                Err(error) => {
                    warn!(view = %view.name, %error, "could not infer view fields");
                }
            }
        }

        let output =
            crate::generate::generate_bindings(&catalog, &view_fields, &self.config.generate)?;
        let out_file = self.project_root.join(&self.config.generate.out_file);
        if let Some(parent) = out_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&out_file, output.bindings).await?;
        tokio::fs::write(type_data_path(&out_file), output.type_data).await?;
        info!(path = %out_file.display(), "bindings written");

        if let Some(script) = &self.config.generate.post_generate_script {
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(script)
                .current_dir(&self.project_root)
                .status()
                .await?;
            if !status.success() {
                return Err(PgSyncError::General(format!(
                    "post_generate_script failed with status {}",
                    status.code().unwrap_or(-1)
                )));
            }
        }
        Ok(out_file)
    }
}

fn type_data_path(out_file: &Path) -> PathBuf {
    let stem = out_file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "bindings".to_string());
    out_file.with_file_name(format!("{stem}_type_data.rs"))
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::type_data_path;

    #[test]
    fn type_data_should_sit_beside_the_bindings() {
        assert_eq!(
            Path::new("src/db/bindings_type_data.rs"),
            type_data_path(Path::new("src/db/bindings.rs"))
        );
    }
}
