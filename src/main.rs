use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pgsync::config::Config;
use pgsync::error::PgSyncError;
use pgsync::pipeline::Pipeline;

#[derive(Debug, Parser)]
#[command(
    version = "0.1.0",
    about = "PostgreSQL schema synchronization and typed binding generation",
    long_about = None
)]
struct Args {
    /// Configuration file path.
    #[arg(short, long, default_value = "pgsync.toml", global = true)]
    config: PathBuf,
    /// Override the target connection string.
    #[arg(long, global = true)]
    connection: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(
        about = "Reconcile the database with the schema sources, run the planner, and emit bindings",
        long_about = None
    )]
    Sync,
    #[command(
        about = "Reconcile the schema sources and print the planner's DDL plan, without generating bindings",
        long_about = None
    )]
    Plan,
    #[command(
        about = "Introspect the database and emit typed bindings without reconciling",
        long_about = None
    )]
    Generate,
}

#[tokio::main]
async fn main() -> Result<(), PgSyncError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else if args.connection.is_some() {
        // A connection flag alone is enough to run with defaults.
        toml::from_str("").map_err(|error| PgSyncError::Config(error.to_string()))?
    } else {
        return Err(PgSyncError::Config(format!(
            "{} not found and no --connection given",
            args.config.display()
        )));
    };
    if let Some(connection) = args.connection {
        config.dev.connection_string = Some(connection);
    }
    let project_root = args
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let pipeline = Pipeline::new(config, project_root);

    match args.command {
        Commands::Sync => {
            let report = pipeline.sync().await?;
            println!(
                "Synced {} statements ({} applied, {} unchanged).",
                report.statements, report.migration.applied, report.migration.unchanged
            );
            if report.plan.empty {
                println!("Planner: no plan generated.");
            } else {
                for command in report.plan.commands() {
                    println!("plan> {command}");
                }
            }
            println!("Bindings written to {}.", report.bindings_path.display());
        }
        Commands::Plan => {
            let report = pipeline.plan().await?;
            println!(
                "Reconciled {} statements ({} applied, {} unchanged).",
                report.statements, report.migration.applied, report.migration.unchanged
            );
            if report.plan.empty {
                println!("Planner: no plan generated.");
            } else {
                for command in report.plan.commands() {
                    println!("plan> {command}");
                }
            }
        }
        Commands::Generate => {
            let path = pipeline.generate().await?;
            println!("Bindings written to {}.", path.display());
        }
    }
    Ok(())
}
