//! SQL source discovery: walk the project tree and keep the files matching
//! the configured include/exclude globs.

use std::path::{Path, PathBuf};

use async_walkdir::WalkDir;
use futures::StreamExt;
use glob::Pattern;

use crate::error::PgSyncError;

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, PgSyncError> {
    patterns
        .iter()
        .map(|raw| {
            Pattern::new(raw).map_err(|error| {
                PgSyncError::Config(format!("Invalid glob pattern {raw:?}: {error}"))
            })
        })
        .collect()
}

pub async fn discover_sql_files(
    root: &Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>, PgSyncError> {
    let include = compile(include)?;
    let exclude = compile(exclude)?;

    let mut files = Vec::new();
    let mut entries = WalkDir::new(root);
    while let Some(entry) = entries.next().await {
        let entry = entry.map_err(|error| {
            PgSyncError::General(format!("Could not walk {}: {error}", root.display()))
        })?;
        let file_type = entry.file_type().await.map_err(|error| {
            PgSyncError::General(format!("Could not stat {}: {error}", entry.path().display()))
        })?;
        if !file_type.is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let candidate = relative.to_string_lossy().replace('\\', "/");
        if include.iter().any(|p| p.matches(&candidate))
            && !exclude.iter().any(|p| p.matches(&candidate))
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod test {
    use super::discover_sql_files;

    #[tokio::test]
    async fn discovery_should_honor_globs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sql/nested")).unwrap();
        std::fs::write(root.join("sql/a.pgsql"), "SELECT 1;").unwrap();
        std::fs::write(root.join("sql/nested/b.pgsql"), "SELECT 2;").unwrap();
        std::fs::write(root.join("sql/ignored.sql"), "SELECT 3;").unwrap();
        std::fs::write(root.join("sql/skip.pgsql"), "SELECT 4;").unwrap();

        let files = discover_sql_files(
            root,
            &["**/*.pgsql".to_string()],
            &["**/skip.pgsql".to_string()],
        )
        .await
        .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(vec!["a.pgsql", "b.pgsql"], names);
    }
}
