//! Configuration file loading. Options are read from `pgsync.toml` at the
//! project root; every section has workable defaults so a bare
//! `dev.connection_string` is enough to start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PgSyncError;
use crate::wire::{Dsn, SessionParams};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub dev: DevConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub wire: WireConfig,
    /// Session parameters issued as `SET key TO value` on connect.
    #[serde(default)]
    pub session: BTreeMap<String, String>,
    #[serde(default)]
    pub planner: PlannerSection,
    /// Working directory for schema files and planner input.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".pgsync")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevConfig {
    pub connection_string: Option<String>,
    pub connection: Option<ConnectionParts>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParts {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
        }
    }
}

fn default_include() -> Vec<String> {
    vec!["**/*.pgsql".to_string()]
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Hazard tags passed through to the external planner.
    #[serde(default)]
    pub allow_hazards: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCase {
    #[default]
    Preserve,
    Camel,
}

/// `generate.not_null_composite_fields`: either a blanket `true` or a list
/// of `typename` / `typename.field` patterns.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NotNullFields {
    All(bool),
    Patterns(Vec<String>),
}

impl Default for NotNullFields {
    fn default() -> Self {
        NotNullFields::All(false)
    }
}

impl NotNullFields {
    pub fn applies(&self, type_name: &str, field: &str) -> bool {
        match self {
            NotNullFields::All(all) => *all,
            NotNullFields::Patterns(patterns) => patterns.iter().any(|pattern| {
                pattern == type_name || *pattern == format!("{type_name}.{field}")
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateConfig {
    #[serde(default = "default_out_file")]
    pub out_file: PathBuf,
    #[serde(default)]
    pub field_case: FieldCase,
    /// Extra SQL emitted by plugins, parsed into the same pipeline.
    pub plugin_sql_dir: Option<PathBuf>,
    #[serde(default)]
    pub not_null_composite_fields: NotNullFields,
    /// Overrides of the binding-function choice per routine, keyed by
    /// qualified-name glob.
    #[serde(default)]
    pub function_overrides: BTreeMap<String, String>,
    /// Shell command run after bindings are written.
    pub post_generate_script: Option<String>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            out_file: default_out_file(),
            field_case: FieldCase::default(),
            plugin_sql_dir: None,
            not_null_composite_fields: NotNullFields::default(),
            function_overrides: BTreeMap::new(),
            post_generate_script: None,
        }
    }
}

fn default_out_file() -> PathBuf {
    PathBuf::from("src/bindings.rs")
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
        }
    }
}

fn default_pool_size() -> usize {
    1
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireConfig {
    /// Close pooled connections after this much idleness, in milliseconds.
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannerSection {
    #[serde(default = "default_planner_command")]
    pub command: Vec<String>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            command: default_planner_command(),
        }
    }
}

fn default_planner_command() -> Vec<String> {
    vec!["pg-schema-diff".to_string(), "plan".to_string()]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, PgSyncError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            PgSyncError::Config(format!("Could not read {}: {error}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|error| {
            PgSyncError::Config(format!("Invalid {}: {error}", path.display()))
        })
    }

    /// Resolve the target database DSN from `connection_string` or the
    /// structured parts, with the string form taking precedence.
    pub fn dsn(&self) -> Result<Dsn, PgSyncError> {
        if let Some(raw) = &self.dev.connection_string {
            return Dsn::parse(raw);
        }
        let Some(parts) = &self.dev.connection else {
            return Err(PgSyncError::Config(
                "Missing dev.connection_string or dev.connection".to_string(),
            ));
        };
        let mut dsn = Dsn::default();
        if let Some(host) = &parts.host {
            dsn.host = host.clone();
        }
        if let Some(port) = parts.port {
            dsn.port = port;
        }
        if let Some(user) = &parts.user {
            dsn.user = user.clone();
        }
        if let Some(password) = &parts.password {
            dsn.password = Some(password.clone());
        }
        if let Some(dbname) = &parts.dbname {
            dsn.dbname = dbname.clone();
        }
        Ok(dsn)
    }

    /// Session parameters, with unrecognized keys rejected up front.
    pub fn session_params(&self) -> Result<SessionParams, PgSyncError> {
        let entries: Vec<(&str, &str)> = self
            .session
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (params, unrecognized) = SessionParams::from_config(entries);
        if !unrecognized.is_empty() {
            return Err(PgSyncError::Config(format!(
                "Unrecognized session parameters: {}",
                unrecognized.join(", ")
            )));
        }
        Ok(params)
    }
}

#[cfg(test)]
mod test {
    use super::{Config, FieldCase, NotNullFields};

    #[test]
    fn defaults_should_cover_every_section() {
        let config: Config = toml::from_str(
            "[dev]\nconnection_string = \"postgres://localhost/app\"\n",
        )
        .unwrap();
        assert_eq!(vec!["**/*.pgsql"], config.schema.include);
        assert_eq!(1, config.pool.size);
        assert_eq!(FieldCase::Preserve, config.generate.field_case);
        assert_eq!("app", config.dsn().unwrap().dbname);
    }

    #[test]
    fn structured_connection_should_resolve() {
        let config: Config = toml::from_str(
            "[dev.connection]\nhost = \"db\"\nuser = \"svc\"\ndbname = \"app\"\n",
        )
        .unwrap();
        let dsn = config.dsn().unwrap();
        assert_eq!("db", dsn.host);
        assert_eq!("svc", dsn.user);
        assert_eq!(5432, dsn.port);
    }

    #[test]
    fn session_aliases_should_be_accepted() {
        let config: Config = toml::from_str(
            "[dev]\nconnection_string = \"postgres://x/y\"\n[session]\ndate_style = \"ISO\"\n",
        )
        .unwrap();
        let params = config.session_params().unwrap();
        assert_eq!(vec!["SET DateStyle TO ISO;"], params.set_statements());
    }

    #[test]
    fn unknown_session_keys_should_be_rejected() {
        let config: Config = toml::from_str(
            "[dev]\nconnection_string = \"postgres://x/y\"\n[session]\nbogus = \"1\"\n",
        )
        .unwrap();
        assert!(config.session_params().is_err());
    }

    #[test]
    fn not_null_fields_should_accept_both_shapes() {
        let all: NotNullFields = toml::from_str::<toml::Value>("v = true")
            .unwrap()
            .get("v")
            .cloned()
            .unwrap()
            .try_into()
            .unwrap();
        assert!(all.applies("addr", "street"));

        let patterns = NotNullFields::Patterns(vec!["addr.zip".to_string()]);
        assert!(patterns.applies("addr", "zip"));
        assert!(!patterns.applies("addr", "street"));
    }

    #[test]
    fn field_case_should_parse_lowercase_values() {
        let config: Config = toml::from_str(
            "[dev]\nconnection_string = \"postgres://x/y\"\n[generate]\nfield_case = \"camel\"\n",
        )
        .unwrap();
        assert_eq!(FieldCase::Camel, config.generate.field_case);
    }
}
