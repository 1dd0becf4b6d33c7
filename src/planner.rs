//! External schema-diff planner subprocess. The planner produces the final
//! low-level DDL plan (index, trigger and sequence deltas, function-body
//! diffs) from the schema files the driver wrote. We parse its stdout line
//! by line, surface hazards, and turn stderr failures into developer-facing
//! errors with a `path:line` frame.

use std::path::Path;
use std::process::Stdio;

use lazy_regex::{lazy_regex, Lazy, Regex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::PgSyncError;

static TITLE_FENCE: Lazy<Regex> = lazy_regex!(r"^#+\s*(.*?)\s*#*$");
static HAZARD_LINE: Lazy<Regex> = lazy_regex!(r"(?i)hazards?:\s*(.+)$");
static ERROR_TAIL: Lazy<Regex> = lazy_regex!(r"ERROR:\s*([^\n]+)");
static FILE_POINTER: Lazy<Regex> = lazy_regex!(r"file://(/[^\s#]+)#L?(\d+)");

/// One classified line of planner output.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanLine {
    /// `#…#` fence, a section title.
    Title(String),
    /// A DDL command in the plan body.
    Command(String),
    /// `-- …` commentary in the plan body.
    Comment(String),
    /// `No plan generated` / `Finished executing` terminal lines.
    Success(String),
}

#[derive(Debug, Default, PartialEq)]
pub struct PlanOutput {
    pub lines: Vec<PlanLine>,
    /// True when the planner reported nothing to do.
    pub empty: bool,
}

impl PlanOutput {
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            PlanLine::Command(sql) => Some(sql.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Program and leading arguments, e.g. `["pg-schema-diff", "plan"]`.
    pub command: Vec<String>,
    pub allow_hazards: Vec<String>,
}

/// Run the planner over the driver's schema directory.
pub async fn run_planner(
    config: &PlannerConfig,
    schema_dir: &Path,
    dsn: &str,
) -> Result<PlanOutput, PgSyncError> {
    let Some((program, leading_args)) = config.command.split_first() else {
        return Err(PgSyncError::Config(
            "Planner command is empty".to_string(),
        ));
    };
    let mut command = Command::new(program);
    command
        .args(leading_args)
        .arg("--schema-dir")
        .arg(schema_dir)
        .arg("--dsn")
        .arg(dsn)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for hazard in &config.allow_hazards {
        command.arg("--allow-hazard").arg(hazard);
    }
    debug!(command = ?config.command, "spawning planner");
    let mut child = command.spawn().map_err(|error| PgSyncError::Planner {
        status: -1,
        message: format!("Could not spawn {program}: {error}"),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| PgSyncError::Planner {
        status: -1,
        message: "Planner stdout unavailable".to_string(),
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| PgSyncError::Planner {
        status: -1,
        message: "Planner stderr unavailable".to_string(),
    })?;

    let mut output = PlanOutput::default();
    let mut hazards: Vec<String> = Vec::new();
    let mut reader = BufReader::new(stdout).lines();
    let mut in_review_section = false;
    while let Some(line) = reader.next_line().await? {
        match classify_line(&line) {
            None => continue,
            Some(PlanLine::Title(title)) => {
                in_review_section = title.eq_ignore_ascii_case("review plan");
                if !in_review_section {
                    output.lines.push(PlanLine::Title(title));
                }
            }
            Some(classified) => {
                if let Some(captures) = HAZARD_LINE.captures(&line) {
                    if let Some(m) = captures.get(1) {
                        hazards.extend(
                            m.as_str()
                                .split(',')
                                .map(|h| h.trim().to_string())
                                .filter(|h| !h.is_empty()),
                        );
                    }
                }
                if in_review_section {
                    continue;
                }
                if let PlanLine::Success(message) = &classified {
                    output.empty = message.eq_ignore_ascii_case("no plan generated");
                }
                output.lines.push(classified);
            }
        }
    }

    let mut stderr = String::new();
    stderr_pipe.read_to_string(&mut stderr).await?;
    let status = child.wait().await?;
    if !status.success() {
        let unapproved: Vec<String> = hazards
            .iter()
            .filter(|h| !config.allow_hazards.iter().any(|a| a.eq_ignore_ascii_case(h)))
            .cloned()
            .collect();
        if !unapproved.is_empty() {
            return Err(PgSyncError::Hazards(unapproved));
        }
        return Err(planner_failure(status.code().unwrap_or(-1), &stderr));
    }
    if !stderr.trim().is_empty() {
        warn!(stderr = %stderr.trim(), "planner wrote to stderr");
    }
    info!(lines = output.lines.len(), empty = output.empty, "planner finished");
    Ok(output)
}

/// Classify one stdout line; `None` for blank lines.
pub fn classify_line(line: &str) -> Option<PlanLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('#') {
        let title = TITLE_FENCE
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        return Some(PlanLine::Title(title));
    }
    if trimmed.eq_ignore_ascii_case("no plan generated")
        || trimmed.eq_ignore_ascii_case("finished executing")
    {
        return Some(PlanLine::Success(trimmed.to_string()));
    }
    if let Some(comment) = trimmed.strip_prefix("-- ") {
        return Some(PlanLine::Comment(comment.to_string()));
    }
    Some(PlanLine::Command(trimmed.to_string()))
}

/// Extract the `ERROR: …` tail and any `file:///path#LN` pointer from the
/// planner's stderr, stripping decorative prefixes.
fn planner_failure(status: i32, stderr: &str) -> PgSyncError {
    let mut message = ERROR_TAIL
        .captures(stderr)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| stderr.trim().to_string());
    if let Some(captures) = FILE_POINTER.captures(stderr) {
        let path = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let line = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        message = format!("{message}\n    at {path}:{line}");
    }
    PgSyncError::Planner { status, message }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::{classify_line, planner_failure, PlanLine};
    use crate::error::PgSyncError;

    #[rstest]
    #[case("## Plan ##", PlanLine::Title("Plan".to_string()))]
    #[case("CREATE INDEX idx ON t (a);", PlanLine::Command("CREATE INDEX idx ON t (a);".to_string()))]
    #[case("-- reason: new index", PlanLine::Comment("reason: new index".to_string()))]
    #[case("No plan generated", PlanLine::Success("No plan generated".to_string()))]
    #[case("Finished executing", PlanLine::Success("Finished executing".to_string()))]
    fn classify_should_recognize_each_shape(#[case] line: &str, #[case] expected: PlanLine) {
        assert_eq!(Some(expected), classify_line(line));
    }

    #[test]
    fn blank_lines_should_be_dropped() {
        assert_eq!(None, classify_line("   "));
    }

    #[test]
    fn planner_failure_should_extract_error_and_pointer() {
        let stderr = "some noise\nERROR: column \"a\" is bad\nsee file:///work/sql/users.pgsql#L12";
        let error = planner_failure(3, stderr);
        let PgSyncError::Planner { status, message } = error else {
            panic!("wrong error kind");
        };
        assert_eq!(3, status);
        assert!(message.starts_with("column \"a\" is bad"), "got {message}");
        assert!(message.contains("/work/sql/users.pgsql:12"), "got {message}");
    }
}
