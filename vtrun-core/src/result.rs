//! Immutable record of a completed invocation and its structured rendering.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Structured text formats a [`RunResult`] can be rendered to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFormat {
    #[default]
    Yaml,
    Json,
}

impl FromStr for ResultFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown result format `{other}` (expected yaml or json)")),
        }
    }
}

/// Errors raised while rendering or parsing a [`RunResult`].
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write result: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of one process invocation.
///
/// Produced once, when the process exits. Field order is the serialized key
/// order: `args`, `argv`, `code`, `stdout`, `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    args: String,
    argv: Vec<String>,
    code: i32,
    stdout: String,
    stderr: Option<String>,
}

impl RunResult {
    pub(crate) fn new(
        args: String,
        argv: Vec<String>,
        code: i32,
        stdout: String,
        stderr: Option<String>,
    ) -> Self {
        Self {
            args,
            argv,
            code,
            stdout,
            stderr,
        }
    }

    /// The command as given, in string form.
    pub fn args(&self) -> &str {
        &self.args
    }

    /// The argument vector that was executed.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Everything the process wrote to stdout (or to the terminal, for PTY runs).
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured stderr. `None` when the backend has a single merged stream.
    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    pub fn format(&self, format: ResultFormat) -> Result<String, FormatError> {
        match format {
            ResultFormat::Yaml => Ok(serde_yaml::to_string(self)?),
            ResultFormat::Json => {
                let mut text = serde_json::to_string_pretty(self)?;
                text.push('\n');
                Ok(text)
            }
        }
    }

    pub fn parse(text: &str, format: ResultFormat) -> Result<Self, FormatError> {
        match format {
            ResultFormat::Yaml => Ok(serde_yaml::from_str(text)?),
            ResultFormat::Json => Ok(serde_json::from_str(text)?),
        }
    }

    /// Write the rendered record to `writer` and flush it.
    pub fn write_to<W: Write>(&self, writer: &mut W, format: ResultFormat) -> Result<(), FormatError> {
        writer.write_all(self.format(format)?.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Write the YAML record to standard output.
    pub fn print(&self) -> Result<(), FormatError> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        self.write_to(&mut lock, ResultFormat::Yaml)
    }

    /// Emit the YAML record through `tracing`, one event per line.
    pub fn log(&self, level: Level) -> Result<(), FormatError> {
        let text = self.format(ResultFormat::Yaml)?;
        for line in text.lines() {
            crate::sink::emit_event(level, "result", line);
        }
        Ok(())
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format(ResultFormat::Yaml) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}
