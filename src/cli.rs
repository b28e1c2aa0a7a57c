//! Flag parsing and the single-invocation driver behind `vtrun`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use vtrun_core::{
    Command, Environment, FilePasswordSource, Invocation, Mode, ResultFormat, RunError, RunResult,
    config, sink,
};

/// Exit status when the command could not be started.
const EXIT_LAUNCH_FAILED: i32 = 127;
/// Exit status for invalid options.
const EXIT_CONFIGURATION: i32 = 2;
/// Exit status when privilege escalation failed.
const EXIT_AUTHENTICATION: i32 = 1;

#[derive(Debug, Parser)]
#[command(
    name = "vtrun",
    version,
    about = "Run a command through a pipe, PTY, or sudo backend and report the result"
)]
pub struct Cli {
    /// Backend: direct, pty, or privileged
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Hand the command to the system shell as a single string
    #[arg(long)]
    pub shell: bool,

    /// Shell program used with --shell
    #[arg(long, value_name = "PROGRAM")]
    pub shell_program: Option<PathBuf>,

    /// Working directory for the command
    #[arg(short = 'C', long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Set an environment variable (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Start from an empty environment instead of inheriting this one
    #[arg(long)]
    pub env_replace: bool,

    /// Accept any exit code
    #[arg(long, conflicts_with = "enforce")]
    pub quash: bool,

    /// Exit code the command must return
    #[arg(long, value_name = "CODE", allow_negative_numbers = true)]
    pub enforce: Option<i32>,

    /// Target user for privileged mode
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Target group for privileged mode
    #[arg(short = 'g', long)]
    pub group: Option<String>,

    /// Run the target user's login shell in privileged mode
    #[arg(long)]
    pub login: bool,

    /// Seconds to wait for a password in privileged mode
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub askpass_timeout: Option<Duration>,

    /// Read the escalation password from the first line of this file
    #[arg(long, value_name = "PATH")]
    pub password_file: Option<PathBuf>,

    /// Configuration file (default: $VTRUN_CONFIG, ./vtrun.toml, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the result record in this format: yaml or json
    #[arg(long, value_parser = parse_format)]
    pub format: Option<ResultFormat>,

    /// Capture output without echoing it
    #[arg(long)]
    pub no_stream: bool,

    /// The command and its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    value.parse::<Mode>().map_err(|err| err.to_string())
}

fn parse_format(value: &str) -> Result<ResultFormat, String> {
    value.parse::<ResultFormat>()
}

fn parse_env_pair(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|err| format!("invalid number of seconds `{value}`: {err}"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid timeout `{value}`: {err}"))
}

impl Cli {
    fn command(&self) -> Command {
        match self.command.as_slice() {
            [line] if self.shell => Command::Line(line.clone()),
            args => Command::Args(args.to_vec()),
        }
    }

    /// Explicit options from the flags. Flags that were not given stay unset
    /// so the configuration file and built-in defaults still apply.
    pub fn invocation(&self) -> Invocation {
        let mut invocation = Invocation::new(self.command());
        if let Some(mode) = self.mode {
            invocation = invocation.mode(mode);
        }
        if self.shell {
            invocation = invocation.shell(true);
        }
        if let Some(program) = &self.shell_program {
            invocation = invocation.shell_program(program);
        }
        if let Some(cwd) = &self.cwd {
            invocation = invocation.cwd(cwd);
        }
        if self.env_replace {
            invocation = invocation.env(Environment::replace(self.env.iter().cloned()));
        } else if !self.env.is_empty() {
            invocation = invocation.env(Environment::overlay(self.env.iter().cloned()));
        }
        if self.quash {
            invocation = invocation.quash();
        } else if let Some(code) = self.enforce {
            invocation = invocation.enforce(code);
        }
        if let Some(user) = &self.user {
            invocation = invocation.user(user);
        }
        if let Some(group) = &self.group {
            invocation = invocation.group(group);
        }
        if self.login {
            invocation = invocation.login(true);
        }
        if let Some(timeout) = self.askpass_timeout {
            invocation = invocation.askpass_timeout(timeout);
        }
        if let Some(path) = &self.password_file {
            invocation = invocation.password_source(Arc::new(FilePasswordSource::new(path)));
        }
        if !self.no_stream {
            invocation = invocation.stdout(sink::stdout()).stderr(sink::stderr());
        }
        invocation
    }
}

/// Run the command described by `cli` and return the exit status for `vtrun`.
pub fn run(cli: &Cli) -> Result<i32> {
    let loaded = config::install(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = loaded {
        debug!(path = %path.display(), "configuration loaded");
    }

    match cli.invocation().run() {
        Ok(result) => {
            if let Some(format) = cli.format {
                let stdout = io::stdout();
                result
                    .write_to(&mut stdout.lock(), format)
                    .context("failed to print result")?;
            }
            Ok(result.code())
        }
        Err(RunError::ExitCode { expected, result }) => {
            let message = format!("expected exit code {expected}, got {}", result.code());
            report(&message, Some(result.as_ref()), cli.format)?;
            Ok(result.code())
        }
        Err(RunError::Authentication { reason, result }) => {
            let message = format!("privilege escalation failed: {reason}");
            report(&message, result.as_deref(), cli.format)?;
            Ok(EXIT_AUTHENTICATION)
        }
        Err(err @ RunError::Launch { .. }) => {
            report(&err.to_string(), None, cli.format)?;
            Ok(EXIT_LAUNCH_FAILED)
        }
        Err(err @ RunError::Configuration(_)) => {
            report(&err.to_string(), None, cli.format)?;
            Ok(EXIT_CONFIGURATION)
        }
    }
}

/// Print a failure line, followed by the result record when there is one.
fn report(message: &str, result: Option<&RunResult>, format: Option<ResultFormat>) -> Result<()> {
    let stderr = io::stderr();
    let mut lock = stderr.lock();
    writeln!(lock, "vtrun: {message}").context("failed to write to stderr")?;
    if let Some(result) = result {
        result
            .write_to(&mut lock, format.unwrap_or_default())
            .context("failed to print result")?;
    }
    Ok(())
}
