//! Option values shared by every tier of the resolver.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RunError;
use crate::password::{Password, PasswordSource, PasswordSupply};
use crate::sink::Sink;

/// The command to run: a discrete argument vector or a single string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Args(Vec<String>),
    Line(String),
}

impl Command {
    /// String form used as the result's `args`.
    pub fn display(&self) -> String {
        match self {
            Self::Args(args) => shell_words::join(args),
            Self::Line(line) => line.clone(),
        }
    }

    /// Expand into the argument vector that will be executed.
    pub(crate) fn expand(&self, shell: bool, shell_program: &Path) -> Result<Vec<String>, RunError> {
        let argv = match (self, shell) {
            (Self::Args(args), false) => args.clone(),
            (Self::Line(line), false) => shell_words::split(line).map_err(|err| {
                RunError::configuration(format!("cannot split command `{line}`: {err}"))
            })?,
            (Self::Args(args), true) => shell_invocation(shell_program, &shell_words::join(args)),
            (Self::Line(line), true) => shell_invocation(shell_program, line),
        };
        match argv.first() {
            Some(program) if !program.is_empty() => Ok(argv),
            _ => Err(RunError::configuration("command is empty")),
        }
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        Self::Line(value.to_string())
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        Self::Line(value)
    }
}

impl From<Vec<String>> for Command {
    fn from(value: Vec<String>) -> Self {
        Self::Args(value)
    }
}

impl From<Vec<&str>> for Command {
    fn from(value: Vec<&str>) -> Self {
        Self::Args(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Command {
    fn from(value: &[&str]) -> Self {
        Self::Args(value.iter().map(|arg| (*arg).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Command {
    fn from(value: [&str; N]) -> Self {
        Self::Args(value.iter().map(|arg| (*arg).to_string()).collect())
    }
}

/// Shell family, inferred from the shell program's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Posix,
    Cmd,
    PowerShell,
}

impl ShellKind {
    pub fn detect(program: &Path) -> Self {
        let stem = program
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match stem.as_str() {
            "cmd" => Self::Cmd,
            "powershell" | "pwsh" => Self::PowerShell,
            _ => Self::Posix,
        }
    }

    fn command_flag(self) -> &'static str {
        match self {
            Self::Posix => "-c",
            Self::Cmd => "/C",
            Self::PowerShell => "-Command",
        }
    }
}

/// `[shell, <flag>, line]` for the given shell program.
pub(crate) fn shell_invocation(shell_program: &Path, line: &str) -> Vec<String> {
    vec![
        shell_program.to_string_lossy().into_owned(),
        ShellKind::detect(shell_program).command_flag().to_string(),
        line.to_string(),
    ]
}

pub(crate) fn default_shell_program() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("cmd.exe")
    } else {
        PathBuf::from("/bin/sh")
    }
}

/// Execution backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Pipes for stdout and stderr.
    #[default]
    Direct,
    /// A pseudoterminal; stdout and stderr are merged.
    Pty,
    /// Through the privilege-escalation helper, password via askpass.
    Privileged,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Pty => "pty",
            Self::Privileged => "privileged",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = RunError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" | "popen" | "pipe" => Ok(Self::Direct),
            "pty" => Ok(Self::Pty),
            "privileged" | "sudo" => Ok(Self::Privileged),
            other => Err(RunError::configuration(format!(
                "unknown mode `{other}` (expected direct, pty, or privileged)"
            ))),
        }
    }
}

/// Exit-code enforcement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// Fail with an exit-code error unless the process exits with this code.
    Code(i32),
    Disabled,
}

impl Default for Enforcement {
    fn default() -> Self {
        Self::Code(0)
    }
}

/// Environment handed to the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub vars: BTreeMap<String, String>,
    /// When false the vars are overlaid on the parent environment; when true
    /// the child sees only `vars`.
    pub replace: bool,
}

impl Environment {
    pub fn overlay<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            replace: false,
        }
    }

    pub fn replace<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            replace: true,
            ..Self::overlay(vars)
        }
    }
}

/// One layer of optional settings.
///
/// Used for explicit call arguments and as the payload of a context frame.
/// Unset fields defer to the next tier; the sink lists are concatenated
/// across tiers instead.
#[derive(Clone, Default)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub env: Option<Environment>,
    pub cwd: Option<PathBuf>,
    pub shell: Option<bool>,
    pub shell_program: Option<PathBuf>,
    pub stdout: Vec<Sink>,
    pub stderr: Vec<Sink>,
    /// Sinks from tiers below this one are ignored. Default sinks still apply.
    pub exclusive_sinks: bool,
    pub enforce: Option<Enforcement>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub password: Option<Password>,
    pub login: Option<bool>,
    pub askpass_timeout: Option<Duration>,
    pub escalation_program: Option<PathBuf>,
    pub password_source: Option<Arc<dyn PasswordSource>>,
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overrides")
            .field("mode", &self.mode)
            .field("env", &self.env)
            .field("cwd", &self.cwd)
            .field("shell", &self.shell)
            .field("shell_program", &self.shell_program)
            .field("stdout", &self.stdout.len())
            .field("stderr", &self.stderr.len())
            .field("exclusive_sinks", &self.exclusive_sinks)
            .field("enforce", &self.enforce)
            .field("user", &self.user)
            .field("group", &self.group)
            .field("password", &self.password)
            .field("login", &self.login)
            .field("askpass_timeout", &self.askpass_timeout)
            .field("escalation_program", &self.escalation_program)
            .field("password_source", &self.password_source.as_ref().map(|s| s.describe()))
            .finish()
    }
}

/// Fully resolved privilege-escalation identity.
#[derive(Debug, Clone)]
pub struct Privilege {
    pub user: String,
    pub group: Option<String>,
    pub login: bool,
    pub askpass_timeout: Duration,
    pub program: PathBuf,
    pub password: PasswordSupply,
}

/// The command as given and as it will be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub display: String,
    pub argv: Vec<String>,
}

impl CommandLine {
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }
}

/// Finalised configuration for one invocation. Every field is concrete.
#[derive(Clone)]
pub struct RunOptions {
    pub command: CommandLine,
    pub mode: Mode,
    pub env: Environment,
    pub cwd: PathBuf,
    pub shell: bool,
    pub shell_program: PathBuf,
    pub stdout: Vec<Sink>,
    pub stderr: Vec<Sink>,
    pub privilege: Privilege,
    pub enforce: Enforcement,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("command", &self.command)
            .field("mode", &self.mode)
            .field("env", &self.env)
            .field("cwd", &self.cwd)
            .field("shell", &self.shell)
            .field("shell_program", &self.shell_program)
            .field("stdout", &self.stdout.len())
            .field("stderr", &self.stderr.len())
            .field("privilege", &self.privilege)
            .field("enforce", &self.enforce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_commands_split_like_a_shell() -> Result<(), RunError> {
        let command = Command::from("printf '%s\\n' 'a b' c");
        let argv = command.expand(false, Path::new("/bin/sh"))?;
        assert_eq!(argv, vec!["printf", "%s\\n", "a b", "c"]);
        Ok(())
    }

    #[test]
    fn unbalanced_quotes_are_a_configuration_error() {
        let err = Command::from("echo 'oops").expand(false, Path::new("/bin/sh"));
        assert!(matches!(err, Err(RunError::Configuration(_))));
    }

    #[test]
    fn shell_mode_wraps_the_line_verbatim() -> Result<(), RunError> {
        let command = Command::from("echo a | tr a b > /dev/null");
        let argv = command.expand(true, Path::new("/bin/bash"))?;
        assert_eq!(argv, vec!["/bin/bash", "-c", "echo a | tr a b > /dev/null"]);
        Ok(())
    }

    #[test]
    fn shell_mode_joins_argument_vectors() -> Result<(), RunError> {
        let command = Command::from(["echo", "a b"]);
        assert_eq!(command.display(), "echo 'a b'");
        let argv = command.expand(true, Path::new("/bin/sh"))?;
        assert_eq!(argv, vec!["/bin/sh", "-c", "echo 'a b'"]);
        Ok(())
    }

    #[test]
    fn empty_command_is_rejected() {
        let empty: Vec<String> = Vec::new();
        assert!(Command::from(empty).expand(false, Path::new("/bin/sh")).is_err());
        assert!(Command::from("   ").expand(false, Path::new("/bin/sh")).is_err());
    }

    #[test]
    fn shell_kind_from_program_name() {
        assert_eq!(ShellKind::detect(Path::new("/usr/bin/zsh")), ShellKind::Posix);
        assert_eq!(ShellKind::detect(Path::new("cmd.exe")), ShellKind::Cmd);
        assert_eq!(ShellKind::detect(Path::new("pwsh")), ShellKind::PowerShell);
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!("sudo".parse::<Mode>().ok(), Some(Mode::Privileged));
        assert_eq!("PTY".parse::<Mode>().ok(), Some(Mode::Pty));
        assert!(matches!("ssh".parse::<Mode>(), Err(RunError::Configuration(_))));
    }
}
