//! Public entry points: resolve, dispatch, enforce.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backend;
use crate::context;
use crate::defaults;
use crate::error::RunError;
use crate::options::{Command, Enforcement, Environment, Mode, Overrides, RunOptions};
use crate::password::{Password, PasswordSource};
use crate::resolver;
use crate::result::RunResult;
use crate::sink::Sink;

/// Run `command` with explicit `overrides` on top of the current scopes and
/// the defaults.
pub fn execute(command: impl Into<Command>, overrides: &Overrides) -> Result<RunResult, RunError> {
    let command = command.into();
    let options = resolve(&command, overrides)?;
    execute_resolved(&options)
}

/// Run `command` with nothing set explicitly.
pub fn run(command: impl Into<Command>) -> Result<RunResult, RunError> {
    execute(command, &Overrides::default())
}

/// Run `command` on a pseudoterminal.
pub fn run_pty(command: impl Into<Command>) -> Result<RunResult, RunError> {
    Invocation::new(command).mode(Mode::Pty).run()
}

/// Run `command` through the escalation helper.
pub fn run_privileged(command: impl Into<Command>) -> Result<RunResult, RunError> {
    Invocation::new(command).mode(Mode::Privileged).run()
}

/// Resolve `command` and `overrides` against the active scopes and the
/// defaults, without running anything.
pub fn resolve(command: &Command, overrides: &Overrides) -> Result<RunOptions, RunError> {
    let defaults = defaults::snapshot();
    context::with_layers(|layers| resolver::resolve(command, overrides, layers, &defaults))
}

/// Dispatch already-resolved options to their backend and apply the
/// enforcement policy.
pub fn execute_resolved(options: &RunOptions) -> Result<RunResult, RunError> {
    debug!(mode = %options.mode, argv = ?options.command.argv, cwd = %options.cwd.display(), "dispatching command");
    let result = backend::for_mode(options.mode).execute(options)?;
    debug!(mode = %options.mode, code = result.code(), "command completed");
    check_exit_code(options.enforce, result)
}

/// Return the result unless it violates `policy`.
pub fn check_exit_code(policy: Enforcement, result: RunResult) -> Result<RunResult, RunError> {
    match policy {
        Enforcement::Disabled => Ok(result),
        Enforcement::Code(expected) if result.code() == expected => Ok(result),
        Enforcement::Code(expected) => Err(RunError::ExitCode {
            expected,
            result: Box::new(result),
        }),
    }
}

/// Builder for one call with explicit arguments.
///
/// ```no_run
/// use vtrun_core::{BufferSink, Invocation};
///
/// # fn main() -> Result<(), vtrun_core::RunError> {
/// let buffer = BufferSink::new();
/// let result = Invocation::new(["git", "status", "--short"])
///     .cwd("/srv/repo")
///     .stdout(buffer.sink())
///     .run()?;
/// assert_eq!(result.stdout(), buffer.contents());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Invocation {
    command: Command,
    overrides: Overrides,
}

impl Invocation {
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            overrides: Overrides::default(),
        }
    }

    pub fn with_overrides(command: impl Into<Command>, overrides: Overrides) -> Self {
        Self {
            command: command.into(),
            overrides,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.overrides.mode = Some(mode);
        self
    }

    pub fn env(mut self, env: Environment) -> Self {
        self.overrides.env = Some(env);
        self
    }

    /// Add one variable, overlaying the parent environment unless
    /// [`Invocation::env`] asked for a replacement.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides
            .env
            .get_or_insert_with(Environment::default)
            .vars
            .insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.overrides.cwd = Some(cwd.into());
        self
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.overrides.shell = Some(shell);
        self
    }

    pub fn shell_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.overrides.shell_program = Some(program.into());
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.overrides.stdout.push(sink);
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.overrides.stderr.push(sink);
        self
    }

    pub fn enforce(mut self, code: i32) -> Self {
        self.overrides.enforce = Some(Enforcement::Code(code));
        self
    }

    pub fn quash(mut self) -> Self {
        self.overrides.enforce = Some(Enforcement::Disabled);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.overrides.user = Some(user.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.overrides.group = Some(group.into());
        self
    }

    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.overrides.password = Some(password.into());
        self
    }

    pub fn login(mut self, login: bool) -> Self {
        self.overrides.login = Some(login);
        self
    }

    pub fn askpass_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.askpass_timeout = Some(timeout);
        self
    }

    pub fn escalation_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.overrides.escalation_program = Some(program.into());
        self
    }

    pub fn password_source(mut self, source: Arc<dyn PasswordSource>) -> Self {
        self.overrides.password_source = Some(source);
        self
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn resolve(&self) -> Result<RunOptions, RunError> {
        resolve(&self.command, &self.overrides)
    }

    pub fn run(&self) -> Result<RunResult, RunError> {
        execute(self.command.clone(), &self.overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(code: i32) -> RunResult {
        RunResult::new("x".into(), vec!["x".into()], code, String::new(), Some(String::new()))
    }

    #[test]
    fn matching_code_passes() {
        assert!(check_exit_code(Enforcement::Code(0), finished(0)).is_ok());
        assert!(check_exit_code(Enforcement::Code(2), finished(2)).is_ok());
    }

    #[test]
    fn mismatch_carries_the_result() {
        let err = check_exit_code(Enforcement::Code(0), finished(1)).err();
        match err {
            Some(RunError::ExitCode { expected, result }) => {
                assert_eq!(expected, 0);
                assert_eq!(result.code(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn disabled_policy_returns_any_code() -> Result<(), RunError> {
        let result = check_exit_code(Enforcement::Disabled, finished(7))?;
        assert_eq!(result.code(), 7);
        Ok(())
    }

    #[test]
    fn env_var_accumulates() {
        let invocation = Invocation::new("env").env_var("A", "1").env_var("B", "2");
        let env = invocation.overrides().env.clone().unwrap_or_default();
        assert_eq!(env.vars.len(), 2);
        assert!(!env.replace);
    }
}
