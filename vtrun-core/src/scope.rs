//! Scoped overrides for every call made on the current thread.
//!
//! Each helper pushes one context frame and returns a [`Scope`] guard that
//! pops it when dropped, whether the guarded code returns, returns early,
//! propagates an error, or panics.
//!
//! ```no_run
//! use vtrun_core::{run, scope};
//!
//! # fn main() -> Result<(), vtrun_core::RunError> {
//! let result = scope::quash().run(|| run("false"))?;
//! assert_eq!(result.code(), 1);
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

use crate::context::{self, FrameKind, FrameToken};
use crate::options::{Enforcement, Environment, Mode, Overrides};
use crate::password::{Password, PasswordSource};
use crate::sink::{Sink, Stream, TracingSink};

/// Guard for one pushed context frame.
///
/// Not `Send`: a frame belongs to the thread that pushed it.
#[must_use = "the override is removed as soon as the scope is dropped"]
#[derive(Debug)]
pub struct Scope {
    token: Option<FrameToken>,
    _thread_bound: PhantomData<*const ()>,
}

impl Scope {
    fn push(kind: FrameKind, overrides: Overrides) -> Self {
        Self {
            token: Some(context::push(kind, overrides)),
            _thread_bound: PhantomData,
        }
    }

    /// Run `f` with the override active, then remove it.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        let _guard = self;
        f()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            context::pop(token);
        }
    }
}

/// Require `code` as the exit code.
pub fn enforce(code: i32) -> Scope {
    Scope::push(
        FrameKind::Enforce,
        Overrides {
            enforce: Some(Enforcement::Code(code)),
            ..Overrides::default()
        },
    )
}

/// Disable exit-code enforcement. Shares a frame kind with [`enforce`], so the
/// innermost of the two wins.
pub fn quash() -> Scope {
    Scope::push(
        FrameKind::Enforce,
        Overrides {
            enforce: Some(Enforcement::Disabled),
            ..Overrides::default()
        },
    )
}

/// Add output sinks. They are appended after explicit sinks and before sinks
/// from outer scopes and the defaults.
pub fn sinks(stdout: Vec<Sink>, stderr: Vec<Sink>) -> Scope {
    sink_frame(stdout, stderr, false)
}

/// Like [`sinks`], but sinks from outer scopes are dropped on both streams
/// for the extent of this scope. Explicit and default sinks still apply.
pub fn sinks_exclusive(stdout: Vec<Sink>, stderr: Vec<Sink>) -> Scope {
    sink_frame(stdout, stderr, true)
}

fn sink_frame(stdout: Vec<Sink>, stderr: Vec<Sink>, exclusive_sinks: bool) -> Scope {
    Scope::push(
        FrameKind::Sinks,
        Overrides {
            stdout,
            stderr,
            exclusive_sinks,
            ..Overrides::default()
        },
    )
}

fn tracing_sinks(level: Level) -> (Vec<Sink>, Vec<Sink>) {
    (
        vec![TracingSink::new(Stream::Stdout, level).sink()],
        vec![TracingSink::new(Stream::Stderr, level).sink()],
    )
}

/// Mirror both streams into `tracing` events at `level`.
pub fn log(level: Level) -> Scope {
    let (stdout, stderr) = tracing_sinks(level);
    sinks(stdout, stderr)
}

/// Send both streams only to `tracing` events at `level`, hiding sinks from
/// outer scopes.
pub fn log_exclusive(level: Level) -> Scope {
    let (stdout, stderr) = tracing_sinks(level);
    sinks_exclusive(stdout, stderr)
}

/// Hide every enclosing scope on this thread until this one is dropped.
/// Scopes opened inside it apply as usual.
pub fn fresh() -> Scope {
    Scope::push(FrameKind::Fresh, Overrides::default())
}

/// Run as another identity. Also switches the mode to privileged.
pub fn privileged(identity: Identity) -> Scope {
    Scope::push(FrameKind::Privilege, identity.into_overrides())
}

/// Working directory for calls in this scope.
pub fn cwd(path: impl Into<PathBuf>) -> Scope {
    Scope::push(
        FrameKind::Cwd,
        Overrides {
            cwd: Some(path.into()),
            ..Overrides::default()
        },
    )
}

/// Environment for calls in this scope.
pub fn env(env: Environment) -> Scope {
    Scope::push(
        FrameKind::Env,
        Overrides {
            env: Some(env),
            ..Overrides::default()
        },
    )
}

/// Turn shell mode on or off, optionally with a specific shell program.
pub fn shell(enabled: bool, program: Option<PathBuf>) -> Scope {
    Scope::push(
        FrameKind::Shell,
        Overrides {
            shell: Some(enabled),
            shell_program: program,
            ..Overrides::default()
        },
    )
}

/// Privilege-escalation identity for [`privileged`]. Unset fields fall through
/// to outer scopes and the defaults.
#[derive(Clone, Default)]
pub struct Identity {
    user: Option<String>,
    group: Option<String>,
    password: Option<Password>,
    login: Option<bool>,
    askpass_timeout: Option<Duration>,
    program: Option<PathBuf>,
    password_source: Option<Arc<dyn PasswordSource>>,
}

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn login(mut self, login: bool) -> Self {
        self.login = Some(login);
        self
    }

    pub fn askpass_timeout(mut self, timeout: Duration) -> Self {
        self.askpass_timeout = Some(timeout);
        self
    }

    /// Escalation helper to run instead of `sudo`.
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn password_source(mut self, source: Arc<dyn PasswordSource>) -> Self {
        self.password_source = Some(source);
        self
    }

    fn into_overrides(self) -> Overrides {
        Overrides {
            mode: Some(Mode::Privileged),
            user: self.user,
            group: self.group,
            password: self.password,
            login: self.login,
            askpass_timeout: self.askpass_timeout,
            escalation_program: self.program,
            password_source: self.password_source,
            ..Overrides::default()
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user", &self.user)
            .field("group", &self.group)
            .field("password", &self.password)
            .field("login", &self.login)
            .field("askpass_timeout", &self.askpass_timeout)
            .field("program", &self.program)
            .field("password_source", &self.password_source.as_ref().map(|s| s.describe()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_enforcement() -> Option<Enforcement> {
        context::with_layers(|layers| layers.iter().find_map(|layer| layer.enforce))
    }

    fn exclusive_flags() -> Vec<bool> {
        context::with_layers(|layers| layers.iter().map(|layer| layer.exclusive_sinks).collect())
    }

    #[test]
    fn innermost_enforcement_wins_and_restores() {
        let _outer = enforce(2);
        assert_eq!(active_enforcement(), Some(Enforcement::Code(2)));
        quash().run(|| {
            assert_eq!(active_enforcement(), Some(Enforcement::Disabled));
            enforce(5).run(|| assert_eq!(active_enforcement(), Some(Enforcement::Code(5))));
            assert_eq!(active_enforcement(), Some(Enforcement::Disabled));
        });
        assert_eq!(active_enforcement(), Some(Enforcement::Code(2)));
    }

    #[test]
    fn scope_pops_on_early_error() {
        let before = context::depth();
        let outcome: Result<(), &str> = enforce(3).run(|| {
            assert_eq!(context::depth(), before + 1);
            Err("boom")
        });
        assert!(outcome.is_err());
        assert_eq!(context::depth(), before);
    }

    #[test]
    fn scope_pops_on_panic() {
        let before = context::depth();
        let outcome = std::panic::catch_unwind(|| quash().run::<()>(|| panic!("inside scope")));
        assert!(outcome.is_err());
        assert_eq!(context::depth(), before);
    }

    #[test]
    fn fresh_scope_hides_and_restores_outer_scopes() {
        let _outer = enforce(2);
        let _cwd = cwd("/tmp");
        fresh().run(|| {
            assert_eq!(active_enforcement(), None);
            assert_eq!(context::with_layers(|layers| layers.len()), 0);
            quash().run(|| assert_eq!(active_enforcement(), Some(Enforcement::Disabled)));
        });
        assert_eq!(active_enforcement(), Some(Enforcement::Code(2)));
    }

    #[test]
    fn exclusive_sink_scopes_are_marked() {
        let _shared = log(Level::INFO);
        assert_eq!(exclusive_flags(), vec![false]);
        log_exclusive(Level::DEBUG).run(|| {
            assert_eq!(exclusive_flags(), vec![true, false]);
            let stdout = context::with_layers(|layers| layers[0].stdout.len());
            assert_eq!(stdout, 1);
        });
        sinks_exclusive(Vec::new(), Vec::new()).run(|| assert_eq!(exclusive_flags(), vec![true, false]));
    }

    #[test]
    fn privilege_scope_sets_mode_and_leaves_enforcement_alone() {
        let _enforce = enforce(9);
        let _privileged = privileged(Identity::new().user("deploy"));
        let (mode, user, enforcement) = context::with_layers(|layers| {
            (
                layers.iter().find_map(|layer| layer.mode),
                layers.iter().find_map(|layer| layer.user.clone()),
                layers.iter().find_map(|layer| layer.enforce),
            )
        });
        assert_eq!(mode, Some(Mode::Privileged));
        assert_eq!(user.as_deref(), Some("deploy"));
        assert_eq!(enforcement, Some(Enforcement::Code(9)));
    }
}
