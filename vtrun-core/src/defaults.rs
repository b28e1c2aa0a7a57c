//! Process-wide fallback values, the last tier of option resolution.
//!
//! The embedding application may change these at any time. Each call takes a
//! snapshot when it resolves, so a change made mid-run applies from the next
//! call on.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::options::{Enforcement, Environment, Mode, default_shell_program};
use crate::password::{Password, PasswordSource};
use crate::sink::Sink;

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_ESCALATION_PROGRAM: &str = "sudo";
pub const DEFAULT_ASKPASS_TIMEOUT: Duration = Duration::from_secs(3);

/// Fallback values for every resolvable field.
#[derive(Clone)]
pub struct Defaults {
    pub mode: Mode,
    pub env: Environment,
    /// `None` means the caller's current directory at resolution time.
    pub cwd: Option<PathBuf>,
    pub shell: bool,
    pub shell_program: PathBuf,
    pub stdout: Vec<Sink>,
    pub stderr: Vec<Sink>,
    pub enforce: Enforcement,
    pub user: String,
    pub group: Option<String>,
    pub password: Option<Password>,
    pub login: bool,
    pub askpass_timeout: Duration,
    pub escalation_program: PathBuf,
    pub password_source: Option<Arc<dyn PasswordSource>>,
    /// Whether asking on the controlling terminal counts as a password
    /// supply. Only honoured when stdin is a terminal.
    pub prompt: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            mode: Mode::Direct,
            env: Environment::default(),
            cwd: None,
            shell: false,
            shell_program: default_shell_program(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            enforce: Enforcement::Code(0),
            user: DEFAULT_USER.to_string(),
            group: None,
            password: None,
            login: false,
            askpass_timeout: DEFAULT_ASKPASS_TIMEOUT,
            escalation_program: PathBuf::from(DEFAULT_ESCALATION_PROGRAM),
            password_source: None,
            prompt: true,
        }
    }
}

impl fmt::Debug for Defaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Defaults")
            .field("mode", &self.mode)
            .field("env", &self.env)
            .field("cwd", &self.cwd)
            .field("shell", &self.shell)
            .field("shell_program", &self.shell_program)
            .field("stdout", &self.stdout.len())
            .field("stderr", &self.stderr.len())
            .field("enforce", &self.enforce)
            .field("user", &self.user)
            .field("group", &self.group)
            .field("password", &self.password)
            .field("login", &self.login)
            .field("askpass_timeout", &self.askpass_timeout)
            .field("escalation_program", &self.escalation_program)
            .field("password_source", &self.password_source.as_ref().map(|s| s.describe()))
            .field("prompt", &self.prompt)
            .finish()
    }
}

static DEFAULTS: Lazy<RwLock<Defaults>> = Lazy::new(|| RwLock::new(Defaults::default()));

/// A copy of the current defaults. Sinks are shared, not duplicated.
pub fn snapshot() -> Defaults {
    DEFAULTS.read().clone()
}

/// Mutate the defaults in place.
pub fn update<R>(f: impl FnOnce(&mut Defaults) -> R) -> R {
    f(&mut DEFAULTS.write())
}

/// Replace the defaults wholesale.
pub fn replace(defaults: Defaults) -> Defaults {
    std::mem::replace(&mut *DEFAULTS.write(), defaults)
}

/// Restore the built-in defaults.
pub fn reset() {
    replace(Defaults::default());
}
