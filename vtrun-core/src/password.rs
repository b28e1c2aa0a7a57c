//! Escalation passwords and the places they can come from.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// A password held in memory. `Debug` never reveals it.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(****)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Supplies a password on demand.
///
/// `fetch` is called at most once per invocation, on a dedicated thread, when
/// the escalation helper first asks. Implementations should return within
/// `timeout`; `None` makes the helper fail closed. A call still running at the
/// deadline is abandoned rather than joined, so it keeps its thread (and any
/// resources it holds) until it returns on its own. Sources must not block
/// indefinitely.
pub trait PasswordSource: Send + Sync {
    fn fetch(&self, timeout: Duration) -> Option<Password>;

    /// Short label used in logs.
    fn describe(&self) -> &str {
        "custom"
    }
}

/// Reads the first line of a file.
#[derive(Debug, Clone)]
pub struct FilePasswordSource {
    path: PathBuf,
}

impl FilePasswordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PasswordSource for FilePasswordSource {
    fn fetch(&self, _timeout: Duration) -> Option<Password> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => contents
                .lines()
                .next()
                .filter(|line| !line.is_empty())
                .map(Password::new),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read password file");
                None
            }
        }
    }

    fn describe(&self) -> &str {
        "file"
    }
}

struct FnSource<F>(F);

impl<F> PasswordSource for FnSource<F>
where
    F: Fn(Duration) -> Option<Password> + Send + Sync,
{
    fn fetch(&self, timeout: Duration) -> Option<Password> {
        (self.0)(timeout)
    }
}

/// Build a password source from a closure.
pub fn from_fn<F>(f: F) -> Arc<dyn PasswordSource>
where
    F: Fn(Duration) -> Option<Password> + Send + Sync + 'static,
{
    Arc::new(FnSource(f))
}

/// How a privileged invocation will obtain its password, decided by the
/// resolver.
#[derive(Clone)]
pub enum PasswordSupply {
    Known(Password),
    Source(Arc<dyn PasswordSource>),
    /// Ask on the controlling terminal before launching.
    Prompt,
    Unavailable,
}

impl fmt::Debug for PasswordSupply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(_) => f.write_str("Known(****)"),
            Self::Source(source) => write!(f, "Source({})", source.describe()),
            Self::Prompt => f.write_str("Prompt"),
            Self::Unavailable => f.write_str("Unavailable"),
        }
    }
}

/// Prompt text shown on the terminal, matching sudo's own.
pub(crate) fn prompt_text(user: &str) -> String {
    format!("[sudo] password for {user}: ")
}

/// Read a password from the terminal.
pub(crate) fn prompt_terminal(prompt: &str) -> std::io::Result<Password> {
    dialoguer::Password::new()
        .with_prompt(prompt.trim_end_matches([':', ' ']))
        .allow_empty_password(true)
        .interact()
        .map(Password::new)
        .map_err(|error| std::io::Error::other(error.to_string()))
}

/// Name of the invoking user, for the prompt.
pub(crate) fn current_user() -> String {
    #[cfg(unix)]
    {
        if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
            return user.name;
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
