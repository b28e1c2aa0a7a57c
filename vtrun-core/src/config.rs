//! TOML configuration file that seeds the process-wide defaults.
//!
//! ```toml
//! [run]
//! mode = "direct"
//! shell = false
//! enforce = 0            # or "disabled"
//! env = { LANG = "C" }
//!
//! [privilege]
//! user = "root"
//! askpass_timeout_secs = 3
//! password_file = "/run/secrets/sudo"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::defaults::{self, Defaults};
use crate::error::RunError;
use crate::options::{Enforcement, Mode};
use crate::password::FilePasswordSource;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "VTRUN_CONFIG";
/// File looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = "vtrun.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub run: RunSection,
    pub privilege: PrivilegeSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub mode: Option<String>,
    pub shell: Option<bool>,
    pub shell_program: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub env_replace: Option<bool>,
    pub enforce: Option<EnforceSetting>,
    pub prompt: Option<bool>,
}

/// `enforce = 0` or `enforce = "disabled"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnforceSetting {
    Code(i32),
    Keyword(String),
}

impl EnforceSetting {
    fn to_enforcement(&self) -> Result<Enforcement, ConfigError> {
        match self {
            Self::Code(code) => Ok(Enforcement::Code(*code)),
            Self::Keyword(word) if word.eq_ignore_ascii_case("disabled") => Ok(Enforcement::Disabled),
            Self::Keyword(word) => Err(ConfigError::Invalid(format!(
                "enforce must be an exit code or \"disabled\", got \"{word}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrivilegeSection {
    pub user: Option<String>,
    pub group: Option<String>,
    pub login: Option<bool>,
    pub askpass_timeout_secs: Option<f64>,
    pub program: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Find and load the first configuration file in discovery order.
    ///
    /// An explicit path must exist. The other candidates are skipped when
    /// absent; a malformed file is always an error.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path).map(|config| Some((path.to_path_buf(), config)));
        }
        for candidate in candidate_paths() {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "loading configuration");
                let config = Self::load(&candidate)?;
                return Ok(Some((candidate, config)));
            }
        }
        Ok(None)
    }

    /// Write every value set in this file into `defaults`.
    pub fn apply(&self, defaults: &mut Defaults) -> Result<(), ConfigError> {
        let run = &self.run;
        if let Some(mode) = &run.mode {
            defaults.mode = mode
                .parse::<Mode>()
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        if let Some(shell) = run.shell {
            defaults.shell = shell;
        }
        if let Some(program) = &run.shell_program {
            defaults.shell_program = program.clone();
        }
        if let Some(cwd) = &run.cwd {
            defaults.cwd = Some(cwd.clone());
        }
        if !run.env.is_empty() {
            defaults.env.vars.extend(run.env.clone());
        }
        if let Some(replace) = run.env_replace {
            defaults.env.replace = replace;
        }
        if let Some(enforce) = &run.enforce {
            defaults.enforce = enforce.to_enforcement()?;
        }
        if let Some(prompt) = run.prompt {
            defaults.prompt = prompt;
        }

        let privilege = &self.privilege;
        if let Some(user) = &privilege.user {
            defaults.user = user.clone();
        }
        if let Some(group) = &privilege.group {
            defaults.group = Some(group.clone());
        }
        if let Some(login) = privilege.login {
            defaults.login = login;
        }
        if let Some(secs) = privilege.askpass_timeout_secs {
            defaults.askpass_timeout = Duration::try_from_secs_f64(secs).map_err(|err| {
                ConfigError::Invalid(format!("askpass_timeout_secs = {secs}: {err}"))
            })?;
        }
        if let Some(program) = &privilege.program {
            defaults.escalation_program = program.clone();
        }
        if let Some(path) = &privilege.password_file {
            defaults.password_source = Some(Arc::new(FilePasswordSource::new(path)));
        }
        Ok(())
    }
}

/// `$VTRUN_CONFIG`, `./vtrun.toml`, then `<config dir>/vtrun/config.toml`.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            paths.push(PathBuf::from(trimmed));
        }
    }
    paths.push(PathBuf::from(LOCAL_CONFIG_FILE));
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("vtrun").join("config.toml"));
    }
    paths
}

/// Discover a configuration file and apply it to the process-wide defaults.
/// Returns the path that was loaded, if any.
pub fn install(explicit: Option<&Path>) -> Result<Option<PathBuf>, RunError> {
    let Some((path, config)) = RunConfig::discover(explicit)? else {
        return Ok(None);
    };
    let mut next = defaults::snapshot();
    config.apply(&mut next)?;
    defaults::replace(next);
    debug!(path = %path.display(), "applied configuration to defaults");
    Ok(Some(path))
}
