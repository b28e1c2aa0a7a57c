//! Privilege-escalation backend.
//!
//! Runs the command through the escalation helper (`sudo -A`) with the
//! password supplied by an [`crate::askpass::Askpass`], streaming through
//! the same pipes as the direct backend.
//!
//! The escalated side first prints a one-off marker line on stderr and then
//! execs the real command. Seeing that marker is how we know authentication
//! succeeded; it is removed from the captured stderr.

use super::Backend;
use crate::error::RunError;
use crate::options::{Mode, RunOptions};
use crate::result::RunResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct PrivilegedBackend;

impl Backend for PrivilegedBackend {
    fn mode(&self) -> Mode {
        Mode::Privileged
    }

    #[cfg(unix)]
    fn execute(&self, options: &RunOptions) -> Result<RunResult, RunError> {
        unix::execute(options)
    }

    #[cfg(not(unix))]
    fn execute(&self, _options: &RunOptions) -> Result<RunResult, RunError> {
        Err(RunError::configuration("privileged mode is only supported on Unix"))
    }
}

#[cfg(unix)]
mod unix {
    use std::sync::Arc;

    use tracing::debug;

    use super::super::{base_command, run_piped};
    use crate::askpass::{Askpass, Feed};
    use crate::error::RunError;
    use crate::options::{Environment, Privilege, RunOptions};
    use crate::password::{self, PasswordSupply};
    use crate::result::RunResult;
    use crate::sink::{FanOut, Stream};

    /// Prints `$0` (the marker) on stderr, then becomes the real command.
    const MARKER_SCRIPT: &str = r#"printf '%s\n' "$0" >&2 && exec "$@""#;

    pub(super) fn execute(options: &RunOptions) -> Result<RunResult, RunError> {
        let privilege = &options.privilege;
        let helper = privilege.program.to_string_lossy().into_owned();

        let feed = match &privilege.password {
            PasswordSupply::Known(password) => Feed::Known(password.clone()),
            PasswordSupply::Source(source) => Feed::Source(Arc::clone(source)),
            PasswordSupply::Prompt => {
                let prompt = password::prompt_text(&password::current_user());
                let password = password::prompt_terminal(&prompt).map_err(|err| {
                    RunError::Authentication {
                        reason: format!("failed to read password: {err}"),
                        result: None,
                    }
                })?;
                Feed::Known(password)
            }
            PasswordSupply::Unavailable => {
                return Err(RunError::configuration(format!(
                    "no password available for user `{}`",
                    privilege.user
                )));
            }
        };

        let askpass = Askpass::start(feed, privilege.askpass_timeout)
            .map_err(|source| RunError::launch(helper.as_str(), source))?;

        let argv = helper_argv(privilege, askpass.marker(), &options.env, &options.command.argv);
        debug!(
            helper = %helper,
            user = %privilege.user,
            group = ?privilege.group,
            login = privilege.login,
            "launching escalation helper"
        );
        let mut command = base_command(&argv, &Environment::default(), &options.cwd)?;
        command.env("SUDO_ASKPASS", askpass.script());

        let marker = askpass.marker().to_string();
        let mut authenticated = false;
        let outcome = run_piped(
            &helper,
            command,
            FanOut::new(Stream::Stdout, options.stdout.clone()),
            FanOut::new(Stream::Stderr, options.stderr.clone()),
            |line| {
                if !authenticated && line.trim_end_matches(['\r', '\n']) == marker {
                    authenticated = true;
                    askpass.stop();
                    return false;
                }
                true
            },
        )?;
        let timed_out = askpass.timed_out();
        let requests = askpass.requests();
        drop(askpass);
        debug!(code = outcome.code, authenticated, requests, "escalated command finished");

        let result = RunResult::new(
            options.command.display.clone(),
            options.command.argv.clone(),
            outcome.code,
            outcome.stdout,
            Some(outcome.stderr),
        );

        if !authenticated {
            let reason = if timed_out {
                format!(
                    "no password for user `{}` within {:?}",
                    privilege.user, privilege.askpass_timeout
                )
            } else {
                format!(
                    "`{helper}` did not authenticate as `{}` (exit code {})",
                    privilege.user, outcome.code
                )
            };
            return Err(RunError::Authentication {
                reason,
                result: Some(Box::new(result)),
            });
        }

        Ok(result)
    }

    /// `<helper> -A -u USER [-g GROUP] [-i] -- /bin/sh -c MARKER_SCRIPT <marker> [env ...] argv...`
    fn helper_argv(privilege: &Privilege, marker: &str, env: &Environment, argv: &[String]) -> Vec<String> {
        let mut out = vec![
            privilege.program.to_string_lossy().into_owned(),
            "-A".to_string(),
            "-u".to_string(),
            privilege.user.clone(),
        ];
        if let Some(group) = &privilege.group {
            out.push("-g".to_string());
            out.push(group.clone());
        }
        if privilege.login {
            out.push("-i".to_string());
        }
        out.extend([
            "--".to_string(),
            "/bin/sh".to_string(),
            "-c".to_string(),
            MARKER_SCRIPT.to_string(),
            marker.to_string(),
        ]);
        // The helper scrubs its own environment, so variables are applied on
        // the escalated side.
        if env.replace || !env.vars.is_empty() {
            out.push("env".to_string());
            if env.replace {
                out.push("-i".to_string());
            }
            out.extend(env.vars.iter().map(|(key, value)| format!("{key}={value}")));
        }
        out.extend(argv.iter().cloned());
        out
    }

}
