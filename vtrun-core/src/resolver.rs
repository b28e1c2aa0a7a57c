//! Merges explicit arguments, context frames, and defaults into [`RunOptions`].
//!
//! Scalar fields take the first tier that sets them: explicit, then the
//! innermost frame that has the field, then the defaults. The two sink lists
//! are concatenated across all tiers in that same order, stopping after a
//! tier marked `exclusive_sinks` but always ending with the defaults.

use std::io::IsTerminal;
use std::path::PathBuf;

use tracing::trace;

use crate::defaults::Defaults;
use crate::error::RunError;
use crate::options::{Command, CommandLine, Mode, Overrides, Privilege, RunOptions};
use crate::password::PasswordSupply;
use crate::sink::Sink;

/// Resolve against the live context stack; prompting needs stdin on a terminal.
pub(crate) fn resolve(
    command: &Command,
    explicit: &Overrides,
    layers: &[&Overrides],
    defaults: &Defaults,
) -> Result<RunOptions, RunError> {
    resolve_with(command, explicit, layers, defaults, std::io::stdin().is_terminal())
}

pub(crate) fn resolve_with(
    command: &Command,
    explicit: &Overrides,
    layers: &[&Overrides],
    defaults: &Defaults,
    interactive: bool,
) -> Result<RunOptions, RunError> {
    let tiers = Tiers { explicit, layers };

    let mode = tiers.pick(|o| o.mode.as_ref()).unwrap_or(defaults.mode);
    let shell = tiers.pick(|o| o.shell.as_ref()).unwrap_or(defaults.shell);
    let shell_program = tiers
        .pick(|o| o.shell_program.as_ref())
        .unwrap_or_else(|| defaults.shell_program.clone());
    let env = tiers
        .pick(|o| o.env.as_ref())
        .unwrap_or_else(|| defaults.env.clone());
    let cwd = match tiers.pick(|o| o.cwd.as_ref()).or_else(|| defaults.cwd.clone()) {
        Some(cwd) => cwd,
        None => current_dir()?,
    };
    let enforce = tiers.pick(|o| o.enforce.as_ref()).unwrap_or(defaults.enforce);

    let argv = command.expand(shell, &shell_program)?;
    let command = CommandLine {
        display: command.display(),
        argv,
    };

    let privilege = Privilege {
        user: tiers
            .pick(|o| o.user.as_ref())
            .unwrap_or_else(|| defaults.user.clone()),
        group: tiers.pick(|o| o.group.as_ref()).or_else(|| defaults.group.clone()),
        login: tiers.pick(|o| o.login.as_ref()).unwrap_or(defaults.login),
        askpass_timeout: tiers
            .pick(|o| o.askpass_timeout.as_ref())
            .unwrap_or(defaults.askpass_timeout),
        program: tiers
            .pick(|o| o.escalation_program.as_ref())
            .unwrap_or_else(|| defaults.escalation_program.clone()),
        password: password_supply(&tiers, defaults, interactive),
    };

    if mode == Mode::Privileged && matches!(privilege.password, PasswordSupply::Unavailable) {
        return Err(RunError::configuration(format!(
            "privileged mode for user `{}` has no way to obtain a password \
             (no password, no password source, and no interactive terminal)",
            privilege.user
        )));
    }

    let stdout = tiers.union(|o| &o.stdout, &defaults.stdout);
    let stderr = tiers.union(|o| &o.stderr, &defaults.stderr);

    trace!(
        mode = %mode,
        shell,
        cwd = %cwd.display(),
        enforce = ?enforce,
        stdout_sinks = stdout.len(),
        stderr_sinks = stderr.len(),
        password = ?privilege.password,
        "resolved run options"
    );

    Ok(RunOptions {
        command,
        mode,
        env,
        cwd,
        shell,
        shell_program,
        stdout,
        stderr,
        privilege,
        enforce,
    })
}

struct Tiers<'a> {
    explicit: &'a Overrides,
    layers: &'a [&'a Overrides],
}

impl<'a> Tiers<'a> {
    /// First value set by the explicit tier or the innermost frame.
    fn pick<T: Clone + 'a>(&self, field: impl Fn(&'a Overrides) -> Option<&'a T>) -> Option<T> {
        std::iter::once(self.explicit)
            .chain(self.layers.iter().copied())
            .find_map(|overrides| field(overrides))
            .cloned()
    }

    fn union(&self, field: impl Fn(&'a Overrides) -> &'a Vec<Sink>, defaults: &[Sink]) -> Vec<Sink> {
        let mut sinks = Vec::new();
        for overrides in std::iter::once(self.explicit).chain(self.layers.iter().copied()) {
            sinks.extend(field(overrides).iter().cloned());
            if overrides.exclusive_sinks {
                break;
            }
        }
        sinks.extend(defaults.iter().cloned());
        sinks
    }
}

fn password_supply(tiers: &Tiers<'_>, defaults: &Defaults, interactive: bool) -> PasswordSupply {
    if let Some(password) = tiers
        .pick(|o| o.password.as_ref())
        .or_else(|| defaults.password.clone())
    {
        return PasswordSupply::Known(password);
    }
    if let Some(source) = tiers
        .pick(|o| o.password_source.as_ref())
        .or_else(|| defaults.password_source.clone())
    {
        return PasswordSupply::Source(source);
    }
    if defaults.prompt && interactive {
        return PasswordSupply::Prompt;
    }
    PasswordSupply::Unavailable
}

fn current_dir() -> Result<PathBuf, RunError> {
    std::env::current_dir()
        .map_err(|err| RunError::configuration(format!("cannot determine working directory: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Enforcement, Environment};
    use crate::password::Password;
    use crate::sink::BufferSink;
    use pretty_assertions::assert_eq;

    fn enforce(code: i32) -> Overrides {
        Overrides {
            enforce: Some(Enforcement::Code(code)),
            ..Overrides::default()
        }
    }

    fn resolve_enforce(explicit: &Overrides, layers: &[&Overrides], defaults: &Defaults) -> Enforcement {
        resolve_with(&Command::from("true"), explicit, layers, defaults, false)
            .map(|options| options.enforce)
            .unwrap_or(Enforcement::Disabled)
    }

    #[test]
    fn explicit_beats_context_beats_defaults() {
        let defaults = Defaults {
            enforce: Enforcement::Code(1),
            ..Defaults::default()
        };
        let frame = enforce(2);
        let explicit = enforce(3);

        assert_eq!(resolve_enforce(&explicit, &[&frame], &defaults), Enforcement::Code(3));
        assert_eq!(resolve_enforce(&Overrides::default(), &[&frame], &defaults), Enforcement::Code(2));
        assert_eq!(resolve_enforce(&Overrides::default(), &[], &defaults), Enforcement::Code(1));
    }

    #[test]
    fn innermost_frame_with_the_field_wins() {
        let outer = enforce(4);
        let unrelated = Overrides {
            shell: Some(true),
            ..Overrides::default()
        };
        let inner = enforce(5);
        let defaults = Defaults::default();

        assert_eq!(
            resolve_enforce(&Overrides::default(), &[&inner, &unrelated, &outer], &defaults),
            Enforcement::Code(5)
        );
        assert_eq!(
            resolve_enforce(&Overrides::default(), &[&unrelated, &outer], &defaults),
            Enforcement::Code(4)
        );
    }

    #[test]
    fn sinks_are_a_union_in_tier_order() -> Result<(), RunError> {
        let explicit_buf = BufferSink::new();
        let frame_buf = BufferSink::new();
        let default_buf = BufferSink::new();
        let explicit = Overrides {
            stdout: vec![explicit_buf.sink()],
            ..Overrides::default()
        };
        let frame = Overrides {
            stdout: vec![frame_buf.sink()],
            ..Overrides::default()
        };
        let defaults = Defaults {
            stdout: vec![default_buf.sink()],
            ..Defaults::default()
        };

        let options = resolve_with(&Command::from("true"), &explicit, &[&frame], &defaults, false)?;
        assert_eq!(options.stdout.len(), 3);
        assert!(options.stderr.is_empty());
        for (index, sink) in options.stdout.iter().enumerate() {
            sink.write_line(&format!("{index}\n")).ok();
        }
        assert_eq!(explicit_buf.contents(), "0\n");
        assert_eq!(frame_buf.contents(), "1\n");
        assert_eq!(default_buf.contents(), "2\n");
        Ok(())
    }

    #[test]
    fn exclusive_frame_cuts_off_outer_sinks_only() -> Result<(), RunError> {
        let inner_buf = BufferSink::new();
        let outer_buf = BufferSink::new();
        let default_buf = BufferSink::new();
        let inner = Overrides {
            stdout: vec![inner_buf.sink()],
            exclusive_sinks: true,
            ..Overrides::default()
        };
        let outer = Overrides {
            stdout: vec![outer_buf.sink()],
            stderr: vec![outer_buf.sink()],
            ..Overrides::default()
        };
        let defaults = Defaults {
            stdout: vec![default_buf.sink()],
            ..Defaults::default()
        };

        let options = resolve_with(&Command::from("true"), &Overrides::default(), &[&inner, &outer], &defaults, false)?;
        assert_eq!(options.stdout.len(), 2);
        assert!(options.stderr.is_empty());
        for sink in &options.stdout {
            sink.write_line("x\n").ok();
        }
        assert_eq!(inner_buf.contents(), "x\n");
        assert_eq!(outer_buf.contents(), "");
        assert_eq!(default_buf.contents(), "x\n");
        Ok(())
    }

    #[test]
    fn privileged_without_password_is_a_configuration_error() {
        let explicit = Overrides {
            mode: Some(Mode::Privileged),
            ..Overrides::default()
        };
        let result = resolve_with(&Command::from("id"), &explicit, &[], &Defaults::default(), false);
        assert!(matches!(result, Err(RunError::Configuration(_))));
    }

    #[test]
    fn password_supply_order() -> Result<(), RunError> {
        let explicit = Overrides {
            mode: Some(Mode::Privileged),
            ..Overrides::default()
        };
        let frame = Overrides {
            password: Some(Password::new("from-scope")),
            ..Overrides::default()
        };
        let options = resolve_with(&Command::from("id"), &explicit, &[&frame], &Defaults::default(), false)?;
        assert!(matches!(options.privilege.password, PasswordSupply::Known(ref p) if p.expose() == "from-scope"));

        let options = resolve_with(&Command::from("id"), &explicit, &[], &Defaults::default(), true)?;
        assert!(matches!(options.privilege.password, PasswordSupply::Prompt));

        let no_prompt = Defaults {
            prompt: false,
            ..Defaults::default()
        };
        assert!(resolve_with(&Command::from("id"), &explicit, &[], &no_prompt, true).is_err());
        Ok(())
    }

    #[test]
    fn shell_mode_and_environment_resolve_independently() -> Result<(), RunError> {
        let frame = Overrides {
            shell: Some(true),
            env: Some(Environment::overlay([("A", "1")])),
            ..Overrides::default()
        };
        let explicit = Overrides {
            cwd: Some(PathBuf::from("/tmp")),
            ..Overrides::default()
        };
        let options = resolve_with(&Command::from("echo $A"), &explicit, &[&frame], &Defaults::default(), false)?;
        assert_eq!(options.command.argv, vec!["/bin/sh", "-c", "echo $A"]);
        assert_eq!(options.command.display, "echo $A");
        assert_eq!(options.env.vars.get("A").map(String::as_str), Some("1"));
        assert_eq!(options.cwd, PathBuf::from("/tmp"));
        Ok(())
    }
}
