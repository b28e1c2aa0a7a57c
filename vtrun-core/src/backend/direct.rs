use tracing::debug;

use super::{Backend, base_command, run_piped};
use crate::error::RunError;
use crate::options::{Mode, RunOptions};
use crate::result::RunResult;
use crate::sink::{FanOut, Stream};

/// Runs the command with separate stdout and stderr pipes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBackend;

impl Backend for DirectBackend {
    fn mode(&self) -> Mode {
        Mode::Direct
    }

    fn execute(&self, options: &RunOptions) -> Result<RunResult, RunError> {
        let argv = &options.command.argv;
        let command = base_command(argv, &options.env, &options.cwd)?;
        let outcome = run_piped(
            options.command.program(),
            command,
            FanOut::new(Stream::Stdout, options.stdout.clone()),
            FanOut::new(Stream::Stderr, options.stderr.clone()),
            |_| true,
        )?;
        debug!(program = options.command.program(), code = outcome.code, "direct command finished");

        Ok(RunResult::new(
            options.command.display.clone(),
            argv.clone(),
            outcome.code,
            outcome.stdout,
            Some(outcome.stderr),
        ))
    }
}
