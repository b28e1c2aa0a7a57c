//! Pseudoterminal backend.
//!
//! The child gets a PTY slave as its controlling terminal for stdin, stdout,
//! and stderr. A terminal has one output channel, so everything lands in
//! stdout and the stderr sinks are never written.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use portable_pty::{Child, CommandBuilder, PtySize, native_pty_system};
use tracing::{debug, warn};

use super::{Backend, LineMode, pump_lines};
use crate::error::RunError;
use crate::options::{Mode, RunOptions};
use crate::result::RunResult;
use crate::sink::{FanOut, Stream};

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

#[derive(Debug, Clone, Copy, Default)]
pub struct PtyBackend;

impl Backend for PtyBackend {
    fn mode(&self) -> Mode {
        Mode::Pty
    }

    fn execute(&self, options: &RunOptions) -> Result<RunResult, RunError> {
        let argv = &options.command.argv;
        let program = options.command.program();

        let mut builder = CommandBuilder::new(program);
        for arg in argv.iter().skip(1) {
            builder.arg(arg);
        }
        builder.cwd(&options.cwd);
        if options.env.replace {
            builder.env_clear();
        }
        for (key, value) in &options.env.vars {
            builder.env(key, value);
        }

        let size = PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|err| launch_error(program, &err))?;
        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| launch_error(program, &err))?;
        let mut killer = child.clone_killer();
        let mut guard = PtyChildGuard::new(child);
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| launch_error(program, &err))?;
        debug!(program, pid = guard.process_id(), "spawned child on pty");

        let mut stdout = FanOut::new(Stream::Stdout, options.stdout.clone());
        let status = thread::scope(|scope| -> io::Result<_> {
            let pump = thread::Builder::new()
                .name("vtrun-pty-reader".to_string())
                .spawn_scoped(scope, || {
                    let drained = panic::catch_unwind(AssertUnwindSafe(|| {
                        pump_lines(reader, LineMode::Terminal, |line| stdout.deliver(line));
                    }));
                    // Unblocks `guard.wait()` on the calling thread.
                    if drained.is_err()
                        && let Err(error) = killer.kill()
                    {
                        warn!(%error, "failed to kill pty child after a sink panicked");
                    }
                    drained
                })?;
            let status = guard.wait();
            match pump.join() {
                Ok(Ok(())) => {}
                Ok(Err(payload)) | Err(payload) => panic::resume_unwind(payload),
            }
            status
        })
        .map_err(|source| RunError::launch(program, source))?;
        drop(pair.master);

        let code = exit_status_code(&status);
        debug!(program, code, "pty command finished");

        Ok(RunResult::new(
            options.command.display.clone(),
            argv.clone(),
            code,
            stdout.into_captured(),
            None,
        ))
    }
}

/// Exit code for a PTY child; death by signal reports `-1`.
fn exit_status_code(status: &portable_pty::ExitStatus) -> i32 {
    if status.signal().is_some() {
        -1
    } else {
        i32::try_from(status.exit_code()).unwrap_or(-1)
    }
}

/// Map a `portable-pty` failure to a launch error, keeping the I/O error kind
/// when one is in the chain.
fn launch_error(program: &str, err: &anyhow::Error) -> RunError {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<io::Error>())
        .map_or(io::ErrorKind::Other, io::Error::kind);
    RunError::launch(program, io::Error::new(kind, format!("{err:#}")))
}

/// Kills the PTY child if the call unwinds before it has been reaped.
struct PtyChildGuard {
    child: Box<dyn Child + Send + Sync>,
    reaped: bool,
}

impl PtyChildGuard {
    fn new(child: Box<dyn Child + Send + Sync>) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn wait(&mut self) -> io::Result<portable_pty::ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for PtyChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(error) = self.child.kill() {
            warn!(%error, "failed to kill pty child");
        }
        if let Err(error) = self.child.wait() {
            warn!(%error, "failed to reap pty child");
        }
    }
}
