//! Execution backends.
//!
//! Every backend takes fully resolved [`RunOptions`] and returns a
//! [`RunResult`] once the process has exited, or a launch error if it never
//! started. Exit-code enforcement happens in the caller, not here.

mod direct;
mod privileged;
mod pty;

use std::io::{self, BufRead, BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, warn};

use crate::error::RunError;
use crate::options::{Environment, Mode, RunOptions};
use crate::process_group::{self, ChildGuard, KillSignal};
use crate::result::RunResult;
use crate::sink::FanOut;

pub use direct::DirectBackend;
pub use privileged::PrivilegedBackend;
pub use pty::PtyBackend;

/// One way of running a process.
pub trait Backend: Send + Sync {
    fn mode(&self) -> Mode;

    fn execute(&self, options: &RunOptions) -> Result<RunResult, RunError>;
}

static DIRECT: DirectBackend = DirectBackend;
static PTY: PtyBackend = PtyBackend;
static PRIVILEGED: PrivilegedBackend = PrivilegedBackend;

/// The backend registered for `mode`.
pub fn for_mode(mode: Mode) -> &'static dyn Backend {
    match mode {
        Mode::Direct => &DIRECT,
        Mode::Pty => &PTY,
        Mode::Privileged => &PRIVILEGED,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMode {
    Pipe,
    /// `\r\n` becomes `\n`, and `EIO` (slave side closed) is end of input.
    Terminal,
}

/// Read `reader` line by line, handing each line to `on_line` as soon as it
/// is complete. A trailing partial line is delivered at end of input.
fn pump_lines<R: Read>(reader: R, mode: LineMode, mut on_line: impl FnMut(&str)) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if mode == LineMode::Terminal && buf.ends_with(b"\r\n") {
                    let len = buf.len();
                    buf.truncate(len - 2);
                    buf.push(b'\n');
                }
                on_line(&String::from_utf8_lossy(&buf));
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if mode == LineMode::Terminal && is_eio(&error) => {
                if !buf.is_empty() {
                    on_line(&String::from_utf8_lossy(&buf));
                }
                break;
            }
            Err(error) => {
                warn!(%error, "failed to read child output");
                if !buf.is_empty() {
                    on_line(&String::from_utf8_lossy(&buf));
                }
                break;
            }
        }
    }
}

#[cfg(unix)]
fn is_eio(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_eio(_error: &io::Error) -> bool {
    false
}

/// A `std::process::Command` for `argv` with the resolved environment and
/// working directory.
fn base_command(argv: &[String], env: &Environment, cwd: &Path) -> Result<Command, RunError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(RunError::configuration("command is empty"));
    };
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd);
    if env.replace {
        command.env_clear();
    }
    command.envs(&env.vars);
    Ok(command)
}

/// What a piped child left behind.
struct PipeOutcome {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Spawn `command` with piped stdout and stderr and stream both through their
/// fan-outs until the child exits.
///
/// stdout is drained on a scoped thread while stderr is drained on the
/// calling thread, so neither pipe can fill up and stall the child.
/// `keep_stderr` sees every stderr line first; returning `false` drops it
/// from both the sinks and the captured text.
///
/// A panic in either drain kills the child before the panic is resumed, so
/// the other drain sees end of input instead of waiting for a natural exit.
fn run_piped(
    program: &str,
    mut command: Command,
    mut stdout: FanOut,
    mut stderr: FanOut,
    mut keep_stderr: impl FnMut(&str) -> bool,
) -> Result<PipeOutcome, RunError> {
    let detach = process_group::should_detach();
    process_group::configure(&mut command, detach);
    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = command
        .spawn()
        .map_err(|source| RunError::launch(program, source))?;
    let pid = child.id();
    let mut guard = ChildGuard::new(child, detach);
    let (child_stdout, child_stderr) = match guard.child_mut() {
        Some(child) => (child.stdout.take(), child.stderr.take()),
        None => (None, None),
    };
    let (Some(child_stdout), Some(child_stderr)) = (child_stdout, child_stderr) else {
        return Err(RunError::launch(program, io::Error::other("child pipes were not created")));
    };
    debug!(program, pid, detach, "spawned child");

    let status = thread::scope(|scope| -> io::Result<_> {
        let reader = thread::Builder::new()
            .name("vtrun-stdout".to_string())
            .spawn_scoped(scope, || {
                let drained = panic::catch_unwind(AssertUnwindSafe(|| {
                    pump_lines(child_stdout, LineMode::Pipe, |line| stdout.deliver(line));
                }));
                // The child is not reaped before this thread is joined, so `pid` is still ours.
                if drained.is_err()
                    && let Err(error) = process_group::signal_child(pid, detach, KillSignal::Kill)
                {
                    warn!(pid, %error, "failed to kill child after a stdout sink panicked");
                }
                drained
            })?;

        let drained = panic::catch_unwind(AssertUnwindSafe(|| {
            pump_lines(child_stderr, LineMode::Pipe, |line| {
                if keep_stderr(line) {
                    stderr.deliver(line);
                }
            });
        }));
        if let Err(payload) = drained {
            guard.terminate();
            let _ = reader.join();
            panic::resume_unwind(payload);
        }

        match reader.join() {
            Ok(Ok(())) => {}
            Ok(Err(payload)) | Err(payload) => {
                guard.terminate();
                panic::resume_unwind(payload);
            }
        }
        guard.wait()
    })
    .map_err(|source| RunError::launch(program, source))?;

    Ok(PipeOutcome {
        code: process_group::exit_code(status),
        stdout: stdout.into_captured(),
        stderr: stderr.into_captured(),
    })
}
