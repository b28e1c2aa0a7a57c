//! Process-group helpers so no child outlives the call that spawned it.
//!
//! - `configure` optionally puts a pipe-backend child in its own process
//!   group and, on Linux, arranges a `SIGTERM` if the parent dies.
//! - `ChildGuard` owns a live child; dropping it before the child has been
//!   reaped terminates it (SIGTERM, grace period, SIGKILL), signalling the
//!   whole group when the child leads one.

use std::io::{self, IsTerminal};
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_millis(500);

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal to send when killing a child or its process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM - allows graceful shutdown
    Term,
    /// SIGKILL - immediate termination
    Kill,
}

#[cfg(unix)]
impl KillSignal {
    fn as_libc_signal(self) -> libc::c_int {
        match self {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
        }
    }
}

/// Whether a child that inherits our stdin may leave our process group.
///
/// A background group that reads the controlling terminal is stopped with
/// `SIGTTIN`, so the child stays in the foreground group when stdin is a tty.
pub(crate) fn should_detach() -> bool {
    !io::stdin().is_terminal()
}

/// Ensure the child receives SIGTERM when the original parent dies.
///
/// Runs in `pre_exec`; `parent_pid` is captured before the fork so a parent
/// that exits between fork and exec is still noticed.
#[cfg(target_os = "linux")]
fn set_parent_death_signal(parent_pid: libc::pid_t) -> io::Result<()> {
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) } == -1 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::getppid() } != parent_pid {
        unsafe {
            libc::raise(libc::SIGTERM);
        }
    }

    Ok(())
}

/// Tie the child to this process's lifetime, and start it in its own
/// process group when `detach` is set.
#[cfg(unix)]
pub(crate) fn configure(command: &mut std::process::Command, detach: bool) {
    use std::os::unix::process::CommandExt;

    if detach {
        command.process_group(0);
    }

    #[cfg(target_os = "linux")]
    {
        let parent_pid = unsafe { libc::getpid() };
        unsafe {
            command.pre_exec(move || set_parent_death_signal(parent_pid));
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn configure(_command: &mut std::process::Command, _detach: bool) {}

/// Signal a whole process group (best-effort; a vanished group is not an error).
#[cfg(unix)]
pub fn kill_process_group_with_signal(process_group_id: u32, signal: KillSignal) -> io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(process_group_id) else {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    };
    let result = unsafe { libc::killpg(pgid, signal.as_libc_signal()) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }

    Ok(())
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn kill_process_group_with_signal(_process_group_id: u32, _signal: KillSignal) -> io::Result<()> {
    Ok(())
}

/// Signal a single process (best-effort; a vanished process is not an error).
#[cfg(unix)]
pub fn kill_process_with_signal(pid: u32, signal: KillSignal) -> io::Result<()> {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    };
    let result = unsafe { libc::kill(pid, signal.as_libc_signal()) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }

    Ok(())
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn kill_process_with_signal(_pid: u32, _signal: KillSignal) -> io::Result<()> {
    Ok(())
}

/// Signal the child's group when it leads one, otherwise just the child.
pub(crate) fn signal_child(pid: u32, group: bool, signal: KillSignal) -> io::Result<()> {
    if group {
        kill_process_group_with_signal(pid, signal)
    } else {
        kill_process_with_signal(pid, signal)
    }
}

/// Exit code for a finished child; a signal death becomes `128 + signal`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Owns a spawned child until it has been reaped.
pub(crate) struct ChildGuard {
    child: Option<Child>,
    group: bool,
    grace: Duration,
}

impl ChildGuard {
    /// `group` says whether the child was started as a process-group leader.
    pub(crate) fn new(child: Child, group: bool) -> Self {
        Self {
            child: Some(child),
            group,
            grace: DEFAULT_GRACEFUL_TIMEOUT,
        }
    }

    pub(crate) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Wait for the child to exit and disarm the guard.
    pub(crate) fn wait(&mut self) -> io::Result<ExitStatus> {
        let Some(child) = self.child.as_mut() else {
            return Err(io::Error::other("child already reaped"));
        };
        let status = child.wait()?;
        self.child = None;
        Ok(status)
    }

    /// Stop and reap the child unless it has already exited.
    pub(crate) fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        let pid = child.id();
        let group = self.group;
        debug!(pid, group, "terminating child");

        if let Err(error) = signal_child(pid, group, KillSignal::Term) {
            warn!(pid, %error, "failed to send SIGTERM to child");
        }
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(REAP_POLL_INTERVAL),
                Err(error) => {
                    warn!(pid, %error, "failed to poll child during shutdown");
                    break;
                }
            }
        }

        if let Err(error) = signal_child(pid, group, KillSignal::Kill) {
            warn!(pid, %error, "failed to send SIGKILL to child");
        }
        if let Err(error) = child.kill() {
            debug!(pid, %error, "child kill after signal");
        }
        if let Err(error) = child.wait() {
            warn!(pid, %error, "failed to reap child");
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}
