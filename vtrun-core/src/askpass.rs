//! Hands a password to the escalation helper without a terminal.
//!
//! An [`Askpass`] owns a private temporary directory holding a FIFO and a
//! small `/bin/sh` script. The helper runs the script (via `SUDO_ASKPASS`),
//! the script reads one line from the FIFO and prints it, and a feeder thread
//! on our side writes that line. The password only ever travels through the
//! FIFO. When no password is available the feeder closes the FIFO without
//! writing, the script exits 1, and the helper gives up instead of hanging.
//!
//! Once the escalated command has started, [`Askpass::stop`] retires the
//! FIFO so later askpass runs fail instead of receiving the password again.
//! Dropping the [`Askpass`] stops the feeder and removes the directory.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::stat::Mode;
use tempfile::TempDir;
use tracing::{debug, trace, warn};

use crate::password::{Password, PasswordSource};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const MARKER_PREFIX: &str = "vtrun-askpass-ok";

/// Where the feeder gets the password from.
pub(crate) enum Feed {
    Known(Password),
    /// Consulted once, when the helper first asks.
    Source(Arc<dyn PasswordSource>),
}

pub(crate) struct Askpass {
    dir: TempDir,
    fifo: PathBuf,
    script: PathBuf,
    marker: String,
    state: Arc<FeederState>,
    feeder: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct FeederState {
    shutdown: AtomicBool,
    timed_out: AtomicBool,
    requests: AtomicUsize,
}

impl Askpass {
    pub(crate) fn start(feed: Feed, timeout: Duration) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("vtrun-askpass-").tempdir()?;
        let fifo = dir.path().join("channel");
        nix::unistd::mkfifo(fifo.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;

        let script = dir.path().join("askpass");
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&script)?;
        file.write_all(script_body(&fifo).as_bytes())?;
        file.sync_all()?;
        drop(file);

        let suffix = dir
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let marker = format!("{MARKER_PREFIX}-{suffix}");

        let state = Arc::new(FeederState::default());
        let feeder = thread::Builder::new().name("vtrun-askpass".to_string()).spawn({
            let state = Arc::clone(&state);
            let fifo = fifo.clone();
            move || feed_loop(&fifo, feed, timeout, &state)
        })?;
        debug!(dir = %dir.path().display(), "askpass helper ready");

        Ok(Self {
            dir,
            fifo,
            script,
            marker,
            state,
            feeder: Some(feeder),
        })
    }

    /// Path to hand to the helper as `SUDO_ASKPASS`.
    pub(crate) fn script(&self) -> &Path {
        &self.script
    }

    /// Line printed on stderr by the escalated command once it is running.
    pub(crate) fn marker(&self) -> &str {
        &self.marker
    }

    /// Whether the password source failed to answer in time.
    pub(crate) fn timed_out(&self) -> bool {
        self.state.timed_out.load(Ordering::SeqCst)
    }

    /// How many times the helper asked for the password.
    pub(crate) fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Stop serving the password. The feeder exits within one poll interval
    /// and the script fails from now on.
    pub(crate) fn stop(&self) {
        if self.state.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        match std::fs::remove_file(&self.fifo) {
            Ok(()) => debug!("askpass channel retired"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(%error, "failed to remove askpass channel"),
        }
    }

    #[cfg(test)]
    fn is_feeding(&self) -> bool {
        self.feeder.as_ref().is_some_and(|feeder| !feeder.is_finished())
    }
}

impl Drop for Askpass {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take()
            && feeder.join().is_err()
        {
            warn!("askpass feeder thread panicked");
        }
        trace!(dir = %self.dir.path().display(), "removing askpass helper");
    }
}

fn script_body(fifo: &Path) -> String {
    let fifo = shell_words::quote(&fifo.to_string_lossy()).into_owned();
    format!(
        "#!/bin/sh\n\
         IFS= read -r secret < {fifo} || exit 1\n\
         [ -n \"$secret\" ] || exit 1\n\
         printf '%s\\n' \"$secret\"\n"
    )
}

fn feed_loop(fifo: &Path, feed: Feed, timeout: Duration, state: &FeederState) {
    let (mut password, mut source) = match feed {
        Feed::Known(password) => (Some(password), None),
        Feed::Source(source) => (None, Some(source)),
    };

    while !state.shutdown.load(Ordering::SeqCst) {
        // Opening the write end without blocking only succeeds once the
        // script has the FIFO open for reading.
        let mut channel = match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(fifo)
        {
            Ok(channel) => channel,
            Err(error) if error.raw_os_error() == Some(libc::ENXIO) => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(error) => {
                warn!(%error, "failed to open askpass channel");
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        let request = state.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(source) = source.take() {
            password = fetch_with_timeout(source, timeout);
            if password.is_none() {
                state.timed_out.store(true, Ordering::SeqCst);
                debug!(?timeout, "password source gave no password in time");
            }
        }

        match &password {
            Some(password) => {
                let mut line = String::with_capacity(password.expose().len() + 1);
                line.push_str(password.expose());
                line.push('\n');
                if let Err(error) = channel.write_all(line.as_bytes()) {
                    warn!(%error, request, "failed to write askpass channel");
                }
            }
            None => trace!(request, "closing askpass channel without a password"),
        }
        drop(channel);
        thread::sleep(POLL_INTERVAL);
    }
}

/// Ask `source` for a password, giving up after `timeout`.
///
/// A source that is still running at the deadline is abandoned: its thread is
/// detached and whatever it returns later is discarded.
fn fetch_with_timeout(source: Arc<dyn PasswordSource>, timeout: Duration) -> Option<Password> {
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("vtrun-password-source".to_string())
        .spawn(move || {
            let _ = tx.send(source.fetch(timeout));
        });
    if let Err(error) = spawned {
        warn!(%error, "failed to start password source thread");
        return None;
    }
    rx.recv_timeout(timeout).ok().flatten()
}
