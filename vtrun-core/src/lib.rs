//! Command-execution engine.
//!
//! Runs external processes through one of three backends (plain pipes, a
//! pseudoterminal, or a privilege-escalation helper fed by an askpass
//! channel), resolves options across explicit arguments, thread-local scopes,
//! and process-wide defaults, and fans every captured line out to any number
//! of sinks.
//!
//! ```no_run
//! use vtrun_core::{BufferSink, Invocation, scope, sink};
//!
//! # fn main() -> Result<(), vtrun_core::RunError> {
//! let buffer = BufferSink::new();
//! let result = scope::sinks(vec![buffer.sink()], vec![sink::stderr()])
//!     .run(|| Invocation::new(["echo", "hello"]).stdout(sink::null()).run())?;
//! assert_eq!(result.stdout(), "hello\n");
//! assert_eq!(buffer.contents(), "hello\n");
//! # Ok(())
//! # }
//! ```

#[cfg(unix)]
mod askpass;
mod context;
mod process_group;
mod resolver;

pub mod backend;
pub mod config;
pub mod defaults;
pub mod error;
pub mod options;
pub mod password;
pub mod result;
pub mod run;
pub mod scope;
pub mod sink;

pub use backend::{Backend, DirectBackend, PrivilegedBackend, PtyBackend};
pub use config::{ConfigError, RunConfig};
pub use defaults::Defaults;
pub use error::RunError;
pub use options::{Command, CommandLine, Enforcement, Environment, Mode, Overrides, Privilege, RunOptions};
pub use password::{FilePasswordSource, Password, PasswordSource, PasswordSupply};
pub use result::{FormatError, ResultFormat, RunResult};
pub use run::{Invocation, check_exit_code, execute, execute_resolved, resolve, run, run_pty, run_privileged};
pub use scope::{Identity, Scope};
pub use sink::{BufferSink, LineSink, Sink, Stream, TracingSink};
