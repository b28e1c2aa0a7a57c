//! vtrun - run one command through the vtrun engine.
//!
//! Thin binary entry point: parse flags, install logging, delegate to `cli`.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

/// Environment variable holding the log filter.
const LOG_ENV_VAR: &str = "VTRUN_LOG";

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    initialize_tracing();

    match cli::run(&args) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("vtrun: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn initialize_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Shell-style exit status: the low eight bits of the child's code.
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code.rem_euclid(256)).unwrap_or(u8::MAX))
}
