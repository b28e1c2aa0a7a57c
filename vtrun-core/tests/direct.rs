#![cfg(unix)]

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use vtrun_core::{BufferSink, Environment, Invocation, RunError, sink};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn echo_reaches_every_sink_and_the_result() -> TestResult {
    let buffer = BufferSink::new();
    let result = Invocation::new(["echo", "hello"])
        .stdout(buffer.sink())
        .stdout(sink::null())
        .run()?;

    assert_eq!(result.stdout(), "hello\n");
    assert_eq!(buffer.contents(), "hello\n");
    assert_eq!(result.code(), 0);
    assert_eq!(result.argv(), ["echo", "hello"]);
    assert_eq!(result.args(), "echo hello");
    Ok(())
}

#[test]
fn nonzero_exit_is_an_exit_code_error() {
    let err = Invocation::new(["sh", "-c", "echo partial; exit 1"]).run().err();
    match err {
        Some(RunError::ExitCode { expected, result }) => {
            assert_eq!(expected, 0);
            assert_eq!(result.code(), 1);
            assert_eq!(result.stdout(), "partial\n");
        }
        other => panic!("expected an exit code error, got {other:?}"),
    }
}

#[test]
fn quash_returns_the_failed_result() -> TestResult {
    let result = Invocation::new(["sh", "-c", "exit 1"]).quash().run()?;
    assert_eq!(result.code(), 1);
    assert!(!result.success());
    Ok(())
}

#[test]
fn custom_expected_code() -> TestResult {
    let result = Invocation::new(["sh", "-c", "exit 3"]).enforce(3).run()?;
    assert_eq!(result.code(), 3);
    assert!(Invocation::new("true").enforce(3).run().is_err());
    Ok(())
}

#[test]
fn stdout_and_stderr_are_captured_separately() -> TestResult {
    let out = BufferSink::new();
    let err = BufferSink::new();
    let result = Invocation::new(["sh", "-c", "echo out; echo err >&2"])
        .stdout(out.sink())
        .stderr(err.sink())
        .run()?;

    assert_eq!(result.stdout(), "out\n");
    assert_eq!(result.stderr(), Some("err\n"));
    assert_eq!(out.contents(), "out\n");
    assert_eq!(err.contents(), "err\n");
    Ok(())
}

#[test]
fn shell_mode_hands_the_line_to_the_shell() -> TestResult {
    let result = Invocation::new("echo one two | tr a-z A-Z").shell(true).run()?;
    assert_eq!(result.stdout(), "ONE TWO\n");
    assert_eq!(result.argv(), ["/bin/sh", "-c", "echo one two | tr a-z A-Z"]);
    assert_eq!(result.args(), "echo one two | tr a-z A-Z");
    Ok(())
}

#[test]
fn string_commands_without_shell_are_split() -> TestResult {
    let result = Invocation::new("printf '%s|' 'a b' c").run()?;
    assert_eq!(result.stdout(), "a b|c|");
    assert_eq!(result.argv(), ["printf", "%s|", "a b", "c"]);
    Ok(())
}

#[test]
fn environment_overlays_by_default() -> TestResult {
    let result = Invocation::new(["sh", "-c", "printf '%s:%s' \"$VTRUN_TEST_VAR\" \"${HOME:+home}\""])
        .env_var("VTRUN_TEST_VAR", "overlay")
        .run()?;
    let expected = if std::env::var_os("HOME").is_some() {
        "overlay:home"
    } else {
        "overlay:"
    };
    assert_eq!(result.stdout(), expected);
    Ok(())
}

#[test]
fn environment_can_replace_the_parent() -> TestResult {
    let result = Invocation::new(["/usr/bin/env"])
        .env(Environment::replace([("ONLY", "1")]))
        .run()?;
    assert_eq!(result.stdout(), "ONLY=1\n");
    Ok(())
}

#[test]
fn working_directory_is_applied() -> TestResult {
    let dir = tempfile::tempdir()?;
    let result = Invocation::new(["pwd", "-P"]).cwd(dir.path()).run()?;
    let expected = std::fs::canonicalize(dir.path())?;
    assert_eq!(result.stdout().trim_end(), expected.to_string_lossy());
    Ok(())
}

#[test]
fn missing_program_is_a_launch_error() {
    let err = Invocation::new(["vtrun-test-no-such-program"]).run().err();
    match err {
        Some(RunError::Launch { program, source }) => {
            assert_eq!(program, "vtrun-test-no-such-program");
            assert_eq!(source.kind(), io::ErrorKind::NotFound);
        }
        other => panic!("expected a launch error, got {other:?}"),
    }
}

#[test]
fn empty_command_is_a_configuration_error() {
    let empty: Vec<String> = Vec::new();
    assert!(matches!(Invocation::new(empty).run(), Err(RunError::Configuration(_))));
}

#[test]
fn final_partial_line_is_kept() -> TestResult {
    let buffer = BufferSink::new();
    let result = Invocation::new(["printf", "a\\nb"]).stdout(buffer.sink()).run()?;
    assert_eq!(result.stdout(), "a\nb");
    assert_eq!(buffer.contents(), "a\nb");
    Ok(())
}

#[test]
fn failing_sink_does_not_stop_the_others() -> TestResult {
    let buffer = BufferSink::new();
    let broken = sink::from_fn(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
    let result = Invocation::new(["sh", "-c", "echo 1; echo 2"])
        .stdout(broken)
        .stdout(buffer.sink())
        .run()?;
    assert_eq!(result.stdout(), "1\n2\n");
    assert_eq!(buffer.contents(), "1\n2\n");
    Ok(())
}

#[test]
fn heavy_output_on_both_streams_does_not_deadlock() -> TestResult {
    let script = "i=0; while [ $i -lt 5000 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done";
    let result = Invocation::new(["sh", "-c", script]).run()?;
    assert_eq!(result.stdout().lines().count(), 5000);
    assert_eq!(result.stderr().map(|err| err.lines().count()), Some(5000));
    assert_eq!(result.stdout().lines().last(), Some("out4999"));
    Ok(())
}

#[test]
fn lines_are_delivered_while_the_process_runs() -> TestResult {
    let first_seen = Arc::new(Mutex::new(None::<Instant>));
    let recorder = {
        let first_seen = Arc::clone(&first_seen);
        sink::from_fn(move |_| {
            first_seen.lock().get_or_insert_with(Instant::now);
            Ok(())
        })
    };

    Invocation::new(["sh", "-c", "echo first; sleep 1; echo second"])
        .stdout(recorder)
        .run()?;
    let finished = Instant::now();

    let first = first_seen.lock().ok_or("no line was delivered")?;
    assert!(finished.duration_since(first) >= Duration::from_millis(500));
    Ok(())
}

fn panicking_sink() -> vtrun_core::Sink {
    sink::from_fn(|_| -> io::Result<()> { panic!("sink exploded") })
}

#[test]
fn panicking_stderr_sink_kills_the_child() {
    let started = Instant::now();
    let outcome = std::panic::catch_unwind(|| {
        Invocation::new(["sh", "-c", "echo e >&2; exec sleep 8"])
            .stderr(panicking_sink())
            .run()
    });
    assert!(outcome.is_err(), "the sink panic should propagate");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn panicking_stdout_sink_kills_the_child() {
    let started = Instant::now();
    let outcome = std::panic::catch_unwind(|| {
        Invocation::new(["sh", "-c", "echo o; exec sleep 8"])
            .stdout(panicking_sink())
            .run()
    });
    assert!(outcome.is_err(), "the sink panic should propagate");
    assert!(started.elapsed() < Duration::from_secs(5));
}
