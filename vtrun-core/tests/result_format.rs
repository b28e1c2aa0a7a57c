#![cfg(unix)]

use pretty_assertions::assert_eq;
use vtrun_core::{Invocation, ResultFormat, RunError, RunResult};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn yaml_record_parses_back() -> TestResult {
    let result = Invocation::new(["sh", "-c", "echo out; echo err >&2; exit 2"])
        .quash()
        .run()?;
    let text = result.format(ResultFormat::Yaml)?;
    let parsed = RunResult::parse(&text, ResultFormat::Yaml)?;

    assert_eq!(parsed.code(), 2);
    assert_eq!(parsed.stdout(), "out\n");
    assert_eq!(parsed.stderr(), Some("err\n"));
    assert_eq!(parsed.argv(), result.argv());
    assert_eq!(parsed, result);
    Ok(())
}

#[test]
fn json_record_parses_back() -> TestResult {
    let result = Invocation::new(["printf", "no newline"]).run()?;
    let parsed = RunResult::parse(&result.format(ResultFormat::Json)?, ResultFormat::Json)?;
    assert_eq!(parsed, result);
    Ok(())
}

#[test]
fn failed_runs_still_format() -> TestResult {
    let err = Invocation::new(["sh", "-c", "exit 5"])
        .run()
        .err()
        .ok_or("command should have failed")?;
    let result = err.result().ok_or("exit code errors carry a result")?;

    let mut rendered = Vec::new();
    result.write_to(&mut rendered, ResultFormat::Yaml)?;
    let text = String::from_utf8(rendered)?;
    assert!(text.starts_with("args:"));
    assert!(text.contains("code: 5"));
    assert!(matches!(err, RunError::ExitCode { expected: 0, .. }));
    Ok(())
}
