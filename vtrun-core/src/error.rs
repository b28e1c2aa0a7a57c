//! Error taxonomy for the execution engine.
//!
//! Every failure surfaces to the immediate caller as one of four kinds;
//! nothing is retried internally.

use std::io;

use crate::result::RunResult;

/// Errors returned by [`crate::execute`] and the convenience entry points.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Options could not be resolved into a runnable configuration. Raised
    /// before any process starts.
    #[error("invalid run configuration: {0}")]
    Configuration(String),

    /// The target program could not be started. No result exists.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process ran to completion but its exit code violated the
    /// enforcement policy.
    #[error("expected exit code {expected} but received {}: {}", .result.code(), .result.args())]
    ExitCode {
        expected: i32,
        result: Box<RunResult>,
    },

    /// Privilege escalation failed, including askpass timeouts.
    #[error("privilege escalation failed: {reason}")]
    Authentication {
        reason: String,
        result: Option<Box<RunResult>>,
    },
}

impl RunError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn launch(program: impl Into<String>, source: io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    /// The completed invocation carried by this error, if any.
    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::ExitCode { result, .. } => Some(result),
            Self::Authentication { result, .. } => result.as_deref(),
            Self::Configuration(_) | Self::Launch { .. } => None,
        }
    }

    /// Consume the error and return the completed invocation, if any.
    pub fn into_result(self) -> Option<RunResult> {
        match self {
            Self::ExitCode { result, .. } => Some(*result),
            Self::Authentication { result, .. } => result.map(|result| *result),
            Self::Configuration(_) | Self::Launch { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_error_message_names_both_codes() {
        let result = RunResult::new("false".into(), vec!["false".into()], 1, String::new(), Some(String::new()));
        let err = RunError::ExitCode {
            expected: 0,
            result: Box::new(result),
        };
        assert_eq!(err.to_string(), "expected exit code 0 but received 1: false");
        assert_eq!(err.result().map(RunResult::code), Some(1));
    }

    #[test]
    fn launch_error_has_no_result() {
        let err = RunError::launch("nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.result().is_none());
        assert!(err.to_string().starts_with("failed to launch `nope`"));
    }
}
