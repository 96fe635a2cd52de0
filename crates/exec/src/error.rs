use std::path::PathBuf;
use std::time::Duration;

use imagecheck_core::{ConfigError, ResolveError};

/// Execution-stage failures.
///
/// "Could not start" ([`ExecError::ToolStart`]) is an environment problem;
/// "ran and failed" ([`ExecError::ToolNonZeroExit`]) is an expected test
/// outcome surfaced as an error only at the very end.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start {program}: {source}")]
    ToolStart {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Testinfra execution failed with exit status {exit_code}")]
    ToolNonZeroExit { exit_code: i32 },

    #[error("Testinfra install command failed: {0}")]
    InstallFailed(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Testinfra installation verification failed: {0}")]
    Installation(String),

    #[error("A communicator is required to execute on the instance")]
    NoCommunicator,

    #[error("Testinfra execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Testinfra execution was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Communicator error: {0}")]
    Communicator(String),
}

/// One test file that could not be placed on the instance.
#[derive(Debug, thiserror::Error)]
#[error("{}: {reason}", .path.display())]
pub struct FileTransferFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Every per-file failure of a transfer batch.
#[derive(Debug, thiserror::Error)]
#[error("Failed to transfer {} test file(s) to the instance: {}", .failures.len(), describe(.failures))]
pub struct TransferError {
    pub failures: Vec<FileTransferFailure>,
}

fn describe(failures: &[FileTransferFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_tool_non_zero_exit() {
        let err = ExecError::ToolNonZeroExit { exit_code: 1 };
        assert_eq!(err.to_string(), "Testinfra execution failed with exit status 1");
    }

    #[test]
    fn display_transfer_lists_every_file() {
        let err = TransferError {
            failures: vec![
                FileTransferFailure {
                    path: "/tmp/a.py".into(),
                    reason: "not found".into(),
                },
                FileTransferFailure {
                    path: "/tmp/b.py".into(),
                    reason: "upload refused".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Failed to transfer 2 test file(s) to the instance: /tmp/a.py: not found; /tmp/b.py: upload refused"
        );
    }

    #[test]
    fn resolve_errors_are_transparent() {
        let err = ExecError::from(ResolveError::UnknownHost);
        assert_eq!(err.to_string(), "Unknown host address");
    }

    #[test]
    fn tool_start_has_source() {
        let err = ExecError::ToolStart {
            program: "py.test".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Failed to start py.test"));
    }
}
