//! Remote agent abstraction.
//!
//! A [`Communicator`] runs shell commands on the instance being built and
//! places files on it. The build pipeline supplies one; [`crate::container`]
//! provides one for container instances.

use async_trait::async_trait;

use crate::error::ExecError;

/// A shell command to run on the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCmd {
    pub command: String,
}

impl RemoteCmd {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Buffered result of a [`RemoteCmd`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteExit {
    /// Agent-reported exit status (`-1` if the agent could not report one).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteExit {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait Communicator: Send + Sync {
    /// Run `cmd` to completion and return its buffered output.
    ///
    /// An `Err` means the command could not be run at all; a command that
    /// ran and failed is reported through [`RemoteExit::exit_code`].
    async fn start(&self, cmd: &RemoteCmd) -> Result<RemoteExit, ExecError>;

    /// Write `contents` to the absolute path `destination` on the instance.
    async fn upload(&self, destination: &str, contents: &[u8]) -> Result<(), ExecError>;
}
