//! [`Communicator`] for container instances, driven by the runtime CLI.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use imagecheck_core::metadata::keys;
use imagecheck_core::{BuildMetadata, ConnectionType, KeyChain, ResolveError};
use tokio::process::Command;

use crate::communicator::{Communicator, RemoteCmd, RemoteExit};
use crate::error::ExecError;

const ID_CHAIN: KeyChain = KeyChain::new(&[keys::ID]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
    Lxc,
}

impl ContainerRuntime {
    pub fn for_connection(conn: ConnectionType) -> Option<Self> {
        match conn {
            ConnectionType::Docker => Some(Self::Docker),
            ConnectionType::Podman => Some(Self::Podman),
            ConnectionType::Lxc => Some(Self::Lxc),
            ConnectionType::Ssh | ConnectionType::WinRm => None,
        }
    }

    pub fn program(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
            Self::Lxc => "lxc",
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Runs commands in, and copies files into, one container.
#[derive(Debug, Clone)]
pub struct ContainerCommunicator {
    runtime: ContainerRuntime,
    id: String,
}

impl ContainerCommunicator {
    pub fn new(runtime: ContainerRuntime, id: impl Into<String>) -> Self {
        Self {
            runtime,
            id: id.into(),
        }
    }

    /// Build a communicator for the container described by `metadata`.
    pub fn from_metadata(metadata: &BuildMetadata) -> Result<Self, ResolveError> {
        let conn = ConnectionType::from_metadata(metadata)?;
        let runtime = ContainerRuntime::for_connection(conn)
            .ok_or_else(|| ResolveError::UnsupportedConnectionType(conn.to_string()))?;
        let id = metadata
            .string(ID_CHAIN)
            .ok_or(ResolveError::UnknownInstanceId)?;
        Ok(Self::new(runtime, id))
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Arguments to the runtime CLI that run `command` in the container.
    pub fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = vec!["exec".to_string(), self.id.clone()];
        if self.runtime == ContainerRuntime::Lxc {
            args.push("--".to_string());
        }
        args.extend(["sh".to_string(), "-c".to_string(), command.to_string()]);
        args
    }

    /// Arguments to the runtime CLI that copy host file `source` to
    /// `destination` in the container.
    pub fn copy_args(&self, source: &str, destination: &str) -> Vec<String> {
        match self.runtime {
            ContainerRuntime::Docker | ContainerRuntime::Podman => vec![
                "cp".to_string(),
                source.to_string(),
                format!("{}:{destination}", self.id),
            ],
            ContainerRuntime::Lxc => vec![
                "file".to_string(),
                "push".to_string(),
                source.to_string(),
                format!("{}/{}", self.id, destination.trim_start_matches('/')),
            ],
        }
    }

    async fn run_cli(&self, args: &[String]) -> Result<RemoteExit, ExecError> {
        let output = Command::new(self.runtime.program())
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Communicator(format!("failed to run {}: {e}", self.runtime)))?;

        Ok(RemoteExit {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl Communicator for ContainerCommunicator {
    async fn start(&self, cmd: &RemoteCmd) -> Result<RemoteExit, ExecError> {
        tracing::debug!(runtime = %self.runtime, id = %self.id, "Running command in container");
        self.run_cli(&self.exec_args(&cmd.command)).await
    }

    async fn upload(&self, destination: &str, contents: &[u8]) -> Result<(), ExecError> {
        let staged = stage_upload(contents).await?;

        let source = staged.path().display().to_string();
        let exit = self.run_cli(&self.copy_args(&source, destination)).await?;
        if !exit.success() {
            return Err(ExecError::Communicator(format!(
                "{} copy to {destination} exited with status {}: {}",
                self.runtime,
                exit.exit_code,
                exit.stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Write `contents` to a host temp file for the runtime's copy command.
///
/// The copy keeps the file mode, so the staged file is made world-readable
/// instead of the owner-only default.
async fn stage_upload(contents: &[u8]) -> Result<tempfile::NamedTempFile, ExecError> {
    let staged = tempfile::NamedTempFile::new()?;
    tokio::fs::write(staged.path(), contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o644)).await?;
    }

    Ok(staged)
}
