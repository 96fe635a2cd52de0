//! Wiring from settings to a finished provisioner run.

use std::path::{Path, PathBuf};

use imagecheck_core::{BuildMetadata, Config, ConfigError, ConnectionType, MetadataError, ResolveError};
use imagecheck_exec::{
    Communicator, ContainerCommunicator, ExecError, ExecutionResult, Outcome, Provisioner,
    RunOptions, Ui,
};

use crate::settings::RunnerSettings;

/// All tests passed.
pub const EXIT_PASSED: u8 = 0;
/// The test tool ran and reported failures.
pub const EXIT_FAILED: u8 = 1;
/// Configuration, resolution or execution error.
pub const EXIT_ERROR: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Process exit code for a finished run.
pub fn exit_code(result: &Result<ExecutionResult, RunError>) -> u8 {
    match result {
        Ok(run) => match run.outcome {
            Outcome::Passed => EXIT_PASSED,
            Outcome::Failed { .. } => EXIT_FAILED,
            Outcome::ToolError { .. } => EXIT_ERROR,
        },
        Err(_) => EXIT_ERROR,
    }
}

/// Load documents, prepare and provision.
pub async fn run(
    settings: &RunnerSettings,
    ui: &dyn Ui,
    options: &RunOptions,
) -> Result<ExecutionResult, RunError> {
    let config = Config::from_json_str(&read(&settings.config_path).await?)?;
    let metadata = BuildMetadata::from_json_str(&read(&settings.metadata_path).await?)?;
    tracing::debug!(entries = metadata.len(), "Loaded build metadata");

    let mut provisioner = Provisioner::new(config);
    let capabilities = provisioner.prepare(!settings.skip_verify).await?;
    tracing::debug!(?capabilities, "Test tool capabilities");

    let communicator = if provisioner.config().local {
        container_communicator(&metadata)?
    } else {
        None
    };

    let result = provisioner
        .provision(
            &metadata,
            communicator.as_ref().map(|c| c as &dyn Communicator),
            ui,
            options,
        )
        .await?;

    Ok(result)
}

/// The communicator used for execution on the instance, if this host can
/// provide one for its connection type.
fn container_communicator(
    metadata: &BuildMetadata,
) -> Result<Option<ContainerCommunicator>, ResolveError> {
    let conn = ConnectionType::from_metadata(metadata)?;
    if !conn.is_container() {
        tracing::warn!(connection = %conn, "No communicator is available for this connection type");
        return Ok(None);
    }
    let comm = ContainerCommunicator::from_metadata(metadata)?;
    tracing::info!(runtime = %comm.runtime(), "Using container runtime as communicator");
    Ok(Some(comm))
}

async fn read(path: &Path) -> Result<String, RunError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RunError::Read {
            path: path.to_path_buf(),
            source,
        })
}
