use std::path::PathBuf;

/// Resolution-stage failures.
///
/// Every variant aborts before any external process is started. None of
/// them are retried.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown communicator connection type: no ConnType in build metadata")]
    UnknownConnectionType,

    #[error("Unsupported connection type '{0}'. Must be one of: ssh, winrm, docker, podman, lxc")]
    UnsupportedConnectionType(String),

    #[error("Unknown remote user")]
    UnknownUser,

    #[error("Unknown host address")]
    UnknownHost,

    #[error("Unknown host port")]
    UnknownPort,

    #[error("Unknown winrm password")]
    UnknownPassword,

    #[error("Unknown instance id")]
    UnknownInstanceId,

    #[error("No ssh authentication information available in build metadata")]
    NoCredentialsAvailable,

    #[error("Invalid {key} value and/or format: {value}")]
    InvalidTimeout { key: &'static str, value: String },

    #[error("Failed to write ephemeral ssh private key file: {0}")]
    KeyFile(#[source] std::io::Error),

    #[error("Communication arguments are required for execution against a remote instance")]
    MissingCommunication,
}

/// Failures while preparing the configuration record.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Pytest executable does not exist, is not a file, or cannot be accessed at: {}", .0.display())]
    InvalidExecutable(PathBuf),

    #[error("chdir does not exist, is not a directory, or cannot be accessed at: {}", .0.display())]
    InvalidChdir(PathBuf),

    #[error("Test file does not exist, is not a file, or cannot be accessed at: {}", .0.display())]
    InvalidTestFile(PathBuf),

    #[error("Failed to decode configuration: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures while decoding a build metadata document.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Build metadata must be a JSON object")]
    NotAnObject,

    #[error("Build metadata key '{key}' holds an unsupported {kind} value")]
    UnsupportedValue { key: String, kind: &'static str },

    #[error("Failed to decode build metadata: {0}")]
    Decode(#[from] serde_json::Error),
}
