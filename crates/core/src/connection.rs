//! Connection types supported by the Testinfra backends.

use std::fmt;
use std::str::FromStr;

use crate::error::ResolveError;
use crate::metadata::{keys, BuildMetadata, KeyChain};

/// Transport used to reach the subject instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Ssh,
    WinRm,
    Docker,
    Podman,
    Lxc,
}

impl ConnectionType {
    pub const ALL: [Self; 5] = [Self::Ssh, Self::WinRm, Self::Docker, Self::Podman, Self::Lxc];

    /// Wire-format name, also used as the `--hosts` URL scheme.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::WinRm => "winrm",
            Self::Docker => "docker",
            Self::Podman => "podman",
            Self::Lxc => "lxc",
        }
    }

    /// Container transports address the instance by id instead of host/port.
    pub fn is_container(self) -> bool {
        matches!(self, Self::Docker | Self::Podman | Self::Lxc)
    }

    /// Read and validate the `ConnType` entry of the build metadata.
    pub fn from_metadata(metadata: &BuildMetadata) -> Result<Self, ResolveError> {
        let raw = metadata
            .string(KeyChain::new(&[keys::CONN_TYPE]))
            .ok_or(ResolveError::UnknownConnectionType)?;
        raw.parse()
    }
}

impl FromStr for ConnectionType {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(Self::Ssh),
            "winrm" => Ok(Self::WinRm),
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "lxc" => Ok(Self::Lxc),
            other => {
                tracing::debug!(value = %other, "String could not be converted to a connection type");
                Err(ResolveError::UnsupportedConnectionType(other.to_string()))
            }
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
