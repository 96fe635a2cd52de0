//! SSH credential resolution.
//!
//! Chooses exactly one authentication mode per invocation, in priority
//! order: password, private key or certificate file, agent, and finally a
//! private key synthesised from raw key material into an ephemeral file.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::ResolveError;
use crate::metadata::{keys, BuildMetadata, KeyChain};

/// Filename prefix of synthesised key files.
pub const KEY_FILE_PREFIX: &str = "testinfra-key";

const PASSWORD_CHAIN: KeyChain = KeyChain::new(&[keys::SSH_PASSWORD, keys::PASSWORD]);
const KEY_FILE_CHAIN: KeyChain =
    KeyChain::new(&[keys::SSH_PRIVATE_KEY_FILE, keys::SSH_CERTIFICATE_FILE]);
const RAW_KEY_CHAIN: KeyChain = KeyChain::new(&[keys::SSH_PRIVATE_KEY]);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Authentication mode without its secret, for logging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Password,
    Agent,
    PrivateKey,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Agent => "agent",
            Self::PrivateKey => "privateKey",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A private key file handed to the test tool.
pub enum KeyFile {
    /// Path supplied by the build pipeline; owned by the pipeline.
    Provided(PathBuf),
    /// File written from raw key material. Deleted when dropped.
    Ephemeral(TempPath),
}

impl KeyFile {
    pub fn path(&self) -> &Path {
        match self {
            Self::Provided(path) => path.as_path(),
            Self::Ephemeral(temp) => &**temp,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral(_))
    }
}

impl fmt::Debug for KeyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provided(path) => f.debug_tuple("Provided").field(path).finish(),
            Self::Ephemeral(_) => f.write_str("Ephemeral(..)"),
        }
    }
}

/// Resolved SSH authentication.
pub enum SshAuth {
    Password(String),
    PrivateKey(KeyFile),
    Agent,
}

impl SshAuth {
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Password(_) => AuthMode::Password,
            Self::PrivateKey(_) => AuthMode::PrivateKey,
            Self::Agent => AuthMode::Agent,
        }
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(..)"),
            Self::PrivateKey(key) => f.debug_tuple("PrivateKey").field(key).finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Determine SSH authentication from build metadata.
///
/// Only the last fallback touches the filesystem: raw key material is
/// written to a uniquely named temp file whose handle is closed before
/// returning. A failed write removes the partial file and is not retried.
pub fn resolve_ssh_auth(metadata: &BuildMetadata) -> Result<SshAuth, ResolveError> {
    if let Some(password) = metadata.string(PASSWORD_CHAIN) {
        return Ok(SshAuth::Password(password.to_string()));
    }

    if let Some(path) = metadata.string(KEY_FILE_CHAIN) {
        return Ok(SshAuth::PrivateKey(KeyFile::Provided(PathBuf::from(path))));
    }

    if metadata.flag(keys::SSH_AGENT_AUTH).unwrap_or(false) {
        return Ok(SshAuth::Agent);
    }

    let Some(material) = metadata.string(RAW_KEY_CHAIN) else {
        tracing::error!("No SSH authentication information was available in build metadata");
        return Err(ResolveError::NoCredentialsAvailable);
    };

    let temp = write_ephemeral_key(material)?;
    tracing::debug!("Wrote SSH private key material to an ephemeral key file");
    Ok(SshAuth::PrivateKey(KeyFile::Ephemeral(temp)))
}

fn write_ephemeral_key(material: &str) -> Result<TempPath, ResolveError> {
    write_ephemeral_key_in(&std::env::temp_dir(), material)
}

fn write_ephemeral_key_in(dir: &Path, material: &str) -> Result<TempPath, ResolveError> {
    let mut file = tempfile::Builder::new()
        .prefix(KEY_FILE_PREFIX)
        .tempfile_in(dir)
        .map_err(ResolveError::KeyFile)?;

    // On error `file` is dropped, which removes the partial file.
    file.write_all(material.as_bytes())
        .map_err(ResolveError::KeyFile)?;
    // Surfaces deferred write errors; closing in `into_temp_path` cannot.
    file.as_file().sync_all().map_err(ResolveError::KeyFile)?;

    Ok(file.into_temp_path())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
