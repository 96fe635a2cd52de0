//! Communication backend resolution.
//!
//! Produces the ordered `--hosts=...` and authentication arguments that tell
//! Testinfra how to reach the subject instance. Within ssh and winrm the
//! hosts token is always first, then auth tokens, then protocol extras: the
//! test tool's argument parser is order-sensitive for repeated flags.

use std::fmt;
use std::time::Duration;

use crate::connection::ConnectionType;
use crate::credentials::{resolve_ssh_auth, KeyFile, SshAuth};
use crate::endpoint::resolve_user_and_address;
use crate::error::ResolveError;
use crate::metadata::{keys, BuildMetadata, KeyChain};
use crate::redact::Redactor;

/// Always appended for ssh; the instance is freshly built, so its host key
/// is never known in advance.
pub const SSH_NO_STRICT_HOST_KEY_CHECKING: &str = "--ssh-extra-args=\"-o StrictHostKeyChecking=no\"";

/// Builder default for `SSHTimeout`; no query parameter is emitted for it.
pub const DEFAULT_SSH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Builder default for `WinRMTimeout`; no query parameter is emitted for it.
pub const DEFAULT_WINRM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const WINRM_PASSWORD_CHAIN: KeyChain = KeyChain::new(&[keys::WINRM_PASSWORD, keys::PASSWORD]);
const INSTANCE_ID_CHAIN: KeyChain = KeyChain::new(&[keys::ID]);

// ---------------------------------------------------------------------------
// CommunicationArgs
// ---------------------------------------------------------------------------

/// Resolved communication arguments plus what must outlive them.
///
/// Holds the secrets that appear inside the arguments (for redaction) and
/// the ephemeral key file guard, which deletes the key once the arguments
/// are no longer needed.
#[derive(Default)]
pub struct CommunicationArgs {
    args: Vec<String>,
    redactor: Redactor,
    key_file: Option<KeyFile>,
}

impl CommunicationArgs {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn key_file(&self) -> Option<&KeyFile> {
        self.key_file.as_ref()
    }

    pub fn into_parts(self) -> (Vec<String>, Redactor, Option<KeyFile>) {
        (self.args, self.redactor, self.key_file)
    }

    fn push(&mut self, arg: String) {
        self.args.push(arg);
    }
}

impl fmt::Debug for CommunicationArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked: Vec<_> = self
            .args
            .iter()
            .map(|arg| self.redactor.redact_arg(arg).into_owned())
            .collect();
        f.debug_struct("CommunicationArgs")
            .field("args", &masked)
            .field("key_file", &self.key_file)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Read `ConnType` from the metadata and resolve its arguments.
pub fn communication_for(metadata: &BuildMetadata) -> Result<CommunicationArgs, ResolveError> {
    let conn = ConnectionType::from_metadata(metadata).inspect_err(|e| {
        tracing::error!(error = %e, "Unable to determine the communicator connection type");
    })?;
    resolve_communication(conn, metadata)
}

/// Resolve the communication arguments for `conn`.
pub fn resolve_communication(
    conn: ConnectionType,
    metadata: &BuildMetadata,
) -> Result<CommunicationArgs, ResolveError> {
    tracing::info!(connection = %conn, "Testinfra communicating via {conn} connection type");

    let comm = match conn {
        ConnectionType::Ssh => ssh_args(metadata)?,
        ConnectionType::WinRm => winrm_args(metadata)?,
        ConnectionType::Docker | ConnectionType::Podman | ConnectionType::Lxc => {
            container_args(conn, metadata)?
        }
    };

    tracing::debug!(args = ?comm, "Determined communicator arguments");
    Ok(comm)
}

fn ssh_args(metadata: &BuildMetadata) -> Result<CommunicationArgs, ResolveError> {
    let endpoint = resolve_user_and_address(ConnectionType::Ssh, metadata)?;
    let mut address = endpoint.host_port();

    if let Some(timeout) = metadata.duration(keys::SSH_TIMEOUT)? {
        if timeout != DEFAULT_SSH_TIMEOUT {
            let secs = rounded_secs(timeout);
            address = format!("{address}?timeout={secs}");
            tracing::info!(timeout_secs = secs, "Testinfra ssh timeout set to a custom value");
        }
    }

    let auth = resolve_ssh_auth(metadata)?;
    tracing::info!(mode = %auth.mode(), "Determined SSH authentication");

    let mut comm = CommunicationArgs::default();
    match auth {
        SshAuth::Password(password) => {
            tracing::warn!(
                "SSH password authentication is typically unsupported by the Python SSH backends; \
                 consider a passwordless private key or SSH agent instead"
            );
            comm.push(format!("--hosts=ssh://{}:{password}@{address}", endpoint.user));
            comm.redactor.add(password);
        }
        SshAuth::PrivateKey(key) => {
            comm.push(format!("--hosts=ssh://{}@{address}", endpoint.user));
            let path = key.path().display().to_string();
            comm.push(format!("--ssh-identity-file={path}"));
            if key.is_ephemeral() {
                comm.redactor.add(path);
            }
            comm.key_file = Some(key);
        }
        SshAuth::Agent => {
            comm.push(format!("--hosts=ssh://{}@{address}", endpoint.user));
        }
    }
    comm.push(SSH_NO_STRICT_HOST_KEY_CHECKING.to_string());

    Ok(comm)
}

fn winrm_args(metadata: &BuildMetadata) -> Result<CommunicationArgs, ResolveError> {
    let endpoint = resolve_user_and_address(ConnectionType::WinRm, metadata)?;

    let password = metadata.string(WINRM_PASSWORD_CHAIN).ok_or_else(|| {
        tracing::error!("WinRM communicator password could not be determined from build metadata");
        ResolveError::UnknownPassword
    })?;

    let query = winrm_query(metadata)?;
    let suffix = if query.is_empty() {
        String::new()
    } else {
        format!("?{}", query.join("&"))
    };

    let mut comm = CommunicationArgs::default();
    comm.push(format!(
        "--hosts=winrm://{}:{password}@{}{suffix}",
        endpoint.user,
        endpoint.host_port(),
    ));
    comm.redactor.add(password);

    Ok(comm)
}

/// Optional pywinrm query parameters, in emission order.
fn winrm_query(metadata: &BuildMetadata) -> Result<Vec<String>, ResolveError> {
    let mut query = Vec::new();

    if metadata.flag(keys::WINRM_USE_SSL) == Some(false) {
        query.push("no_ssl=true".to_string());
        tracing::info!("WinRM SSL disabled for Testinfra backend");
    }

    if metadata.flag(keys::WINRM_INSECURE) == Some(true) {
        query.push("no_verify_ssl=true".to_string());
        tracing::info!("WinRM SSL verification disabled for Testinfra backend");
    }

    if let Some(timeout) = metadata.duration(keys::WINRM_TIMEOUT)? {
        if timeout != DEFAULT_WINRM_TIMEOUT {
            let secs = rounded_secs(timeout);
            query.push(format!("read_timeout_sec={secs}"));
            tracing::info!(timeout_secs = secs, "Testinfra winrm timeout set to a custom value");
        }
    }

    Ok(query)
}

fn container_args(
    conn: ConnectionType,
    metadata: &BuildMetadata,
) -> Result<CommunicationArgs, ResolveError> {
    let id = metadata.string(INSTANCE_ID_CHAIN).ok_or_else(|| {
        tracing::error!(connection = %conn, "Instance id could not be determined");
        ResolveError::UnknownInstanceId
    })?;

    let mut comm = CommunicationArgs::default();
    comm.push(format!("--hosts={}://{id}", conn.as_str()));
    Ok(comm)
}

fn rounded_secs(d: Duration) -> u64 {
    d.as_secs_f64().round_ties_even() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
