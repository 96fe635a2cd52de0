//! Effective user and address of the subject instance.

use crate::connection::ConnectionType;
use crate::error::ResolveError;
use crate::metadata::{keys, BuildMetadata, KeyChain};

/// Metadata keys consulted for one connection type, most specific first.
struct EndpointKeys {
    user: KeyChain,
    host: KeyChain,
    port: KeyChain,
}

const SSH_KEYS: EndpointKeys = EndpointKeys {
    user: KeyChain::new(&[keys::SSH_USERNAME, keys::USER]),
    host: KeyChain::new(&[keys::SSH_HOST, keys::HOST]),
    port: KeyChain::new(&[keys::SSH_PORT, keys::PORT]),
};

const WINRM_KEYS: EndpointKeys = EndpointKeys {
    user: KeyChain::new(&[keys::WINRM_USER, keys::USER]),
    host: KeyChain::new(&[keys::WINRM_HOST, keys::HOST]),
    port: KeyChain::new(&[keys::WINRM_PORT, keys::PORT]),
};

const GENERIC_KEYS: EndpointKeys = EndpointKeys {
    user: KeyChain::new(&[keys::USER]),
    host: KeyChain::new(&[keys::HOST]),
    port: KeyChain::new(&[keys::PORT]),
};

fn keys_for(conn: ConnectionType) -> &'static EndpointKeys {
    match conn {
        ConnectionType::Ssh => &SSH_KEYS,
        ConnectionType::WinRm => &WINRM_KEYS,
        ConnectionType::Docker | ConnectionType::Podman | ConnectionType::Lxc => &GENERIC_KEYS,
    }
}

/// Remote user plus network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// `host:port`
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Determine user, host and port for `conn`. Performs no IO.
pub fn resolve_user_and_address(
    conn: ConnectionType,
    metadata: &BuildMetadata,
) -> Result<Endpoint, ResolveError> {
    let keys = keys_for(conn);

    let user = metadata.string(keys.user).ok_or_else(|| {
        tracing::error!(connection = %conn, "Remote user could not be determined from build metadata");
        ResolveError::UnknownUser
    })?;

    let host = metadata.string(keys.host).ok_or_else(|| {
        tracing::error!(connection = %conn, "Host address could not be determined from build metadata");
        ResolveError::UnknownHost
    })?;

    let port = metadata.port(keys.port).ok_or_else(|| {
        tracing::error!(connection = %conn, "Host port could not be determined from build metadata");
        ResolveError::UnknownPort
    })?;

    let endpoint = Endpoint {
        user: user.to_string(),
        host: host.to_string(),
        port,
    };

    tracing::debug!(
        user = %endpoint.user,
        address = %endpoint.host_port(),
        "Determined connection endpoint",
    );

    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn generic_keys_are_used_as_fallback() {
        let md = BuildMetadata::new()
            .with(keys::USER, "me")
            .with(keys::HOST, "192.168.0.1")
            .with(keys::PORT, 22);
        let endpoint = resolve_user_and_address(ConnectionType::Ssh, &md).expect("resolve");
        assert_eq!(endpoint.user, "me");
        assert_eq!(endpoint.host_port(), "192.168.0.1:22");
    }

    #[test]
    fn ssh_specific_keys_win() {
        let md = BuildMetadata::new()
            .with(keys::SSH_USERNAME, "sshuser")
            .with(keys::SSH_HOST, "10.0.0.5")
            .with(keys::SSH_PORT, 2222)
            .with(keys::USER, "me")
            .with(keys::HOST, "192.168.0.1")
            .with(keys::PORT, 22);
        let endpoint = resolve_user_and_address(ConnectionType::Ssh, &md).expect("resolve");
        assert_eq!(
            endpoint,
            Endpoint {
                user: "sshuser".into(),
                host: "10.0.0.5".into(),
                port: 2222,
            }
        );
    }

    #[test]
    fn winrm_keys_do_not_read_ssh_keys() {
        let md = BuildMetadata::new()
            .with(keys::SSH_USERNAME, "sshuser")
            .with(keys::WINRM_USER, "winuser")
            .with(keys::WINRM_HOST, "h")
            .with(keys::WINRM_PORT, 5986);
        let endpoint = resolve_user_and_address(ConnectionType::WinRm, &md).expect("resolve");
        assert_eq!(endpoint.user, "winuser");
        assert_eq!(endpoint.host_port(), "h:5986");
    }

    #[test]
    fn wide_generic_port_is_accepted() {
        let md = BuildMetadata::new()
            .with(keys::USER, "me")
            .with(keys::HOST, "h")
            .with(keys::PORT, 22i64);
        let endpoint = resolve_user_and_address(ConnectionType::Ssh, &md).expect("resolve");
        assert_eq!(endpoint.port, 22);
    }

    #[test]
    fn missing_values_fail_in_order() {
        let mut md = BuildMetadata::new()
            .with(keys::USER, "me")
            .with(keys::HOST, "192.168.0.1");
        assert_matches!(
            resolve_user_and_address(ConnectionType::Ssh, &md),
            Err(ResolveError::UnknownPort)
        );

        md.remove(keys::HOST);
        assert_matches!(
            resolve_user_and_address(ConnectionType::Ssh, &md),
            Err(ResolveError::UnknownHost)
        );

        md.remove(keys::USER);
        assert_matches!(
            resolve_user_and_address(ConnectionType::Ssh, &md),
            Err(ResolveError::UnknownUser)
        );
    }
}
