//! `imagecheck-core` -- communication resolution and command construction.
//!
//! Turns a prepared [`Config`] plus the [`BuildMetadata`] handed over by the
//! build pipeline into an [`Invocation`] of the Testinfra test tool. Nothing
//! in this crate spawns processes; the only filesystem side effect is the
//! ephemeral SSH key file written by [`credentials`].

pub mod command;
pub mod communication;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod metadata;
pub mod redact;

pub use command::{build_command, ExecSpec, Invocation};
pub use communication::{communication_for, resolve_communication, CommunicationArgs};
pub use config::Config;
pub use connection::ConnectionType;
pub use credentials::{resolve_ssh_auth, KeyFile, SshAuth};
pub use endpoint::{resolve_user_and_address, Endpoint};
pub use error::{ConfigError, MetadataError, ResolveError};
pub use metadata::{BuildMetadata, KeyChain, MetaValue};
pub use redact::Redactor;
