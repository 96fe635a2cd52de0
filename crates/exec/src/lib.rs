//! `imagecheck-exec` -- execution of Testinfra invocations.
//!
//! Runs the [`imagecheck_core::Invocation`] either as a subprocess on this
//! host ([`subprocess`]) or on the instance through a [`Communicator`]
//! ([`remote`]), and reports progress to a build-log [`Ui`].

pub mod communicator;
pub mod container;
pub mod error;
pub mod provisioner;
pub mod remote;
pub mod subprocess;
pub mod transfer;
pub mod ui;
pub mod verify;

pub use communicator::{Communicator, RemoteCmd, RemoteExit};
pub use container::{ContainerCommunicator, ContainerRuntime};
pub use error::{ExecError, FileTransferFailure, TransferError};
pub use provisioner::Provisioner;
pub use subprocess::{run_exec_spec, ExecutionResult, Outcome, RunOptions};
pub use ui::{BufferUi, TracingUi, Ui, UiMessage};
pub use verify::Capabilities;
