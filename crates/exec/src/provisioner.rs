//! Top-level orchestration of one Testinfra run.

use std::future::Future;

use imagecheck_core::{build_command, communication_for, BuildMetadata, Config, Invocation};

use crate::communicator::Communicator;
use crate::error::ExecError;
use crate::remote::run_remote;
use crate::subprocess::{run_exec_spec, ExecutionResult, RunOptions};
use crate::ui::Ui;
use crate::verify::{verify_installation, Capabilities};

pub struct Provisioner {
    config: Config,
}

impl Provisioner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalise and check the configuration, then optionally verify the
    /// test tool installation.
    pub async fn prepare(&mut self, verify: bool) -> Result<Capabilities, ExecError> {
        self.config.prepare()?;

        let capabilities = if verify {
            verify_installation(&mut self.config).await?
        } else {
            tracing::info!("Skipping Testinfra installation verification");
            Capabilities::default()
        };

        tracing::info!("Provisioner preparation complete");
        Ok(capabilities)
    }

    /// Run the tests against (or on) the instance described by `metadata`.
    ///
    /// A returned `Ok` may still carry a failing outcome; use
    /// [`ExecutionResult::into_result`] to treat that as an error. Any
    /// ephemeral key file is removed before this returns.
    pub async fn provision(
        &self,
        metadata: &BuildMetadata,
        comm: Option<&dyn Communicator>,
        ui: &dyn Ui,
        options: &RunOptions,
    ) -> Result<ExecutionResult, ExecError> {
        ui.say("Testing machine image with Testinfra");

        let communication = if self.config.local {
            None
        } else {
            let resolved = communication_for(metadata).inspect_err(|e| {
                ui.error(&format!("Could not determine the communication configuration: {e}"));
            })?;
            Some(resolved)
        };

        let invocation = build_command(&self.config, communication).inspect_err(|e| {
            ui.error(&format!("The Testinfra execution command could not be determined: {e}"));
        })?;

        tracing::info!(
            kind = invocation.kind(),
            command = %invocation.redacted(),
            "Complete Testinfra command",
        );

        let result = match &invocation {
            Invocation::Remote(spec) => run_exec_spec(spec, options, ui).await,
            Invocation::Local(command) => match comm {
                Some(comm) => with_limits(run_remote(command, &self.config, comm, ui), options).await,
                None => {
                    ui.error("No communicator is available for execution on the instance");
                    Err(ExecError::NoCommunicator)
                }
            },
        };
        drop(invocation);

        match &result {
            Ok(run) if run.outcome.is_passed() => ui.say("Testinfra provisioning complete"),
            _ => ui.error("The Pytest Testinfra execution failed"),
        }

        result
    }
}

/// Apply the timeout and cancellation of `options` to a remote agent run.
async fn with_limits<F>(run: F, options: &RunOptions) -> Result<ExecutionResult, ExecError>
where
    F: Future<Output = Result<ExecutionResult, ExecError>>,
{
    let limited = async {
        match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ExecError::Timeout(limit)),
            },
            None => run.await,
        }
    };

    tokio::select! {
        result = limited => result,
        () = options.cancel.cancelled() => Err(ExecError::Cancelled),
    }
}
