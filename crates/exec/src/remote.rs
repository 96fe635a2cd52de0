//! Test execution on the instance through its remote agent.

use std::path::{Path, PathBuf};

use imagecheck_core::{Config, Redactor};

use crate::communicator::{Communicator, RemoteCmd};
use crate::error::ExecError;
use crate::subprocess::{report_output, ExecutionResult, Outcome};
use crate::transfer::{destination_for, upload_files};
use crate::ui::Ui;

/// Install, transfer and run, strictly in that order.
///
/// The install command must exit 0 before anything else happens. A failed
/// transfer aborts before the test run. The run itself fails on a non-zero
/// exit status or on any stderr content.
pub async fn run_remote(
    command: &str,
    config: &Config,
    comm: &dyn Communicator,
    ui: &dyn Ui,
) -> Result<ExecutionResult, ExecError> {
    if let Some(install) = config.install_command() {
        install_testinfra(&install, comm, ui).await?;
    }

    if let Some(dest) = config.destination_dir() {
        ui.say(&format!("Transferring test files to '{dest}' on the instance"));
        upload_files(comm, &config.test_files, dest)
            .await
            .inspect_err(|e| {
                ui.error("The test files could not be transferred to the instance");
                ui.error(&e.to_string());
            })?;
        warn_on_moved_files(&config.test_files, dest, ui);
    }

    ui.say("Beginning Testinfra validation of machine image");
    tracing::debug!(command, "Starting Testinfra on the instance");

    let exit = comm.start(&RemoteCmd::new(command)).await.inspect_err(|e| {
        ui.error(&format!("Testinfra execution on the instance could not be started: {e}"));
    })?;

    report_output(ui, &Redactor::default(), &exit.stdout, &exit.stderr);

    let outcome = match Outcome::from_exit_code(exit.exit_code) {
        Outcome::Passed if !exit.stderr.is_empty() => Outcome::ToolError { exit_code: 0 },
        other => other,
    };

    match outcome {
        Outcome::Passed => ui.say("Testinfra machine image testing is complete"),
        Outcome::Failed { exit_code } | Outcome::ToolError { exit_code } => {
            ui.error(&format!("Testinfra returned exit status: {exit_code}"));
        }
    }
    tracing::info!(exit_code = exit.exit_code, ?outcome, "Testinfra execution on the instance finished");

    Ok(ExecutionResult {
        outcome,
        stdout: exit.stdout,
        stderr: exit.stderr,
    })
}

/// The test command names the host-side paths, so uploaded files whose
/// instance path differs will not be found unless the command was adjusted.
fn warn_on_moved_files(files: &[PathBuf], dest: &str, ui: &dyn Ui) {
    let moved: Vec<String> = files
        .iter()
        .filter(|f| destination_for(f, dest).is_some_and(|d| Path::new(&d) != f.as_path()))
        .map(|f| f.display().to_string())
        .collect();
    if moved.is_empty() {
        return;
    }
    tracing::warn!(?moved, destination = dest, "Test command references host paths of transferred files");
    ui.say(&format!(
        "Warning: test files were transferred to '{dest}' but the test command references their host paths: {}",
        moved.join(", ")
    ));
}

async fn install_testinfra(
    install: &str,
    comm: &dyn Communicator,
    ui: &dyn Ui,
) -> Result<(), ExecError> {
    ui.say("Installing Testinfra on the instance");
    tracing::info!(command = install, "Running Testinfra installation command");

    let exit = comm
        .start(&RemoteCmd::new(install))
        .await
        .map_err(|e| ExecError::InstallFailed(e.to_string()))?;

    if !exit.success() {
        ui.error(&format!(
            "Testinfra install command returned exit status: {}",
            exit.exit_code
        ));
        if !exit.stderr.is_empty() {
            ui.error(&exit.stderr);
        }
        return Err(ExecError::InstallFailed(format!(
            "exit status {}",
            exit.exit_code
        )));
    }

    Ok(())
}
