//! Test tool installation verification.
//!
//! Runs `<pytest> -h` once before provisioning and inspects the usage text
//! for the pieces the invocation relies on.

use std::time::Duration;

use imagecheck_core::{Config, ExecSpec};

use crate::error::ExecError;
use crate::subprocess::{capture, RunOptions};

/// Option introduced in pytest 8.4.0, used as the minimum version marker.
const MIN_VERSION_MARKER: &str = "--force-short-summary";
/// Appears in the usage text once the Testinfra plugin is registered.
const TESTINFRA_MARKER: &str = "testinfra";
/// pytest-xdist's `-n` option.
const XDIST_MARKER: &str = " -n ";

const HELP_TIMEOUT: Duration = Duration::from_secs(60);

/// Optional plugins found in the test tool installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub xdist: bool,
}

/// Check the usage text of the test tool.
pub fn inspect_help(help: &str) -> Result<Capabilities, ExecError> {
    if help.trim().is_empty() {
        return Err(ExecError::Installation(
            "pytest help command returned no stdout".to_string(),
        ));
    }
    if !help.contains(MIN_VERSION_MARKER) {
        return Err(ExecError::Installation(
            "pytest is older than the minimum supported version 8.4.0".to_string(),
        ));
    }
    tracing::debug!("pytest version 8.4.0 or newer verified");

    if !help.contains(TESTINFRA_MARKER) {
        return Err(ExecError::Installation(
            "testinfra is not installed for the specified pytest".to_string(),
        ));
    }
    tracing::debug!("testinfra installation verified");

    Ok(Capabilities {
        xdist: help.contains(XDIST_MARKER),
    })
}

/// Verify the test tool installation used in remote mode.
///
/// Disables `parallel` when pytest-xdist is missing. Local mode runs the
/// tool on the instance, so nothing is checked there.
pub async fn verify_installation(config: &mut Config) -> Result<Capabilities, ExecError> {
    if config.local {
        tracing::info!("Testinfra installation is not verified for execution on the instance");
        return Ok(Capabilities::default());
    }

    tracing::info!(pytest = %config.pytest_path().display(), "Beginning Testinfra installation verification");

    let spec = ExecSpec::new(config.pytest_path(), vec!["-h".to_string()]);
    let captured = capture(&spec, &RunOptions::with_timeout(HELP_TIMEOUT)).await?;
    let capabilities = inspect_help(&captured.stdout)?;

    if config.parallel {
        if capabilities.xdist {
            tracing::info!("Tests will execute in parallel across the available CPUs");
        } else {
            tracing::warn!("pytest-xdist is not installed; parallel execution is disabled");
            config.parallel = false;
        }
    }

    tracing::info!("Testinfra installation verified");
    Ok(capabilities)
}
