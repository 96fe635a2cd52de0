//! Provisioner configuration record.
//!
//! Deserialised from JSON using the template field names, then normalised
//! and checked once by [`Config::prepare`]. Read-only afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Executable used when `pytest_path` is not supplied. Resolved via `PATH`.
pub const DEFAULT_PYTEST_PATH: &str = "py.test";

/// Highest verbosity level passed on to pytest.
pub const MAX_VERBOSITY: u32 = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Working directory for the test tool (remote mode only).
    pub chdir: Option<PathBuf>,
    /// Emit `--no-header --no-summary --disable-warnings`.
    pub compact: bool,
    /// Directory on the instance that test files are uploaded to (local mode).
    pub destination_dir: Option<String>,
    /// Extra environment for the test tool subprocess (remote mode only).
    pub env_vars: BTreeMap<String, String>,
    /// Command words run on the instance before testing (local mode).
    pub install_cmd: Vec<String>,
    pub keyword: Option<String>,
    /// Run the test tool on the instance itself through the communicator.
    pub local: bool,
    pub marker: Option<String>,
    /// Distribute tests with pytest-xdist (`-n auto`).
    pub parallel: bool,
    pub pytest_path: Option<PathBuf>,
    pub sudo: bool,
    pub sudo_user: Option<String>,
    /// Empty means pytest auto-discovery of `test_*` files.
    pub test_files: Vec<PathBuf>,
    pub verbose: u32,
}

impl Config {
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn pytest_path(&self) -> &Path {
        self.pytest_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_PYTEST_PATH))
    }

    pub fn keyword(&self) -> Option<&str> {
        non_empty(self.keyword.as_deref())
    }

    pub fn marker(&self) -> Option<&str> {
        non_empty(self.marker.as_deref())
    }

    pub fn sudo_user(&self) -> Option<&str> {
        non_empty(self.sudo_user.as_deref())
    }

    pub fn destination_dir(&self) -> Option<&str> {
        non_empty(self.destination_dir.as_deref())
    }

    pub fn chdir(&self) -> Option<&Path> {
        self.chdir.as_deref().filter(|p| !p.as_os_str().is_empty())
    }

    pub fn verbosity(&self) -> u32 {
        self.verbose.min(MAX_VERBOSITY)
    }

    /// The install command as a single shell string, if any.
    pub fn install_command(&self) -> Option<String> {
        let words: Vec<&str> = self
            .install_cmd
            .iter()
            .map(String::as_str)
            .filter(|w| !w.is_empty())
            .collect();
        (!words.is_empty()).then(|| words.join(" "))
    }

    /// Normalise defaults and check referenced paths.
    ///
    /// Installation of the test tool itself is verified separately, since
    /// that requires running it.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        match self.pytest_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => {
                if !path.is_file() {
                    tracing::error!(path = %path.display(), "Pytest executable is not an accessible file");
                    return Err(ConfigError::InvalidExecutable(path.to_path_buf()));
                }
            }
            _ => {
                tracing::debug!("Setting pytest_path to default '{DEFAULT_PYTEST_PATH}'");
                self.pytest_path = Some(PathBuf::from(DEFAULT_PYTEST_PATH));
            }
        }

        if self.local {
            self.log_local_options();
        } else {
            if let Some(dir) = self.chdir() {
                if !dir.is_dir() {
                    tracing::error!(path = %dir.display(), "chdir is not an accessible directory");
                    return Err(ConfigError::InvalidChdir(dir.to_path_buf()));
                }
                tracing::info!(path = %dir.display(), "Test execution will occur within this directory");
            }
            if !self.env_vars.is_empty() {
                let names: Vec<&str> = self.env_vars.keys().map(String::as_str).collect();
                tracing::info!(?names, "Environment variables will be set for the Testinfra execution");
            }
        }

        if self.compact {
            tracing::info!("Pytest report will be in compact form");
        }
        if let Some(keyword) = self.keyword() {
            tracing::info!(keyword, "Executing tests with keyword substring expression");
        }
        if let Some(marker) = self.marker() {
            tracing::info!(marker, "Executing tests with marker expression");
        }

        if self.sudo {
            tracing::info!("Testinfra will execute with sudo");
            if self.sudo_user().is_some() {
                tracing::warn!("The 'sudo_user' parameter is ignored when sudo is enabled");
            }
        } else if let Some(user) = self.sudo_user() {
            tracing::info!(user, "Testinfra will execute as user");
        }

        if self.verbose > MAX_VERBOSITY {
            tracing::warn!(
                requested = self.verbose,
                "Verbose level is higher than {MAX_VERBOSITY} and will be reset to {MAX_VERBOSITY}"
            );
            self.verbose = MAX_VERBOSITY;
        }

        if self.test_files.is_empty() {
            tracing::info!(
                "All files prefixed with 'test_' recursively discovered from the working directory \
                 will be considered test files"
            );
        }
        for file in &self.test_files {
            if !file.is_file() {
                tracing::error!(path = %file.display(), "Test file is not an accessible file");
                return Err(ConfigError::InvalidTestFile(file.clone()));
            }
        }

        tracing::debug!("Provisioner configuration prepared");
        Ok(())
    }

    fn log_local_options(&self) {
        tracing::info!("Test execution will occur on the instance used for building the image");
        if let Some(install) = self.install_command() {
            tracing::info!(command = %install, "Installation command runs on the instance before testing");
        }
        if let Some(dest) = self.destination_dir() {
            tracing::info!(destination = dest, "Test files will be copied to the instance before testing");
        }
        if self.parallel {
            tracing::info!("pytest-xdist is not verified for execution on the instance");
        }
        if !self.env_vars.is_empty() {
            tracing::warn!("env_vars cannot be set for execution on the instance and will be ignored");
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
