use std::path::PathBuf;
use std::time::Duration;

/// Runner settings loaded from environment variables.
///
/// | Env Var                   | Required | Default |
/// |---------------------------|----------|---------|
/// | `IMAGECHECK_CONFIG`       | yes      | --      |
/// | `IMAGECHECK_METADATA`     | yes      | --      |
/// | `IMAGECHECK_TIMEOUT_SECS` | no       | none    |
/// | `IMAGECHECK_SKIP_VERIFY`  | no       | `false` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Path to the provisioner configuration JSON document.
    pub config_path: PathBuf,
    /// Path to the build metadata JSON document.
    pub metadata_path: PathBuf,
    /// Wall-clock limit for the test run.
    pub timeout: Option<Duration>,
    /// Skip the `pytest -h` installation check.
    pub skip_verify: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl RunnerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .ok_or(SettingsError::Missing(name))
        };

        let config_path = required("IMAGECHECK_CONFIG")?;
        let metadata_path = required("IMAGECHECK_METADATA")?;

        let timeout = match lookup("IMAGECHECK_TIMEOUT_SECS") {
            None => None,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) | Err(_) => {
                    return Err(SettingsError::Invalid {
                        name: "IMAGECHECK_TIMEOUT_SECS",
                        expected: "a positive integer",
                        value: raw,
                    })
                }
                Ok(secs) => Some(Duration::from_secs(secs)),
            },
        };

        let skip_verify = match lookup("IMAGECHECK_SKIP_VERIFY").as_deref().map(str::trim) {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(SettingsError::Invalid {
                    name: "IMAGECHECK_SKIP_VERIFY",
                    expected: "true or false",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            config_path,
            metadata_path,
            timeout,
            skip_verify,
        })
    }
}
