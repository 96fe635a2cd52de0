//! Test tool invocation assembly.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::communication::CommunicationArgs;
use crate::config::Config;
use crate::credentials::KeyFile;
use crate::error::ResolveError;
use crate::redact::Redactor;

/// Flags emitted for a compact report.
pub const COMPACT_FLAGS: [&str; 3] = ["--no-header", "--no-summary", "--disable-warnings"];

// ---------------------------------------------------------------------------
// ExecSpec
// ---------------------------------------------------------------------------

/// A host-level subprocess description for the test tool.
///
/// Owns the secrets embedded in `args` and, for synthesised keys, the
/// ephemeral key file guard. The key file lives exactly as long as the spec.
pub struct ExecSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    redactor: Redactor,
    key_file: Option<KeyFile>,
}

impl ExecSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: BTreeMap::new(),
            redactor: Redactor::default(),
            key_file: None,
        }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn key_file(&self) -> Option<&KeyFile> {
        self.key_file.as_ref()
    }

    /// Command line with every secret masked, for logs and UI output.
    pub fn redacted(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|a| self.redactor.redact_arg(a).into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for ExecSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<_> = self
            .args
            .iter()
            .map(|a| self.redactor.redact_arg(a).into_owned())
            .collect();
        let env: Vec<_> = self.env.keys().collect();
        f.debug_struct("ExecSpec")
            .field("program", &self.program)
            .field("args", &args)
            .field("working_dir", &self.working_dir)
            .field("env", &env)
            .field("key_file", &self.key_file)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// How the test tool is run.
#[derive(Debug)]
pub enum Invocation {
    /// Command string executed on the instance through its remote agent.
    Local(String),
    /// Subprocess on this host that reaches the instance over the network.
    Remote(ExecSpec),
}

impl Invocation {
    pub fn redacted(&self) -> String {
        match self {
            Self::Local(command) => command.clone(),
            Self::Remote(spec) => spec.redacted(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
        }
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Optional flags followed by the test files, in emission order.
pub fn optional_args(config: &Config) -> Vec<String> {
    let mut args = Vec::new();

    if config.compact {
        args.extend(COMPACT_FLAGS.iter().map(|f| f.to_string()));
    }
    if let Some(keyword) = config.keyword() {
        args.push("-k".to_string());
        args.push(format!("\"{keyword}\""));
    }
    if let Some(marker) = config.marker() {
        args.push("-m".to_string());
        args.push(format!("\"{marker}\""));
    }
    if config.parallel {
        args.push("-n".to_string());
        args.push("auto".to_string());
    }
    if config.sudo {
        args.push("--sudo".to_string());
    } else if let Some(user) = config.sudo_user() {
        args.push(format!("--sudo-user={user}"));
    }
    let level = config.verbosity() as usize;
    if level > 0 {
        args.push(format!("-{}", "v".repeat(level)));
    }

    args.extend(config.test_files.iter().map(|p| p.display().to_string()));
    args
}

/// Assemble the invocation for `config`.
///
/// Remote mode requires `communication`; it is ignored in local mode.
pub fn build_command(
    config: &Config,
    communication: Option<CommunicationArgs>,
) -> Result<Invocation, ResolveError> {
    if config.local {
        let mut words = vec![config.pytest_path().display().to_string()];
        words.extend(optional_args(config));
        return Ok(Invocation::Local(words.join(" ")));
    }

    let (mut args, redactor, key_file) = communication
        .ok_or(ResolveError::MissingCommunication)?
        .into_parts();
    args.extend(optional_args(config));

    let mut spec = ExecSpec::new(config.pytest_path(), args);
    spec.working_dir = config.chdir().map(|p| p.to_path_buf());
    spec.env = config.env_vars.clone();
    spec.redactor = redactor;
    spec.key_file = key_file;

    Ok(Invocation::Remote(spec))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
