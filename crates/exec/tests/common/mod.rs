#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use imagecheck_exec::{Communicator, ExecError, RemoteCmd, RemoteExit};

/// One call made against the [`MockCommunicator`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Upload { destination: String, contents: Vec<u8> },
}

/// In-memory communicator that records calls and replays canned exits.
///
/// `start` pops the next queued response, defaulting to a clean exit 0.
/// Uploads whose destination ends with one of `failing_uploads` fail.
#[derive(Default)]
pub struct MockCommunicator {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<VecDeque<Result<RemoteExit, ExecError>>>,
    failing_uploads: Vec<String>,
}

impl MockCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<RemoteExit, ExecError>) -> Self {
        self.responses
            .lock()
            .expect("lock")
            .push_back(response);
        self
    }

    pub fn fail_upload(mut self, suffix: &str) -> Self {
        self.failing_uploads.push(suffix.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(cmd) => Some(cmd),
                Call::Upload { .. } => None,
            })
            .collect()
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload { destination, .. } => Some(destination),
                Call::Start(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Communicator for MockCommunicator {
    async fn start(&self, cmd: &RemoteCmd) -> Result<RemoteExit, ExecError> {
        self.calls
            .lock()
            .expect("lock")
            .push(Call::Start(cmd.command.clone()));
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(exit(0, "ok\n", "")))
    }

    async fn upload(&self, destination: &str, contents: &[u8]) -> Result<(), ExecError> {
        self.calls.lock().expect("lock").push(Call::Upload {
            destination: destination.to_string(),
            contents: contents.to_vec(),
        });
        if self.failing_uploads.iter().any(|s| destination.ends_with(s.as_str())) {
            return Err(ExecError::Communicator(format!("upload to {destination} refused")));
        }
        Ok(())
    }
}

pub fn exit(exit_code: i32, stdout: &str, stderr: &str) -> RemoteExit {
    RemoteExit {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Write `contents` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).expect("create file");
    f.write_all(contents.as_bytes()).expect("write file");
    path
}

/// Write an executable shell script standing in for pytest.
#[cfg(unix)]
pub fn write_fake_pytest(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, "py.test", &format!("#!/bin/sh\n{body}"));
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}
