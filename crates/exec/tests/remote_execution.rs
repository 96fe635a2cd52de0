//! Integration tests for execution on the instance through a communicator.

mod common;

use assert_matches::assert_matches;

use imagecheck_core::Config;
use imagecheck_exec::remote::run_remote;
use imagecheck_exec::transfer::upload_files;
use imagecheck_exec::{BufferUi, ExecError, Outcome};

use common::{exit, write_file, Call, MockCommunicator};

fn install_config() -> Config {
    Config {
        local: true,
        install_cmd: vec!["pip".into(), "install".into(), "pytest-testinfra".into()],
        ..Config::default()
    }
}

// ---------------------------------------------------------------------------
// Test: ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn install_then_upload_then_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let test_file = write_file(dir.path(), "test_web.py", "def test_x(): pass\n");
    let config = Config {
        destination_dir: Some("/tmp/tests".into()),
        test_files: vec![test_file],
        ..install_config()
    };
    let comm = MockCommunicator::new();
    let ui = BufferUi::new();

    let result = run_remote("py.test /tmp/tests/test_web.py", &config, &comm, &ui)
        .await
        .expect("run");

    assert_eq!(result.outcome, Outcome::Passed);
    assert_eq!(
        comm.calls(),
        [
            Call::Start("pip install pytest-testinfra".into()),
            Call::Upload {
                destination: "/tmp/tests/test_web.py".into(),
                contents: b"def test_x(): pass\n".to_vec(),
            },
            Call::Start("py.test /tmp/tests/test_web.py".into()),
        ]
    );
}

#[tokio::test]
async fn moved_test_files_are_flagged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let test_file = write_file(dir.path(), "test_web.py", "");
    let config = Config {
        local: true,
        destination_dir: Some("/tmp/tests".into()),
        test_files: vec![test_file.clone()],
        ..Config::default()
    };
    let ui = BufferUi::new();

    run_remote("py.test", &config, &MockCommunicator::new(), &ui)
        .await
        .expect("run");

    let transcript = ui.transcript();
    assert!(transcript.contains("references their host paths"), "{transcript}");
    assert!(transcript.contains(&test_file.display().to_string()));
}

#[tokio::test]
async fn files_already_at_their_destination_are_not_flagged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        local: true,
        destination_dir: Some(dir.path().display().to_string()),
        test_files: vec![write_file(dir.path(), "test_web.py", "")],
        ..Config::default()
    };
    let ui = BufferUi::new();

    run_remote("py.test", &config, &MockCommunicator::new(), &ui)
        .await
        .expect("run");

    assert!(!ui.transcript().contains("references their host paths"));
}

#[tokio::test]
async fn failed_install_aborts_before_anything_else() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        destination_dir: Some("/tmp/tests".into()),
        test_files: vec![write_file(dir.path(), "test_a.py", "")],
        ..install_config()
    };
    let comm = MockCommunicator::new().respond(Ok(exit(1, "", "pip: not found")));
    let ui = BufferUi::new();

    assert_matches!(
        run_remote("py.test", &config, &comm, &ui).await,
        Err(ExecError::InstallFailed(_))
    );
    assert_eq!(comm.started(), ["pip install pytest-testinfra"]);
    assert!(comm.uploaded().is_empty());
}

#[tokio::test]
async fn install_start_error_is_install_failure() {
    let comm = MockCommunicator::new().respond(Err(ExecError::Communicator("agent gone".into())));
    assert_matches!(
        run_remote("py.test", &install_config(), &comm, &BufferUi::new()).await,
        Err(ExecError::InstallFailed(msg)) if msg.contains("agent gone")
    );
}

// ---------------------------------------------------------------------------
// Test: classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stderr_on_the_instance_is_a_failure() {
    let comm = MockCommunicator::new().respond(Ok(exit(0, "1 passed\n", "DeprecationWarning\n")));
    let config = Config {
        local: true,
        ..Config::default()
    };
    let ui = BufferUi::new();

    let result = run_remote("py.test", &config, &comm, &ui).await.expect("run");
    assert_eq!(result.outcome, Outcome::ToolError { exit_code: 0 });
    assert!(ui.errors().iter().any(|e| e.contains("DeprecationWarning")));
}

#[tokio::test]
async fn non_zero_exit_is_a_failure() {
    let comm = MockCommunicator::new().respond(Ok(exit(1, "1 failed\n", "")));
    let config = Config {
        local: true,
        ..Config::default()
    };
    let result = run_remote("py.test", &config, &comm, &BufferUi::new())
        .await
        .expect("run");
    assert_eq!(result.outcome, Outcome::Failed { exit_code: 1 });
    assert_matches!(
        result.into_result(),
        Err(ExecError::ToolNonZeroExit { exit_code: 1 })
    );
}

// ---------------------------------------------------------------------------
// Test: transfer aggregation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_failures_are_aggregated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = vec![
        write_file(dir.path(), "test_a.py", "a"),
        dir.path().join("test_missing.py"),
        write_file(dir.path(), "test_refused.py", "r"),
        write_file(dir.path(), "test_b.py", "b"),
    ];
    let comm = MockCommunicator::new().fail_upload("test_refused.py");

    let err = upload_files(&comm, &files, "/opt/tests")
        .await
        .expect_err("two files should fail");

    let failed: Vec<_> = err
        .failures
        .iter()
        .map(|f| f.path.file_name().and_then(|n| n.to_str()).expect("name").to_string())
        .collect();
    assert_eq!(failed, ["test_missing.py", "test_refused.py"]);

    // The remaining files are still transferred.
    assert_eq!(
        comm.uploaded(),
        [
            "/opt/tests/test_a.py",
            "/opt/tests/test_refused.py",
            "/opt/tests/test_b.py",
        ]
    );
}

#[tokio::test]
async fn transfer_failure_aborts_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        local: true,
        destination_dir: Some("/opt/tests".into()),
        test_files: vec![dir.path().join("test_missing.py")],
        ..Config::default()
    };
    let comm = MockCommunicator::new();

    assert_matches!(
        run_remote("py.test", &config, &comm, &BufferUi::new()).await,
        Err(ExecError::Transfer(e)) if e.failures.len() == 1
    );
    assert!(comm.started().is_empty());
}
