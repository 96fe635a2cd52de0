//! `imagecheck` -- validate a freshly built machine image with Testinfra.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default | Description                                |
//! |---------------------------|----------|---------|--------------------------------------------|
//! | `IMAGECHECK_CONFIG`       | yes      | --      | Provisioner configuration JSON file        |
//! | `IMAGECHECK_METADATA`     | yes      | --      | Build metadata JSON file                   |
//! | `IMAGECHECK_TIMEOUT_SECS` | no       | --      | Kill the test run after this many seconds  |
//! | `IMAGECHECK_SKIP_VERIFY`  | no       | `false` | Skip the `pytest -h` installation check    |
//! | `IMAGECHECK_LOG_FORMAT`   | no       | `text`  | `json` for structured log lines            |
//! | `RUST_LOG`                | no       | `imagecheck=info` | Log filter                       |
//!
//! Exit status: `0` tests passed, `1` tests failed, `2` any other error.

use std::process::ExitCode;

use imagecheck_cli::runner::{self, EXIT_ERROR};
use imagecheck_cli::settings::RunnerSettings;
use imagecheck_exec::{Outcome, RunOptions, TracingUi};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let json = matches!(std::env::var("IMAGECHECK_LOG_FORMAT").as_deref(), Ok("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagecheck=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    let settings = match RunnerSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Invalid runner settings");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    tracing::info!(
        config = %settings.config_path.display(),
        metadata = %settings.metadata_path.display(),
        timeout_secs = settings.timeout.map(|t| t.as_secs()),
        skip_verify = settings.skip_verify,
        "Starting imagecheck",
    );

    let options = RunOptions {
        timeout: settings.timeout,
        ..RunOptions::default()
    };

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling test run");
            cancel.cancel();
        }
    });

    let ui = TracingUi;
    let result = runner::run(&settings, &ui, &options).await;

    match &result {
        Ok(run) if run.outcome == Outcome::Passed => tracing::info!("Machine image validation passed"),
        Ok(run) => tracing::warn!(outcome = ?run.outcome, "Machine image validation failed"),
        Err(e) => tracing::error!(error = %e, "Machine image validation could not be completed"),
    }

    ExitCode::from(runner::exit_code(&result))
}
