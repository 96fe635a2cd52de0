//! Test file transfer onto the instance.

use std::path::{Path, PathBuf};

use crate::communicator::Communicator;
use crate::error::{FileTransferFailure, TransferError};

/// Remote path of `file` inside `dest_dir`.
pub fn destination_for(file: &Path, dest_dir: &str) -> Option<String> {
    let name = file.file_name()?.to_string_lossy();
    Some(format!("{}/{name}", dest_dir.trim_end_matches('/')))
}

/// Upload every file to `<dest_dir>/<basename>`.
///
/// A failing file does not stop the remaining ones; all failures are
/// returned together.
pub async fn upload_files(
    comm: &dyn Communicator,
    files: &[PathBuf],
    dest_dir: &str,
) -> Result<(), TransferError> {
    let mut failures = Vec::new();

    for file in files {
        if let Err(reason) = upload_one(comm, file, dest_dir).await {
            tracing::warn!(path = %file.display(), %reason, "Test file will not be transferred");
            failures.push(FileTransferFailure {
                path: file.clone(),
                reason,
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(TransferError { failures })
    }
}

async fn upload_one(comm: &dyn Communicator, file: &Path, dest_dir: &str) -> Result<(), String> {
    let destination =
        destination_for(file, dest_dir).ok_or_else(|| "path has no file name".to_string())?;

    let contents = tokio::fs::read(file).await.map_err(|e| e.to_string())?;

    comm.upload(&destination, &contents)
        .await
        .map_err(|e| e.to_string())?;

    tracing::info!(path = %file.display(), destination = %destination, "Transferred test file");
    Ok(())
}
