//! Transient JSON file carrying complex script parameters
//!
//! The file lives exactly as long as the `ParamsFile` value: it is created
//! before the script is spawned and removed on drop, whichever way the
//! execution ends.

use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::ExecutionError;
use crate::constants::PARAMS_FILE_PREFIX;

#[derive(Debug)]
pub struct ParamsFile {
    path: PathBuf,
}

impl ParamsFile {
    /// Serialize `params` into a new, uniquely named file under `dir`
    pub async fn create(dir: &Path, params: &Value) -> Result<Self, ExecutionError> {
        let content = serde_json::to_vec_pretty(params)
            .map_err(|e| ExecutionError::ParamsFile(e.to_string()))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ExecutionError::ParamsFile(e.to_string()))?;

        let path = dir.join(unique_file_name());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ExecutionError::ParamsFile(e.to_string()))?;

        // From here on the drop guard owns cleanup, including a failed write
        let params_file = Self { path };
        let written = async {
            file.write_all(&content).await?;
            file.flush().await
        }
        .await;
        drop(file);
        written.map_err(|e| ExecutionError::ParamsFile(e.to_string()))?;

        log::debug!("Wrote parameters file {}", params_file.path.display());
        Ok(params_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ParamsFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed parameters file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove parameters file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// `opgate-params-<unix millis>-<random>.json`
fn unique_file_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}.json",
        PARAMS_FILE_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..12]
    )
}
