//! Process execution bridge for privileged scripts
//!
//! Runs a named script file through the configured interpreter:
//! - arguments go into the process argv as discrete `-Key value` entries,
//!   never through a shell or a concatenated command string
//! - structured parameters travel in a transient JSON file passed as
//!   `-ParamsFile <path>`
//! - stdout is streamed to an optional progress sender as it arrives
//! - a timeout bounds both the exit and the draining of its output; on
//!   expiry the child is killed and the timeout outcome wins
//! - a JSON object in stdout is returned as the structured result

pub mod extract;
pub mod params_file;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::constants::{DEFAULT_INTERPRETER, DEFAULT_INTERPRETER_ARGS, PARAMS_FILE_ARG};
use crate::models::{ErrorKind, ExecutionRequest, ExecutionResult, ProgressSender, ScriptOutput};
use extract::{BraceSpanExtractor, ResultExtractor};
use params_file::ParamsFile;

/// Read size for stdout/stderr pumping
const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The interpreter could not be started
    #[error("Failed to start script: {0}")]
    Spawn(String),

    /// Non-zero exit; carries stderr, or stdout when stderr is empty
    #[error("{0}")]
    Script(String),

    #[error("Script execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Failed to write parameters file: {0}")]
    ParamsFile(String),

    #[error("Invalid argument name '{0}'")]
    InvalidArgument(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Spawn(_) | ExecutionError::ParamsFile(_) => ErrorKind::Spawn,
            ExecutionError::Script(_) | ExecutionError::InvalidArgument(_) => ErrorKind::Script,
            ExecutionError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Interpreter invocation and scratch location
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub interpreter: String,
    /// Flags placed between the interpreter and the script path
    pub interpreter_args: Vec<String>,
    /// Where parameter files are written
    pub temp_dir: PathBuf,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            interpreter_args: DEFAULT_INTERPRETER_ARGS.iter().map(|s| s.to_string()).collect(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Clone)]
pub struct ProcessBridge {
    settings: BridgeSettings,
    extractor: Arc<dyn ResultExtractor>,
}

impl std::fmt::Debug for ProcessBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBridge")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProcessBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self::with_extractor(settings, Arc::new(BraceSpanExtractor))
    }

    pub fn with_extractor(settings: BridgeSettings, extractor: Arc<dyn ResultExtractor>) -> Self {
        Self { settings, extractor }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Run the request and flatten the outcome into an [`ExecutionResult`]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        match self.try_execute(request).await {
            Ok(output) => ExecutionResult {
                success: true,
                output: Some(output.output),
                parsed_result: output.parsed_result,
                error: None,
            },
            Err(e) => ExecutionResult {
                success: false,
                output: None,
                parsed_result: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Run the request. The parameters file, if any, is gone by the time
    /// this returns, on every path.
    pub async fn try_execute(&self, request: ExecutionRequest) -> Result<ScriptOutput, ExecutionError> {
        if let Some(key) = request.simple_args.keys().find(|k| !is_parameter_name(k)) {
            return Err(ExecutionError::InvalidArgument(key.clone()));
        }

        let params_file = match &request.complex_params {
            Some(params) => Some(ParamsFile::create(&self.settings.temp_dir, params).await?),
            None => None,
        };

        let mut cmd = Command::new(&self.settings.interpreter);
        cmd.args(&self.settings.interpreter_args)
            .arg(&request.script_path);
        if let Some(ref file) = params_file {
            cmd.arg(PARAMS_FILE_ARG).arg(file.path());
        }
        for (key, value) in &request.simple_args {
            cmd.arg(format!("-{}", key)).arg(value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::info!(
            "Executing {} via {} ({} args, params file: {}, timeout: {}ms)",
            request.script_path.display(),
            self.settings.interpreter,
            request.simple_args.len(),
            params_file.is_some(),
            request.timeout_ms
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

        let mut stdout_task = tokio::spawn(pump_stdout(child.stdout.take(), request.progress.clone()));
        let mut stderr_task = tokio::spawn(read_all(child.stderr.take()));

        // Exit alone is not completion: a descendant can keep the pipes open,
        // so one deadline covers the wait and the output drain.
        let completion = async {
            let status = child.wait().await;
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (status, stdout, stderr)
        };

        let finished = if request.timeout_ms > 0 {
            tokio::time::timeout(Duration::from_millis(request.timeout_ms), completion)
                .await
                .ok()
        } else {
            Some(completion.await)
        };

        let Some((status, stdout, stderr)) = finished else {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill timed out script: {}", e);
            }
            stdout_task.abort();
            stderr_task.abort();
            log::warn!(
                "{} timed out after {}ms",
                request.script_path.display(),
                request.timeout_ms
            );
            return Err(ExecutionError::Timeout(request.timeout_ms));
        };
        let status = status.map_err(|e| ExecutionError::Spawn(e.to_string()))?;
        drop(params_file);

        if status.success() {
            let parsed_result = self.extractor.extract(&stdout);
            return Ok(ScriptOutput {
                output: stdout,
                parsed_result,
            });
        }

        log::warn!("{} exited with {}", request.script_path.display(), status);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Script exited with {}", status));
        Err(ExecutionError::Script(message))
    }
}

/// PowerShell-style parameter name: letter or underscore, then word characters
fn is_parameter_name(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Accumulate stdout, forwarding each chunk verbatim as it arrives
async fn pump_stdout<R>(stream: Option<R>, progress: Option<ProgressSender>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };

    let mut collected = Vec::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                if let Some(ref sender) = progress {
                    // A dropped receiver only means nobody is watching
                    let _ = sender.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                }
            }
            Err(e) => {
                log::warn!("Error reading script stdout: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

async fn read_all<R>(stream: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };

    let mut collected = Vec::new();
    if let Err(e) = stream.read_to_end(&mut collected).await {
        log::warn!("Error reading script stderr: {}", e);
    }
    String::from_utf8_lossy(&collected).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_names() {
        assert!(is_parameter_name("SamAccountName"));
        assert!(is_parameter_name("_private"));
        assert!(is_parameter_name("Group2"));
        assert!(!is_parameter_name(""));
        assert!(!is_parameter_name("2fa"));
        assert!(!is_parameter_name("Name; rm -rf /"));
        assert!(!is_parameter_name("-Command"));
    }

    #[test]
    fn test_default_settings_run_named_file_only() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.interpreter, "pwsh");
        assert_eq!(
            settings.interpreter_args,
            vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"]
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ExecutionError::Timeout(50).kind(), ErrorKind::Timeout);
        assert_eq!(ExecutionError::Spawn("x".into()).kind(), ErrorKind::Spawn);
        assert_eq!(ExecutionError::Script("x".into()).kind(), ErrorKind::Script);
        assert!(ExecutionError::Timeout(50).to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_os_error() {
        let bridge = ProcessBridge::new(BridgeSettings {
            interpreter: "/nonexistent/opgate-interpreter".to_string(),
            interpreter_args: Vec::new(),
            temp_dir: std::env::temp_dir(),
        });

        let result = bridge.execute(ExecutionRequest::new("script.ps1")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Failed to start script:"));
    }
}
