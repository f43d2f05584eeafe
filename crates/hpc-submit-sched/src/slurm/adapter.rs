//! SLURM adapter: pipes rendered scripts into `sbatch`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hpc_submit_core::{BatchScheduler, SubmitResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::slurm::parser;

/// First job id handed out in mock mode.
const MOCK_FIRST_JOB_ID: u64 = 1000;

/// Configuration for the SLURM adapter.
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// `sbatch` executable.
    pub sbatch: PathBuf,

    /// Directory `sbatch` runs in; relative paths in the script resolve
    /// against it. `None` inherits the caller's directory.
    pub work_dir: Option<PathBuf>,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            sbatch: PathBuf::from("sbatch"),
            work_dir: None,
        }
    }
}

/// Submission backend for SLURM.
///
/// In mock mode no command runs: scripts are recorded and job ids count up
/// from 1000.
pub struct SlurmAdapter {
    config: SlurmConfig,
    mock: Option<MockState>,
}

struct MockState {
    next_id: AtomicU64,
    scripts: Mutex<Vec<String>>,
}

impl SlurmAdapter {
    /// Adapter that runs the real `sbatch`.
    pub fn new(config: SlurmConfig) -> Self {
        Self { config, mock: None }
    }

    /// Adapter that records scripts instead of submitting them.
    pub fn mock(config: SlurmConfig) -> Self {
        Self {
            config,
            mock: Some(MockState {
                next_id: AtomicU64::new(MOCK_FIRST_JOB_ID),
                scripts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.mock.is_some()
    }

    /// Scripts received so far in mock mode.
    pub async fn submitted_scripts(&self) -> Vec<String> {
        match self.mock {
            Some(ref mock) => mock.scripts.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Submit `script` on `sbatch`'s standard input and return the job id.
    pub async fn submit_script(&self, script: &str) -> SchedResult<String> {
        if let Some(ref mock) = self.mock {
            mock.scripts.lock().await.push(script.to_string());
            return Ok(mock.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        }

        let mut command = Command::new(&self.config.sbatch);
        if let Some(ref dir) = self.config.work_dir {
            command.current_dir(dir);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SchedError::SlurmCommandError {
                command: self.config.sbatch.display().to_string(),
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedError::SlurmSubmitError(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("sbatch: {}", stdout.trim());
        parser::parse_sbatch_output(&stdout)
    }
}

#[async_trait]
impl BatchScheduler for SlurmAdapter {
    async fn submit(&self, script: &str) -> SubmitResult<String> {
        Ok(self.submit_script(script).await?)
    }

    fn name(&self) -> &str {
        if self.is_mock() { "slurm (mock)" } else { "slurm" }
    }
}
