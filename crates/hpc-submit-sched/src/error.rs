//! Error handling for scheduler interaction.

use hpc_submit_core::SubmitError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while talking to the batch system.
#[derive(Error, Debug)]
pub enum SchedError {
    /// SLURM rejected the script.
    #[error("SLURM submission failed: {0}")]
    SlurmSubmitError(String),

    /// SLURM command execution failed.
    #[error("SLURM command failed: {command} - {message}")]
    SlurmCommandError { command: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<SchedError> for SubmitError {
    fn from(err: SchedError) -> Self {
        match err {
            SchedError::SlurmSubmitError(stderr) => SubmitError::Submission(stderr),
            other => SubmitError::Submission(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::SlurmCommandError {
            command: "sbatch".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "SLURM command failed: sbatch - not found");
    }

    #[test]
    fn test_submit_error_keeps_scheduler_text() {
        let err: SubmitError =
            SchedError::SlurmSubmitError("sbatch: error: invalid partition".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Job submission failed: sbatch: error: invalid partition"
        );
    }
}
