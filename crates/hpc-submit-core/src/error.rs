//! Error handling for the submission compiler.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for submission operations.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Errors that can occur while compiling or submitting a batch script.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Bad flag value, missing value or inconsistent positional inputs.
    #[error("{0}")]
    Usage(String),

    /// No module is registered under the requested name.
    #[error("Unknown module: {0}")]
    ModuleNotFound(String),

    /// A named variant has no site file.
    #[error("Variant config not found: {}", .0.display())]
    VariantNotFound(PathBuf),

    /// A configuration file could not be parsed.
    #[error("Invalid configuration in {}: {message}", .path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// An input file named on the command line or in a manifest is missing.
    #[error("File not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// A manifest record is malformed or out of range.
    #[error("{}:{line}: {message}", .path.display())]
    ManifestRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Filesystem operation failed.
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The exported script could not be written.
    #[error("Failed to write export file {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scheduler rejected the script.
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// Command-line parsing failed or help was requested.
    #[error(transparent)]
    Cli(#[from] clap::Error),
}

impl SubmitError {
    /// Build a usage error from any message.
    pub fn usage(message: impl Into<String>) -> Self {
        SubmitError::Usage(message.into())
    }

    /// Attach a path to an IO error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SubmitError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the error should be followed by a help pointer.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            SubmitError::Usage(_)
                | SubmitError::ModuleNotFound(_)
                | SubmitError::ManifestRecord { .. }
        )
    }
}
