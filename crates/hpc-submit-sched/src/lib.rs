//! SLURM scheduler collaborator for hpc-submit.
//!
//! The core renders a complete batch script; this crate hands it to
//! `sbatch` on standard input and reads back the job id. Job state after
//! submission is left to SLURM: the script queries `sacct` for its own
//! completion report.
//!
//! [`SlurmAdapter::mock`] records scripts instead of running commands, for
//! tests and dry runs.

pub mod error;
pub mod slurm;

pub use error::{SchedError, SchedResult};
pub use slurm::{SlurmAdapter, SlurmConfig};
