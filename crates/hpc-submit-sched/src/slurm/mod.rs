//! SLURM integration.

pub mod adapter;
pub mod parser;

pub use adapter::{SlurmAdapter, SlurmConfig};
