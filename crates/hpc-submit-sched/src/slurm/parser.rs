//! Parsers for SLURM command output.

use crate::error::{SchedError, SchedResult};

const SUBMITTED: &str = "Submitted batch job ";

/// Job id from `sbatch` standard output.
///
/// Accepts `Submitted batch job 12345`, with an optional ` on cluster <name>`
/// suffix on federated setups. Lines before it (site banners) are ignored.
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(SUBMITTED))
        .filter_map(|rest| rest.split_whitespace().next())
        .find(|id| id.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .ok_or_else(|| SchedError::SlurmCommandError {
            command: "sbatch".to_string(),
            message: format!("Unexpected output format: {}", output.trim()),
        })
}
