//! Submission through a stand-in `sbatch` executable.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use hpc_submit_core::{BatchScheduler, SubmitError};
use hpc_submit_sched::{SchedError, SlurmAdapter, SlurmConfig};
use tempfile::TempDir;

fn fake_command(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_script_is_piped_to_sbatch() {
    let dir = TempDir::new().unwrap();
    let sbatch = fake_command(
        dir.path(),
        "sbatch",
        "cat > received.sh\necho \"Submitted batch job 4242\"",
    );
    let adapter = SlurmAdapter::new(SlurmConfig {
        sbatch,
        work_dir: Some(dir.path().to_path_buf()),
        ..SlurmConfig::default()
    });

    let script = "#!/bin/bash\n#SBATCH --job-name=h2o\necho hi\n";
    let job_id = adapter.submit(script).await.unwrap();

    assert_eq!(job_id, "4242");
    assert_eq!(
        fs::read_to_string(dir.path().join("received.sh")).unwrap(),
        script
    );
}

#[tokio::test]
async fn test_rejected_script_surfaces_stderr() {
    let dir = TempDir::new().unwrap();
    let sbatch = fake_command(
        dir.path(),
        "sbatch",
        "cat > /dev/null\necho \"sbatch: error: invalid partition specified: nope\" >&2\nexit 1",
    );
    let adapter = SlurmAdapter::new(SlurmConfig {
        sbatch,
        ..SlurmConfig::default()
    });

    let err = adapter.submit_script("#!/bin/bash\n").await.unwrap_err();
    assert!(matches!(err, SchedError::SlurmSubmitError(ref msg) if msg.contains("invalid partition")));

    let err: SubmitError = err.into();
    assert!(err.to_string().starts_with("Job submission failed: sbatch: error"));
}

#[tokio::test]
async fn test_unexpected_output_is_reported() {
    let dir = TempDir::new().unwrap();
    let sbatch = fake_command(dir.path(), "sbatch", "cat > /dev/null\necho queued");
    let adapter = SlurmAdapter::new(SlurmConfig {
        sbatch,
        ..SlurmConfig::default()
    });

    let err = adapter.submit_script("#!/bin/bash\n").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "SLURM command failed: sbatch - Unexpected output format: queued"
    );
}
