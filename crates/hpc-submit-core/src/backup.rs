//! Numbered rotation of existing outputs.
//!
//! [`RotationPolicy::plan`] is the only description of the rotation. The
//! host runs it directly through [`RotationPolicy::rotate`]; generated
//! scripts carry the same plan rendered as a bash function by
//! [`RotationPolicy::render_shell_function`], so a worker task rotates its
//! runtime outputs exactly as the host would.
//!
//! With `max_generations = 3` and a backup directory named `backup`:
//!
//! ```text
//! out/h2o.out  ->  out/backup/h2o.out.0
//! out/backup/h2o.out.0  ->  out/backup/h2o.out.1
//! out/backup/h2o.out.1  ->  out/backup/h2o.out.2
//! out/backup/h2o.out.2  ->  (discarded)
//! ```

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::error::{SubmitError, SubmitResult};
use crate::settings::Settings;

/// Name of the bash function emitted into generated scripts.
pub const SHELL_FUNCTION: &str = "backup_existing_files";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One step of a rotation, applied to a target's backup base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    /// Remove generation `n` if it exists.
    Discard(u32),
    /// Rename generation `from` to `to` if it exists.
    Shift { from: u32, to: u32 },
    /// Move the target itself into generation 0.
    Capture,
}

/// Result of rotating one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// Nothing to rotate.
    Absent,
    /// The target now lives at `backup`.
    Rotated { backup: PathBuf },
    /// The lock was not acquired in time; the target was left in place.
    LockTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_generations: u32,
    /// Subdirectory (next to each target) holding the generations.
    pub backup_dir: Option<String>,
    pub lock_timeout: Duration,
}

impl RotationPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_generations: settings.max_backups.max(1),
            backup_dir: settings
                .use_backup_dir
                .then(|| settings.backup_dir_name.clone()),
            lock_timeout: settings.lock_timeout,
        }
    }

    /// Digits used for generation suffixes.
    pub fn width(&self) -> usize {
        (self.max_generations.max(1) - 1).to_string().len()
    }

    /// `.N`, zero-padded to [`width`](Self::width).
    pub fn suffix(&self, generation: u32) -> String {
        format!(".{:0width$}", generation, width = self.width())
    }

    /// The rotation, oldest generation first.
    pub fn plan(&self) -> Vec<RotationStep> {
        let oldest = self.max_generations.max(1) - 1;
        let mut steps = vec![RotationStep::Discard(oldest)];
        for from in (0..oldest).rev() {
            steps.push(RotationStep::Shift { from, to: from + 1 });
        }
        steps.push(RotationStep::Capture);
        steps
    }

    /// Path the generation suffixes are appended to.
    pub fn backup_base(&self, target: &Path) -> PathBuf {
        match (&self.backup_dir, target.file_name()) {
            (Some(dir), Some(name)) => {
                let parent = target.parent().unwrap_or_else(|| Path::new(""));
                parent.join(dir).join(name)
            }
            _ => target.to_path_buf(),
        }
    }

    fn generation(&self, base: &Path, generation: u32) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(self.suffix(generation));
        PathBuf::from(name)
    }

    /// Rotate `target` under an exclusive advisory lock.
    ///
    /// Waits at most `lock_timeout` for the lock; on timeout the target is
    /// left untouched and [`Rotation::LockTimeout`] is returned.
    pub fn rotate(&self, target: &Path) -> SubmitResult<Rotation> {
        if fs::symlink_metadata(target).is_err() {
            return Ok(Rotation::Absent);
        }

        let base = self.backup_base(target);
        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SubmitError::io(parent, e))?;
        }

        let lock_path = {
            let mut name = base.as_os_str().to_os_string();
            name.push(".lock");
            PathBuf::from(name)
        };
        let Some(_lock) = self.acquire_lock(&lock_path)? else {
            warn!(
                "Could not lock {} within {}s, skipping backup",
                target.display(),
                self.lock_timeout.as_secs()
            );
            return Ok(Rotation::LockTimeout);
        };

        for step in self.plan() {
            match step {
                RotationStep::Discard(n) => {
                    let oldest = self.generation(&base, n);
                    if let Ok(meta) = fs::symlink_metadata(&oldest) {
                        let removed = if meta.is_dir() {
                            fs::remove_dir_all(&oldest)
                        } else {
                            fs::remove_file(&oldest)
                        };
                        removed.map_err(|e| SubmitError::io(&oldest, e))?;
                    }
                }
                RotationStep::Shift { from, to } => {
                    let source = self.generation(&base, from);
                    if fs::symlink_metadata(&source).is_ok() {
                        let dest = self.generation(&base, to);
                        fs::rename(&source, &dest).map_err(|e| SubmitError::io(&source, e))?;
                    }
                }
                RotationStep::Capture => {
                    let dest = self.generation(&base, 0);
                    fs::rename(target, &dest).map_err(|e| SubmitError::io(target, e))?;
                    debug!("Backed up {} -> {}", target.display(), dest.display());
                    return Ok(Rotation::Rotated { backup: dest });
                }
            }
        }

        Ok(Rotation::Absent)
    }

    fn acquire_lock(&self, path: &Path) -> SubmitResult<Option<Flock<fs::File>>> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| SubmitError::io(path, e))?;

        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => return Ok(Some(lock)),
                Err((returned, Errno::EWOULDBLOCK)) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    file = returned;
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err((_, errno)) => {
                    return Err(SubmitError::io(path, std::io::Error::from(errno)));
                }
            }
        }
    }

    /// Bash function applying the same plan to each existing argument.
    pub fn render_shell_function(&self) -> String {
        let timeout = self.lock_timeout.as_secs();
        let mut f = String::new();

        f.push_str(&format!("{SHELL_FUNCTION}() {{\n"));
        f.push_str("    local file dir base\n");
        f.push_str("    for file in \"$@\"; do\n");
        f.push_str("        [[ -e \"$file\" ]] || continue\n");
        f.push_str("        dir=$(dirname \"$file\")\n");
        match self.backup_dir {
            Some(ref name) => {
                f.push_str(&format!(
                    "        base=\"$dir/{name}/$(basename \"$file\")\"\n"
                ));
                f.push_str(&format!("        mkdir -p \"$dir/{name}\"\n"));
            }
            None => f.push_str("        base=\"$file\"\n"),
        }
        f.push_str("        if ! exec 9>\"${base}.lock\"; then\n");
        f.push_str("            printf \"Warning: cannot open lock for %s, skipping backup\\n\" \"$file\"\n");
        f.push_str("            continue\n");
        f.push_str("        fi\n");
        f.push_str(&format!("        if ! flock -w {timeout} 9; then\n"));
        f.push_str(&format!(
            "            printf \"Warning: could not lock %s within {timeout}s, skipping backup\\n\" \"$file\"\n"
        ));
        f.push_str("            exec 9>&-\n");
        f.push_str("            continue\n");
        f.push_str("        fi\n");

        for step in self.plan() {
            match step {
                RotationStep::Discard(n) => {
                    let oldest = self.suffix(n);
                    f.push_str(&format!(
                        "        if [[ -e \"${{base}}{oldest}\" ]]; then rm -rf \"${{base}}{oldest}\"; fi\n"
                    ));
                }
                RotationStep::Shift { from, to } => {
                    let (from, to) = (self.suffix(from), self.suffix(to));
                    f.push_str(&format!(
                        "        if [[ -e \"${{base}}{from}\" ]]; then mv \"${{base}}{from}\" \"${{base}}{to}\"; fi\n"
                    ));
                }
                RotationStep::Capture => {
                    let first = self.suffix(0);
                    f.push_str(&format!("        mv \"$file\" \"${{base}}{first}\"\n"));
                }
            }
        }

        f.push_str("        exec 9>&-\n");
        f.push_str("    done\n");
        f.push_str("}\n");
        f
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn policy(max: u32, dir: Option<&str>) -> RotationPolicy {
        RotationPolicy {
            max_generations: max,
            backup_dir: dir.map(str::to_string),
            lock_timeout: Duration::from_millis(300),
        }
    }

    #[test]
    fn test_plan_order() {
        assert_eq!(
            policy(3, None).plan(),
            vec![
                RotationStep::Discard(2),
                RotationStep::Shift { from: 1, to: 2 },
                RotationStep::Shift { from: 0, to: 1 },
                RotationStep::Capture,
            ]
        );
        assert_eq!(
            policy(1, None).plan(),
            vec![RotationStep::Discard(0), RotationStep::Capture]
        );
    }

    #[test]
    fn test_suffix_width() {
        assert_eq!(policy(5, None).suffix(3), ".3");
        assert_eq!(policy(10, None).suffix(3), ".3");
        assert_eq!(policy(11, None).suffix(3), ".03");
        assert_eq!(policy(120, None).suffix(7), ".007");
    }

    #[test]
    fn test_absent_target() {
        let dir = TempDir::new().unwrap();
        let rotation = policy(3, None).rotate(&dir.path().join("none.out")).unwrap();
        assert_eq!(rotation, Rotation::Absent);
    }

    #[test]
    fn test_rotate_into_backup_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("h2o.out");
        let policy = policy(3, Some("backup"));

        fs::write(&target, "first").unwrap();
        policy.rotate(&target).unwrap();
        fs::write(&target, "second").unwrap();
        let rotation = policy.rotate(&target).unwrap();

        let backup = dir.path().join("backup");
        assert_eq!(
            rotation,
            Rotation::Rotated {
                backup: backup.join("h2o.out.0")
            }
        );
        assert!(!target.exists());
        assert_eq!(fs::read_to_string(backup.join("h2o.out.0")).unwrap(), "second");
        assert_eq!(fs::read_to_string(backup.join("h2o.out.1")).unwrap(), "first");
    }

    #[test]
    fn test_lock_timeout_leaves_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("busy.out");
        fs::write(&target, "data").unwrap();

        let held = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.path().join("busy.out.lock"))
            .unwrap();
        let _held = Flock::lock(held, FlockArg::LockExclusive).unwrap();

        let rotation = policy(3, None).rotate(&target).unwrap();
        assert_eq!(rotation, Rotation::LockTimeout);
        assert_eq!(fs::read_to_string(&target).unwrap(), "data");
    }

    #[test]
    fn test_shell_function_follows_plan() {
        let script = policy(3, Some("backup")).render_shell_function();

        assert!(script.starts_with("backup_existing_files() {\n"));
        assert!(script.contains("base=\"$dir/backup/$(basename \"$file\")\""));
        assert!(script.contains("if ! flock -w 0 9; then"));

        let discard = script.find("rm -rf \"${base}.2\"").unwrap();
        let shift_high = script.find("mv \"${base}.1\" \"${base}.2\"").unwrap();
        let shift_low = script.find("mv \"${base}.0\" \"${base}.1\"").unwrap();
        let capture = script.find("mv \"$file\" \"${base}.0\"").unwrap();
        assert!(discard < shift_high && shift_high < shift_low && shift_low < capture);
    }

    #[test]
    fn test_shell_function_without_backup_dir() {
        let script = policy(2, None).render_shell_function();
        assert!(script.contains("base=\"$file\""));
        assert!(!script.contains("mkdir"));
    }

    /// Relative path and contents of every file under `root`.
    fn tree(root: &Path) -> Vec<(PathBuf, String)> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let contents = fs::read_to_string(&path).unwrap();
                    files.push((path.strip_prefix(root).unwrap().to_path_buf(), contents));
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_shell_function_matches_host_rotation() {
        let has_flock = std::process::Command::new("flock")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success());
        if !has_flock {
            return;
        }

        for max in [1, 3, 11] {
            for backup_dir in [None, Some("backup")] {
                let policy = policy(max, backup_dir);
                let host = TempDir::new().unwrap();
                let worker = TempDir::new().unwrap();
                let function = policy.render_shell_function();

                for run in 0..14 {
                    let target = host.path().join("h2o.out");
                    fs::write(&target, run.to_string()).unwrap();
                    policy.rotate(&target).unwrap();

                    let target = worker.path().join("h2o.out");
                    fs::write(&target, run.to_string()).unwrap();
                    let status = std::process::Command::new("bash")
                        .arg("-c")
                        .arg(format!("{function}{SHELL_FUNCTION} \"$1\"\n"))
                        .arg("bash")
                        .arg(&target)
                        .status()
                        .unwrap();
                    assert!(status.success());
                }

                assert_eq!(
                    tree(host.path()),
                    tree(worker.path()),
                    "max={max} backup_dir={backup_dir:?}"
                );
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn rotation_keeps_newest_generations(max in 1u32..6, runs in 1usize..10) {
            let dir = TempDir::new().unwrap();
            let target = dir.path().join("job.out");
            let policy = policy(max, Some("bk"));

            for run in 0..runs {
                fs::write(&target, run.to_string()).unwrap();
                policy.rotate(&target).unwrap();
            }

            let base = dir.path().join("bk").join("job.out");
            let kept = runs.min(max as usize);
            for generation in 0..max {
                let path = policy.generation(&base, generation);
                if (generation as usize) < kept {
                    let expected = (runs - 1 - generation as usize).to_string();
                    prop_assert_eq!(fs::read_to_string(&path).unwrap(), expected);
                } else {
                    prop_assert!(!path.exists());
                }
            }
        }
    }
}
