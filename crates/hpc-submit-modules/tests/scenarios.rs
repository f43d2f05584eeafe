//! End-to-end runs through the dispatcher with the shipped modules.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use hpc_submit_core::{Dispatcher, Outcome, SubmitError};
use hpc_submit_sched::{SlurmAdapter, SlurmConfig};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(inputs: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("config")).unwrap();
        for name in inputs {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, "! HF def2-SVP\n").unwrap();
        }
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self, name: &str, text: &str) {
        fs::write(self.path().join("config").join(name), text).unwrap();
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(hpc_submit_modules::registry(), self.path())
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        let config = self.path().join("config");
        args.iter()
            .map(|s| s.to_string())
            .chain(["--config-dir".to_string(), config.to_string_lossy().into_owned()])
            .collect()
    }

    /// Run with `--export` as the last flag and return the script.
    async fn export(&self, args: &[&str]) -> Result<String, SubmitError> {
        let mut argv = self.argv(args);
        argv.push("--export".to_string());
        let scheduler = SlurmAdapter::mock(SlurmConfig::default());
        match self.dispatcher().run(&argv, &scheduler).await? {
            Outcome::Exported { path } => Ok(fs::read_to_string(path).unwrap()),
            Outcome::Submitted { job_id } => panic!("unexpected submission {job_id}"),
        }
    }
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[tokio::test]
async fn test_single_input_defaults() {
    let ws = Workspace::new(&["h2o.inp"]);
    let script = ws.export(&["sorca", "h2o.inp"]).await.unwrap();

    assert_eq!(count(&script, "#SBATCH --job-name="), 1);
    assert!(script.contains("#SBATCH --job-name=h2o\n"));
    assert_eq!(count(&script, "#SBATCH --cpus-per-task="), 1);
    assert!(script.contains("#SBATCH --cpus-per-task=1\n"));
    assert!(script.contains("#SBATCH --mem=2gb\n"));
    assert!(!script.contains("--array"));
    assert!(!script.contains("/dev/null"));

    let exported = ws.path().join("orca.slurm");
    let mode = fs::metadata(&exported).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert!(ws.path().join("output").is_dir());
}

#[tokio::test]
async fn test_two_inputs_make_throttled_array() {
    let ws = Workspace::new(&["a.inp", "b.inp"]);
    let script = ws
        .export(&["sorca", "a.inp", "b.inp", "-T", "3"])
        .await
        .unwrap();

    assert!(script.contains("#SBATCH --job-name=orca-array-2t3\n"));
    assert!(script.contains("#SBATCH --array=1-2%3\n"));
    assert!(script.contains("#SBATCH --output=\"/dev/null\"\n"));

    let manifest = ws.path().join(".orca-array-2t3.manifest");
    let records = fs::read_to_string(&manifest).unwrap();
    let expected = format!(
        "{}\n{}\n",
        ws.path().join("a.inp").display(),
        ws.path().join("b.inp").display()
    );
    assert_eq!(records, expected);
    assert!(script.contains(&format!("\"{}\"", manifest.display())));
}

#[tokio::test]
async fn test_queued_array_manifest_is_kept() {
    let ws = Workspace::new(&["a.inp", "b.inp", "c.inp", "d.inp"]);
    let scheduler = SlurmAdapter::mock(SlurmConfig::default());
    let dispatcher = ws.dispatcher();

    let first = dispatcher
        .run(&ws.argv(&["sorca", "a.inp", "b.inp"]), &scheduler)
        .await
        .unwrap();
    assert_eq!(first, Outcome::Submitted { job_id: "1000".to_string() });

    let manifest = ws.path().join(".orca-array-2t5.manifest");
    let before = fs::read_to_string(&manifest).unwrap();

    let err = dispatcher
        .run(&ws.argv(&["sorca", "c.inp", "d.inp"]), &scheduler)
        .await
        .unwrap_err();
    assert!(err.is_usage());
    assert_eq!(fs::read_to_string(&manifest).unwrap(), before);
    assert_eq!(scheduler.submitted_scripts().await.len(), 1);

    let renamed = dispatcher
        .run(&ws.argv(&["sorca", "c.inp", "d.inp", "-j", "second"]), &scheduler)
        .await
        .unwrap();
    assert_eq!(renamed, Outcome::Submitted { job_id: "1001".to_string() });
    assert!(ws.path().join(".second.manifest").is_file());
}

#[tokio::test]
async fn test_variant_paths_replace_defaults() {
    let ws = Workspace::new(&["h2o.inp"]);
    ws.config("orca.toml", "[paths]\norca_path = \"/opt/orca\"\n");
    ws.config("orca-test.toml", "[paths]\norca_path = \"/tmp/x\"\n");

    let script = ws
        .export(&["sorca", "h2o.inp", "--variant", "test"])
        .await
        .unwrap();

    assert!(script.contains("/tmp/x/orca \"$scratch_directory/h2o.inp\""));
    assert!(!script.contains("/opt/orca"));
    assert!(!script.contains("\norca \"$scratch_directory"));
}

#[tokio::test]
async fn test_missing_variant_is_fatal() {
    let ws = Workspace::new(&["h2o.inp"]);
    ws.config("orca.toml", "[partition]\ndefault = \"kemi6\"\n");

    let err = ws
        .export(&["sorca", "h2o.inp", "--variant", "missing"])
        .await
        .unwrap_err();

    assert!(matches!(err, SubmitError::VariantNotFound(ref p) if p.ends_with("orca-missing.toml")));
    assert!(!ws.path().join("orca.slurm").exists());
}

#[tokio::test]
async fn test_no_archive_marker() {
    let ws = Workspace::new(&["h2o.inp"]);
    let script = ws
        .export(&["sorca", "h2o.inp", "--no-archive"])
        .await
        .unwrap();

    assert!(script.contains("Archive creation disabled"));
    assert!(!script.contains("tar -cJf"));
}

#[tokio::test]
async fn test_layer_precedence() {
    let ws = Workspace::new(&["h2o.inp"]);
    ws.config(
        "defaults.toml",
        "[partition]\ndefault = \"general\"\n[resources]\ncpus = 2\n",
    );
    ws.config("orca.toml", "[resources]\ncpus = 8\nmemory_gb = 32\n");

    let script = ws.export(&["sorca", "h2o.inp", "-m", "64"]).await.unwrap();

    assert!(script.contains("#SBATCH --partition=general\n"));
    assert!(script.contains("#SBATCH --cpus-per-task=8\n"));
    assert!(script.contains("#SBATCH --mem=64gb\n"));
}

#[tokio::test]
async fn test_export_to_named_file() {
    let ws = Workspace::new(&["h2o.inp"]);
    let argv = ws.argv(&["sorca", "h2o.inp", "--export", "jobs/h2o.sh"]);
    fs::create_dir(ws.path().join("jobs")).unwrap();
    let scheduler = SlurmAdapter::mock(SlurmConfig::default());

    let outcome = ws.dispatcher().run(&argv, &scheduler).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Exported {
            path: ws.path().join("jobs/h2o.sh")
        }
    );
    assert!(scheduler.submitted_scripts().await.is_empty());
}

#[tokio::test]
async fn test_export_never_overwrites_an_input() {
    let ws = Workspace::new(&["a.inp", "b.inp"]);
    let scheduler = SlurmAdapter::mock(SlurmConfig::default());

    // clap binds a.inp to --export here
    let err = ws
        .dispatcher()
        .run(&ws.argv(&["sorca", "--export", "a.inp", "b.inp"]), &scheduler)
        .await
        .unwrap_err();
    assert!(err.is_usage());
    assert!(err.to_string().contains("a.inp"));
    assert_eq!(
        fs::read_to_string(ws.path().join("a.inp")).unwrap(),
        "! HF def2-SVP\n"
    );

    fs::write(ws.path().join("list.txt"), "a.inp\nb.inp\n").unwrap();
    let err = ws
        .dispatcher()
        .run(
            &ws.argv(&["sorca", "-M", "list.txt", "--export", "list.txt"]),
            &scheduler,
        )
        .await
        .unwrap_err();
    assert!(err.is_usage());
    assert_eq!(
        fs::read_to_string(ws.path().join("list.txt")).unwrap(),
        "a.inp\nb.inp\n"
    );
    assert!(!ws.path().join(".orca-array-2t5.manifest").exists());
}

#[tokio::test]
async fn test_submission_through_scheduler() {
    let ws = Workspace::new(&["h2o.inp"]);
    let scheduler = SlurmAdapter::mock(SlurmConfig::default());

    let outcome = ws
        .dispatcher()
        .run(&ws.argv(&["submit", "orca", "h2o.inp", "-c", "4"]), &scheduler)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Submitted {
            job_id: "1000".to_string()
        }
    );
    let scripts = scheduler.submitted_scripts().await;
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].contains("#SBATCH --cpus-per-task=4\n"));
}

#[tokio::test]
async fn test_existing_output_is_rotated_before_run() {
    let ws = Workspace::new(&["h2o.inp"]);
    let output = ws.path().join("output");
    fs::create_dir(&output).unwrap();
    fs::write(output.join("h2o.out"), "first run").unwrap();

    ws.export(&["sorca", "h2o.inp"]).await.unwrap();
    fs::write(output.join("h2o.out"), "second run").unwrap();
    ws.export(&["sorca", "h2o.inp"]).await.unwrap();

    let backup = output.join("backup");
    assert!(!output.join("h2o.out").exists());
    assert_eq!(fs::read_to_string(backup.join("h2o.out.0")).unwrap(), "second run");
    assert_eq!(fs::read_to_string(backup.join("h2o.out.1")).unwrap(), "first run");
}

#[tokio::test]
async fn test_user_manifest_is_normalized() {
    let ws = Workspace::new(&["calc/a.inp", "calc/b.inp"]);
    fs::write(
        ws.path().join("list.txt"),
        "# first batch\ncalc/a.inp\n\ncalc/b.inp\n",
    )
    .unwrap();

    let script = ws
        .export(&["sorca", "-M", "list.txt", "-j", "batch"])
        .await
        .unwrap();

    assert!(script.contains("#SBATCH --job-name=batch\n"));
    let records = fs::read_to_string(ws.path().join(".batch.manifest")).unwrap();
    let lines: Vec<&str> = records.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(PathBuf::from(lines[1]), ws.path().join("calc/b.inp"));
}

#[tokio::test]
async fn test_pair_module_array_manifest() {
    let ws = Workspace::new(&["hf.inp", "mp2.inp", "h2o.mol"]);
    let script = ws
        .export(&["sdirac", "hf.inp", "h2o.mol", "mp2.inp", "h2o.mol"])
        .await
        .unwrap();

    assert!(script.contains("#SBATCH --array=1-2%10\n"));
    let records = fs::read_to_string(ws.path().join(".dirac-array-2t10.manifest")).unwrap();
    let first = records.lines().next().unwrap();
    assert_eq!(
        first,
        format!(
            "{}\t{}",
            ws.path().join("hf.inp").display(),
            ws.path().join("h2o.mol").display()
        )
    );
}

#[tokio::test]
async fn test_tuple_module_keeps_empty_fields() {
    let ws = Workspace::new(&["opt.dal", "a.mol", "b.mol", "env.pot"]);
    let script = ws
        .export(&["sdalton", "opt.dal", "a.mol", "env.pot", "b.mol", "-l"])
        .await
        .unwrap();

    assert!(script.contains("cmd+=( -get \"AOONEINT AOPROPER\" )\n"));
    let records = fs::read_to_string(ws.path().join(".dalton-array-2t10.manifest")).unwrap();
    for line in records.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 4);
        assert!(fields[2].ends_with("env.pot"));
        assert_eq!(fields[3], "");
    }
}

#[tokio::test]
async fn test_usage_errors() {
    let ws = Workspace::new(&["h2o.inp", "water.xyz"]);

    let err = ws.export(&["sorca", "h2o.inp", "-c", "0"]).await.unwrap_err();
    assert!(err.is_usage());

    let err = ws.export(&["sorca", "water.xyz"]).await.unwrap_err();
    assert!(err.is_usage());

    let err = ws.export(&["sorca"]).await.unwrap_err();
    assert_eq!(err.to_string(), "No input files specified");

    let err = ws.export(&["sorca", "gone.inp"]).await.unwrap_err();
    assert!(matches!(err, SubmitError::InputNotFound(_)));

    let err = ws.export(&["snwchem", "h2o.inp"]).await.unwrap_err();
    assert!(matches!(err, SubmitError::ModuleNotFound(ref m) if m == "nwchem"));
}

#[tokio::test]
async fn test_xtb_passthrough() {
    let ws = Workspace::new(&["water.xyz"]);
    let argv: Vec<String> = ws
        .argv(&["sxtb", "water.xyz", "-c", "2", "--export"])
        .into_iter()
        .chain(["--", "--opt", "tight"].map(String::from))
        .collect();
    let scheduler = SlurmAdapter::mock(SlurmConfig::default());

    let Outcome::Exported { path } = ws.dispatcher().run(&argv, &scheduler).await.unwrap() else {
        panic!("expected export");
    };
    let script = fs::read_to_string(path).unwrap();

    assert!(script.contains("#SBATCH --mem=512MB\n"));
    assert!(script.contains("export OMP_NUM_THREADS=2\n"));
    assert!(script.contains("\" --opt tight > \"water.out\" 2>&1\n"));
}
