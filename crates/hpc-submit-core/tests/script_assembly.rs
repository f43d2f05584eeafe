//! Script assembly through the generic single and array bodies.

use std::path::{Path, PathBuf};

use hpc_submit_core::settings::ResourcesSection;
use hpc_submit_core::{
    JobDescriptor, JobInputs, JobSet, MemoryUnit, ModuleDescriptor, RunContext, ScriptContext,
    Settings, SettingsLayer, SubmitModule,
};

const DEMO: ModuleDescriptor = ModuleDescriptor {
    id: "demo",
    input_extensions: &[".inp"],
    output_extensions: &[".out"],
    uses_scratch: true,
    uses_archive: true,
    ..ModuleDescriptor::BASE
};

struct Demo;

impl SubmitModule for Demo {
    fn descriptor(&self) -> &ModuleDescriptor {
        &DEMO
    }

    fn usage(&self) -> &'static str {
        "demo"
    }

    fn emit_run_command(&self, out: &mut String, run: &RunContext<'_>) {
        out.push_str(&format!(
            "demo \"{}\" > \"${{output_directory}}{}.out\"\n",
            run.input_ref(),
            run.stem_ref
        ));
    }

    fn emit_retrieve_outputs(&self, out: &mut String, stem_ref: &str, _settings: &Settings) {
        out.push_str(&format!("mv \"$scratch_directory/{stem_ref}.gbw\" \"$output_directory\"\n"));
    }
}

fn settings(text: &str, unit: MemoryUnit) -> Settings {
    let layer = SettingsLayer::from_toml(text, Path::new("test.toml")).unwrap();
    Settings::from_layer(layer, unit).unwrap()
}

fn jobs(names: &[&str]) -> JobSet {
    JobSet::new(
        names
            .iter()
            .map(|name| JobDescriptor {
                inputs: JobInputs::Single(PathBuf::from(format!("/calc/{name}.inp"))),
                stem: name.to_string(),
            })
            .collect(),
    )
    .unwrap()
}

#[test]
fn test_single_job_script() {
    let settings = settings(
        "[resources]\ncpus = 4\nmemory_gb = 8\ntime = \"1-00:00:00\"\nnice = 10\n",
        MemoryUnit::WholeGb,
    );
    let jobs = jobs(&["h2o"]);
    let ctx = ScriptContext {
        settings: &settings,
        module: &Demo,
        jobs: &jobs,
        job_name: "h2o",
        manifest: None,
        node_exclude: Some("node01,node02"),
    };

    let script = hpc_submit_core::script::assemble(&ctx).unwrap();

    assert!(script.starts_with(
        "#!/bin/bash\n\
         #SBATCH --job-name=h2o\n\
         #SBATCH --output=\"output/%x.log\"\n\
         #SBATCH --nodes=1\n\
         #SBATCH --ntasks=1\n\
         #SBATCH --cpus-per-task=4\n\
         #SBATCH --mem=8gb\n\
         #SBATCH --partition=chem\n\
         #SBATCH --time=1-00:00:00\n\
         #SBATCH --nice=10\n\
         #SBATCH --exclude=node01,node02\n\
         #SBATCH --export=NONE\n\
         \n\
         set -euo pipefail\n"
    ));
    assert!(script.contains("\nstem=\"h2o\"\n"));
    assert!(script.contains("printf \"Input file:    %s\\n\"   \"h2o.inp\"\n"));
    assert!(script.contains("\"8\" \"2\"\n"));
    assert!(script.contains("printf \"Time limit:    %s\\n\"   \"1-00:00:00\"\n"));
    assert!(script.contains("scratch_directory=\"/scratch/$SLURM_JOB_ID\"\n"));
    assert!(script.contains("demo \"/calc/h2o.inp\" > \"${output_directory}h2o.out\"\n"));
    assert!(script.contains("tar -cJf \"$output_directory$stem.tar.xz\""));
    assert!(script.contains("/usr/bin/sacct -n -j \"$SLURM_JOB_ID\""));
    assert!(!script.contains("backup_existing_files"));

    let run = script.find("demo \"/calc").unwrap();
    let archive = script.find("tar -cJf").unwrap();
    let cleanup = script.find("rm -rf \"$scratch_directory\"").unwrap();
    let footer = script.find("End of job").unwrap();
    assert!(run < archive && archive < cleanup && cleanup < footer);
}

#[test]
fn test_array_job_script() {
    let settings = settings("[resources]\nthrottle = 2\n", MemoryUnit::WholeGb);
    let jobs = jobs(&["a", "b", "c"]);
    let manifest = PathBuf::from("/calc/.demo-array-3t2.manifest");
    let ctx = ScriptContext {
        settings: &settings,
        module: &Demo,
        jobs: &jobs,
        job_name: "demo-array-3t2",
        manifest: Some(&manifest),
        node_exclude: None,
    };

    let script = hpc_submit_core::script::assemble(&ctx).unwrap();

    assert!(script.contains("#SBATCH --output=\"/dev/null\"\n#SBATCH --array=1-3%2\n"));
    assert!(!script.contains("--exclude"));
    assert!(script.contains(
        "input_file=$(sed -n \"${SLURM_ARRAY_TASK_ID}p\" \"/calc/.demo-array-3t2.manifest\")\n\
         stem=$(basename \"$input_file\" .inp)\n"
    ));
    assert!(script.contains("backup_existing_files() {\n"));
    assert!(script.contains(
        "backup_existing_files \"output/${stem}.out\" \"output/${stem}.log\" \"output/${stem}.tar.xz\"\n"
    ));
    assert!(script.contains("printf \"Input file:    %s\\n\"   \"$(basename \"$input_file\")\"\n"));
    assert!(script.contains("scratch_directory=\"/scratch/$SLURM_JOB_ID/$SLURM_ARRAY_TASK_ID\"\n"));
    assert!(script.contains("demo \"$input_file\" > \"${output_directory}$stem.out\"\n"));
    assert!(script.contains("-j \"${SLURM_ARRAY_JOB_ID}_${SLURM_ARRAY_TASK_ID}\""));

    let backup = script.find("backup_existing_files \"output/").unwrap();
    let redirect = script.find("exec 1>\"output/${stem}.log\" 2>&1\n").unwrap();
    let banner = script.find("printf \"Job information\\n\"").unwrap();
    assert!(backup < redirect && redirect < banner);
}

#[test]
fn test_array_without_manifest_is_rejected() {
    let settings = settings("", MemoryUnit::WholeGb);
    let jobs = jobs(&["a", "b"]);
    let ctx = ScriptContext {
        settings: &settings,
        module: &Demo,
        jobs: &jobs,
        job_name: "demo-array-2t5",
        manifest: None,
        node_exclude: None,
    };

    assert!(hpc_submit_core::script::assemble(&ctx).is_err());
}

#[test]
fn test_fractional_memory_banner() {
    let layer = SettingsLayer {
        resources: ResourcesSection {
            memory_gb: Some(hpc_submit_core::settings::MemoryAmount::new("0.5")),
            ..Default::default()
        },
        ..Default::default()
    };
    let settings = Settings::from_layer(layer, MemoryUnit::FractionalGb).unwrap();
    let jobs = jobs(&["mol"]);
    let ctx = ScriptContext {
        settings: &settings,
        module: &Demo,
        jobs: &jobs,
        job_name: "mol",
        manifest: None,
        node_exclude: None,
    };

    let script = hpc_submit_core::script::assemble(&ctx).unwrap();
    assert!(script.contains("#SBATCH --mem=512MB\n"));
    assert!(script.contains("printf \"Memory:        %s GB\\n\" \"0.5\"\n"));
    assert!(script.contains("\"default (partition max)\""));
}

const IN_PLACE: ModuleDescriptor = ModuleDescriptor {
    id: "inplace",
    input_extensions: &[".inp"],
    output_extensions: &[".out"],
    uses_archive: true,
    ..ModuleDescriptor::BASE
};

struct InPlace;

impl SubmitModule for InPlace {
    fn descriptor(&self) -> &ModuleDescriptor {
        &IN_PLACE
    }

    fn usage(&self) -> &'static str {
        "inplace"
    }

    fn emit_run_command(&self, out: &mut String, run: &RunContext<'_>) {
        out.push_str(&format!(
            "inplace \"{}\" > \"${{output_directory}}{}.out\"\n",
            run.input_ref(),
            run.stem_ref
        ));
    }

    fn emit_retrieve_outputs(&self, _out: &mut String, _stem_ref: &str, _settings: &Settings) {}
}

#[test]
fn test_output_directory_defined_without_scratch() {
    let settings = settings("", MemoryUnit::WholeGb);
    for names in [&["h2o"][..], &["a", "b"][..]] {
        let jobs = jobs(names);
        let manifest = PathBuf::from("/calc/.inplace-array-2t5.manifest");
        let ctx = ScriptContext {
            settings: &settings,
            module: &InPlace,
            jobs: &jobs,
            job_name: "inplace",
            manifest: (names.len() > 1).then_some(manifest.as_path()),
            node_exclude: None,
        };

        let script = hpc_submit_core::script::assemble(&ctx).unwrap();

        let defined = script.find("output_directory=\"output/\"\n").unwrap();
        let run = script.find("\ninplace \"").unwrap();
        assert!(defined < run);
        assert!(!script.contains("scratch_directory"));
        assert!(!script.contains("tar -cJf"));
        assert!(!script.contains(".tar.xz"));
    }
}
