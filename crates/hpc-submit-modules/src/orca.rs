//! ORCA: one `.inp` per job, run in scratch and archived.

use hpc_submit_core::{MemoryUnit, ModuleDescriptor, RunContext, Settings, SubmitModule};

use crate::common;

const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    id: "orca",
    input_extensions: &[".inp"],
    output_extensions: &[".out"],
    retrieve_extensions: &[".xyz", ".nto", ".cube"],
    default_cpus: Some(1),
    default_memory: Some("2"),
    default_throttle: Some(5),
    default_output_dir: Some("output"),
    memory_unit: MemoryUnit::WholeGb,
    uses_scratch: true,
    uses_archive: true,
    ..ModuleDescriptor::BASE
};

const USAGE: &str = "\
Orca submission

Examples:
  sorca opt_b3lyp_def2tzvp.inp -c 8 -m 16 -p kemi6
  sorca *.inp --throttle 5 -c 4 -m 8
  sorca -M manifest.txt --throttle 2 -c 4 -m 8 -p chem";

/// ORCA plug-in.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrcaModule;

impl OrcaModule {
    /// `orca` inside the `orca_path` directory, or from `PATH`, as one
    /// shell word.
    fn executable(settings: &Settings) -> String {
        match settings.paths.get("orca_path") {
            Some(dir) => common::shell_word(&format!("{}/orca", dir.trim_end_matches('/'))),
            None => "orca".to_string(),
        }
    }
}

impl SubmitModule for OrcaModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &DESCRIPTOR
    }

    fn usage(&self) -> &'static str {
        USAGE
    }

    fn emit_run_command(&self, out: &mut String, run: &RunContext<'_>) {
        let stem = run.stem_ref;
        out.push_str(&format!(
            "cp \"{}\" \"$scratch_directory/{stem}.inp\"\n",
            run.input_ref()
        ));
        out.push_str(&format!(
            "{} \"$scratch_directory/{stem}.inp\" > \"${{output_directory}}{stem}.out\"\n",
            Self::executable(run.settings)
        ));
    }

    fn emit_retrieve_outputs(&self, out: &mut String, _stem_ref: &str, _settings: &Settings) {
        common::emit_scratch_retrieval(out, DESCRIPTOR.retrieve_extensions);
    }
}
