//! Gaussian 16: one `.com` or `.gjf` per job, with the checkpoint file
//! moved next to the output.

use hpc_submit_core::{MemoryUnit, ModuleDescriptor, RunContext, Settings, SubmitModule};

use crate::common::shell_word;

const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    id: "gaussian",
    input_extensions: &[".com", ".gjf"],
    output_extensions: &[".out", ".chk"],
    retrieve_extensions: &[".chk"],
    default_cpus: Some(1),
    default_memory: Some("2"),
    default_throttle: Some(10),
    default_output_dir: Some("output"),
    memory_unit: MemoryUnit::WholeGb,
    uses_scratch: true,
    uses_archive: false,
    ..ModuleDescriptor::BASE
};

const USAGE: &str = "\
Gaussian 16 submission

Examples:
  sgaussian opt_b3lyp_ccpvdz_h2o.com -c 2 -m 4 -t 04:00:00
  sgaussian *.com --throttle 5 -c 2 -m 4";

#[derive(Debug, Default, Clone, Copy)]
pub struct GaussianModule;

impl SubmitModule for GaussianModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &DESCRIPTOR
    }

    fn usage(&self) -> &'static str {
        USAGE
    }

    fn emit_run_command(&self, out: &mut String, run: &RunContext<'_>) {
        let exe = shell_word(run.settings.path_or("gaussian_exec", "g16"));
        out.push_str("export GAUSS_SCRDIR=\"$scratch_directory\"\n");
        out.push_str(&format!(
            "srun {exe} \"{}\" > \"${{output_directory}}{}.out\"\n",
            run.input_ref(),
            run.stem_ref
        ));
    }

    fn emit_retrieve_outputs(&self, out: &mut String, stem_ref: &str, _settings: &Settings) {
        // %chk is written relative to the submission directory
        out.push_str(&format!("if [[ -f \"{stem_ref}.chk\" ]]; then\n"));
        out.push_str(&format!(
            "    mv \"{stem_ref}.chk\" \"${{output_directory}}{stem_ref}.chk\"\n"
        ));
        out.push_str("fi\n");
    }
}
