//! xTB: one `.xyz` geometry per job, run in the output directory.
//!
//! Program flags are passed through verbatim after `--`:
//!
//! ```text
//! sxtb water.xyz -c 4 -- --opt tight --gfn 2
//! ```

use clap::{Arg, ArgMatches, Command};
use hpc_submit_core::validate;
use hpc_submit_core::{
    MemoryUnit, ModuleDescriptor, RunContext, Settings, SubmitModule, SubmitResult,
};

use crate::common::shell_word;

const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    id: "xtb",
    input_extensions: &[".xyz"],
    output_extensions: &[".out", ".opt.xyz", ".md.xyz"],
    retrieve_extensions: &[".xyz"],
    default_cpus: Some(1),
    default_memory: Some("0.5"),
    default_throttle: Some(10),
    default_output_dir: Some("output"),
    memory_unit: MemoryUnit::FractionalGb,
    uses_scratch: false,
    uses_archive: false,
    ..ModuleDescriptor::BASE
};

const USAGE: &str = "\
xTB submission

Module options:
  --omp-threads INT   OMP_NUM_THREADS (default: same as --cpus)

xTB options (pass through after --):
  --opt, --md, --chrg INT, --uhf INT, --gfn N, plus any other xtb flags

Examples:
  sxtb opt.xyz -c 1 -m 0.5 -- --opt
  sxtb *.xyz --throttle 5 -- --opt
  sxtb -M manifest.txt -c 2 -- --gfn 2 --chrg 1";

/// xTB plug-in with its thread count and pass-through flags.
#[derive(Debug, Default, Clone)]
pub struct XtbModule {
    omp_threads: Option<u32>,
    options: Vec<String>,
}

impl SubmitModule for XtbModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &DESCRIPTOR
    }

    fn usage(&self) -> &'static str {
        USAGE
    }

    fn augment_args(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("omp_threads")
                .long("omp-threads")
                .value_name("INT")
                .help("OMP_NUM_THREADS (default: same as --cpus)"),
        )
    }

    fn parse_args(&mut self, matches: &ArgMatches, passthrough: &[String]) -> SubmitResult<()> {
        self.omp_threads = matches
            .get_one::<String>("omp_threads")
            .map(|v| validate::positive_integer(v, "OMP threads"))
            .transpose()?;
        self.options = passthrough.to_vec();
        Ok(())
    }

    fn emit_run_command(&self, out: &mut String, run: &RunContext<'_>) {
        let settings = run.settings;
        let exe = shell_word(settings.path_or("xtb_exec", "xtb"));
        let threads = self.omp_threads.unwrap_or(settings.cpus);

        let mut command = format!("{exe} \"{}\"", run.input_ref());
        for option in &self.options {
            command.push(' ');
            command.push_str(&shell_word(option));
        }

        out.push_str(&format!("export OMP_NUM_THREADS={threads}\n"));
        out.push_str(&format!("cd \"{}\"\n", settings.output_dir));
        out.push_str(&format!("{command} > \"{}.out\" 2>&1\n", run.stem_ref));
    }

    fn emit_retrieve_outputs(&self, out: &mut String, stem_ref: &str, _settings: &Settings) {
        out.push_str("printf \"\\n\"\n");
        out.push_str("printf \"Retrieving output files:\\n\"\n");
        out.push_str(&format!("for file in \"{stem_ref}\"*.xyz; do\n"));
        out.push_str("    if [[ -f \"$file\" ]]; then\n");
        out.push_str("        printf \"Retrieved: %s\\n\" \"$file\"\n");
        out.push_str("    fi\n");
        out.push_str("done\n");
    }
}
