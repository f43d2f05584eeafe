//! DIRAC: `.inp` / `.mol` pairs run through `pam`.
//!
//! The job body is module-specific: `pam` gets its own scratch directory,
//! names its output after both inputs and leaves it in the working
//! directory, from where it is moved into the output directory.

use hpc_submit_core::job::file_stem;
use hpc_submit_core::manifest;
use hpc_submit_core::script::sections::{self, JobInfo, escape_path};
use hpc_submit_core::{
    InputShape, JobDescriptor, JobInputs, JobMode, JobRequest, JobSet, MemoryUnit,
    ModuleDescriptor, RunContext, ScriptContext, Settings, SubmitError, SubmitModule,
    SubmitResult,
};

use crate::common::{self, record_fields};

const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    id: "dirac",
    input_extensions: &[".inp", ".mol"],
    output_extensions: &[".out"],
    default_cpus: Some(1),
    default_memory: Some("2"),
    default_throttle: Some(10),
    default_output_dir: Some("output"),
    memory_unit: MemoryUnit::WholeGb,
    uses_scratch: true,
    uses_archive: false,
    input_shape: InputShape::Pair,
    ..ModuleDescriptor::BASE
};

const USAGE: &str = "\
DIRAC submission (inp/mol pairs)

Usage:
  sdirac input.inp geom.mol [options]
  sdirac inp1.inp mol1.mol inp2.inp mol2.mol ... [options]
  sdirac -M FILE [options]

Examples:
  sdirac sp-hf.inp 631g-h2o.mol -c 2 -m 4
  sdirac sp-hf.inp h2o.mol sp-mp2.inp h2o.mol -c 4 -m 8
  sdirac -M manifest.txt -T 5";

#[derive(Debug, Default, Clone, Copy)]
pub struct DiracModule;

impl DiracModule {
    /// Lines shared by both bodies once `INP` and `MOL` are set.
    fn emit_run(&self, out: &mut String, ctx: &ScriptContext<'_>) {
        let settings = ctx.settings;
        // --gb is per MPI process, --ag the aggregate
        let per_core = settings.memory.amount().to_string();
        let total = settings.memory.whole_gb().unwrap_or_default() * u64::from(settings.cpus);

        JobInfo::new(ctx, "")
            .output_file("$output_file")
            .memory(total.to_string(), per_core.clone())
            .emit(out);
        out.push('\n');

        out.push_str(&format!(
            "export DIRAC_SCRATCH=\"{}\"\n",
            ctx.job_ref().scratch_dir(&settings.scratch_base)
        ));
        out.push_str("mkdir -p \"$DIRAC_SCRATCH\"\n");
        out.push('\n');

        out.push_str(&format!(
            "\"{}\" \\\n",
            sections::escape(settings.path_or("dirac_pam", "pam"))
        ));
        out.push_str(&format!("  --mpi=\"{}\" \\\n", settings.cpus));
        out.push_str(&format!("  --ag=\"{total}\" \\\n"));
        out.push_str(&format!("  --gb=\"{per_core}\" \\\n"));
        out.push_str("  --scratch=\"$DIRAC_SCRATCH\" \\\n");
        out.push_str("  --mol=\"$MOL\" \\\n");
        out.push_str("  --inp=\"$INP\" \\\n");
        out.push_str("  && dirac_exit_code=0 || dirac_exit_code=$?\n");
        out.push('\n');

        if settings.output_dir != "./" {
            out.push_str("for file in \"${stem}\"*; do\n");
            out.push_str("    if [[ -f \"$file\" && \"$file\" != *.inp && \"$file\" != *.mol ]]; then\n");
            out.push_str(&format!(
                "        mv \"$file\" \"{}\" 2>/dev/null || true\n",
                settings.output_dir
            ));
            out.push_str("    fi\n");
            out.push_str("done\n");
            out.push('\n');
        }

        out.push_str("rm -rf \"$DIRAC_SCRATCH\" || true\n");
        sections::emit_footer(out, ctx.job_ref());
        out.push_str("\nexit $dirac_exit_code\n");
    }

    fn emit_stem(out: &mut String, settings: &Settings) {
        common::emit_base_name(out, "inp_base", "INP");
        common::emit_base_name(out, "mol_base", "MOL");
        out.push_str("stem=\"${inp_base}_${mol_base}\"\n");
        out.push_str(&format!(
            "output_file=\"{}${{stem}}.out\"\n",
            settings.output_dir
        ));
    }

    /// Pair up `.inp` and `.mol` tokens in order.
    fn pair_jobs(&self, request: &JobRequest<'_>, tokens: &[String]) -> SubmitResult<JobSet> {
        if tokens.len() < 2 {
            return Err(SubmitError::usage(
                "DIRAC requires both an .inp and .mol file",
            ));
        }
        if tokens.len() % 2 != 0 {
            return Err(SubmitError::usage(
                "Each .inp file must be paired with a .mol file",
            ));
        }

        let mut jobs = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks_exact(2) {
            let (inp, mol) = (&pair[0], &pair[1]);
            if !inp.ends_with(".inp") {
                return Err(SubmitError::usage(format!("Expected .inp file, got: {inp}")));
            }
            if !mol.ends_with(".mol") {
                return Err(SubmitError::usage(format!("Expected .mol file, got: {mol}")));
            }
            let inputs = JobInputs::Pair(request.existing_file(inp)?, request.existing_file(mol)?);
            let stem = self.stem(&inputs);
            jobs.push(JobDescriptor { inputs, stem });
        }

        JobSet::new(jobs)
    }
}

impl SubmitModule for DiracModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &DESCRIPTOR
    }

    fn usage(&self) -> &'static str {
        USAGE
    }

    fn build_jobs(&self, request: &JobRequest<'_>) -> SubmitResult<JobSet> {
        let tokens: Vec<String> = match request.manifest {
            Some(path) => {
                if !request.positional.is_empty() {
                    return Err(SubmitError::usage(
                        "Positional inputs cannot be combined with --manifest",
                    ));
                }
                let path = request.absolute(&path.to_string_lossy());
                manifest::read_records(&path)?
                    .iter()
                    .flat_map(record_fields)
                    .filter(|field| !field.is_empty())
                    .collect()
            }
            None => request.positional.to_vec(),
        };
        self.pair_jobs(request, &tokens)
    }

    fn stem(&self, inputs: &JobInputs) -> String {
        match inputs {
            JobInputs::Pair(inp, mol) => format!("{}_{}", file_stem(inp), file_stem(mol)),
            other => file_stem(other.primary()),
        }
    }

    // pam is invoked directly by the custom bodies
    fn emit_run_command(&self, _out: &mut String, _run: &RunContext<'_>) {}

    fn backup_targets(&self, stem: &str, settings: &Settings, mode: JobMode) -> Vec<String> {
        let dir = &settings.output_dir;
        let mut targets = vec![format!("{dir}{stem}.out")];
        if mode == JobMode::Array {
            targets.push(format!("{dir}{stem}{}", settings.log_extension));
        }
        targets
    }

    fn single_body(&self, ctx: &ScriptContext<'_>) -> Option<String> {
        let JobInputs::Pair(inp, mol) = &ctx.jobs.first().inputs else {
            return None;
        };

        let mut out = String::new();
        out.push('\n');
        out.push_str(&ctx.rotation().render_shell_function());
        out.push('\n');
        out.push_str(&format!("INP=\"{}\"\n", escape_path(inp)));
        out.push_str(&format!("MOL=\"{}\"\n", escape_path(mol)));
        Self::emit_stem(&mut out, ctx.settings);
        sections::emit_backup_call(&mut out, &["$output_file".to_string()]);
        out.push('\n');

        self.emit_run(&mut out, ctx);
        Some(out)
    }

    fn array_body(&self, ctx: &ScriptContext<'_>) -> Option<String> {
        let settings = ctx.settings;
        let manifest = ctx.manifest?;

        let mut out = String::new();
        out.push('\n');
        out.push_str(&ctx.rotation().render_shell_function());
        out.push('\n');
        sections::emit_manifest_lookup(&mut out, manifest, &["INP", "MOL"]);
        Self::emit_stem(&mut out, settings);
        out.push_str(&format!(
            "log_file=\"{}${{stem}}{}\"\n",
            settings.output_dir, settings.log_extension
        ));
        out.push('\n');
        sections::emit_backup_call(
            &mut out,
            &["$output_file".to_string(), "$log_file".to_string()],
        );
        out.push_str("exec 1>\"$log_file\" 2>&1\n");
        out.push('\n');

        self.emit_run(&mut out, ctx);
        Some(out)
    }
}
