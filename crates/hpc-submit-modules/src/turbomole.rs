//! Turbomole: `control` / `coord` pairs, each run inside the directory of
//! its control file.

use std::path::Path;

use hpc_submit_core::job::file_stem;
use hpc_submit_core::manifest;
use hpc_submit_core::script::sections::{self, JobInfo, escape_path};
use hpc_submit_core::{
    InputShape, JobDescriptor, JobInputs, JobMode, JobRequest, JobSet, MemoryUnit,
    ModuleDescriptor, RunContext, ScriptContext, Settings, SubmitError, SubmitModule,
    SubmitResult,
};

use crate::common::{record_fields, shell_word};

const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    id: "turbomole",
    output_extensions: &[".out"],
    default_cpus: Some(1),
    default_memory: Some("2"),
    default_throttle: Some(10),
    default_output_dir: Some("output"),
    memory_unit: MemoryUnit::WholeGb,
    uses_scratch: false,
    uses_archive: false,
    input_shape: InputShape::DirectoryPair,
    ..ModuleDescriptor::BASE
};

const USAGE: &str = "\
Turbomole submission (control/coord pairs)

Usage:
  sturbomole control coord [control2 coord2 ...] [options]
  sturbomole -M FILE [options]

Examples:
  sturbomole dft_opt/control dft_opt/coord -c 4 -m 8
  sturbomole opt1/control opt1/coord opt2/control opt2/coord -T 5
  sturbomole -M manifest.txt -c 2 -m 4";

#[derive(Debug, Default, Clone, Copy)]
pub struct TurbomoleModule;

/// Stem of a control file: its directory name when the file is the
/// conventional bare `control`, otherwise the file name minus extension.
fn control_stem(control: &Path) -> String {
    let is_bare = control.file_name().is_some_and(|name| name == "control");
    match control.parent().and_then(Path::file_name) {
        Some(dir) if is_bare => dir.to_string_lossy().into_owned(),
        _ => file_stem(control),
    }
}

impl TurbomoleModule {
    fn emit_stem(out: &mut String, settings: &Settings) {
        out.push_str("control_dir=$(dirname \"$CONTROL\")\n");
        out.push_str("control_base=$(basename \"$CONTROL\")\n");
        out.push_str("if [[ \"$control_base\" == \"control\" ]]; then\n");
        out.push_str("    stem=$(basename \"$control_dir\")\n");
        out.push_str("else\n");
        out.push_str("    stem=\"${control_base%.*}\"\n");
        out.push_str("fi\n");
        out.push_str(&format!(
            "output_file=\"{}${{stem}}.out\"\n",
            settings.output_dir
        ));
        // the program runs in $control_dir
        out.push_str("[[ \"$output_file\" == /* ]] || output_file=\"$PWD/$output_file\"\n");
    }

    fn emit_run(&self, out: &mut String, ctx: &ScriptContext<'_>) {
        let settings = ctx.settings;
        let exe = shell_word(settings.path_or("turbomole_exec", "dscf"));

        JobInfo::new(ctx, "").output_file("$output_file").emit(out);
        out.push('\n');

        out.push_str(&format!("export PARNODES=\"{}\"\n", settings.cpus));
        out.push_str(&format!("export OMP_NUM_THREADS=\"{}\"\n", settings.cpus));
        out.push_str("cd \"$control_dir\" || exit 1\n");
        out.push_str(&format!(
            "{exe} > \"$output_file\" 2>&1 && EXIT_CODE=0 || EXIT_CODE=$?\n"
        ));

        sections::emit_footer(out, ctx.job_ref());
        out.push_str("\nexit $EXIT_CODE\n");
    }
}

impl SubmitModule for TurbomoleModule {
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

        // A control stays current until the next one, so several coords
        // may share it.
        let mut control = None;
        let mut jobs = Vec::new();
        for token in &tokens {
            if token.ends_with("control") {
                control = Some(request.existing_file(token)?);
            } else if token.ends_with("coord") {
                let coord = request.existing_file(token)?;
                let Some(ref control) = control else {
                    return Err(SubmitError::usage(format!(
                        "Coord file without preceding control: {token}"
                    )));
                };
                let inputs = JobInputs::DirectoryPair {
                    control: control.clone(),
                    coord,
                };
                let stem = self.stem(&inputs);
                jobs.push(JobDescriptor { inputs, stem });
            } else {
                return Err(SubmitError::usage(format!(
                    "Unsupported file (expect *control or *coord): {token}"
                )));
            }
        }

        if jobs.is_empty() {
            return Err(SubmitError::usage("No control/coord pairs specified"));
        }
        JobSet::new(jobs)
    }

    fn stem(&self, inputs: &JobInputs) -> String {
        control_stem(inputs.primary())
    }

    // dscf is invoked directly by the custom bodies
    fn emit_run_command(&self, _out: &mut String, _run: &RunContext<'_>) {}

    fn backup_targets(&self, stem: &str, settings: &Settings, _mode: JobMode) -> Vec<String> {
        let dir = &settings.output_dir;
        vec![
            format!("{dir}{stem}.out"),
            format!("{dir}{stem}{}", settings.log_extension),
        ]
    }

    fn single_body(&self, ctx: &ScriptContext<'_>) -> Option<String> {
        let JobInputs::DirectoryPair { control, .. } = &ctx.jobs.first().inputs else {
            return None;
        };

        let mut out = String::new();
        out.push('\n');
        out.push_str(&ctx.rotation().render_shell_function());
        out.push('\n');
        out.push_str(&format!("CONTROL=\"{}\"\n", escape_path(control)));
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
        sections::emit_manifest_lookup(&mut out, manifest, &["CONTROL", "COORD"]);
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
        out.push_str("if [[ ! -f \"$COORD\" ]]; then\n");
        out.push_str("    printf \"Error: coord file not found: %s\\n\" \"$COORD\"\n");
        out.push_str("    exit 1\n");
        out.push_str("fi\n");
        out.push('\n');

        self.emit_run(&mut out, ctx);
        Some(out)
    }
}
