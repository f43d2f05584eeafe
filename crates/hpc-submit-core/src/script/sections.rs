//! Script sections shared by the generic bodies and module overrides.

use std::path::Path;

use super::{JobRef, ScriptContext};
use crate::backup::SHELL_FUNCTION;
use crate::job::JobMode;
use crate::settings::{MemoryUnit, Settings};

/// Escape text for use inside a double-quoted shell word.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escaped text of a path.
pub fn escape_path(path: &Path) -> String {
    escape(&path.to_string_lossy())
}

/// `#!/bin/bash` and the `#SBATCH` directives.
pub fn emit_header(out: &mut String, ctx: &ScriptContext<'_>) {
    let settings = ctx.settings;

    out.push_str("#!/bin/bash\n");
    out.push_str(&format!("#SBATCH --job-name={}\n", ctx.job_name));

    match ctx.mode() {
        JobMode::Array => {
            out.push_str("#SBATCH --output=\"/dev/null\"\n");
            out.push_str(&format!(
                "#SBATCH --array=1-{}%{}\n",
                ctx.jobs.len(),
                settings.throttle
            ));
        }
        JobMode::Single => {
            out.push_str(&format!(
                "#SBATCH --output=\"{}%x{}\"\n",
                settings.output_dir, settings.log_extension
            ));
        }
    }

    out.push_str(&format!("#SBATCH --nodes={}\n", settings.nodes));
    out.push_str(&format!("#SBATCH --ntasks={}\n", settings.ntasks));
    out.push_str(&format!("#SBATCH --cpus-per-task={}\n", settings.cpus));
    out.push_str(&format!("#SBATCH --mem={}\n", settings.memory.directive()));
    out.push_str(&format!("#SBATCH --partition={}\n", settings.partition));

    if let Some(ref time) = settings.time_limit {
        out.push_str(&format!("#SBATCH --time={time}\n"));
    }
    if let Some(nice) = settings.nice {
        out.push_str(&format!("#SBATCH --nice={nice}\n"));
    }
    if let Some(nodes) = ctx.node_exclude {
        out.push_str(&format!("#SBATCH --exclude={nodes}\n"));
    }

    out.push_str("#SBATCH --export=NONE\n");
}

/// The printf banner at the top of every job log.
pub struct JobInfo<'a> {
    ctx: &'a ScriptContext<'a>,
    file_label: &'static str,
    file_value: String,
    memory: Option<(String, String)>,
}

impl<'a> JobInfo<'a> {
    /// Banner showing `input` (text placed inside double quotes).
    pub fn new(ctx: &'a ScriptContext<'a>, input: impl Into<String>) -> Self {
        Self {
            ctx,
            file_label: "Input file:",
            file_value: input.into(),
            memory: None,
        }
    }

    /// Show an output file instead of the input.
    pub fn output_file(mut self, value: impl Into<String>) -> Self {
        self.file_label = "Output file:";
        self.file_value = value.into();
        self
    }

    /// Show an explicit total and per-core memory.
    pub fn memory(mut self, total: impl Into<String>, per_core: impl Into<String>) -> Self {
        self.memory = Some((total.into(), per_core.into()));
        self
    }

    pub fn emit(&self, out: &mut String) {
        let settings = self.ctx.settings;

        out.push_str("printf \"Job information\\n\"\n");
        line(out, "Job name:", self.ctx.job_name);
        match self.ctx.job_ref() {
            JobRef::Job => line(out, "Job ID:", "$SLURM_JOB_ID"),
            JobRef::ArrayTask => out.push_str(
                "printf \"Job ID:        %s_%s\\n\" \"$SLURM_ARRAY_JOB_ID\" \"$SLURM_ARRAY_TASK_ID\"\n",
            ),
        }
        line(out, self.file_label, &self.file_value);
        line(out, "Compute node:", "$HOSTNAME");
        line(out, "Partition:", &settings.partition);
        line(out, "CPU cores:", &settings.cpus.to_string());

        match (&self.memory, settings.memory.unit()) {
            (Some((total, per_core)), _) => memory_line(out, total, per_core),
            (None, MemoryUnit::WholeGb) => {
                let per_core = settings.memory.per_core(settings.cpus).unwrap_or_default();
                memory_line(out, settings.memory.amount(), &per_core.to_string());
            }
            (None, MemoryUnit::FractionalGb) => out.push_str(&format!(
                "printf \"Memory:        %s GB\\n\" \"{}\"\n",
                settings.memory.amount()
            )),
        }

        line(
            out,
            "Time limit:",
            settings
                .time_limit
                .as_deref()
                .unwrap_or("default (partition max)"),
        );
        line(out, "Submitted by:", "$USER");
        line(out, "Submitted on:", "$(date)");
    }
}

fn line(out: &mut String, label: &str, value: &str) {
    out.push_str(&format!("printf \"{label:<15}%s\\n\"   \"{value}\"\n"));
}

fn memory_line(out: &mut String, total: &str, per_core: &str) {
    out.push_str(&format!(
        "printf \"Memory:        %s GB (%s GB per CPU core)\\n\" \\\n  \"{total}\" \"{per_core}\"\n"
    ));
}

/// `output_directory`, which run commands and retrieval write into.
pub fn emit_output_setup(out: &mut String, settings: &Settings) {
    out.push_str(&format!("output_directory=\"{}\"\n", settings.output_dir));
}

/// `scratch_directory` and its creation.
pub fn emit_scratch_setup(out: &mut String, settings: &Settings, job_ref: JobRef) {
    out.push_str(&format!(
        "scratch_directory=\"{}\"\n",
        job_ref.scratch_dir(&settings.scratch_base)
    ));
    out.push_str("mkdir -p \"$scratch_directory\"\n");
}

pub fn emit_scratch_cleanup(out: &mut String) {
    out.push_str("rm -rf \"$scratch_directory\"\n");
}

/// Pack the scratch directory into `<output>/<stem>.tar.xz`.
pub fn emit_archive(out: &mut String, create: bool) {
    if !create {
        out.push_str("printf \"\\nArchive creation disabled\\n\"\n");
        return;
    }
    out.push_str("if tar -cJf \"$output_directory$stem.tar.xz\" -C \"$scratch_directory\" .; then\n");
    out.push_str("  printf \"\\nArchive \\\"%s.tar.xz\\\" has been created in %s\\n\" \\\n");
    out.push_str("    \"$stem\" \"$output_directory\"\n");
    out.push_str("else\n");
    out.push_str("  printf \"\\nError: Failed to create archive %s.tar.xz in %s\\n\" \\\n");
    out.push_str("    \"$stem\" \"$output_directory\"\n");
    out.push_str("fi\n");
}

/// Completion report with the scheduler's accounting line.
pub fn emit_footer(out: &mut String, job_ref: JobRef) {
    out.push('\n');
    out.push_str("printf \"\\nEnd of job\\n\"\n");
    out.push_str("printf \"      Job ID   Job name     Memory   Wall time   CPU time\\n\"\n");
    out.push_str("sleep 2\n");
    out.push_str(&format!(
        "/usr/bin/sacct -n -j {} \\\n  --format=JobID,JobName,MaxRSS,Elapsed,CPUTime --units=MB\n",
        job_ref.accounting_target()
    ));
}

/// Assign the fields of this task's manifest record to `vars`.
///
/// One variable takes the whole line; several take one tab field each, so
/// empty optional fields stay in position.
pub fn emit_manifest_lookup(out: &mut String, manifest: &Path, vars: &[&str]) {
    let manifest = escape_path(manifest);
    let lookup = format!("$(sed -n \"${{SLURM_ARRAY_TASK_ID}}p\" \"{manifest}\")");

    match vars {
        [var] => out.push_str(&format!("{var}={lookup}\n")),
        _ => {
            out.push_str(&format!("task_line={lookup}\n"));
            for (i, var) in vars.iter().enumerate() {
                out.push_str(&format!("{var}=$(cut -f{} <<< \"$task_line\")\n", i + 1));
            }
        }
    }
}

/// Set `stem` to the basename of `$input_var` minus its extension.
pub fn emit_stem(out: &mut String, input_var: &str, extensions: &[&str]) {
    match extensions {
        [] => out.push_str(&format!("stem=$(basename \"${input_var}\")\n")),
        [ext] => out.push_str(&format!("stem=$(basename \"${input_var}\" {ext})\n")),
        _ => {
            out.push_str(&format!("stem=$(basename \"${input_var}\")\n"));
            out.push_str("case \"$stem\" in\n");
            for ext in extensions {
                out.push_str(&format!("    *{ext}) stem=\"${{stem%{ext}}}\" ;;\n"));
            }
            out.push_str("esac\n");
        }
    }
}

/// Call the embedded rotation function on `targets`.
pub fn emit_backup_call(out: &mut String, targets: &[String]) {
    if targets.is_empty() {
        return;
    }
    out.push_str(SHELL_FUNCTION);
    for target in targets {
        out.push_str(&format!(" \"{target}\""));
    }
    out.push('\n');
}
