//! Generic job bodies used when a module does not supply its own.

use super::sections::{self, JobInfo, escape};
use super::ScriptContext;
use crate::error::SubmitResult;
use crate::job::{InputShape, JobMode};
use crate::module::RunContext;

/// Shell variables holding the manifest fields of an array task.
pub fn field_vars(shape: InputShape) -> Vec<String> {
    (1..=shape.field_count())
        .map(|i| match i {
            1 => "input_file".to_string(),
            n => format!("input_file_{n}"),
        })
        .collect()
}

/// Body of a single job: everything is known at generation time.
pub fn single(ctx: &ScriptContext<'_>) -> String {
    let settings = ctx.settings;
    let descriptor = ctx.module.descriptor();
    let job = ctx.jobs.first();
    let stem = escape(&job.stem);
    let inputs: Vec<String> = job.inputs.fields().iter().map(|f| escape(f)).collect();
    let input_name = job
        .inputs
        .primary()
        .file_name()
        .map(|n| escape(&n.to_string_lossy()))
        .unwrap_or_default();

    let mut out = String::new();
    out.push_str(&format!("\nstem=\"{stem}\"\n\n"));
    JobInfo::new(ctx, input_name).emit(&mut out);
    out.push('\n');

    sections::emit_output_setup(&mut out, settings);
    if descriptor.uses_scratch {
        sections::emit_scratch_setup(&mut out, settings, ctx.job_ref());
    }
    out.push('\n');

    let run = RunContext {
        inputs: &inputs,
        stem_ref: &stem,
        settings,
        mode: JobMode::Single,
    };
    ctx.module.emit_run_command(&mut out, &run);
    out.push('\n');
    ctx.module.emit_retrieve_outputs(&mut out, &stem, settings);

    emit_tail(&mut out, ctx);
    out
}

/// Body of one array task: inputs come from the task's manifest line.
pub fn array(ctx: &ScriptContext<'_>) -> SubmitResult<String> {
    let settings = ctx.settings;
    let descriptor = ctx.module.descriptor();
    let manifest = ctx.manifest_path()?;

    let vars = field_vars(descriptor.input_shape);
    let var_refs: Vec<&str> = vars.iter().map(String::as_str).collect();
    let inputs: Vec<String> = vars.iter().map(|v| format!("${v}")).collect();

    let mut out = String::new();
    out.push('\n');
    out.push_str(&ctx.rotation().render_shell_function());
    out.push('\n');

    sections::emit_manifest_lookup(&mut out, manifest, &var_refs);
    sections::emit_stem(&mut out, &vars[0], descriptor.input_extensions);
    out.push('\n');

    let targets = ctx
        .module
        .backup_targets("${stem}", settings, JobMode::Array);
    sections::emit_backup_call(&mut out, &targets);
    out.push_str(&format!(
        "exec 1>\"{}${{stem}}{}\" 2>&1\n",
        settings.output_dir, settings.log_extension
    ));
    out.push('\n');

    JobInfo::new(ctx, "$(basename \"$input_file\")").emit(&mut out);
    out.push('\n');

    sections::emit_output_setup(&mut out, settings);
    if descriptor.uses_scratch {
        sections::emit_scratch_setup(&mut out, settings, ctx.job_ref());
    }
    out.push('\n');

    let run = RunContext {
        inputs: &inputs,
        stem_ref: "$stem",
        settings,
        mode: JobMode::Array,
    };
    ctx.module.emit_run_command(&mut out, &run);
    out.push('\n');
    ctx.module.emit_retrieve_outputs(&mut out, "$stem", settings);

    emit_tail(&mut out, ctx);
    Ok(out)
}

fn emit_tail(out: &mut String, ctx: &ScriptContext<'_>) {
    let descriptor = ctx.module.descriptor();

    if descriptor.archives() {
        out.push('\n');
        sections::emit_archive(out, ctx.settings.create_archive);
    }
    if descriptor.uses_scratch {
        out.push('\n');
        sections::emit_scratch_cleanup(out);
    }
    sections::emit_footer(out, ctx.job_ref());
}

