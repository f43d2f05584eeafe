//! Batch script assembly.
//!
//! A script is the directive header, `set -euo pipefail`, the module's
//! dependency lines and one body: the generic single/array template in
//! [`body`] or a module override.

pub mod body;
pub mod sections;

use std::path::Path;

use crate::backup::RotationPolicy;
use crate::error::{SubmitError, SubmitResult};
use crate::job::{JobMode, JobSet};
use crate::module::SubmitModule;
use crate::settings::Settings;

/// Everything the assembler and module body overrides may read.
#[derive(Clone, Copy)]
pub struct ScriptContext<'a> {
    pub settings: &'a Settings,
    pub module: &'a dyn SubmitModule,
    pub jobs: &'a JobSet,
    pub job_name: &'a str,
    /// Persisted manifest; present in array mode.
    pub manifest: Option<&'a Path>,
    /// Comma-separated node exclusion list.
    pub node_exclude: Option<&'a str>,
}

impl ScriptContext<'_> {
    pub fn mode(&self) -> JobMode {
        self.jobs.mode()
    }

    pub fn job_ref(&self) -> JobRef {
        match self.mode() {
            JobMode::Single => JobRef::Job,
            JobMode::Array => JobRef::ArrayTask,
        }
    }

    /// Rotation policy shared by host-side and embedded backups.
    pub fn rotation(&self) -> RotationPolicy {
        RotationPolicy::from_settings(self.settings)
    }

    /// Manifest path for the worker lookup.
    pub fn manifest_path(&self) -> SubmitResult<&Path> {
        self.manifest
            .ok_or_else(|| SubmitError::usage("Array job requires a persisted manifest"))
    }
}

/// How the running job names itself to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRef {
    Job,
    ArrayTask,
}

impl JobRef {
    /// Argument to `sacct -j`.
    pub fn accounting_target(self) -> &'static str {
        match self {
            JobRef::Job => "\"$SLURM_JOB_ID\"",
            JobRef::ArrayTask => "\"${SLURM_ARRAY_JOB_ID}_${SLURM_ARRAY_TASK_ID}\"",
        }
    }

    /// Per-job (or per-task) scratch directory under `base`.
    pub fn scratch_dir(self, base: &str) -> String {
        match self {
            JobRef::Job => format!("{base}/$SLURM_JOB_ID"),
            JobRef::ArrayTask => format!("{base}/$SLURM_JOB_ID/$SLURM_ARRAY_TASK_ID"),
        }
    }
}

/// Render the complete script.
pub fn assemble(ctx: &ScriptContext<'_>) -> SubmitResult<String> {
    let mut script = String::new();

    sections::emit_header(&mut script, ctx);
    script.push_str("\nset -euo pipefail\n\n");
    ctx.module.emit_dependencies(&mut script, ctx.settings);

    let body = match ctx.mode() {
        JobMode::Single => match ctx.module.single_body(ctx) {
            Some(body) => body,
            None => body::single(ctx),
        },
        JobMode::Array => {
            ctx.manifest_path()?;
            match ctx.module.array_body(ctx) {
                Some(body) => body,
                None => body::array(ctx)?,
            }
        }
    };
    script.push_str(&body);

    Ok(script)
}

/// Make a name safe for `--job-name`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(64) // SLURM has a 64 character limit for job names
        .collect()
}
