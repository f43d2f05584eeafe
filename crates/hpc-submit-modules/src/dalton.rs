//! Dalton: `.dal` inputs with optional `.mol` geometry, `.pot` embedding
//! potential and `.tar.gz` restart archive.
//!
//! # Token rules
//!
//! Inputs are read left to right:
//!
//! - `.dal` starts a new segment. A `.pot` seen before the first `.dal`
//!   becomes the segment's potential.
//! - `.mol` adds a job for the current `.dal`.
//! - `.pot` after a `.dal` applies to every job of the segment that has no
//!   potential yet, and to the jobs that follow in the segment.
//! - `.tar.gz` is the restart archive of the next `.mol`.
//! - A `.dal` without any `.mol` is a job of its own if it embeds its
//!   geometry (a line starting with `BASIS` or `Atomtypes=`).
//!
//! ```text
//! sdalton opt.dal a.mol b.mol env.pot   ->  opt_a_env, opt_b_env
//! sdalton env.pot exc.dal h2o.mol       ->  exc_h2o_env
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Arg, ArgAction, ArgMatches, Command};
use hpc_submit_core::job::file_stem;
use hpc_submit_core::manifest;
use hpc_submit_core::script::sections::{self, JobInfo};
use hpc_submit_core::{
    InputShape, JobDescriptor, JobInputs, JobMode, JobRequest, JobSet, MemoryUnit,
    ModuleDescriptor, RunContext, ScriptContext, Settings, SubmitError, SubmitModule,
    SubmitResult,
};
use tracing::debug;

use crate::common::{self, record_fields};

const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    id: "dalton",
    input_extensions: &[".dal", ".mol", ".pot", ".tar.gz"],
    output_extensions: &[".out"],
    default_cpus: Some(1),
    default_memory: Some("2"),
    default_throttle: Some(10),
    default_output_dir: Some("output"),
    memory_unit: MemoryUnit::WholeGb,
    uses_scratch: true,
    uses_archive: false,
    input_shape: InputShape::Tuple { trailing: 3 },
    ..ModuleDescriptor::BASE
};

const USAGE: &str = "\
Dalton submission (dal/mol/pot/rst)

Module options:
  -l, --loprop             Request LoProp files (-get \"AOONEINT AOPROPER\")

Usage:
  sdalton input.dal geom.mol [pot.pot] [restart.tar.gz] [options]
  sdalton input.dal geom1.mol geom2.mol ... [options]
  sdalton -M FILE [options]

Examples:
  sdalton exc_b3lyp.dal augccpvdz_h2o.mol -c 1 -m 4
  sdalton opt.dal ccpvdz_h2o.mol ccpvdz_ethanol.mol -T 5
  sdalton -M manifest.txt -c 4 -m 8";

/// Memory above which the 64-bit integer build is used.
const LARGE_MEMORY_GB: u64 = 16;

/// Dalton plug-in.
#[derive(Debug, Default, Clone)]
pub struct DaltonModule {
    loprop: bool,
}

/// One Dalton calculation before it becomes a [`JobDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct DaltonJob {
    dal: PathBuf,
    mol: Option<PathBuf>,
    pot: Option<PathBuf>,
    restart: Option<PathBuf>,
}

impl DaltonJob {
    fn into_inputs(self) -> JobInputs {
        JobInputs::Tuple {
            primary: self.dal,
            trailing: vec![self.mol, self.pot, self.restart],
        }
    }
}

/// Whether a `.dal` file carries its own molecule.
fn dal_contains_geometry(dal: &Path) -> SubmitResult<bool> {
    let text = fs::read_to_string(dal).map_err(|e| SubmitError::io(dal, e))?;
    Ok(text
        .lines()
        .any(|line| line.starts_with("BASIS") || line.starts_with("Atomtypes=")))
}

/// Left-to-right reader of `.dal/.mol/.pot/.tar.gz` tokens.
struct TokenReader<'r> {
    request: &'r JobRequest<'r>,
    jobs: Vec<DaltonJob>,
    dal: Option<PathBuf>,
    dal_has_mol: bool,
    sticky_pot: Option<PathBuf>,
    segment_start: usize,
    next_restart: Option<PathBuf>,
    pending_restart: Option<PathBuf>,
    pending_pot: Option<PathBuf>,
}

impl<'r> TokenReader<'r> {
    fn new(request: &'r JobRequest<'r>) -> Self {
        Self {
            request,
            jobs: Vec::new(),
            dal: None,
            dal_has_mol: false,
            sticky_pot: None,
            segment_start: 0,
            next_restart: None,
            pending_restart: None,
            pending_pot: None,
        }
    }

    fn push_explicit(&mut self, job: DaltonJob) -> SubmitResult<()> {
        self.close_segment()?;
        self.jobs.push(job);
        Ok(())
    }

    fn read(&mut self, token: &str) -> SubmitResult<()> {
        if token.ends_with(".dal") {
            let dal = self.request.existing_file(token)?;
            self.close_segment()?;
            self.dal = Some(dal);
            self.dal_has_mol = false;
            self.sticky_pot = self.pending_pot.take();
            self.segment_start = self.jobs.len();
            self.next_restart = None;
        } else if token.ends_with(".pot") {
            let pot = self.request.existing_file(token)?;
            if self.dal.is_none() {
                self.pending_pot = Some(pot);
            } else {
                for job in &mut self.jobs[self.segment_start..] {
                    if job.pot.is_none() {
                        job.pot = Some(pot.clone());
                    }
                }
                self.sticky_pot = Some(pot);
            }
        } else if token.ends_with(".tar.gz") {
            let restart = self.request.existing_file(token)?;
            if self.dal.is_some() {
                self.next_restart = Some(restart);
            } else {
                self.pending_restart = Some(restart);
            }
        } else if token.ends_with(".mol") {
            let mol = self.request.existing_file(token)?;
            let Some(ref dal) = self.dal else {
                return Err(SubmitError::usage(format!(
                    ".mol without a preceding .dal: {token}"
                )));
            };
            let restart = self
                .next_restart
                .take()
                .or_else(|| self.pending_restart.take());
            self.jobs.push(DaltonJob {
                dal: dal.clone(),
                mol: Some(mol),
                pot: self.sticky_pot.clone(),
                restart,
            });
            self.dal_has_mol = true;
        } else {
            return Err(SubmitError::usage(format!(
                "Unsupported file type (expect .dal/.mol/.pot/.tar.gz): {token}"
            )));
        }
        Ok(())
    }

    /// A `.dal` that never got a `.mol` must embed its geometry.
    fn close_segment(&mut self) -> SubmitResult<()> {
        let Some(dal) = self.dal.take() else {
            return Ok(());
        };
        if self.dal_has_mol {
            return Ok(());
        }
        if !dal_contains_geometry(&dal)? {
            return Err(SubmitError::usage(format!(
                ".dal file without .mol: {} (embed geometry or provide .mol)",
                dal.display()
            )));
        }
        let restart = self
            .next_restart
            .take()
            .or_else(|| self.pending_restart.take());
        self.jobs.push(DaltonJob {
            dal,
            mol: None,
            pot: self.sticky_pot.clone(),
            restart,
        });
        Ok(())
    }

    fn finish(mut self) -> SubmitResult<Vec<DaltonJob>> {
        self.close_segment()?;
        Ok(self.jobs)
    }
}

/// A manifest line naming at least `.dal` and `.mol` explicitly.
fn explicit_job(request: &JobRequest<'_>, fields: &[String]) -> SubmitResult<DaltonJob> {
    let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or_default();
    let check = |value: &str, ext: &str, label: &str| -> SubmitResult<Option<PathBuf>> {
        if value.is_empty() {
            return Ok(None);
        }
        let path = request.absolute(value);
        if !value.ends_with(ext) || !path.is_file() {
            return Err(SubmitError::usage(format!("Invalid {label} in manifest: {value}")));
        }
        Ok(Some(path))
    };

    let dal = check(field(0), ".dal", "DAL")?;
    let mol = check(field(1), ".mol", "MOL")?;
    let (Some(dal), Some(mol)) = (dal, mol) else {
        return Err(SubmitError::usage(format!(
            "Invalid manifest line (expect .dal and .mol): {}",
            fields.join(" ")
        )));
    };

    Ok(DaltonJob {
        dal,
        mol: Some(mol),
        pot: check(field(2), ".pot", "POT")?,
        restart: check(field(3), ".tar.gz", "RESTART")?,
    })
}

impl DaltonModule {
    fn emit_stem(out: &mut String, settings: &Settings) {
        common::emit_base_name(out, "dal_base", "DAL");
        out.push_str("if [[ -n \"$MOL\" ]]; then\n    ");
        common::emit_base_name(out, "mol_base", "MOL");
        out.push_str("    if [[ -n \"$POT\" ]]; then\n        ");
        common::emit_base_name(out, "pot_base", "POT");
        out.push_str("        stem=\"${dal_base}_${mol_base}_${pot_base}\"\n");
        out.push_str("    else\n");
        out.push_str("        stem=\"${dal_base}_${mol_base}\"\n");
        out.push_str("    fi\n");
        out.push_str("else\n");
        out.push_str("    stem=\"${dal_base}\"\n");
        out.push_str("fi\n");
        out.push_str(&format!(
            "output_file=\"{}${{stem}}.out\"\n",
            settings.output_dir
        ));
    }

    fn emit_run(&self, out: &mut String, ctx: &ScriptContext<'_>) {
        let settings = ctx.settings;
        let memory = settings.memory.amount();

        JobInfo::new(ctx, "").output_file("$output_file").emit(out);
        out.push('\n');

        out.push_str(&format!(
            "export DALTON_TMPDIR=\"{}\"\n",
            ctx.job_ref().scratch_dir(&settings.scratch_base)
        ));
        out.push_str("mkdir -p \"$DALTON_TMPDIR\"\n");
        out.push('\n');

        out.push_str(&format!(
            "DALTON_BIN=\"{}\"\n",
            sections::escape(settings.path_or("dalton_exec_32i", "dalton"))
        ));
        // the 64-bit integer build cannot read embedding potentials
        if settings.memory.whole_gb().is_some_and(|gb| gb > LARGE_MEMORY_GB) {
            out.push_str("if [[ -z \"$POT\" ]]; then\n");
            out.push_str(&format!(
                "    DALTON_BIN=\"{}\"\n",
                sections::escape(settings.path_or("dalton_exec_64i", "dalton"))
            ));
            out.push_str("fi\n");
        }
        out.push('\n');

        out.push_str(&format!(
            "cmd=( \"$DALTON_BIN\" -d -np \"{}\" -gb \"{memory}\" -t \"$DALTON_TMPDIR\" -dal \"$DAL\" -o \"$output_file\" )\n",
            settings.cpus
        ));
        out.push_str("if [[ -n \"$MOL\" ]]; then cmd+=( -mol \"$MOL\" ); fi\n");
        out.push_str("if [[ -n \"$POT\" ]]; then cmd+=( -pot \"$POT\" ); fi\n");
        out.push_str("if [[ -n \"$RST\" ]]; then cmd+=( -f \"$RST\" ); fi\n");
        if self.loprop {
            out.push_str("cmd+=( -get \"AOONEINT AOPROPER\" )\n");
        }
        out.push('\n');
        out.push_str("\"${cmd[@]}\" && dalton_exit_code=0 || dalton_exit_code=$?\n");
        out.push('\n');

        if settings.output_dir != "./" {
            out.push_str("if [[ -f \"${stem}.tar.gz\" ]]; then\n");
            out.push_str(&format!(
                "    mv \"${{stem}}.tar.gz\" \"{}${{stem}}.tar.gz\"\n",
                settings.output_dir
            ));
            out.push_str("fi\n");
            out.push('\n');
        }

        out.push_str("rm -rf \"$DALTON_TMPDIR\" || true\n");
        sections::emit_footer(out, ctx.job_ref());
        out.push_str("\nexit $dalton_exit_code\n");
    }
}

impl SubmitModule for DaltonModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &DESCRIPTOR
    }

    fn usage(&self) -> &'static str {
        USAGE
    }

    fn augment_args(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("loprop")
                .short('l')
                .long("loprop")
                .action(ArgAction::SetTrue)
                .help("Request LoProp files (-get \"AOONEINT AOPROPER\")"),
        )
    }

    fn parse_args(&mut self, matches: &ArgMatches, passthrough: &[String]) -> SubmitResult<()> {
        if let Some(arg) = passthrough.first() {
            return Err(SubmitError::usage(format!("Unknown option: {arg}")));
        }
        self.loprop = matches.get_flag("loprop");
        Ok(())
    }

    fn build_jobs(&self, request: &JobRequest<'_>) -> SubmitResult<JobSet> {
        let mut reader = TokenReader::new(request);

        match request.manifest {
            Some(path) => {
                if !request.positional.is_empty() {
                    return Err(SubmitError::usage(
                        "Positional inputs cannot be combined with --manifest",
                    ));
                }
                let path = request.absolute(&path.to_string_lossy());
                for record in manifest::read_records(&path)? {
                    let fields = record_fields(&record);
                    match fields.as_slice() {
                        [token] => reader.read(token)?,
                        _ => reader.push_explicit(explicit_job(request, &fields)?)?,
                    }
                }
            }
            None => {
                for token in request.positional {
                    reader.read(token)?;
                }
            }
        }

        let jobs: Vec<JobDescriptor> = reader
            .finish()?
            .into_iter()
            .map(|job| {
                let inputs = job.into_inputs();
                let stem = self.stem(&inputs);
                JobDescriptor { inputs, stem }
            })
            .collect();
        debug!("Assembled {} Dalton jobs", jobs.len());
        JobSet::new(jobs)
    }

    fn stem(&self, inputs: &JobInputs) -> String {
        let JobInputs::Tuple { primary, trailing } = inputs else {
            return file_stem(inputs.primary());
        };
        let mut stem = file_stem(primary);
        if let Some(Some(mol)) = trailing.first() {
            stem.push('_');
            stem.push_str(&file_stem(mol));
            if let Some(Some(pot)) = trailing.get(1) {
                stem.push('_');
                stem.push_str(&file_stem(pot));
            }
        }
        stem
    }

    // dalton is invoked directly by the custom bodies
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
        let fields = ctx.jobs.first().inputs.fields();
        let field = |i: usize| fields.get(i).map(|f| sections::escape(f)).unwrap_or_default();

        let mut out = String::new();
        out.push('\n');
        out.push_str(&ctx.rotation().render_shell_function());
        out.push('\n');
        for (i, var) in ["DAL", "MOL", "POT", "RST"].iter().enumerate() {
            out.push_str(&format!("{var}=\"{}\"\n", field(i)));
        }
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
        sections::emit_manifest_lookup(&mut out, manifest, &["DAL", "MOL", "POT", "RST"]);
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
