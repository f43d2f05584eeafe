//! Top-level control flow of one invocation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use clap::FromArgMatches;
use tracing::{debug, info};

use crate::args::{self, CommonArgs};
use crate::backup::{Rotation, RotationPolicy};
use crate::error::{SubmitError, SubmitResult};
use crate::job::{JobMode, JobRequest, JobSet, absolutize};
use crate::manifest;
use crate::module::{ModuleDescriptor, ModuleRegistry, SubmitModule};
use crate::partition;
use crate::scheduler::BatchScheduler;
use crate::script::{self, ScriptContext};
use crate::settings::{ConfigDir, Settings};

/// Name of the multi-module front end.
pub const FRONT_END: &str = "submit";

/// Module chosen from the process arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSelection {
    pub module: String,
    /// How the user invoked us, for help and error messages.
    pub invocation: String,
    /// Arguments after the module selection.
    pub args: Vec<String>,
}

/// Select the module: `submit <module> …` or a binary named `s<module>`.
pub fn resolve_module_name(argv: &[String]) -> SubmitResult<ModuleSelection> {
    let program = argv
        .first()
        .map(|arg0| {
            Path::new(arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg0.clone())
        })
        .unwrap_or_else(|| FRONT_END.to_string());

    if program == FRONT_END {
        let Some(module) = argv.get(1) else {
            return Err(SubmitError::usage(format!(
                "Usage: {FRONT_END} <module> [input...] [options]"
            )));
        };
        return Ok(ModuleSelection {
            module: module.clone(),
            invocation: format!("{FRONT_END} {module}"),
            args: argv[2..].to_vec(),
        });
    }

    let module = program.strip_prefix('s').unwrap_or(&program).to_string();
    Ok(ModuleSelection {
        module,
        invocation: program,
        args: argv.get(1..).map(<[String]>::to_vec).unwrap_or_default(),
    })
}

/// A parsed command line bound to its module.
pub struct Invocation {
    pub selection: ModuleSelection,
    pub args: CommonArgs,
    /// `-v` count.
    pub verbosity: u8,
    module: Box<dyn SubmitModule>,
}

impl Invocation {
    pub fn module(&self) -> &dyn SubmitModule {
        self.module.as_ref()
    }
}

/// A rendered script and where it goes.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub script: String,
    pub job_name: String,
    pub mode: JobMode,
    pub job_count: usize,
    pub throttle: u32,
    pub manifest: Option<PathBuf>,
    /// Export destination; `None` submits.
    pub export: Option<PathBuf>,
}

/// What happened to the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Exported { path: PathBuf },
    Submitted { job_id: String },
}

/// Runs invocations against a module registry.
pub struct Dispatcher {
    registry: ModuleRegistry,
    work_dir: PathBuf,
}

impl Dispatcher {
    /// `work_dir` anchors relative inputs, outputs, manifests and exports.
    pub fn new(registry: ModuleRegistry, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            work_dir: work_dir.into(),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Resolve the module and parse its command line.
    pub fn parse(&self, argv: &[String]) -> SubmitResult<Invocation> {
        let selection = resolve_module_name(argv)?;
        let mut module = self.registry.create(&selection.module)?;

        let cmd = args::command(module.as_ref(), &selection.invocation);
        let matches = cmd.try_get_matches_from(
            std::iter::once(selection.invocation.clone()).chain(selection.args.iter().cloned()),
        )?;
        let common = CommonArgs::from_arg_matches(&matches)?;
        module.parse_args(&matches, &common.passthrough)?;

        Ok(Invocation {
            selection,
            args: common,
            verbosity: matches.get_count("verbose"),
            module,
        })
    }

    /// Everything up to the rendered script: settings, jobs, manifest and
    /// host-side backups.
    pub fn compile(&self, invocation: &Invocation) -> SubmitResult<CompiledJob> {
        let module = invocation.module();
        let descriptor = module.descriptor();
        let common = &invocation.args;

        let config_dir = ConfigDir::discover(common.config_dir.as_deref(), &self.work_dir);
        let layer = config_dir
            .resolve(
                descriptor.id,
                descriptor.defaults_layer(),
                common.variant.as_deref(),
            )?
            .overlay(common.to_layer()?);
        let settings = Settings::from_layer(layer, descriptor.memory_unit)?;

        let jobs = module.build_jobs(&JobRequest {
            positional: &common.inputs,
            manifest: common.manifest.as_deref(),
            work_dir: &self.work_dir,
        })?;
        module.validate(&settings)?;

        let export = common.export.as_ref().map(|target| match target {
            Some(path) => absolutize(&self.work_dir, path),
            None => self.work_dir.join(format!("{}.slurm", descriptor.id)),
        });
        if let Some(ref path) = export {
            self.check_export_target(path, descriptor, &jobs, common.manifest.as_deref())?;
        }

        let node_exclude = partition::node_exclusions(&settings, &config_dir)?;
        let job_name = script::sanitize_name(
            &common
                .job_name
                .clone()
                .unwrap_or_else(|| module.job_name(&jobs, &settings)),
        );

        let output_dir = absolutize(&self.work_dir, Path::new(settings.output_path()));
        fs::create_dir_all(&output_dir).map_err(|e| SubmitError::io(&output_dir, e))?;

        let manifest = match jobs.mode() {
            JobMode::Array => {
                let path = manifest::persist(&jobs, &self.work_dir, &job_name)?;
                info!("Created manifest file: {}", path.display());
                Some(path)
            }
            JobMode::Single => None,
        };

        self.backup_outputs(module, &jobs, &settings)?;

        let ctx = ScriptContext {
            settings: &settings,
            module,
            jobs: &jobs,
            job_name: &job_name,
            manifest: manifest.as_deref(),
            node_exclude: node_exclude.as_deref(),
        };
        let script = script::assemble(&ctx)?;

        Ok(CompiledJob {
            script,
            job_name,
            mode: jobs.mode(),
            job_count: jobs.len(),
            throttle: settings.throttle,
            manifest,
            export,
        })
    }

    /// Compile, then export or submit.
    pub async fn execute(
        &self,
        invocation: &Invocation,
        scheduler: &dyn BatchScheduler,
    ) -> SubmitResult<Outcome> {
        let compiled = self.compile(invocation)?;

        if let Some(path) = compiled.export {
            write_export(&compiled.script, &path)?;
            info!("Exported sbatch script to {}", path.display());
            return Ok(Outcome::Exported { path });
        }

        debug!("Submitting {} via {}", compiled.job_name, scheduler.name());
        let job_id = scheduler.submit(&compiled.script).await?;
        info!("Submitted batch job {}", job_id);
        if compiled.mode == JobMode::Array {
            info!(
                "Job array: {} subjobs, throttled to {} concurrent",
                compiled.job_count, compiled.throttle
            );
        }
        Ok(Outcome::Submitted { job_id })
    }

    /// Parse `argv` and execute it.
    pub async fn run(
        &self,
        argv: &[String],
        scheduler: &dyn BatchScheduler,
    ) -> SubmitResult<Outcome> {
        let invocation = self.parse(argv)?;
        self.execute(&invocation, scheduler).await
    }

    /// `--export` takes an optional value, so `--export a.inp b.inp` names
    /// an input as the destination. Targets that are inputs, the manifest,
    /// or carry an input extension are refused.
    fn check_export_target(
        &self,
        export: &Path,
        descriptor: &ModuleDescriptor,
        jobs: &JobSet,
        manifest: Option<&Path>,
    ) -> SubmitResult<()> {
        let has_input_extension =
            !descriptor.input_extensions.is_empty() && descriptor.accepts(export);
        let is_input = jobs
            .jobs()
            .iter()
            .flat_map(|job| job.inputs.fields())
            .any(|field| !field.is_empty() && Path::new(&field) == export);
        let is_manifest = manifest.is_some_and(|m| absolutize(&self.work_dir, m) == export);

        let clashes = has_input_extension || is_input || is_manifest;
        if clashes {
            return Err(SubmitError::usage(format!(
                "Export target {} looks like an input file; put --export after the inputs or give it a script name",
                export.display()
            )));
        }
        Ok(())
    }

    fn backup_outputs(
        &self,
        module: &dyn SubmitModule,
        jobs: &JobSet,
        settings: &Settings,
    ) -> SubmitResult<()> {
        let policy = RotationPolicy::from_settings(settings);
        for job in jobs.jobs() {
            for target in module.backup_targets(&job.stem, settings, jobs.mode()) {
                let path = absolutize(&self.work_dir, Path::new(&target));
                if let Rotation::Rotated { backup } = policy.rotate(&path)? {
                    info!("Backed up {} to {}", target, backup.display());
                }
            }
        }
        Ok(())
    }
}

fn write_export(script: &str, path: &Path) -> SubmitResult<()> {
    let export_error = |source| SubmitError::Export {
        path: path.to_path_buf(),
        source,
    };
    fs::write(path, script).map_err(export_error)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(export_error)?;
    Ok(())
}
