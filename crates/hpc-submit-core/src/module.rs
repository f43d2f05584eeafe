//! Module capability interface.
//!
//! Every program-specific plug-in implements [`SubmitModule`]. The pipeline
//! only ever holds a `Box<dyn SubmitModule>` chosen once from the
//! [`ModuleRegistry`]; it never branches on which program it is driving.

use std::path::Path;

use clap::{ArgMatches, Command};
use rustc_hash::FxHashMap;

use crate::error::{SubmitError, SubmitResult};
use crate::job::{
    InputShape, JobDescriptor, JobInputs, JobMode, JobRequest, JobSet, strip_extension,
};
use crate::manifest;
use crate::script::ScriptContext;
use crate::settings::{
    MemoryAmount, MemoryUnit, OutputSection, ResourcesSection, Settings, SettingsLayer,
};

/// Static metadata for one program.
#[derive(Debug, Clone, Copy)]
pub struct ModuleDescriptor {
    /// Registry key and prefix of synthetic array job names.
    pub id: &'static str,
    /// Accepted input extensions; empty accepts anything.
    pub input_extensions: &'static [&'static str],
    /// Extensions of the main outputs, rotated before a run.
    pub output_extensions: &'static [&'static str],
    /// Extensions copied back from scratch after a run.
    pub retrieve_extensions: &'static [&'static str],
    pub default_cpus: Option<u32>,
    pub default_memory: Option<&'static str>,
    pub default_throttle: Option<u32>,
    pub default_output_dir: Option<&'static str>,
    pub memory_unit: MemoryUnit,
    pub uses_scratch: bool,
    /// Pack the scratch directory after the run. Needs `uses_scratch`.
    pub uses_archive: bool,
    pub input_shape: InputShape,
}

impl ModuleDescriptor {
    /// Descriptor with no defaults, meant for struct-update syntax.
    pub const BASE: ModuleDescriptor = ModuleDescriptor {
        id: "",
        input_extensions: &[],
        output_extensions: &[],
        retrieve_extensions: &[],
        default_cpus: None,
        default_memory: None,
        default_throttle: None,
        default_output_dir: None,
        memory_unit: MemoryUnit::WholeGb,
        uses_scratch: false,
        uses_archive: false,
        input_shape: InputShape::Single,
    };

    /// Settings layer holding only the defaults this module declares.
    pub fn defaults_layer(&self) -> SettingsLayer {
        SettingsLayer {
            resources: ResourcesSection {
                cpus: self.default_cpus,
                memory_gb: self.default_memory.map(MemoryAmount::new),
                throttle: self.default_throttle,
                ..Default::default()
            },
            output: OutputSection {
                directory: self.default_output_dir.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether scripts end by archiving scratch.
    pub fn archives(&self) -> bool {
        self.uses_archive && self.uses_scratch
    }

    /// Whether `path` carries one of the accepted input extensions.
    pub fn accepts(&self, path: &Path) -> bool {
        if self.input_extensions.is_empty() {
            return true;
        }
        let name = path.to_string_lossy();
        self.input_extensions.iter().any(|ext| name.ends_with(ext))
    }
}

/// Inputs handed to run-command emission.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// One shell word per input field: a quoted-safe absolute path in single
    /// mode, a variable reference in array mode.
    pub inputs: &'a [String],
    /// Literal stem or `$stem`.
    pub stem_ref: &'a str,
    pub settings: &'a Settings,
    pub mode: JobMode,
}

impl RunContext<'_> {
    /// The primary input reference.
    pub fn input_ref(&self) -> &str {
        self.inputs.first().map(String::as_str).unwrap_or_default()
    }
}

/// Operations a program plug-in provides to the submission pipeline.
pub trait SubmitModule: Send + Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Module-specific help text, shown above the common options.
    fn usage(&self) -> &'static str;

    /// Add module-private flags to the command.
    fn augment_args(&self, cmd: Command) -> Command {
        cmd
    }

    /// Read module-private flags and the arguments after `--`.
    fn parse_args(&mut self, _matches: &ArgMatches, passthrough: &[String]) -> SubmitResult<()> {
        match passthrough.first() {
            Some(arg) => Err(SubmitError::usage(format!("Unknown option: {arg}"))),
            None => Ok(()),
        }
    }

    /// Check module state against the resolved settings.
    fn validate(&self, _settings: &Settings) -> SubmitResult<()> {
        Ok(())
    }

    /// Build the job set from positional inputs or a manifest.
    fn build_jobs(&self, request: &JobRequest<'_>) -> SubmitResult<JobSet> {
        single_file_jobs(self.descriptor(), request, |inputs| self.stem(inputs))
    }

    /// Stem naming the outputs of one work unit.
    fn stem(&self, inputs: &JobInputs) -> String {
        strip_extension(inputs.primary(), self.descriptor().input_extensions)
    }

    /// Job name when the user gave none.
    fn job_name(&self, jobs: &JobSet, settings: &Settings) -> String {
        default_job_name(self.descriptor().id, jobs, settings)
    }

    /// Environment setup lines (module loads, exports).
    fn emit_dependencies(&self, out: &mut String, settings: &Settings) {
        if let Some(ref setup) = settings.dependencies {
            out.push_str(setup.trim_end());
            out.push('\n');
        }
    }

    /// Lines that run the program for one work unit.
    fn emit_run_command(&self, out: &mut String, run: &RunContext<'_>);

    /// Lines that copy results back into the output directory.
    fn emit_retrieve_outputs(&self, _out: &mut String, _stem_ref: &str, _settings: &Settings) {}

    /// Files rotated out of the way before a work unit with `stem` runs.
    fn backup_targets(&self, stem: &str, settings: &Settings, _mode: JobMode) -> Vec<String> {
        default_backup_targets(self.descriptor(), stem, settings)
    }

    /// Replace the generic single-job body.
    fn single_body(&self, _ctx: &ScriptContext<'_>) -> Option<String> {
        None
    }

    /// Replace the generic array-task body.
    fn array_body(&self, _ctx: &ScriptContext<'_>) -> Option<String> {
        None
    }
}

/// One job per input file, from positional arguments or a manifest.
pub fn single_file_jobs(
    descriptor: &ModuleDescriptor,
    request: &JobRequest<'_>,
    stem: impl Fn(&JobInputs) -> String,
) -> SubmitResult<JobSet> {
    let tokens: Vec<String> = match request.manifest {
        Some(path) => {
            if !request.positional.is_empty() {
                return Err(SubmitError::usage(
                    "Positional inputs cannot be combined with --manifest",
                ));
            }
            let path = request.absolute(&path.to_string_lossy());
            let mut tokens = Vec::new();
            for record in manifest::read_records(&path)? {
                if record.fields.len() != 1 {
                    return Err(record.error(&path, "expected one input file per line"));
                }
                tokens.extend(record.fields);
            }
            tokens
        }
        None => request.positional.to_vec(),
    };

    if tokens.is_empty() {
        return Err(SubmitError::usage("No input files specified"));
    }

    let mut jobs = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let path = request.existing_file(token)?;
        if !descriptor.accepts(&path) {
            return Err(SubmitError::usage(format!(
                "Invalid extension for {token} (expected: {})",
                descriptor.input_extensions.join(" ")
            )));
        }
        let inputs = JobInputs::Single(path);
        let stem = stem(&inputs);
        jobs.push(JobDescriptor { inputs, stem });
    }

    JobSet::new(jobs)
}

/// `<module>-array-<N>t<throttle>` for arrays, the stem for single jobs.
pub fn default_job_name(module_id: &str, jobs: &JobSet, settings: &Settings) -> String {
    match jobs.mode() {
        JobMode::Array => format!("{module_id}-array-{}t{}", jobs.len(), settings.throttle),
        JobMode::Single => jobs.first().stem.clone(),
    }
}

/// Main outputs, the log and (when archiving) the archive for `stem`.
pub fn default_backup_targets(
    descriptor: &ModuleDescriptor,
    stem: &str,
    settings: &Settings,
) -> Vec<String> {
    let dir = &settings.output_dir;
    let mut targets: Vec<String> = descriptor
        .output_extensions
        .iter()
        .map(|ext| format!("{dir}{stem}{ext}"))
        .collect();
    targets.push(format!("{dir}{stem}{}", settings.log_extension));
    if descriptor.archives() && settings.create_archive {
        targets.push(format!("{dir}{stem}.tar.xz"));
    }
    targets
}

/// Constructor for a fresh module instance.
pub type ModuleFactory = fn() -> Box<dyn SubmitModule>;

/// Module constructors keyed by module id.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: FxHashMap<&'static str, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &'static str, factory: ModuleFactory) -> &mut Self {
        self.factories.insert(id, factory);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Instantiate the module registered as `id`.
    pub fn create(&self, id: &str) -> SubmitResult<Box<dyn SubmitModule>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| SubmitError::ModuleNotFound(id.to_string()))
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
