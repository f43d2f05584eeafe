//! Options shared by every module.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Args, Command};

use crate::error::SubmitResult;
use crate::module::SubmitModule;
use crate::settings::{
    ArchiveSection, MemoryAmount, OutputSection, PartitionSection, ResourcesSection,
    SettingsLayer,
};
use crate::validate;

/// Flags understood by all modules. Values are kept as text so they are
/// checked with the same messages as configuration values.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// CPU cores per task
    #[arg(short = 'c', long = "cpus", visible_alias = "cpu", value_name = "INT")]
    pub cpus: Option<String>,

    /// Total memory in GB
    #[arg(short = 'm', long = "memory", visible_alias = "mem", value_name = "NUM")]
    pub memory: Option<String>,

    /// Partition
    #[arg(short = 'p', long = "partition", value_name = "NAME")]
    pub partition: Option<String>,

    /// Time limit
    #[arg(short = 't', long = "time", value_name = "D-HH:MM:SS")]
    pub time: Option<String>,

    /// Output directory
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output: Option<String>,

    /// Manifest file (job array)
    #[arg(short = 'M', long = "manifest", value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Max concurrent array subjobs
    #[arg(short = 'T', long = "throttle", value_name = "INT")]
    pub throttle: Option<String>,

    /// Number of nodes
    #[arg(short = 'N', long = "nodes", value_name = "INT")]
    pub nodes: Option<String>,

    /// Number of tasks
    #[arg(short = 'n', long = "ntasks", value_name = "INT")]
    pub ntasks: Option<String>,

    /// Custom job name
    #[arg(short = 'j', long = "job-name", visible_alias = "job", value_name = "NAME")]
    pub job_name: Option<String>,

    /// SLURM nice factor
    #[arg(short = 'y', long = "nice", value_name = "INT")]
    pub nice: Option<String>,

    /// Software variant (loads <module>-NAME.toml)
    #[arg(long, value_name = "NAME")]
    pub variant: Option<String>,

    /// Write the script to FILE instead of submitting
    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub export: Option<Option<PathBuf>>,

    /// Disable archive creation
    #[arg(long)]
    pub no_archive: bool,

    /// Configuration directory
    #[arg(long, env = "HPC_SUBMIT_CONFIG", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Input files
    #[arg(value_name = "INPUT")]
    pub inputs: Vec<String>,

    /// Arguments passed to the program
    #[arg(last = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub passthrough: Vec<String>,
}

impl CommonArgs {
    /// Command-line overrides as the topmost settings layer.
    pub fn to_layer(&self) -> SubmitResult<SettingsLayer> {
        let integer = |value: &Option<String>, name: &str| -> SubmitResult<Option<u32>> {
            value
                .as_deref()
                .map(|v| validate::positive_integer(v, name))
                .transpose()
        };

        if let Some(ref time) = self.time {
            validate::time_limit(time)?;
        }

        Ok(SettingsLayer {
            partition: PartitionSection {
                default: self.partition.clone(),
            },
            resources: ResourcesSection {
                cpus: integer(&self.cpus, "CPU cores")?,
                memory_gb: self.memory.clone().map(MemoryAmount::new),
                ntasks: integer(&self.ntasks, "ntasks")?,
                nodes: integer(&self.nodes, "nodes")?,
                throttle: integer(&self.throttle, "throttle")?,
                time: self.time.clone(),
                nice: integer(&self.nice, "nice factor")?,
            },
            output: OutputSection {
                directory: self.output.clone(),
                ..Default::default()
            },
            archive: ArchiveSection {
                create: self.no_archive.then_some(false),
            },
            ..Default::default()
        })
    }
}

/// Full command for `module`, shown as `bin_name` in help and errors.
pub fn command(module: &dyn SubmitModule, bin_name: &str) -> Command {
    let cmd = Command::new("submit")
        .bin_name(bin_name.to_string())
        .about("Compile and submit a SLURM batch job")
        .before_help(module.usage())
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase verbosity (-v, -vv, -vvv)"),
        );
    module.augment_args(CommonArgs::augment_args(cmd))
}
