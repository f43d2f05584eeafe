//! Layered configuration.
//!
//! Settings are built from ordered [`SettingsLayer`]s: shipped defaults,
//! module defaults, the site or variant file, and command-line overrides.
//! Every key is optional in every layer; the highest layer that sets a key
//! wins. [`Settings`] is the fully resolved, immutable result that is
//! threaded through the rest of the pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{SubmitError, SubmitResult};
use crate::validate;

const DEFAULT_PARTITION: &str = "chem";
const DEFAULT_MEMORY: &str = "2";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_LOG_EXTENSION: &str = ".log";
const DEFAULT_BACKUP_DIR: &str = "backup";
const DEFAULT_SCRATCH_BASE: &str = "/scratch";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;

/// How a module interprets its memory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryUnit {
    /// Whole gigabytes, rendered as `--mem=<n>gb`.
    #[default]
    WholeGb,
    /// Fractional gigabytes, rendered as `--mem=<ceil(gb * 1024)>MB`.
    FractionalGb,
}

/// Memory amount as written in a config file or on the command line.
///
/// TOML allows `memory_gb = 4`, `memory_gb = 0.5` or `memory_gb = "4"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawMemory")]
pub struct MemoryAmount(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMemory {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<RawMemory> for MemoryAmount {
    fn from(raw: RawMemory) -> Self {
        match raw {
            RawMemory::Integer(n) => MemoryAmount(n.to_string()),
            RawMemory::Float(f) => MemoryAmount(f.to_string()),
            RawMemory::Text(s) => MemoryAmount(s),
        }
    }
}

impl MemoryAmount {
    pub fn new(amount: impl Into<String>) -> Self {
        MemoryAmount(amount.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionSection {
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcesSection {
    pub cpus: Option<u32>,
    pub memory_gb: Option<MemoryAmount>,
    pub ntasks: Option<u32>,
    pub nodes: Option<u32>,
    pub throttle: Option<u32>,
    pub time: Option<String>,
    pub nice: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub directory: Option<String>,
    pub log_extension: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupSection {
    pub use_backup_dir: Option<bool>,
    pub max_backups: Option<u32>,
    pub dir_name: Option<String>,
    pub lock_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScratchSection {
    pub base: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeExcludeSection {
    pub file: Option<String>,
    pub partition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSection {
    pub create: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependenciesSection {
    pub setup: Option<String>,
}

/// One configuration layer. Unset keys defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsLayer {
    pub partition: PartitionSection,
    pub resources: ResourcesSection,
    pub output: OutputSection,
    pub backup: BackupSection,
    pub scratch: ScratchSection,
    pub node_exclude: NodeExcludeSection,
    pub archive: ArchiveSection,
    pub paths: BTreeMap<String, String>,
    pub dependencies: DependenciesSection,
}

impl SettingsLayer {
    /// Built-in defaults used when no `defaults.toml` is shipped.
    pub fn builtin() -> Self {
        Self {
            partition: PartitionSection {
                default: Some(DEFAULT_PARTITION.to_string()),
            },
            resources: ResourcesSection {
                cpus: Some(1),
                memory_gb: Some(MemoryAmount::new(DEFAULT_MEMORY)),
                ntasks: Some(1),
                nodes: Some(1),
                throttle: Some(5),
                time: None,
                nice: None,
            },
            output: OutputSection {
                directory: Some(DEFAULT_OUTPUT_DIR.to_string()),
                log_extension: Some(DEFAULT_LOG_EXTENSION.to_string()),
            },
            backup: BackupSection {
                use_backup_dir: Some(true),
                max_backups: Some(5),
                dir_name: Some(DEFAULT_BACKUP_DIR.to_string()),
                lock_timeout_secs: Some(DEFAULT_LOCK_TIMEOUT_SECS),
            },
            scratch: ScratchSection {
                base: Some(DEFAULT_SCRATCH_BASE.to_string()),
            },
            node_exclude: NodeExcludeSection {
                file: None,
                partition: Some(DEFAULT_PARTITION.to_string()),
            },
            archive: ArchiveSection { create: Some(true) },
            paths: BTreeMap::new(),
            dependencies: DependenciesSection::default(),
        }
    }

    /// Parse a layer from TOML text. `origin` is only used in error messages.
    pub fn from_toml(text: &str, origin: &Path) -> SubmitResult<Self> {
        toml::from_str(text).map_err(|e| SubmitError::ConfigParse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a layer from a TOML file.
    pub fn load(path: &Path) -> SubmitResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| SubmitError::io(path, e))?;
        Self::from_toml(&text, path)
    }

    /// Place `upper` on top of `self`: keys set in `upper` win.
    ///
    /// `paths` merges per key; every other key is replaced as a whole.
    pub fn overlay(self, upper: SettingsLayer) -> SettingsLayer {
        let mut paths = self.paths;
        paths.extend(upper.paths);

        SettingsLayer {
            partition: PartitionSection {
                default: upper.partition.default.or(self.partition.default),
            },
            resources: ResourcesSection {
                cpus: upper.resources.cpus.or(self.resources.cpus),
                memory_gb: upper.resources.memory_gb.or(self.resources.memory_gb),
                ntasks: upper.resources.ntasks.or(self.resources.ntasks),
                nodes: upper.resources.nodes.or(self.resources.nodes),
                throttle: upper.resources.throttle.or(self.resources.throttle),
                time: upper.resources.time.or(self.resources.time),
                nice: upper.resources.nice.or(self.resources.nice),
            },
            output: OutputSection {
                directory: upper.output.directory.or(self.output.directory),
                log_extension: upper.output.log_extension.or(self.output.log_extension),
            },
            backup: BackupSection {
                use_backup_dir: upper.backup.use_backup_dir.or(self.backup.use_backup_dir),
                max_backups: upper.backup.max_backups.or(self.backup.max_backups),
                dir_name: upper.backup.dir_name.or(self.backup.dir_name),
                lock_timeout_secs: upper
                    .backup
                    .lock_timeout_secs
                    .or(self.backup.lock_timeout_secs),
            },
            scratch: ScratchSection {
                base: upper.scratch.base.or(self.scratch.base),
            },
            node_exclude: NodeExcludeSection {
                file: upper.node_exclude.file.or(self.node_exclude.file),
                partition: upper.node_exclude.partition.or(self.node_exclude.partition),
            },
            archive: ArchiveSection {
                create: upper.archive.create.or(self.archive.create),
            },
            paths,
            dependencies: DependenciesSection {
                setup: upper.dependencies.setup.or(self.dependencies.setup),
            },
        }
    }
}

/// Location of the configuration files.
///
/// ```text
/// <dir>/defaults.toml             shipped defaults (optional)
/// <dir>/<module>.toml             site file (optional)
/// <dir>/<module>-<variant>.toml   variant file (required when named)
/// ```
#[derive(Debug, Clone)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locate the configuration directory.
    ///
    /// An explicit directory (flag or environment) is used as-is. Otherwise
    /// the first existing candidate wins: `<exe dir>/../config`, the user
    /// config dir (`~/.config/hpc-submit`), then `./config` under `work_dir`.
    pub fn discover(explicit: Option<&Path>, work_dir: &Path) -> Self {
        if let Some(dir) = explicit {
            return Self::new(dir);
        }

        let mut candidates = Vec::new();
        if let Ok(exe) = std::env::current_exe() {
            if let Some(bin_dir) = exe.parent() {
                candidates.push(bin_dir.join("..").join("config"));
            }
        }
        if let Some(user_dir) = dirs::config_dir() {
            candidates.push(user_dir.join("hpc-submit"));
        }

        let local = work_dir.join("config");
        let root = candidates
            .into_iter()
            .find(|candidate| candidate.is_dir())
            .unwrap_or(local);

        debug!("Using config directory {}", root.display());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shipped defaults; built-in values when `defaults.toml` is absent.
    pub fn shipped_defaults(&self) -> SubmitResult<SettingsLayer> {
        let builtin = SettingsLayer::builtin();
        let path = self.root.join("defaults.toml");
        if !path.is_file() {
            return Ok(builtin);
        }
        Ok(builtin.overlay(SettingsLayer::load(&path)?))
    }

    /// Site layer for a module, or its named variant.
    ///
    /// A missing base file yields an empty layer. A missing variant file is
    /// fatal: there is no fallback to the base file.
    pub fn site(&self, module: &str, variant: Option<&str>) -> SubmitResult<SettingsLayer> {
        match variant {
            Some(variant) => {
                let path = self.root.join(format!("{module}-{variant}.toml"));
                if !path.is_file() {
                    return Err(SubmitError::VariantNotFound(path));
                }
                SettingsLayer::load(&path)
            }
            None => {
                let path = self.root.join(format!("{module}.toml"));
                if !path.is_file() {
                    debug!("No site file at {}, using defaults", path.display());
                    return Ok(SettingsLayer::default());
                }
                SettingsLayer::load(&path)
            }
        }
    }

    /// Merge shipped defaults, module defaults and the site or variant file.
    ///
    /// Command-line overrides are layered on top by the caller.
    pub fn resolve(
        &self,
        module: &str,
        module_defaults: SettingsLayer,
        variant: Option<&str>,
    ) -> SubmitResult<SettingsLayer> {
        let shipped = self.shipped_defaults()?;
        let site = self.site(module, variant)?;
        Ok(shipped.overlay(module_defaults).overlay(site))
    }
}

/// Validated memory request.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    amount: String,
    gb: f64,
    unit: MemoryUnit,
}

impl Memory {
    pub fn parse(amount: &str, unit: MemoryUnit) -> SubmitResult<Self> {
        let gb = match unit {
            MemoryUnit::WholeGb => f64::from(validate::positive_integer(amount, "memory")?),
            MemoryUnit::FractionalGb => validate::positive_number(amount, "memory")?,
        };
        Ok(Self {
            amount: amount.to_string(),
            gb,
            unit,
        })
    }

    /// The amount as the user wrote it, in GB.
    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn unit(&self) -> MemoryUnit {
        self.unit
    }

    /// Value for `#SBATCH --mem=`.
    pub fn directive(&self) -> String {
        match self.unit {
            MemoryUnit::WholeGb => format!("{}gb", self.amount),
            MemoryUnit::FractionalGb => format!("{}MB", (self.gb * 1024.0).ceil() as u64),
        }
    }

    /// Whole-GB share per core, truncated. `None` for fractional requests.
    pub fn per_core(&self, cpus: u32) -> Option<u64> {
        match self.unit {
            MemoryUnit::WholeGb => Some(self.gb as u64 / u64::from(cpus.max(1))),
            MemoryUnit::FractionalGb => None,
        }
    }

    pub fn whole_gb(&self) -> Option<u64> {
        match self.unit {
            MemoryUnit::WholeGb => Some(self.gb as u64),
            MemoryUnit::FractionalGb => None,
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub partition: String,
    pub cpus: u32,
    pub memory: Memory,
    pub ntasks: u32,
    pub nodes: u32,
    pub throttle: u32,
    pub time_limit: Option<String>,
    pub nice: Option<u32>,
    /// Output directory, always ending in `/`.
    pub output_dir: String,
    pub log_extension: String,
    pub use_backup_dir: bool,
    pub max_backups: u32,
    pub backup_dir_name: String,
    pub lock_timeout: Duration,
    pub scratch_base: String,
    pub node_exclude_file: Option<String>,
    pub node_exclude_partition: String,
    pub create_archive: bool,
    pub paths: BTreeMap<String, String>,
    pub dependencies: Option<String>,
}

impl Settings {
    /// Finalize a merged layer, filling gaps from built-in defaults and
    /// validating every value.
    pub fn from_layer(layer: SettingsLayer, unit: MemoryUnit) -> SubmitResult<Self> {
        let layer = SettingsLayer::builtin().overlay(layer);
        let or_default = |value: Option<String>, default: &str| {
            value.unwrap_or_else(|| default.to_string())
        };

        let cpus = positive(layer.resources.cpus, 1, "CPU cores")?;
        let ntasks = positive(layer.resources.ntasks, 1, "ntasks")?;
        let nodes = positive(layer.resources.nodes, 1, "nodes")?;
        let throttle = positive(layer.resources.throttle, 5, "throttle")?;
        let max_backups = positive(layer.backup.max_backups, 5, "max backups")?;

        let memory_text = layer
            .resources
            .memory_gb
            .map(|m| m.0)
            .unwrap_or_else(|| DEFAULT_MEMORY.to_string());
        let memory = Memory::parse(&memory_text, unit)?;

        let time_limit = layer.resources.time.filter(|t| !t.is_empty());
        if let Some(ref time) = time_limit {
            validate::time_limit(time)?;
        }

        let nice = match layer.resources.nice {
            Some(0) => {
                return Err(SubmitError::usage(
                    "Invalid value for nice factor: must be positive integer",
                ));
            }
            other => other,
        };

        let settings = Self {
            partition: or_default(layer.partition.default, DEFAULT_PARTITION),
            cpus,
            memory,
            ntasks,
            nodes,
            throttle,
            time_limit,
            nice,
            output_dir: normalize_output_dir(&or_default(
                layer.output.directory,
                DEFAULT_OUTPUT_DIR,
            )),
            log_extension: or_default(layer.output.log_extension, DEFAULT_LOG_EXTENSION),
            use_backup_dir: layer.backup.use_backup_dir.unwrap_or(true),
            max_backups,
            backup_dir_name: or_default(layer.backup.dir_name, DEFAULT_BACKUP_DIR),
            lock_timeout: Duration::from_secs(
                layer
                    .backup
                    .lock_timeout_secs
                    .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
            ),
            scratch_base: or_default(layer.scratch.base, DEFAULT_SCRATCH_BASE)
                .trim_end_matches('/')
                .to_string(),
            node_exclude_file: layer.node_exclude.file.filter(|f| !f.is_empty()),
            node_exclude_partition: or_default(layer.node_exclude.partition, DEFAULT_PARTITION),
            create_archive: layer.archive.create.unwrap_or(true),
            paths: layer.paths,
            dependencies: layer.dependencies.setup.filter(|s| !s.trim().is_empty()),
        };

        debug!(
            "Resolved settings: partition={} cpus={} mem={} throttle={}",
            settings.partition,
            settings.cpus,
            settings.memory.directive(),
            settings.throttle
        );

        Ok(settings)
    }

    /// Site path for `key`, or `default` when no layer declares it.
    pub fn path_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.paths.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Output directory without the trailing slash, for host-side IO.
    pub fn output_path(&self) -> &str {
        match self.output_dir.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        }
    }
}

fn positive(value: Option<u32>, default: u32, name: &str) -> SubmitResult<u32> {
    match value.unwrap_or(default) {
        0 => Err(SubmitError::usage(format!(
            "Invalid value for {name}: must be positive integer"
        ))),
        n => Ok(n),
    }
}

/// Ensure a non-empty directory ends with `/` so it can prefix file names.
pub fn normalize_output_dir(dir: &str) -> String {
    if dir.is_empty() {
        "./".to_string()
    } else if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    }
}
