//! Core of the HPC batch-submission compiler.
//!
//! Turns a command line naming a program module, its input files and
//! resource options into a SLURM batch script, then exports or submits it.
//!
//! # Pipeline
//!
//! ```text
//! argv ─► Dispatcher ─► settings (defaults ◄ module ◄ site/variant ◄ CLI)
//!                    ─► SubmitModule::build_jobs ─► JobSet (single | array)
//!                    ─► manifest (array) ─► host backups ─► script::assemble
//!                    ─► export (0755) | BatchScheduler::submit
//! ```
//!
//! # Key pieces
//!
//! | Module | Role |
//! |--------|------|
//! | [`settings`] | Layered TOML configuration and the resolved [`Settings`] |
//! | [`module`] | [`SubmitModule`] capability interface and [`ModuleRegistry`] |
//! | [`job`] | Job descriptors, arity shapes, single/array mode |
//! | [`manifest`] | Line-indexed manifest written for array tasks |
//! | [`backup`] | Numbered output rotation, on the host and embedded in scripts |
//! | [`script`] | Directive header, generic bodies and shared sections |
//! | [`dispatch`] | Control flow of one invocation |
//!
//! # Example
//!
//! ```ignore
//! use hpc_submit_core::{Dispatcher, ModuleRegistry};
//!
//! let dispatcher = Dispatcher::new(registry, std::env::current_dir()?);
//! let invocation = dispatcher.parse(&["sorca".into(), "h2o.inp".into(), "--export".into()])?;
//! let compiled = dispatcher.compile(&invocation)?;
//! println!("{}", compiled.script);
//! ```

pub mod args;
pub mod backup;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod manifest;
pub mod module;
pub mod partition;
pub mod scheduler;
pub mod script;
pub mod settings;
pub mod validate;

pub use args::CommonArgs;
pub use backup::{Rotation, RotationPolicy, RotationStep};
pub use dispatch::{CompiledJob, Dispatcher, Invocation, ModuleSelection, Outcome};
pub use error::{SubmitError, SubmitResult};
pub use job::{InputShape, JobDescriptor, JobInputs, JobMode, JobRequest, JobSet};
pub use module::{ModuleDescriptor, ModuleRegistry, RunContext, SubmitModule};
pub use scheduler::BatchScheduler;
pub use script::{JobRef, ScriptContext};
pub use settings::{ConfigDir, Memory, MemoryUnit, Settings, SettingsLayer};
