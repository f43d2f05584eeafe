//! hpc-submit command-line interface
//!
//! Compiles a SLURM batch script for one program module and submits it, or
//! writes it to disk with `--export`.
//!
//! ```text
//! submit orca h2o.inp -c 8 -m 16
//! sorca *.inp -T 4 --export           # binary linked as s<module>
//! submit dalton opt.dal a.mol env.pot -l
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use console::style;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hpc_submit_core::dispatch::resolve_module_name;
use hpc_submit_core::{Dispatcher, Outcome, SubmitError};
use hpc_submit_sched::{SlurmAdapter, SlurmConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let work_dir = std::env::current_dir().context("cannot determine working directory")?;

    let dispatcher = Dispatcher::new(hpc_submit_modules::registry(), &work_dir);

    let invocation = match dispatcher.parse(&argv) {
        Ok(invocation) => invocation,
        // help, version and clap's own diagnostics
        Err(SubmitError::Cli(e)) => e.exit(),
        Err(e) => fail(&e, &argv, &dispatcher),
    };

    // Setup logging
    let filter = match invocation.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        module = %invocation.selection.module,
        work_dir = %work_dir.display(),
        "Running {}",
        invocation.selection.invocation
    );

    let scheduler = SlurmAdapter::new(SlurmConfig {
        work_dir: Some(work_dir),
        ..SlurmConfig::default()
    });

    match dispatcher.execute(&invocation, &scheduler).await {
        Ok(Outcome::Exported { path }) => {
            println!(
                "{} Exported sbatch script to {}",
                style("✓").green().bold(),
                style(path.display()).cyan()
            );
        }
        Ok(Outcome::Submitted { job_id }) => {
            println!(
                "{} Submitted batch job {}",
                style("✓").green().bold(),
                style(job_id).cyan()
            );
        }
        Err(e) => fail(&e, &argv, &dispatcher),
    }

    Ok(())
}

/// Report `err` and exit with status 1.
fn fail(err: &SubmitError, argv: &[String], dispatcher: &Dispatcher) -> ! {
    eprintln!("{} {}", style("Error:").red().bold(), err);

    if let SubmitError::ModuleNotFound(_) = err {
        eprintln!("Available modules: {}", dispatcher.registry().ids().join(", "));
    }
    if err.is_usage() {
        let invocation = resolve_module_name(argv)
            .map(|selection| selection.invocation)
            .unwrap_or_else(|_| hpc_submit_core::dispatch::FRONT_END.to_string());
        eprintln!("Use: {invocation} -h for help.");
    }

    std::process::exit(1);
}
