//! `se` — single-executor entry point.
//!
//! Usage: `se --key=value... <module-path> [module-args...]`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use spits_core::config::SeArgs;
use spits_core::module::dynamic::DynamicModule;
use spits_core::telemetry::init_tracing;
use spits_se::run_single_executor;

fn main() -> ExitCode {
    let args = SeArgs::parse();
    init_tracing(args.shared.verbose);

    match run(args) {
        Ok(()) => {}
        Err(e) => tracing::error!(error = %e, "se exited with an error"),
    }
    ExitCode::SUCCESS
}

fn run(args: SeArgs) -> anyhow::Result<()> {
    let module = DynamicModule::load(&PathBuf::from(&args.module_path))
        .map_err(|e| anyhow::anyhow!("loading module {}: {e}", args.module_path))?;

    let outcome = run_single_executor(&module, &args.module_args, &args.shared.jobid)?;
    tracing::info!(status = outcome.status, "single-executor run finished");

    Ok(())
}
