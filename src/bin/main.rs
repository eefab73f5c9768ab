use std::{
    error::Error,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use devstrap::{
    cli::{Cli, PipelineKind, parse_args},
    config::load_config,
    pipeline::PipelineResult,
    shutdown::ShutdownCoordinator,
    tasks::{Orchestrator, build_pipeline},
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(&args) {
        Ok(PipelineResult::Completed) => ExitCode::SUCCESS,
        Ok(PipelineResult::Aborted { at }) => {
            error!("Pipeline aborted at task '{at}'");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("devstrap failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<PipelineResult, Box<dyn Error>> {
    let config = load_config(args.config.as_deref())?;
    let cancel = register_interrupt_handler()?;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&cancel));
    let shutdown = ShutdownCoordinator::new(
        orchestrator.supervisor().clone(),
        orchestrator.config().cluster_dir(),
    );

    let result = build_pipeline(args.task).run(&mut orchestrator, &shutdown);

    // Completed flows (and interrupted dev holds) still need teardown; the
    // abort path has already run it and this call is then a no-op.
    if shutdown.run_once() {
        info!("Shutdown complete");
    }

    if matches!(args.task, PipelineKind::Test)
        && matches!(result, PipelineResult::Completed)
    {
        info!("Test suite passed");
    }

    Ok(result)
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Installs the interrupt handler. The handler only sets a flag; the
/// pipeline observes it at its suspension points and the teardown itself
/// runs on the main flow, never inside the signal context.
fn register_interrupt_handler() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        // Repeated deliveries just re-set the flag.
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(cancel)
}
