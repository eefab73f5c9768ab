//! Idempotent, ordered teardown of everything the orchestrator started.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::{error, info};

use crate::{
    constants::{POSTMASTER_PID_FILE, TERMINATION_GRACE},
    registry::ServiceSymbol,
    supervisor::{ProcessSupervisor, run_command},
};

/// Teardown order: dependents first, the database last.
const SHUTDOWN_ORDER: &[ServiceSymbol] = &[
    ServiceSymbol::Frontend,
    ServiceSymbol::ImageService,
    ServiceSymbol::Backend,
];

/// Terminates all managed processes exactly once, in reverse-dependency
/// order, and releases the database server.
///
/// Safe to invoke from the pipeline's failure path, the `clean`/`test` flows,
/// and the interrupt-observing main loop; only the first call acts.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    supervisor: ProcessSupervisor,
    cluster_dir: PathBuf,
    grace: Duration,
    ran: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator over `supervisor`, stopping the PostgreSQL
    /// cluster at `cluster_dir` as its final step.
    pub fn new(supervisor: ProcessSupervisor, cluster_dir: PathBuf) -> Self {
        Self {
            supervisor,
            cluster_dir,
            grace: TERMINATION_GRACE,
            ran: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overrides the per-service grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether the teardown sequence has already run.
    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }

    /// Runs the teardown sequence, or returns `false` immediately if it has
    /// already run. Failures stopping one service never prevent attempting
    /// the next.
    pub fn run_once(&self) -> bool {
        if self.ran.swap(true, Ordering::SeqCst) {
            return false;
        }

        for &symbol in SHUTDOWN_ORDER {
            if !self.supervisor.is_running(symbol) {
                continue;
            }
            info!("Shutting down {symbol}...");
            if let Err(err) = self.supervisor.terminate(symbol, self.grace) {
                error!("Failed to stop {symbol}: {err}");
            }
        }

        // pg_ctl resolves a relative -D against its own cwd, so hand it an
        // absolute path and run from the orchestrator's directory.
        let cluster = self
            .cluster_dir
            .canonicalize()
            .unwrap_or_else(|_| self.cluster_dir.clone());
        if cluster.join(POSTMASTER_PID_FILE).exists() {
            info!("Shutting down postgresql server...");
            if let Err(err) = run_command(
                Path::new("."),
                "pg_ctl",
                &["stop", "-D", &cluster.to_string_lossy(), "-m", "fast"],
            ) {
                error!("Failed to stop postgresql server: {err}");
            }
        }

        true
    }
}
