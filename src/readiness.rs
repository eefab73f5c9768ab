//! Bounded waiting for a service's readiness marker on captured stdout.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
    },
    time::Instant,
};

use tracing::{debug, info};

use crate::{
    constants::MARKER_POLL_INTERVAL,
    error::OrchestratorError,
    registry::{ProcessRegistry, ServiceSymbol},
};

/// Transient readiness condition consumed by a single marker wait.
#[derive(Debug, Clone)]
pub struct ReadinessCondition {
    /// Substring expected in one of the process's stdout lines.
    pub marker: String,
    /// Hard bound on the wait; a marker wait is never unbounded.
    pub timeout: std::time::Duration,
}

impl ReadinessCondition {
    /// Creates a condition for `marker` bounded by `timeout`.
    pub fn new(marker: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            marker: marker.into(),
            timeout,
        }
    }
}

/// Blocks until the process registered under `symbol` emits a line containing
/// the marker, exits, or the timeout elapses.
///
/// Lines are matched in the order the process produced them; the first match
/// wins and subsequent output is left for the drain thread. Setting `cancel`
/// aborts the wait with [`OrchestratorError::Interrupted`].
pub fn wait_for_marker(
    registry: &ProcessRegistry,
    symbol: ServiceSymbol,
    condition: &ReadinessCondition,
    cancel: &AtomicBool,
) -> Result<(), OrchestratorError> {
    let Some(output) = registry.take_output(symbol)? else {
        return Err(OrchestratorError::ProcessExited {
            service: symbol.to_string(),
            status: "no captured output available".into(),
        });
    };

    let started = Instant::now();
    debug!(
        "Waiting up to {:?} for '{symbol}' to log \"{}\"",
        condition.timeout, condition.marker
    );

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Interrupted);
        }

        let elapsed = started.elapsed();
        if elapsed >= condition.timeout {
            return Err(OrchestratorError::ReadinessTimeout {
                service: symbol.to_string(),
                waited: elapsed,
            });
        }

        let budget = (condition.timeout - elapsed).min(MARKER_POLL_INTERVAL);
        match output.recv_timeout(budget) {
            Ok(line) => {
                if line.contains(&condition.marker) {
                    info!("Service '{symbol}' is ready (after {:?})", started.elapsed());
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                // stdout closed; the process has exited or is about to.
                let status = match registry.try_wait(symbol)? {
                    Some(status) => format!("{status}"),
                    None => "stdout closed before readiness".to_string(),
                };
                return Err(OrchestratorError::ProcessExited {
                    service: symbol.to_string(),
                    status,
                });
            }
        }
    }
}
