//! Connectivity polling for services that cannot be gated on output markers.

use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{error::OrchestratorError, supervisor::run_command_status};

/// Tri-state result of a single connectivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The service accepted the connection attempt.
    Accepting,
    /// The service responded but is not yet accepting connections.
    Rejecting,
    /// No usable response; retrying will not help.
    Unreachable,
}

/// A repeatable connectivity probe with an interval and an overall deadline.
pub struct ServiceProbe<'a> {
    /// Label used in logs and errors.
    pub name: &'a str,
    /// The status-check primitive.
    pub check: Box<dyn FnMut() -> Result<ProbeStatus, OrchestratorError> + 'a>,
    /// Sleep between consecutive checks.
    pub interval: Duration,
    /// Overall bound measured from the first check.
    pub deadline: Duration,
}

/// Repeatedly probes until the service accepts connections.
///
/// `Accepting` succeeds immediately; `Rejecting` sleeps up to `interval`
/// (clamped to the remaining budget) and retries until `deadline` has
/// elapsed, so the final check lands on the deadline itself; `Unreachable`
/// fails at once without burning the deadline. Every non-accepting status is
/// handled as its own case. Setting `cancel` aborts the poll between checks.
pub fn poll_until_ready(
    mut probe: ServiceProbe<'_>,
    cancel: &AtomicBool,
) -> Result<(), OrchestratorError> {
    let started = Instant::now();

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Interrupted);
        }

        match (probe.check)()? {
            ProbeStatus::Accepting => {
                info!(
                    "Service '{}' is accepting connections (after {:?})",
                    probe.name,
                    started.elapsed()
                );
                return Ok(());
            }
            ProbeStatus::Unreachable => {
                return Err(OrchestratorError::DatabaseUnreachable {
                    detail: format!("probe for '{}' got no usable response", probe.name),
                });
            }
            ProbeStatus::Rejecting => {
                let elapsed = started.elapsed();
                if elapsed >= probe.deadline {
                    warn!(
                        "Service '{}' still rejecting connections after {elapsed:?}",
                        probe.name
                    );
                    return Err(OrchestratorError::ReadinessTimeout {
                        service: probe.name.to_string(),
                        waited: elapsed,
                    });
                }
                let nap = probe.interval.min(probe.deadline - elapsed);
                debug!(
                    "Service '{}' not ready yet; retrying in {nap:?}",
                    probe.name
                );
                thread::sleep(nap);
            }
        }
    }
}

/// Builds a PostgreSQL readiness probe backed by `pg_isready`.
///
/// `pg_isready` encodes its verdict in the exit status: 0 accepting,
/// 1 rejecting, 2 no response, 3 no attempt made. The latter two are each
/// unreachable in their own right, not a shared fallback.
pub fn postgres_probe<'a>(
    working_dir: &'a Path,
    dbname: &'a str,
    interval: Duration,
    deadline: Duration,
) -> ServiceProbe<'a> {
    let dbname_arg = format!("--dbname={dbname}");
    ServiceProbe {
        name: "postgresql",
        check: Box::new(move || {
            let code =
                run_command_status(working_dir, "pg_isready", &[dbname_arg.as_str()])?;
            Ok(match code {
                Some(0) => ProbeStatus::Accepting,
                Some(1) => ProbeStatus::Rejecting,
                Some(2) => {
                    warn!("pg_isready got no response from the server");
                    ProbeStatus::Unreachable
                }
                _ => {
                    warn!("pg_isready made no connection attempt (status {code:?})");
                    ProbeStatus::Unreachable
                }
            })
        }),
        interval,
        deadline,
    }
}
