//! Constants and default values shared across the orchestrator.

use std::time::Duration;

/// Executables that must be present on `PATH` before any task runs.
pub const REQUIRED_TOOLS: &[&str] = &[
    "ffmpeg",
    "go",
    "initdb",
    "postgres",
    "createdb",
    "pg_ctl",
    "psql",
    "npm",
    "node",
    "npx",
    "pg_isready",
];

/// Stdout marker emitted by the backend server once it is listening.
pub const BACKEND_READY_MARKER: &str = "The development server is now running at";

/// Stdout marker emitted by the image-processing service once it is listening.
pub const IMAGE_SERVICE_READY_MARKER: &str = "image processing service is now running at";

/// Stdout marker emitted by the front-end dev server once it is serving.
pub const FRONTEND_READY_MARKER: &str = "Ready in";

/// Environment variable carrying the front-end base URL into the backend.
pub const FRONTEND_ADDRESS_ENV: &str = "FRONTEND_APP_ADDRESS";

/// Grace period given to a service between SIGTERM and SIGKILL.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Interval between liveness probes while waiting out the grace period.
pub const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on waiting for a readiness marker to appear on stdout.
pub const MARKER_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Granularity of marker-wait receive attempts, so cancellation and the
/// deadline are observed promptly.
pub const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between database readiness probes.
pub const DB_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the database server to accept connections.
pub const DB_PROBE_DEADLINE: Duration = Duration::from_secs(60);

/// Sleep used by the dev flow while holding the environment up.
pub const HOLD_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Name of the PID file PostgreSQL writes inside a running cluster.
pub const POSTMASTER_PID_FILE: &str = "postmaster.pid";
