//! Error handling for devstrap.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Defines all possible errors that can occur while orchestrating the
/// development environment.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Required external tools could not be located on `PATH`.
    #[error("required tools are missing from PATH: {}", tools.join(", "))]
    DependencyMissing {
        /// The executables that could not be found.
        tools: Vec<String>,
    },

    /// Error launching a managed service process.
    #[error("failed to spawn service '{service}': {source}")]
    SpawnError {
        /// The service that failed to launch.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error while terminating a managed service process.
    #[error("failed to stop service '{service}': {source}")]
    StopError {
        /// The service that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A service never signalled readiness within its bound.
    #[error("service '{service}' did not become ready within {waited:?}")]
    ReadinessTimeout {
        /// The service being gated.
        service: String,
        /// How long the watcher waited before giving up.
        waited: Duration,
    },

    /// A gated service exited before it could become ready.
    #[error("service '{service}' exited before becoming ready ({status})")]
    ProcessExited {
        /// The service being gated.
        service: String,
        /// Human-readable exit description.
        status: String,
    },

    /// The database probe reported the server as unreachable.
    #[error("database server is unreachable: {detail}")]
    DatabaseUnreachable {
        /// What the probe observed.
        detail: String,
    },

    /// An invoked external command returned a nonzero status.
    #[error("command `{command}` failed with status {code:?}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// The exit code, if the process terminated normally.
        code: Option<i32>,
    },

    /// Error creating one of the required data directories.
    #[error("failed to create data directory {path:?}: {source}")]
    DataDirError {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error removing a directory during a reset.
    #[error("failed to remove {path:?}: {source}")]
    CleanupError {
        /// The path that could not be removed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The user interrupted execution at a suspension point.
    #[error("interrupted by user")]
    Interrupted,

    /// Error reading or accessing the configuration file.
    #[error("failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// Error for poisoned mutex.
    #[error("mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into an
/// `OrchestratorError`.
impl<T> From<std::sync::PoisonError<T>> for OrchestratorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        OrchestratorError::MutexPoisonError(err.to_string())
    }
}
