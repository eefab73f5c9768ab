//! Devstrap brings up the foto application's local development environment:
//! a PostgreSQL server, the backend application server, the image-processing
//! service, and the front-end dev server. It starts each service only after
//! its dependencies report ready, and guarantees an idempotent, ordered
//! teardown on success, failure, or interruption.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants and defaults.
pub mod constants;

/// Error handling.
pub mod error;

/// Connectivity polling for readiness.
pub mod health;

/// Fail-fast task pipelines.
pub mod pipeline;

/// Marker-based readiness watching.
pub mod readiness;

/// Managed-process registry.
pub mod registry;

/// Idempotent shutdown coordination.
pub mod shutdown;

/// Process spawning and termination.
pub mod supervisor;

/// Task vocabulary and pipeline compositions.
pub mod tasks;
