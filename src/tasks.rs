//! The concrete task vocabulary and the pipeline compositions built from it.
//!
//! Each run mode (`dev`, `test`, `clean`) is a different ordering/subset of
//! the same tasks; adding a flow means composing existing tasks, not writing
//! a new code path.

use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    constants::{
        BACKEND_READY_MARKER, DB_PROBE_DEADLINE, DB_PROBE_INTERVAL,
        FRONTEND_ADDRESS_ENV, FRONTEND_READY_MARKER, HOLD_POLL_INTERVAL,
        IMAGE_SERVICE_READY_MARKER, MARKER_WAIT_TIMEOUT, REQUIRED_TOOLS,
    },
    error::OrchestratorError,
    health::{poll_until_ready, postgres_probe},
    pipeline::{Task, TaskPipeline},
    readiness::{ReadinessCondition, wait_for_marker},
    registry::{ProcessRegistry, ServiceSymbol},
    supervisor::{
        ProcessSupervisor, locate_executable, run_command, run_command_capture,
    },
};

use crate::cli::PipelineKind;

/// Mutable context threaded through every task.
pub struct Orchestrator {
    config: Config,
    supervisor: ProcessSupervisor,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Creates an orchestrator for `config`, observing `cancel` at every
    /// suspension point.
    pub fn new(config: Config, cancel: Arc<AtomicBool>) -> Self {
        let registry = ProcessRegistry::new();
        let supervisor =
            ProcessSupervisor::new(registry, config.project_dir.clone());
        Self {
            config,
            supervisor,
            cancel,
        }
    }

    /// The supervisor driving this orchestrator's registry.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn guard_cancelled(&self) -> Result<(), OrchestratorError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(OrchestratorError::Interrupted)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Preflight and build tasks
    // ------------------------------------------------------------------

    fn check_dependencies(&mut self) -> Result<(), OrchestratorError> {
        let missing = missing_tools(REQUIRED_TOOLS);
        if missing.is_empty() {
            debug!("All required tools are on PATH");
            Ok(())
        } else {
            Err(OrchestratorError::DependencyMissing { tools: missing })
        }
    }

    fn build_backend(&mut self) -> Result<(), OrchestratorError> {
        info!("building server...");
        run_command(
            &self.config.project_dir,
            "npx",
            &["tsc", "--project", "./src/server/tsconfig.json"],
        )
    }

    fn build_image_service(&mut self) -> Result<(), OrchestratorError> {
        info!("building image processing service...");
        let src = self.config.resolve("src/image-processing-service/".as_ref());
        let dest = self.image_service_binary();
        run_command(
            &self.config.project_dir,
            "go",
            &[
                "build",
                "-C",
                &src.to_string_lossy(),
                "-o",
                &dest.to_string_lossy(),
            ],
        )
    }

    fn build_tests(&mut self) -> Result<(), OrchestratorError> {
        info!("building tests...");
        run_command(
            &self.config.project_dir,
            "npx",
            &["tsc", "--project", "test/server/tsconfig.json"],
        )
    }

    fn ensure_data_dirs(&mut self) -> Result<(), OrchestratorError> {
        for dir in &self.config.data_dirs {
            let resolved = self.config.resolve(dir);
            debug!("Ensuring data directory {:?}", resolved);
            fs::create_dir_all(&resolved).map_err(|source| {
                OrchestratorError::DataDirError {
                    path: resolved.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    fn image_service_binary(&self) -> std::path::PathBuf {
        self.config.resolve("built/foto-image-processing-service".as_ref())
    }

    // ------------------------------------------------------------------
    // Database tasks
    // ------------------------------------------------------------------

    fn init_database_cluster(&mut self) -> Result<(), OrchestratorError> {
        let cluster = self.config.cluster_dir();
        if cluster.exists() {
            debug!("Database cluster already initialized at {:?}", cluster);
            return Ok(());
        }
        info!("initializing database cluster...");
        run_command(
            &self.config.project_dir,
            "initdb",
            &["-D", &cluster.to_string_lossy()],
        )
    }

    fn start_database(&mut self) -> Result<(), OrchestratorError> {
        if !self.config.postmaster_pid().exists() {
            info!("running postgresql server...");
            let cluster = self.config.cluster_dir();
            run_command(
                &self.config.project_dir,
                "pg_ctl",
                &["start", "-D", &cluster.to_string_lossy()],
            )?;
        }

        info!("waiting for postgresql to be ready...");
        let probe = postgres_probe(
            &self.config.project_dir,
            "postgres",
            DB_PROBE_INTERVAL,
            DB_PROBE_DEADLINE,
        );
        poll_until_ready(probe, &self.cancel)
    }

    fn create_database(&mut self) -> Result<(), OrchestratorError> {
        let db = &self.config.database_name;
        let query = format!("SELECT 1 FROM pg_database WHERE datname='{db}'");
        let existing = run_command_capture(
            &self.config.project_dir,
            "psql",
            &["--dbname=postgres", "-tAc", &query],
        )?;

        if existing.is_empty() {
            info!("creating database '{db}'...");
            let create = format!("CREATE DATABASE {db}");
            run_command(
                &self.config.project_dir,
                "psql",
                &["--dbname=postgres", "-c", &create],
            )
        } else {
            debug!("Database '{db}' already exists");
            Ok(())
        }
    }

    fn apply_schema(&mut self) -> Result<(), OrchestratorError> {
        info!("applying database schema...");
        let dbname = format!("--dbname={}", self.config.database_name);
        let schema = self.config.resolve(&self.config.schema_file);
        run_command(
            &self.config.project_dir,
            "psql",
            &[&dbname, "-f", &schema.to_string_lossy()],
        )
    }

    fn clean_database_records(&mut self) -> Result<(), OrchestratorError> {
        info!("cleaning all records from '{}'...", self.config.database_name);
        let dbname = format!("--dbname={}", self.config.database_name);
        let clean = self.config.resolve(&self.config.clean_file);
        run_command(
            &self.config.project_dir,
            "psql",
            &[&dbname, "-f", &clean.to_string_lossy()],
        )
    }

    // ------------------------------------------------------------------
    // Service tasks
    // ------------------------------------------------------------------

    fn start_backend(&mut self) -> Result<(), OrchestratorError> {
        self.guard_cancelled()?;
        info!("booting up server...");
        let server_js = self.config.resolve("built/server/server.js".as_ref());
        let host = self.config.backend.host.clone();
        let port = self.config.backend.port.to_string();
        self.supervisor.spawn(
            ServiceSymbol::Backend,
            "node",
            &[&server_js.to_string_lossy(), &host, &port],
            &[(FRONTEND_ADDRESS_ENV, self.config.frontend.http_url())],
            true,
        )?;
        self.await_marker(ServiceSymbol::Backend, BACKEND_READY_MARKER)?;
        info!(
            "server is now up and running! ({})",
            self.config.backend.http_url()
        );
        Ok(())
    }

    fn start_image_service(&mut self) -> Result<(), OrchestratorError> {
        self.guard_cancelled()?;
        info!("running image pipeline service...");
        let binary = self.image_service_binary();
        self.supervisor.spawn(
            ServiceSymbol::ImageService,
            &binary.to_string_lossy(),
            &[],
            &[],
            true,
        )?;
        self.await_marker(ServiceSymbol::ImageService, IMAGE_SERVICE_READY_MARKER)?;
        info!(
            "image pipeline service is now up and running! ({})",
            self.config.image_service.authority()
        );
        Ok(())
    }

    fn start_frontend(&mut self) -> Result<(), OrchestratorError> {
        self.guard_cancelled()?;
        info!("running front-end dev server...");
        let host = self.config.frontend.host.clone();
        let port = self.config.frontend.port.to_string();
        self.supervisor.spawn(
            ServiceSymbol::Frontend,
            "npx",
            &["next", "dev", "-H", &host, "-p", &port],
            &[],
            true,
        )?;
        self.await_marker(ServiceSymbol::Frontend, FRONTEND_READY_MARKER)?;
        info!(
            "front-end is now up and running! ({})",
            self.config.frontend.http_url()
        );
        Ok(())
    }

    fn await_marker(
        &self,
        symbol: ServiceSymbol,
        marker: &str,
    ) -> Result<(), OrchestratorError> {
        let condition = ReadinessCondition::new(marker, MARKER_WAIT_TIMEOUT);
        wait_for_marker(self.supervisor.registry(), symbol, &condition, &self.cancel)
    }

    // ------------------------------------------------------------------
    // Remaining vocabulary
    // ------------------------------------------------------------------

    fn run_tests(&mut self) -> Result<(), OrchestratorError> {
        info!("running tests...");
        run_command(
            &self.config.project_dir,
            "npx",
            &[
                "mocha",
                "./built/test/server/**/*.test.js",
                "--require",
                "./built/test/fixture.js",
            ],
        )
    }

    fn clean_user_data(&mut self) -> Result<(), OrchestratorError> {
        info!("cleaning all user data...");
        for dir in &self.config.data_dirs {
            let pattern = self.config.resolve(dir).join("*");
            delete_files_by_glob(&pattern.to_string_lossy());
        }
        Ok(())
    }

    fn delete_database_cluster(&mut self) -> Result<(), OrchestratorError> {
        info!("deleting database cluster...");
        remove_dir_if_present(&self.config.cluster_dir())
    }

    fn delete_user_data_dirs(&mut self) -> Result<(), OrchestratorError> {
        info!("deleting photos...");
        for dir in &self.config.data_dirs {
            remove_dir_if_present(&self.config.resolve(dir))?;
        }
        Ok(())
    }

    fn delete_compiled_output(&mut self) -> Result<(), OrchestratorError> {
        info!("deleting compiled files...");
        let manifests = self.config.resolve("built/*.json".as_ref());
        delete_files_by_glob(&manifests.to_string_lossy());
        for dir in ["built/server", "built/web"] {
            remove_dir_if_present(&self.config.resolve(dir.as_ref()))?;
        }
        Ok(())
    }

    fn hold_until_interrupted(&mut self) -> Result<(), OrchestratorError> {
        info!("environment is up; press Ctrl-C to shut everything down");
        while !self.cancel.load(Ordering::SeqCst) {
            thread::sleep(HOLD_POLL_INTERVAL);
        }
        info!("interrupt received; shutting down");
        Ok(())
    }
}

/// Returns the subset of `tools` that cannot be located on `PATH`.
fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| locate_executable(tool).is_none())
        .map(|tool| tool.to_string())
        .collect()
}

/// Removes a directory tree if it exists.
fn remove_dir_if_present(path: &Path) -> Result<(), OrchestratorError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|source| OrchestratorError::CleanupError {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Deletes every file matching `pattern`, logging and skipping failures.
fn delete_files_by_glob(pattern: &str) {
    let entries = match glob::glob(pattern) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Invalid glob pattern `{pattern}`: {err}");
            return;
        }
    };

    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => {
                if let Err(err) = fs::remove_file(&path) {
                    warn!("Failed to delete {:?}: {err}", path);
                }
            }
            Ok(_) => {}
            Err(err) => warn!("Skipping unreadable glob entry: {err}"),
        }
    }
}

/// Composes the pipeline for `kind` out of the shared task vocabulary.
pub fn build_pipeline(kind: PipelineKind) -> TaskPipeline<Orchestrator> {
    let tasks = match kind {
        PipelineKind::Dev => vec![
            Task::new("check-dependencies", Orchestrator::check_dependencies),
            Task::new("build-server", Orchestrator::build_backend),
            Task::new("build-image-service", Orchestrator::build_image_service),
            Task::new("ensure-data-dirs", Orchestrator::ensure_data_dirs),
            Task::new("init-database-cluster", Orchestrator::init_database_cluster),
            Task::new("start-database", Orchestrator::start_database),
            Task::new("create-database", Orchestrator::create_database),
            Task::new("apply-schema", Orchestrator::apply_schema),
            Task::new("start-server", Orchestrator::start_backend),
            Task::new("start-image-service", Orchestrator::start_image_service),
            Task::new("start-frontend", Orchestrator::start_frontend),
            Task::new("hold", Orchestrator::hold_until_interrupted),
        ],
        PipelineKind::Test => vec![
            Task::new("check-dependencies", Orchestrator::check_dependencies),
            Task::new("build-server", Orchestrator::build_backend),
            Task::new("build-tests", Orchestrator::build_tests),
            Task::new("build-image-service", Orchestrator::build_image_service),
            Task::new("ensure-data-dirs", Orchestrator::ensure_data_dirs),
            Task::new("init-database-cluster", Orchestrator::init_database_cluster),
            Task::new("start-database", Orchestrator::start_database),
            Task::new("create-database", Orchestrator::create_database),
            Task::new("apply-schema", Orchestrator::apply_schema),
            Task::new("start-server", Orchestrator::start_backend),
            Task::new("start-image-service", Orchestrator::start_image_service),
            Task::new("run-tests", Orchestrator::run_tests),
        ],
        PipelineKind::Clean => vec![
            Task::new("start-database", Orchestrator::start_database),
            Task::new("clean-database-records", Orchestrator::clean_database_records),
            Task::new("clean-user-data", Orchestrator::clean_user_data),
        ],
        PipelineKind::HardReset => vec![
            Task::new("delete-database-cluster", Orchestrator::delete_database_cluster),
            Task::new("delete-user-data", Orchestrator::delete_user_data_dirs),
            Task::new("delete-compiled-output", Orchestrator::delete_compiled_output),
        ],
    };

    TaskPipeline::new(tasks)
}
