//! Configuration management for devstrap.
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::OrchestratorError;

/// A host/port pair for one of the orchestrated services.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Address {
    /// Host name or IP the service binds to.
    pub host: String,
    /// TCP port the service binds to.
    pub port: u16,
}

impl Address {
    /// Creates an address from parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Renders the address as an `http://` base URL.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Renders the bare `host:port` authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Top-level orchestrator configuration.
///
/// Every field has a default matching the foto repository layout, so the
/// config file is optional and may override only what it needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory the project lives in; relative paths resolve below it.
    pub project_dir: PathBuf,
    /// Address the backend server listens on.
    pub backend: Address,
    /// Address the image-processing service listens on.
    pub image_service: Address,
    /// Address the front-end dev server listens on.
    pub frontend: Address,
    /// Database cluster directory, relative to `project_dir`.
    pub database_cluster: PathBuf,
    /// Name of the application database.
    pub database_name: String,
    /// SQL file defining the application schema.
    pub schema_file: PathBuf,
    /// SQL file deleting all application records.
    pub clean_file: PathBuf,
    /// Directories for generated media artifacts.
    pub data_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            backend: Address::new("localhost", 3000),
            image_service: Address::new("localhost", 3001),
            frontend: Address::new("localhost", 4000),
            database_cluster: PathBuf::from("built/database-cluster"),
            database_name: "fotodb".into(),
            schema_file: PathBuf::from("src/database-schema.sql"),
            clean_file: PathBuf::from("src/clean-db.sql"),
            data_dirs: vec![
                PathBuf::from("built/data/thumbnails"),
                PathBuf::from("built/data/photos"),
            ],
        }
    }
}

impl Config {
    /// Resolves a configured path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Absolute path of the database cluster directory.
    pub fn cluster_dir(&self) -> PathBuf {
        self.resolve(&self.database_cluster)
    }

    /// Path of the `postmaster.pid` file inside the cluster.
    pub fn postmaster_pid(&self) -> PathBuf {
        self.cluster_dir().join(crate::constants::POSTMASTER_PID_FILE)
    }
}

/// Expands `${VAR}` and `$VAR` references within a string, leaving unset
/// variables untouched.
fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                warn!("Leaving unset environment variable ${var_name} unexpanded");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

/// Loads and parses the configuration file, expanding environment variables.
///
/// When `config_path` is `None`, `devstrap.yaml` is used if it exists;
/// otherwise built-in defaults apply.
pub fn load_config(config_path: Option<&str>) -> Result<Config, OrchestratorError> {
    let config_path = match config_path {
        Some(path) => Path::new(path),
        None => {
            let default = Path::new("devstrap.yaml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };

    let content = fs::read_to_string(config_path).map_err(|e| {
        OrchestratorError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content);
    let mut config: Config =
        serde_yaml::from_str(&expanded).map_err(OrchestratorError::ConfigParseError)?;

    if config.project_dir == PathBuf::from(".")
        && let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        config.project_dir = parent.to_path_buf();
    }

    Ok(config)
}
