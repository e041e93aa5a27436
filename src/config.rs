//! Configuration for execflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (EXECFLOW_HOME, EXECFLOW_DB)
//! 2. Config file (.execflow/config.yaml)
//! 3. Defaults (~/.execflow, <home>/execflow.db)
//!
//! Config file discovery:
//! - Searches current directory and parents for .execflow/config.yaml
//! - Paths in config file are relative to the .execflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".execflow";
const DEFAULT_DB_FILE: &str = "execflow.db";
const DEFAULT_LIST_LIMIT: usize = 20;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .execflow/)
    pub home: Option<String>,
    /// SQLite database file (relative to .execflow/)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Default row count for `runs`
    pub list_limit: Option<usize>,
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalsConfig {
    /// Recorded as `decided_by` when no name is given
    pub decided_by: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    pub list_limit: usize,
    pub log_filter: Option<String>,
    pub decided_by: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Environment overrides, captured separately so resolution is testable
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            home: std::env::var_os("EXECFLOW_HOME").map(PathBuf::from),
            database: std::env::var_os("EXECFLOW_DB").map(PathBuf::from),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Resolve configuration from a starting directory, environment overrides
/// and a default home.
pub fn resolve_config(
    start_dir: &Path,
    env: &EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let config_file = find_config_file(start_dir);
    let file = config_file.as_deref().map(load_config_file).transpose()?;

    // Paths in the file are relative to .execflow/
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = match (&env.home, file.as_ref().and_then(|f| f.paths.home.as_deref())) {
        (Some(env_home), _) => env_home.clone(),
        (None, Some(home)) => resolve_path(config_dir, home),
        (None, None) => default_home,
    };

    let database = match (
        &env.database,
        file.as_ref().and_then(|f| f.paths.database.as_deref()),
    ) {
        (Some(env_db), _) => env_db.clone(),
        (None, Some(db)) => resolve_path(config_dir, db),
        (None, None) => home.join(DEFAULT_DB_FILE),
    };

    let (list_limit, log_filter, decided_by) = match file {
        Some(file) => (
            file.engine.list_limit.unwrap_or(DEFAULT_LIST_LIMIT),
            file.engine.log_filter,
            file.approvals.decided_by,
        ),
        None => (DEFAULT_LIST_LIMIT, None, None),
    };

    Ok(ResolvedConfig {
        home,
        database,
        list_limit,
        log_filter,
        decided_by,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    resolve_config(&cwd, &EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the execflow home directory (engine state).
pub fn execflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the SQLite database path
pub fn database_path() -> Result<PathBuf> {
    Ok(config()?.database.clone())
}
