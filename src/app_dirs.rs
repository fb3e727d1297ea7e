//! Application directory helpers anchored to a single `.samplefind` folder.
//!
//! Config, indexes, model weights and logs all live under one root that
//! defaults to the OS config directory. `SAMPLEFIND_CONFIG_HOME` relocates
//! the root for tests or portable setups.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".samplefind";
/// Environment variable overriding the base directory that holds `.samplefind`.
pub const CONFIG_HOME_ENV: &str = "SAMPLEFIND_CONFIG_HOME";

static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.samplefind` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// Return the logs directory inside the root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("logs"))
}

/// Return the default directory holding persisted indexes.
pub fn indexes_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("indexes"))
}

/// Return the directory holding embedding model weights.
pub fn models_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("models"))
}

/// Point the application root at `path` for the rest of the process.
pub fn set_config_base_override(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_BASE_OVERRIDE.lock() {
        *guard = Some(path);
    }
}

/// Drop a previously installed base override.
pub fn clear_config_base_override() {
    if let Ok(mut guard) = CONFIG_BASE_OVERRIDE.lock() {
        *guard = None;
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn config_base_dir() -> Option<PathBuf> {
    if let Some(path) = CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some(path);
    }
    if let Ok(path) = std::env::var(CONFIG_HOME_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct OverrideGuard;

    impl OverrideGuard {
        fn set(path: PathBuf) -> Self {
            set_config_base_override(path);
            Self
        }
    }

    impl Drop for OverrideGuard {
        fn drop(&mut self) {
            clear_config_base_override();
        }
    }

    #[test]
    fn data_dirs_live_under_the_override_root() {
        let base = tempdir().unwrap();
        let _guard = OverrideGuard::set(base.path().to_path_buf());
        let root = app_root_dir().unwrap();
        assert_eq!(root, base.path().join(APP_DIR_NAME));
        assert!(root.is_dir());
        assert_eq!(indexes_dir().unwrap(), root.join("indexes"));
        assert_eq!(models_dir().unwrap(), root.join("models"));
        assert!(logs_dir().unwrap().is_dir());
    }
}
