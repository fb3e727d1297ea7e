use std::io::Write;
use std::path::{Path, PathBuf};

use rand::TryRngCore;

use crate::app_dirs;

use super::CONFIG_FILE_NAME;
use super::types::{AppSettings, ConfigError};

/// Resolve the configuration file path, ensuring the data root exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load settings from the data root, returning defaults if the file is missing.
pub fn load_or_default() -> Result<AppSettings, ConfigError> {
    load_from_path(&config_path()?)
}

/// Load settings from a specific file, returning defaults if it does not exist.
pub fn load_from_path(path: &Path) -> Result<AppSettings, ConfigError> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<AppSettings>(&text)
        .map(AppSettings::normalized)
        .map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
}

/// Persist settings to the data root, overwriting any previous contents.
pub fn save(settings: &AppSettings) -> Result<(), ConfigError> {
    save_to_path(settings, &config_path()?)
}

/// Save settings to a specific path, creating parent directories as needed.
///
/// The file is written to a sibling temporary and renamed into place so a crash
/// never leaves a truncated config behind.
pub fn save_to_path(settings: &AppSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(settings).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, data.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |path: &Path, source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().ok_or_else(|| {
        write_err(path, std::io::Error::other("config path has no parent directory"))
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| write_err(path, std::io::Error::other("config path has no file name")))?;

    let mut last_err = None;
    for _ in 0..5 {
        let mut bytes = [0u8; 6];
        rand::rngs::OsRng.try_fill_bytes(&mut bytes).map_err(|source| {
            write_err(
                path,
                std::io::Error::other(format!("failed to generate temporary file suffix: {source}")),
            )
        })?;
        let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        let tmp_path = dir.join(format!("{}.tmp-{suffix}", file_name.to_string_lossy()));

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                last_err = Some(err);
                continue;
            }
            Err(err) => return Err(write_err(&tmp_path, err)),
        };

        if let Err(err) = file.write_all(data).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_err(&tmp_path, err));
        }
        drop(file);
        if let Err(err) = replace_file(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_err(path, err));
        }
        return sync_parent_dir(dir);
    }

    Err(write_err(
        path,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!(
                "failed to create temporary file for {}: {}",
                path.display(),
                last_err
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| "unknown error".into())
            ),
        ),
    ))
}

fn replace_file(temp_path: &Path, path: &Path) -> Result<(), std::io::Error> {
    match std::fs::rename(temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            #[cfg(target_os = "windows")]
            if err.kind() == std::io::ErrorKind::AlreadyExists
                || err.kind() == std::io::ErrorKind::PermissionDenied
            {
                if let Err(inner) = std::fs::remove_file(path)
                    && inner.kind() != std::io::ErrorKind::NotFound
                {
                    return Err(inner);
                }
                return std::fs::rename(temp_path, path);
            }
            Err(err)
        }
    }
}

fn sync_parent_dir(dir: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)
            .and_then(|handle| handle.sync_all())
            .map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => ConfigError::CreateDir { path, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingBackendChoice;
    use crate::index::NormalizationScheme;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.index.hierarchical_candidates, 50);
        assert!((settings.analysis.max_analysis_seconds - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn saves_and_reloads_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut settings = AppSettings::default();
        settings.index.normalization = NormalizationScheme::ZScore;
        settings.index.worker_count = 3;
        settings.analysis.min_rms = 0.01;
        settings.embedding.backend = EmbeddingBackendChoice::Cpu;
        settings.embedding.model_path = Some(PathBuf::from("weights/embedding.mpk"));

        save_to_path(&settings, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded, settings);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn partial_file_fills_defaults_and_clamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[index]\nnormalization = \"zscore\"\nworker_count = 500\nhierarchical_candidates = 0\n\n[analysis]\nmax_analysis_seconds = -1.0\n",
        )
        .unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.index.normalization, NormalizationScheme::ZScore);
        assert_eq!(loaded.index.worker_count, 64);
        assert_eq!(loaded.index.hierarchical_candidates, 1);
        assert!((loaded.analysis.max_analysis_seconds - 30.0).abs() < f32::EPSILON);
        assert_eq!(loaded.embedding.backend, EmbeddingBackendChoice::Auto);
    }

    #[test]
    fn invalid_toml_is_reported_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[index\nroot = 3").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn logging_section_reads_directives_and_keeps_one_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[logging]\nlevel = \"warn\"\ndirectives = [\"samplefind::index=debug\"]\nfile_timings = true\nmax_files = 0\n",
        )
        .unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.logging.level, "warn");
        assert_eq!(loaded.logging.directives, vec!["samplefind::index=debug"]);
        assert!(loaded.logging.file_timings);
        assert!(loaded.logging.to_file);
        assert_eq!(loaded.logging.max_files, 1);
    }
}
