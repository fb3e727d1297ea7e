use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::NormalizationScheme;

use super::defaults::{
    default_hierarchical_candidates, default_log_level, default_log_to_file,
    default_max_analysis_seconds, default_max_log_files, default_min_duration_seconds,
    default_min_rms, default_worker_count,
};

/// Errors that may occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to create the config directory.
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write the config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize settings to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    /// No usable config directory found.
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Settings persisted in `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where indexes live and how they are built and searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Directory holding index folders; defaults to the data root's `indexes`.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Scheme used when fitting normalization parameters.
    #[serde(default)]
    pub normalization: NormalizationScheme,
    /// Build worker count override (0 = auto).
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,
    /// Stage-one candidate count for hierarchical search.
    #[serde(default = "default_hierarchical_candidates")]
    pub hierarchical_candidates: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            root: None,
            normalization: NormalizationScheme::default(),
            worker_count: default_worker_count(),
            hierarchical_candidates: default_hierarchical_candidates(),
        }
    }
}

/// Decode limits and the clip validity filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Decode at most this many seconds of each clip.
    #[serde(default = "default_max_analysis_seconds")]
    pub max_analysis_seconds: f32,
    /// Clips shorter than this are rejected at build time.
    #[serde(default = "default_min_duration_seconds")]
    pub min_duration_seconds: f32,
    /// Clips quieter than this RMS are rejected at build time.
    #[serde(default = "default_min_rms")]
    pub min_rms: f32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_analysis_seconds: default_max_analysis_seconds(),
            min_duration_seconds: default_min_duration_seconds(),
            min_rms: default_min_rms(),
        }
    }
}

/// Learned-embedding model location and compute backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Weights file; defaults to `models/embedding.mpk` under the data root.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub backend: EmbeddingBackendChoice,
}

/// Compute backend preference for embedding inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendChoice {
    /// Try the GPU and fall back to the CPU.
    #[default]
    Auto,
    /// Require the GPU backend.
    Gpu,
    /// Always run on the CPU.
    Cpu,
}

/// Log filtering and log file retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Base level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Extra `target=level` directives, e.g. `samplefind::index::query=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
    /// Emit per-file extraction timings during index builds.
    #[serde(default)]
    pub file_timings: bool,
    /// Write a log file per launch in addition to stderr.
    #[serde(default = "default_log_to_file")]
    pub to_file: bool,
    /// Number of launch logs kept in the logs directory.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directives: Vec::new(),
            file_timings: false,
            to_file: default_log_to_file(),
            max_files: default_max_log_files(),
        }
    }
}

impl AppSettings {
    /// Clamp out-of-range values read from disk.
    pub fn normalized(mut self) -> Self {
        self.index.worker_count = super::defaults::clamp_worker_count(self.index.worker_count);
        self.index.hierarchical_candidates = self.index.hierarchical_candidates.max(1);
        let analysis = &mut self.analysis;
        if !analysis.max_analysis_seconds.is_finite() || analysis.max_analysis_seconds <= 0.0 {
            analysis.max_analysis_seconds = default_max_analysis_seconds();
        }
        if !analysis.min_duration_seconds.is_finite() || analysis.min_duration_seconds < 0.0 {
            analysis.min_duration_seconds = default_min_duration_seconds();
        }
        if !analysis.min_rms.is_finite() || analysis.min_rms < 0.0 {
            analysis.min_rms = default_min_rms();
        }
        self.logging.max_files = self.logging.max_files.max(1);
        self
    }
}
