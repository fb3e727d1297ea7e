//! Settings stored as TOML in the data root.

mod defaults;
mod io;
mod types;

/// Default filename used to store settings.
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub use io::{config_path, load_from_path, load_or_default, save, save_to_path};
pub use types::{
    AnalysisSettings, AppSettings, ConfigError, EmbeddingBackendChoice, EmbeddingSettings,
    IndexSettings, LoggingSettings,
};
