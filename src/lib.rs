//! Library exports for the sample similarity engine, its binaries and benchmarks.
/// Feature extraction (descriptors, enhanced features, learned embeddings).
pub mod analysis;
/// Application directory helpers.
pub mod app_dirs;
/// Audio decoding and sample preparation.
pub mod audio;
/// TOML settings.
pub mod config;
/// Typed failures shared across the crate.
pub mod error;
/// Normalization, persistence, building and querying of similarity indexes.
pub mod index;
/// Tracing subscriber setup.
pub mod logging;

pub use analysis::{ExtractionMethod, Extractor, FeatureVector};
pub use error::{AudioError, BuildError, ExtractError, IndexError, QueryError};
pub use index::{
    BuildOptions, BuildReport, HierarchicalSearch, Index, IndexBuilder, IndexCatalog, Neighbor,
    NormalizationParams, NormalizationScheme, QueryInput, QueryResult, SimilarityEngine,
};
