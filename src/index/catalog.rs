use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use tracing::info;

use super::query::{HierarchicalSearch, QueryInput, SimilarityEngine};
use super::{QueryResult, index_dir_name};
use crate::analysis::{ExtractionMethod, Extractor};
use crate::app_dirs::{self, AppDirError};
use crate::config::AppSettings;
use crate::error::QueryError;

/// Per-corpus cache of query engines, one per extraction method.
///
/// Each index is loaded on first use and reused for every later query.
pub struct IndexCatalog {
    index_root: PathBuf,
    corpus_dir: PathBuf,
    settings: AppSettings,
    engines: HashMap<ExtractionMethod, SimilarityEngine>,
}

impl IndexCatalog {
    pub fn new(index_root: impl Into<PathBuf>, corpus_dir: impl Into<PathBuf>, settings: AppSettings) -> Self {
        Self {
            index_root: index_root.into(),
            corpus_dir: corpus_dir.into(),
            settings,
            engines: HashMap::new(),
        }
    }

    /// Catalog rooted at the configured index root (or the data root's
    /// `indexes` directory).
    pub fn for_corpus(corpus_dir: impl Into<PathBuf>, settings: AppSettings) -> Result<Self, AppDirError> {
        let index_root = match settings.index.root.clone() {
            Some(root) => root,
            None => app_dirs::indexes_dir()?,
        };
        Ok(Self::new(index_root, corpus_dir, settings))
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    /// Where the index for `method` lives.
    pub fn index_dir(&self, method: ExtractionMethod) -> PathBuf {
        self.index_root.join(index_dir_name(&self.corpus_dir, method))
    }

    /// The engine for `method`, loading its index on first use.
    pub fn engine(&mut self, method: ExtractionMethod) -> Result<&SimilarityEngine, QueryError> {
        let index_dir = self.index_dir(method);
        match self.engines.entry(method) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let extractor = Extractor::from_settings(method, &self.settings)?;
                let engine = SimilarityEngine::load(extractor, &index_dir)?;
                info!("Loaded {method} index from {}", index_dir.display());
                Ok(&*entry.insert(engine))
            }
        }
    }

    /// Register an already-ready engine, replacing any cached one.
    pub fn insert_engine(&mut self, engine: SimilarityEngine) -> Result<(), QueryError> {
        if !engine.is_ready() {
            return Err(QueryError::NotReady);
        }
        self.engines.insert(engine.extractor().method(), engine);
        Ok(())
    }

    pub fn query(
        &mut self,
        method: ExtractionMethod,
        input: QueryInput<'_>,
        k: usize,
    ) -> Result<QueryResult, QueryError> {
        self.engine(method)?.query(input, k)
    }

    /// Narrow with `coarse`, re-rank with `fine`, using the configured
    /// candidate count.
    pub fn hierarchical_query(
        &mut self,
        coarse: ExtractionMethod,
        fine: ExtractionMethod,
        input: QueryInput<'_>,
        k: usize,
    ) -> Result<QueryResult, QueryError> {
        self.engine(coarse)?;
        self.engine(fine)?;
        let coarse_engine = self.engines.get(&coarse).ok_or(QueryError::NotReady)?;
        let fine_engine = self.engines.get(&fine).ok_or(QueryError::NotReady)?;
        HierarchicalSearch::new(coarse_engine, fine_engine)
            .with_candidates(self.settings.index.hierarchical_candidates)
            .query(input, k)
    }

    /// Methods whose indexes are currently loaded.
    pub fn loaded_methods(&self) -> Vec<ExtractionMethod> {
        ExtractionMethod::ALL
            .into_iter()
            .filter(|method| self.engines.contains_key(method))
            .collect()
    }
}
