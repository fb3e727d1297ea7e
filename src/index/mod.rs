//! Similarity indexes: normalization, persistence, building and querying.
//!
//! An [`Index`] is an ordered list of sample identifiers, their normalized
//! feature vectors and the parameters used to normalize them. Indexes are
//! built once per (corpus, method) pair, are read-only afterwards and are
//! replaced wholesale by rebuilding.

mod builder;
mod catalog;
mod normalize;
mod query;
pub mod storage;

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::analysis::ExtractionMethod;
use crate::error::IndexError;

pub use builder::{
    BuildOptions, BuildReport, IndexBuilder, WORKERS_ENV, build_all_methods, build_methods,
    enumerate_audio_files,
};
pub use catalog::IndexCatalog;
pub use normalize::{NormalizationParams, NormalizationScheme};
pub use query::{HierarchicalSearch, QueryInput, SimilarityEngine};

/// Stage-one candidate count used by hierarchical search unless configured.
pub const DEFAULT_HIERARCHICAL_CANDIDATES: usize = 50;

/// Identifiers plus normalized vectors for one corpus and method.
#[derive(Clone, Debug, PartialEq)]
pub struct Index {
    method: ExtractionMethod,
    params: NormalizationParams,
    ids: Vec<String>,
    vectors: Array2<f32>,
    corpus_root: Option<PathBuf>,
}

impl Index {
    /// Assemble an index from already-normalized rows (one per identifier).
    pub fn new(
        method: ExtractionMethod,
        params: NormalizationParams,
        ids: Vec<String>,
        vectors: Array2<f32>,
    ) -> Result<Self, IndexError> {
        if ids.is_empty() {
            return Err(IndexError::Empty);
        }
        if vectors.nrows() != ids.len() {
            return Err(IndexError::Corrupt {
                path: PathBuf::new(),
                reason: format!("{} identifiers but {} vectors", ids.len(), vectors.nrows()),
            });
        }
        if vectors.ncols() != params.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: params.dimension(),
                actual: vectors.ncols(),
            });
        }
        Ok(Self {
            method,
            params,
            ids,
            vectors: vectors.as_standard_layout().into_owned(),
            corpus_root: None,
        })
    }

    /// Record the corpus directory this index was built from.
    pub fn with_corpus_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.corpus_root = Some(root.into());
        self
    }

    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    pub fn corpus_root(&self) -> Option<&Path> {
        self.corpus_root.as_deref()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    /// Normalized vectors, one row per identifier.
    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    /// Every `(identifier, normalized vector)` pair in insertion order.
    pub fn all(&self) -> impl Iterator<Item = (&str, ArrayView1<'_, f32>)> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.vectors.rows())
    }

    /// Position of an identifier, if present.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|candidate| candidate == id)
    }
}

/// One ranked match.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

/// Matches sorted ascending by L1 distance (ties keep index order).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub neighbors: Vec<Neighbor>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.neighbors.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.neighbors.iter().map(|n| n.id.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Neighbor;
    type IntoIter = std::slice::Iter<'a, Neighbor>;

    fn into_iter(self) -> Self::IntoIter {
        self.neighbors.iter()
    }
}

/// Directory name for a corpus/method index: `<corpus name>_<method slug>`.
pub fn index_dir_name(corpus_dir: &Path, method: ExtractionMethod) -> String {
    let corpus = corpus_dir
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("corpus");
    format!("{corpus}_{}", method.slug())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_index() -> Index {
        let raw = array![[0.0_f32, 1.0], [2.0, 3.0]];
        let params = NormalizationParams::fit(NormalizationScheme::MinMax, raw.view()).unwrap();
        let mut vectors = raw.clone();
        params.apply_rows(&mut vectors).unwrap();
        Index::new(
            ExtractionMethod::Descriptor,
            params,
            vec!["a.wav".into(), "b.wav".into()],
            vectors,
        )
        .unwrap()
    }

    #[test]
    fn all_pairs_follow_insertion_order() {
        let index = sample_index();
        let pairs: Vec<_> = index.all().map(|(id, v)| (id.to_string(), v.to_vec())).collect();
        assert_eq!(pairs[0], ("a.wav".to_string(), vec![0.0, 0.0]));
        assert_eq!(pairs[1], ("b.wav".to_string(), vec![1.0, 1.0]));
        assert_eq!(index.position("b.wav"), Some(1));
    }

    #[test]
    fn rows_must_match_identifiers() {
        let index = sample_index();
        let err = Index::new(
            ExtractionMethod::Descriptor,
            index.params().clone(),
            vec!["only.wav".into()],
            index.vectors().to_owned(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn dir_name_combines_corpus_and_method() {
        assert_eq!(
            index_dir_name(Path::new("/data/drums"), ExtractionMethod::Enhanced),
            "drums_enhanced"
        );
        assert_eq!(index_dir_name(Path::new("/"), ExtractionMethod::Descriptor), "corpus_descriptor");
    }
}
