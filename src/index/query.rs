use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use ndarray::ArrayView1;
use tracing::{debug, debug_span};

use super::{DEFAULT_HIERARCHICAL_CANDIDATES, Index, Neighbor, QueryResult, storage};
use crate::analysis::Extractor;
use crate::audio::{self, Waveform};
use crate::error::{ExtractError, IndexError, QueryError};

/// What to search with.
#[derive(Clone, Copy, Debug)]
pub enum QueryInput<'a> {
    /// An audio file, decoded with the engine's extractor settings.
    Path(&'a Path),
    /// A mono waveform.
    Waveform { samples: &'a [f32], sample_rate: u32 },
    /// A raw (not yet normalized) feature vector from the index's method.
    Features(&'a [f32]),
}

impl<'a> From<&'a Waveform> for QueryInput<'a> {
    fn from(waveform: &'a Waveform) -> Self {
        Self::Waveform {
            samples: &waveform.samples,
            sample_rate: waveform.sample_rate,
        }
    }
}

enum EngineState {
    Init,
    Ready(Index),
}

/// Exact brute-force kNN over one index.
///
/// Starts without an index and refuses queries until one is attached.
pub struct SimilarityEngine {
    extractor: Extractor,
    state: EngineState,
}

impl SimilarityEngine {
    pub fn new(extractor: Extractor) -> Self {
        Self {
            extractor,
            state: EngineState::Init,
        }
    }

    /// Engine that is ready immediately.
    pub fn with_index(extractor: Extractor, index: Index) -> Result<Self, QueryError> {
        let mut engine = Self::new(extractor);
        engine.attach(index)?;
        Ok(engine)
    }

    /// Load the persisted index at `index_dir`. A missing directory surfaces as
    /// [`IndexError::NotFound`]; nothing is built.
    pub fn load(extractor: Extractor, index_dir: &Path) -> Result<Self, QueryError> {
        let index = storage::load_for_method(index_dir, extractor.method())?;
        Self::with_index(extractor, index)
    }

    /// Attach an index built with this engine's method and dimension.
    pub fn attach(&mut self, index: Index) -> Result<(), QueryError> {
        if index.method() != self.extractor.method() {
            return Err(QueryError::InvalidQuery(format!(
                "index was built with {}, engine extracts {}",
                index.method(),
                self.extractor.method()
            )));
        }
        if index.dimension() != self.extractor.dimension() {
            return Err(QueryError::DimensionMismatch {
                expected: index.dimension(),
                actual: self.extractor.dimension(),
            });
        }
        self.state = EngineState::Ready(index);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    pub fn index(&self) -> Option<&Index> {
        match &self.state {
            EngineState::Ready(index) => Some(index),
            EngineState::Init => None,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// The `k` nearest entries by L1 distance, ascending, ties in index order.
    pub fn query(&self, input: QueryInput<'_>, k: usize) -> Result<QueryResult, QueryError> {
        self.rank(input, k, None)
    }

    /// Like [`query`](Self::query) but only entries whose id is in `allowed`
    /// are ranked.
    pub fn query_within(
        &self,
        input: QueryInput<'_>,
        k: usize,
        allowed: &HashSet<&str>,
    ) -> Result<QueryResult, QueryError> {
        self.rank(input, k, Some(allowed))
    }

    fn rank(
        &self,
        input: QueryInput<'_>,
        k: usize,
        allowed: Option<&HashSet<&str>>,
    ) -> Result<QueryResult, QueryError> {
        let index = self.index().ok_or(QueryError::NotReady)?;
        if k == 0 {
            return Ok(QueryResult::default());
        }
        let _span = debug_span!(
            "query",
            method = %index.method(),
            k,
            filtered = allowed.is_some()
        )
        .entered();
        let raw = self.raw_features(input)?;
        if raw.len() != index.dimension() {
            return Err(QueryError::DimensionMismatch {
                expected: index.dimension(),
                actual: raw.len(),
            });
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(QueryError::InvalidQuery("query features are not finite".into()));
        }
        let query = index.params().apply(&raw).map_err(|err| match err {
            IndexError::DimensionMismatch { expected, actual } => {
                QueryError::DimensionMismatch { expected, actual }
            }
            other => QueryError::Index(other),
        })?;

        let mut scored: Vec<(usize, f32)> = index
            .vectors()
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(row, _)| allowed.is_none_or(|ids| ids.contains(index.ids()[*row].as_str())))
            .map(|(row, vector)| (row, l1_distance(vector, &query)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        debug!("Ranked {} of {} entries", scored.len(), index.len());

        Ok(QueryResult {
            neighbors: scored
                .into_iter()
                .map(|(row, distance)| Neighbor {
                    id: index.ids()[row].clone(),
                    distance,
                })
                .collect(),
        })
    }

    fn raw_features<'a>(&self, input: QueryInput<'a>) -> Result<Cow<'a, [f32]>, QueryError> {
        let vector = match input {
            QueryInput::Features(values) => return Ok(Cow::Borrowed(values)),
            QueryInput::Path(path) => self.extractor.extract_path(path)?,
            QueryInput::Waveform {
                samples,
                sample_rate,
            } => self.extractor.extract(samples, sample_rate)?,
        };
        Ok(Cow::Owned(vector.into_inner()))
    }
}

/// Sum of absolute elementwise differences.
pub(crate) fn l1_distance(a: ArrayView1<'_, f32>, b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Two-stage search: narrow with `coarse`, re-rank the candidates with `fine`.
///
/// Both engines must index the same corpus. Stage one keeps
/// `max(candidates, k)` ids.
pub struct HierarchicalSearch<'e> {
    coarse: &'e SimilarityEngine,
    fine: &'e SimilarityEngine,
    candidates: usize,
}

impl<'e> HierarchicalSearch<'e> {
    pub fn new(coarse: &'e SimilarityEngine, fine: &'e SimilarityEngine) -> Self {
        Self {
            coarse,
            fine,
            candidates: DEFAULT_HIERARCHICAL_CANDIDATES,
        }
    }

    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates.max(1);
        self
    }

    pub fn candidates(&self) -> usize {
        self.candidates
    }

    pub fn query(&self, input: QueryInput<'_>, k: usize) -> Result<QueryResult, QueryError> {
        if !self.coarse.is_ready() || !self.fine.is_ready() {
            return Err(QueryError::NotReady);
        }
        if k == 0 {
            return Ok(QueryResult::default());
        }
        let _span = debug_span!("hierarchical_query", k, candidates = self.candidates).entered();
        // Decode once and feed the same waveform to both stages.
        let decoded;
        let input = match input {
            QueryInput::Path(path) => {
                decoded = audio::load_mono(path, self.coarse.extractor().max_seconds())
                    .map_err(ExtractError::from)?;
                QueryInput::from(&decoded)
            }
            QueryInput::Features(_) => {
                return Err(QueryError::InvalidQuery(
                    "hierarchical search needs audio, not a feature vector".into(),
                ));
            }
            waveform => waveform,
        };
        let m = self.candidates.max(k);
        let stage_one = self.coarse.query(input, m)?;
        let allowed: HashSet<&str> = stage_one.iter().map(|n| n.id.as_str()).collect();
        debug!("Hierarchical stage one kept {} candidates", allowed.len());
        self.fine.query_within(input, k, &allowed)
    }
}
