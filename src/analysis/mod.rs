//! Feature extraction: spectral descriptors, enhanced frame statistics and
//! learned embeddings behind one closed set of extraction methods.

pub mod descriptor;
pub mod embedding;
pub mod enhanced;
mod mel;
mod spectrum;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::{self, Waveform};
use crate::config::AppSettings;
use crate::error::ExtractError;

pub use descriptor::DESCRIPTOR_DIM;
pub use embedding::{EMBEDDING_DIM, EmbeddingModel};
pub use enhanced::ENHANCED_DIM;

/// Guard added to denominators throughout feature computation.
pub const EPSILON: f32 = 1e-7;

/// How a clip is turned into a feature vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Seven whole-clip spectral descriptors.
    Descriptor,
    /// Descriptors plus cepstral, contrast, HPSS, onset and flux statistics.
    Enhanced,
    /// Pooled output of the pretrained embedding network.
    Embedding,
}

impl ExtractionMethod {
    pub const ALL: [ExtractionMethod; 3] = [Self::Descriptor, Self::Enhanced, Self::Embedding];

    /// Stable name used in index directory names and manifests.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Descriptor => "descriptor",
            Self::Enhanced => "enhanced",
            Self::Embedding => "embedding",
        }
    }

    /// Fixed vector dimension produced by this method.
    pub fn dimension(self) -> usize {
        match self {
            Self::Descriptor => DESCRIPTOR_DIM,
            Self::Enhanced => ENHANCED_DIM,
            Self::Embedding => EMBEDDING_DIM,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "descriptor" | "fft" => Ok(Self::Descriptor),
            "enhanced" | "mfcc" => Ok(Self::Enhanced),
            "embedding" | "passt" | "cnn" => Ok(Self::Embedding),
            other => Err(format!(
                "unknown extraction method '{other}' (expected descriptor, enhanced or embedding)"
            )),
        }
    }
}

/// A fixed-length feature vector.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Replace NaN with 0 and infinities with ±1.
pub fn sanitize_in_place(values: &mut [f32]) {
    for value in values {
        if value.is_nan() {
            *value = 0.0;
        } else if value.is_infinite() {
            *value = value.signum();
        }
    }
}

/// Turns waveforms or files into feature vectors for one method.
///
/// Shared across build workers; the embedding variant serializes inference
/// through the model's own lock.
#[derive(Clone, Debug)]
pub struct Extractor {
    method: ExtractionMethod,
    max_seconds: Option<f32>,
    model: Option<Arc<EmbeddingModel>>,
}

impl Extractor {
    /// Extractor for a deterministic method. Use [`Extractor::embedding`] for
    /// [`ExtractionMethod::Embedding`].
    pub fn deterministic(method: ExtractionMethod) -> Result<Self, ExtractError> {
        if method == ExtractionMethod::Embedding {
            return Err(ExtractError::Model(
                "embedding extraction needs a loaded model".into(),
            ));
        }
        Ok(Self {
            method,
            max_seconds: None,
            model: None,
        })
    }

    /// Extractor backed by a loaded embedding model.
    pub fn embedding(model: Arc<EmbeddingModel>) -> Self {
        Self {
            method: ExtractionMethod::Embedding,
            max_seconds: None,
            model: Some(model),
        }
    }

    /// Build the extractor for `method`, loading the embedding model if needed.
    pub fn from_settings(
        method: ExtractionMethod,
        settings: &AppSettings,
    ) -> Result<Self, ExtractError> {
        let extractor = match method {
            ExtractionMethod::Embedding => {
                Self::embedding(Arc::new(EmbeddingModel::from_settings(&settings.embedding)?))
            }
            other => Self::deterministic(other)?,
        };
        Ok(extractor.with_max_seconds(Some(settings.analysis.max_analysis_seconds)))
    }

    /// Decode at most this many seconds of each file.
    pub fn with_max_seconds(mut self, max_seconds: Option<f32>) -> Self {
        self.max_seconds = max_seconds.filter(|limit| limit.is_finite() && *limit > 0.0);
        self
    }

    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    pub fn max_seconds(&self) -> Option<f32> {
        self.max_seconds
    }

    /// Dimension of every vector this extractor returns.
    pub fn dimension(&self) -> usize {
        match &self.model {
            Some(model) => model.dimension(),
            None => self.method.dimension(),
        }
    }

    /// Extract features from a mono waveform.
    ///
    /// The result is sanitized (NaN to 0, ±Inf to ±1); a zero-energy clip
    /// yields the zero vector for deterministic methods.
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureVector, ExtractError> {
        if samples.is_empty() {
            return Err(ExtractError::NumericDegenerate("empty waveform".into()));
        }
        if sample_rate == 0 {
            return Err(ExtractError::NumericDegenerate("sample rate is zero".into()));
        }
        let mut values = match self.method {
            ExtractionMethod::Descriptor => {
                descriptor::extract_descriptors(samples, sample_rate).to_vec()
            }
            ExtractionMethod::Enhanced => enhanced::extract_enhanced(samples, sample_rate),
            ExtractionMethod::Embedding => {
                let model = self.model.as_ref().ok_or_else(|| {
                    ExtractError::Model("embedding extraction needs a loaded model".into())
                })?;
                model.embed(samples, sample_rate)?
            }
        };
        sanitize_in_place(&mut values);
        Ok(FeatureVector::new(values))
    }

    pub fn extract_waveform(&self, waveform: &Waveform) -> Result<FeatureVector, ExtractError> {
        self.extract(&waveform.samples, waveform.sample_rate)
    }

    /// Decode a file and extract its features.
    pub fn extract_path(&self, path: &Path) -> Result<FeatureVector, ExtractError> {
        let waveform = audio::load_mono(path, self.max_seconds)?;
        self.extract_waveform(&waveform)
    }
}
