//! Learned embeddings from a frozen CNN14-style network running on burn.
//!
//! Weights are a named MessagePack record (`embedding.mpk`) loaded once. The
//! GPU (wgpu) backend is preferred; when it cannot start the model is loaded on
//! the ndarray CPU backend, which has the same output shape.

mod backend;
mod logmel;
mod model;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use tracing::{info, warn};

use crate::app_dirs;
use crate::config::{EmbeddingBackendChoice, EmbeddingSettings};
use crate::error::ExtractError;

pub use backend::{BACKEND_ENV, EmbeddingBackendKind};
use backend::{CpuBackend, CpuDevice, GpuBackend, GpuDevice, init_cubecl_config, init_wgpu};
use logmel::{LogMelFrontend, MEL_BANDS};
use model::{Cnn14, Cnn14Config};

/// Default weights file name inside the models directory.
pub const MODEL_FILE_NAME: &str = "embedding.mpk";

const MODEL_CONFIG: Cnn14Config = Cnn14Config::new(MEL_BANDS, 64);

/// Output dimension of the embedding network.
pub const EMBEDDING_DIM: usize = MODEL_CONFIG.embedding_dim();

enum ModelInner {
    Gpu {
        model: Cnn14<GpuBackend>,
        device: GpuDevice,
    },
    Cpu {
        model: Cnn14<CpuBackend>,
        device: CpuDevice,
    },
}

/// A loaded, frozen embedding network plus its log-mel frontend.
pub struct EmbeddingModel {
    inner: Mutex<ModelInner>,
    frontend: LogMelFrontend,
    backend: EmbeddingBackendKind,
    dim: usize,
}

impl std::fmt::Debug for EmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingModel")
            .field("backend", &self.backend)
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

/// Resolve the weights path from settings, falling back to the models directory.
pub fn resolve_model_path(settings: &EmbeddingSettings) -> Result<PathBuf, ExtractError> {
    if let Some(path) = settings.model_path.as_ref() {
        return Ok(path.clone());
    }
    let dir = app_dirs::models_dir().map_err(|err| ExtractError::Model(err.to_string()))?;
    Ok(dir.join(MODEL_FILE_NAME))
}

impl EmbeddingModel {
    /// Load weights according to `settings` (path and backend preference).
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, ExtractError> {
        let path = resolve_model_path(settings)?;
        Self::load(&path, backend_choice(settings.backend))
    }

    /// Load weights from `path` on the requested backend.
    pub fn load(path: &Path, choice: EmbeddingBackendChoice) -> Result<Self, ExtractError> {
        Self::load_with_config(path, MODEL_CONFIG, choice)
    }

    pub(crate) fn load_with_config(
        path: &Path,
        config: Cnn14Config,
        choice: EmbeddingBackendChoice,
    ) -> Result<Self, ExtractError> {
        if !path.is_file() {
            return Err(ExtractError::Model(format!(
                "embedding weights not found at {}",
                path.display()
            )));
        }
        let inner = match choice {
            EmbeddingBackendChoice::Cpu => load_cpu(path, config)?,
            EmbeddingBackendChoice::Gpu => load_gpu(path, config)?,
            EmbeddingBackendChoice::Auto => match load_gpu(path, config) {
                Ok(inner) => inner,
                Err(err) => {
                    warn!("GPU embedding backend unavailable ({err}); using CPU");
                    load_cpu(path, config)?
                }
            },
        };
        let backend = match &inner {
            ModelInner::Gpu { .. } => EmbeddingBackendKind::Gpu,
            ModelInner::Cpu { .. } => EmbeddingBackendKind::Cpu,
        };
        info!("Loaded embedding model {} on {backend}", path.display());
        Ok(Self {
            inner: Mutex::new(inner),
            frontend: LogMelFrontend::new(),
            backend,
            dim: config.embedding_dim(),
        })
    }

    pub fn backend(&self) -> EmbeddingBackendKind {
        self.backend
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Embed a mono waveform at any sample rate.
    pub fn embed(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, ExtractError> {
        let mel = self.frontend.log_mel(samples, sample_rate);
        let guard = self
            .inner
            .lock()
            .map_err(|_| ExtractError::Model("embedding model lock poisoned".into()))?;
        let embedding = match &*guard {
            ModelInner::Gpu { model, device } => run_inference(model, device, mel.values, mel.frames),
            ModelInner::Cpu { model, device } => run_inference(model, device, mel.values, mel.frames),
        }?;
        if embedding.len() != self.dim {
            return Err(ExtractError::Model(format!(
                "embedding has {} values, expected {}",
                embedding.len(),
                self.dim
            )));
        }
        Ok(embedding)
    }
}

fn backend_choice(configured: EmbeddingBackendChoice) -> EmbeddingBackendChoice {
    let requested = std::env::var(BACKEND_ENV)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase());
    match requested.as_deref() {
        Some("cpu") | Some("ndarray") => EmbeddingBackendChoice::Cpu,
        Some("gpu") | Some("wgpu") => EmbeddingBackendChoice::Gpu,
        Some("auto") => EmbeddingBackendChoice::Auto,
        None | Some("") => configured,
        Some(other) => {
            warn!("Unknown embedding backend '{other}', using configured {configured:?}");
            configured
        }
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn load_cpu(path: &Path, config: Cnn14Config) -> Result<ModelInner, ExtractError> {
    let device = CpuDevice::default();
    let model = config
        .init::<CpuBackend>(&device)
        .load_file(path, &recorder(), &device)
        .map_err(|err| ExtractError::Model(format!("failed to load {}: {err:?}", path.display())))?;
    Ok(ModelInner::Cpu { model, device })
}

fn load_gpu(path: &Path, config: Cnn14Config) -> Result<ModelInner, ExtractError> {
    // Adapter discovery panics when no usable GPU is present.
    let loaded = catch_unwind(AssertUnwindSafe(|| {
        init_cubecl_config();
        let device = GpuDevice::default();
        init_wgpu(&device);
        config
            .init::<GpuBackend>(&device)
            .load_file(path, &recorder(), &device)
            .map(|model| ModelInner::Gpu { model, device })
            .map_err(|err| format!("failed to load {}: {err:?}", path.display()))
    }));
    match loaded {
        Ok(result) => result.map_err(ExtractError::Model),
        Err(_) => Err(ExtractError::Model("wgpu initialization panicked".into())),
    }
}

fn run_inference<B: Backend>(
    model: &Cnn14<B>,
    device: &B::Device,
    logmel: Vec<f32>,
    frames: usize,
) -> Result<Vec<f32>, ExtractError> {
    let data = TensorData::new(logmel, [1, 1, frames, MEL_BANDS]);
    let input = Tensor::<B, 4>::from_data(data, device);
    model
        .forward(input)
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| ExtractError::Model(format!("failed to read embedding tensor: {err:?}")))
}
