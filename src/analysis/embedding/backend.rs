use std::sync::OnceLock;

use burn::backend::ndarray::{NdArray, NdArrayDevice};
#[cfg(target_os = "macos")]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Metal};
#[cfg(not(target_os = "macos"))]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Vulkan};

pub(super) type GpuDevice = WgpuDevice;
pub(super) type CpuDevice = NdArrayDevice;
pub(super) type GpuBackend = wgpu::Wgpu;
pub(super) type CpuBackend = NdArray;

/// Environment override for the configured backend (`gpu`, `cpu` or `auto`).
pub const BACKEND_ENV: &str = "SAMPLEFIND_EMBEDDING_BACKEND";

/// Compute backend an embedding model ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingBackendKind {
    Gpu,
    Cpu,
}

impl std::fmt::Display for EmbeddingBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Gpu => "wgpu",
            Self::Cpu => "ndarray",
        })
    }
}

static WGPU_INIT: OnceLock<()> = OnceLock::new();

pub(super) fn init_wgpu(device: &WgpuDevice) {
    WGPU_INIT.get_or_init(|| {
        #[cfg(target_os = "macos")]
        wgpu::init_setup::<Metal>(device, Default::default());
        #[cfg(not(target_os = "macos"))]
        wgpu::init_setup::<Vulkan>(device, Default::default());
    });
}

pub(super) fn init_cubecl_config() {
    static CUBECL_CONFIG: OnceLock<()> = OnceLock::new();
    CUBECL_CONFIG.get_or_init(|| {
        let mut config = cubecl_runtime::config::GlobalConfig::default();
        config.compilation.cache = Some(cubecl_runtime::config::cache::CacheConfig::Global);
        config.autotune.cache = cubecl_runtime::config::cache::CacheConfig::Global;
        let _ = std::panic::catch_unwind(|| cubecl_runtime::config::GlobalConfig::set(config));
    });
}
