pub(super) const MAX_WORKER_COUNT: u32 = 64;

pub(super) fn clamp_worker_count(value: u32) -> u32 {
    value.min(MAX_WORKER_COUNT)
}

pub(super) fn default_worker_count() -> u32 {
    0
}

pub(super) fn default_hierarchical_candidates() -> usize {
    crate::index::DEFAULT_HIERARCHICAL_CANDIDATES
}

pub(super) fn default_max_analysis_seconds() -> f32 {
    30.0
}

pub(super) fn default_min_duration_seconds() -> f32 {
    0.0
}

pub(super) fn default_min_rms() -> f32 {
    0.0
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_log_to_file() -> bool {
    true
}

pub(super) fn default_max_log_files() -> usize {
    10
}
