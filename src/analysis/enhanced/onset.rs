/// Onset strength envelope: mean positive log-mel difference between frames.
///
/// Returns `(mean, max)`; both are 0 with fewer than two frames.
pub(super) fn onset_strength_stats(log_mel: &[Vec<f32>]) -> (f32, f32) {
    let envelope: Vec<f32> = log_mel
        .windows(2)
        .map(|pair| {
            let bands = pair[1].len().max(1) as f32;
            pair[1]
                .iter()
                .zip(&pair[0])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum::<f32>()
                / bands
        })
        .collect();
    if envelope.is_empty() {
        return (0.0, 0.0);
    }
    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    let max = envelope.iter().copied().fold(0.0_f32, f32::max);
    (mean, max)
}

/// Mean over frames of the summed squared magnitude differences.
pub(super) fn spectral_flux_mean(magnitudes: &[Vec<f32>]) -> f32 {
    let flux: Vec<f32> = magnitudes
        .windows(2)
        .map(|pair| {
            pair[1]
                .iter()
                .zip(&pair[0])
                .map(|(cur, prev)| (cur - prev) * (cur - prev))
                .sum::<f32>()
        })
        .collect();
    if flux.is_empty() {
        return 0.0;
    }
    flux.iter().sum::<f32>() / flux.len() as f32
}
