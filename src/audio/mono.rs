/// Downmix interleaved samples by averaging channels, sanitizing each sample.
pub(super) fn downmix_to_mono_into(out: &mut Vec<f32>, samples: &[f32], channels: u16) {
    let channels = channels.max(1) as usize;
    out.clear();
    if channels == 1 {
        out.extend(samples.iter().copied().map(sanitize_sample));
        return;
    }
    let frames = samples.len() / channels;
    out.reserve(frames);
    for frame in samples.chunks_exact(channels) {
        let sum: f32 = frame.iter().copied().map(sanitize_sample).sum();
        out.push(sum / channels as f32);
    }
}

/// Zero non-finite and subnormal samples and clamp to `[-1, 1]`.
pub(crate) fn sanitize_sample(sample: f32) -> f32 {
    if !sample.is_finite() {
        return 0.0;
    }
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped != 0.0 && clamped.abs() < f32::MIN_POSITIVE {
        0.0
    } else {
        clamped
    }
}

/// Root-mean-square level of a buffer; 0 for an empty buffer.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames_and_drops_partial_tail() {
        let mut out = Vec::new();
        downmix_to_mono_into(&mut out, &[1.0, 0.0, 0.5, 0.5, 0.25], 2);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn sanitize_handles_non_finite_and_out_of_range() {
        assert_eq!(sanitize_sample(f32::NAN), 0.0);
        assert_eq!(sanitize_sample(f32::INFINITY), 0.0);
        assert_eq!(sanitize_sample(2.0), 1.0);
        assert_eq!(sanitize_sample(-3.0), -1.0);
        assert_eq!(sanitize_sample(f32::MIN_POSITIVE / 2.0), 0.0);
    }

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.5, 0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }
}
