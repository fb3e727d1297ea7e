use crate::analysis::mel::MelBank;
use crate::analysis::spectrum::Stft;
use crate::audio::{resample_linear, sanitize_sample};

/// Sample rate the embedding network expects.
pub(crate) const EMBEDDING_SAMPLE_RATE: u32 = 32_000;
pub(crate) const MEL_BANDS: usize = 64;
const N_FFT: usize = 1_024;
const HOP: usize = 320;
const MEL_FMIN_HZ: f32 = 50.0;
const MEL_FMAX_HZ: f32 = 14_000.0;
const MIN_SECONDS: f32 = 1.0;
const MAX_SECONDS: f32 = 10.0;

/// Waveform to log-mel conversion for the embedding network.
pub(crate) struct LogMelFrontend {
    stft: Stft,
    mel: MelBank,
}

/// Row-major `[frames, MEL_BANDS]` log-mel spectrogram.
pub(crate) struct LogMel {
    pub(crate) values: Vec<f32>,
    pub(crate) frames: usize,
}

impl LogMelFrontend {
    pub(crate) fn new() -> Self {
        Self {
            stft: Stft::new(N_FFT, HOP),
            mel: MelBank::new(EMBEDDING_SAMPLE_RATE, N_FFT, MEL_BANDS, MEL_FMIN_HZ, MEL_FMAX_HZ),
        }
    }

    pub(crate) fn log_mel(&self, samples: &[f32], sample_rate: u32) -> LogMel {
        let wave = prepare_waveform(samples, sample_rate);
        let frames = self.stft.power(&wave);
        let mut values = Vec::with_capacity(frames.len() * MEL_BANDS);
        for frame in &frames {
            values.extend(self.mel.log_mel_from_power(frame));
        }
        LogMel {
            values,
            frames: frames.len(),
        }
    }
}

/// Resample to the model rate, then repeat-pad short clips and truncate long ones.
fn prepare_waveform(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut wave = resample_linear(samples, sample_rate, EMBEDDING_SAMPLE_RATE);
    for sample in &mut wave {
        *sample = sanitize_sample(*sample);
    }
    let min_len = (EMBEDDING_SAMPLE_RATE as f32 * MIN_SECONDS) as usize;
    let max_len = (EMBEDDING_SAMPLE_RATE as f32 * MAX_SECONDS) as usize;
    if wave.len() < min_len {
        let mut padded = Vec::new();
        repeat_pad_into(&mut padded, &wave, min_len);
        return padded;
    }
    wave.truncate(max_len);
    wave
}

/// Repeat `samples` until `target_len` values are filled (zeros if empty).
pub(crate) fn repeat_pad_into(out: &mut Vec<f32>, samples: &[f32], target_len: usize) {
    out.clear();
    out.resize(target_len, 0.0);
    if samples.is_empty() {
        return;
    }
    for (slot, &sample) in out.iter_mut().zip(samples.iter().cycle()) {
        *slot = sample;
    }
}
