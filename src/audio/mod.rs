//! Decoding of corpus and query clips into mono `f32` waveforms.

mod decode;
mod mono;
mod resample;

use std::path::Path;

use crate::error::AudioError;

pub use mono::rms;
pub(crate) use mono::sanitize_sample;
pub use resample::resample_linear;

/// File extensions the decoder accepts (matched case-insensitively).
pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 5] = ["wav", "aif", "aiff", "flac", "mp3"];

/// Return true when the path has a supported audio extension.
pub fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// A mono waveform with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Decode a file to a mono waveform at its native sample rate.
///
/// At most `max_seconds` of audio is decoded when a positive limit is given.
/// Non-finite samples are zeroed and values are clamped to `[-1, 1]`.
pub fn load_mono(path: &Path, max_seconds: Option<f32>) -> Result<Waveform, AudioError> {
    let decoded = decode::decode_audio(path, max_seconds)?;
    let mut mono = Vec::new();
    mono::downmix_to_mono_into(&mut mono, &decoded.samples, decoded.channels);
    if mono.is_empty() {
        return Err(AudioError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(Waveform::new(mono, decoded.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_wav(path: &Path, spec: WavSpec, frames: usize, value: f32) {
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..frames * spec.channels as usize {
            match spec.sample_format {
                SampleFormat::Float => writer.write_sample(value).unwrap(),
                SampleFormat::Int => writer
                    .write_sample((value * i16::MAX as f32) as i16)
                    .unwrap(),
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn supported_extensions_ignore_case() {
        assert!(is_supported_audio(Path::new("kick.WAV")));
        assert!(is_supported_audio(Path::new("dir/snare.aiff")));
        assert!(is_supported_audio(Path::new("loop.Mp3")));
        assert!(!is_supported_audio(Path::new("notes.txt")));
        assert!(!is_supported_audio(Path::new("no_extension")));
    }

    #[test]
    fn stereo_float_wav_downmixes_to_mono() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        write_wav(&path, spec, 2_205, 0.5);
        let wave = load_mono(&path, None).unwrap();
        assert_eq!(wave.sample_rate, 22_050);
        assert_eq!(wave.samples.len(), 2_205);
        assert!(wave.samples.iter().all(|s| (s - 0.5).abs() < 1e-6));
        assert!((wave.duration_seconds() - 0.1).abs() < 1e-4);
    }

    #[test]
    fn max_seconds_caps_decoded_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, 16_000, 0.25);
        let wave = load_mono(&path, Some(0.5)).unwrap();
        assert_eq!(wave.samples.len(), 4_000);
        assert!((wave.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn zero_byte_file_fails_to_decode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();
        assert!(load_mono(&path, None).is_err());
    }

    #[test]
    fn missing_file_reports_open_error() {
        let dir = TempDir::new().unwrap();
        let err = load_mono(&dir.path().join("absent.flac"), None).unwrap_err();
        assert!(matches!(err, AudioError::Open { .. }));
    }
}
