use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::SampleFormat;
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
    io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::debug;

use crate::error::AudioError;

/// Raw decoded audio in interleaved `f32` samples.
pub(super) struct DecodedAudio {
    pub(super) samples: Vec<f32>,
    pub(super) sample_rate: u32,
    pub(super) channels: u16,
}

/// Decode audio into interleaved samples, preferring hound for WAV files.
pub(super) fn decode_audio(
    path: &Path,
    max_seconds: Option<f32>,
) -> Result<DecodedAudio, AudioError> {
    let is_wav = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        match decode_with_hound(path, max_seconds) {
            Ok(decoded) => return Ok(decoded),
            Err(err) => debug!("hound rejected {}: {err}; trying symphonia", path.display()),
        }
    }
    decode_with_symphonia(path, max_seconds)
}

fn sample_limit(max_seconds: Option<f32>, sample_rate: u32, channels: u16) -> Option<usize> {
    max_seconds
        .filter(|limit| limit.is_finite() && *limit > 0.0)
        .map(|limit| {
            let frames = (limit * sample_rate as f32).ceil().max(1.0);
            (frames as usize).saturating_mul(channels as usize).max(1)
        })
}

fn decode_with_hound(path: &Path, max_seconds: Option<f32>) -> Result<DecodedAudio, hound::Error> {
    let file = File::open(path)?;
    let mut reader = hound::WavReader::new(BufReader::new(file))?;
    let spec = reader.spec();
    let sample_rate = spec.sample_rate.max(1);
    let channels = spec.channels.max(1);
    let limit = sample_limit(max_seconds, sample_rate, channels).unwrap_or(usize::MAX);
    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .take(limit)
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << spec.bits_per_sample.saturating_sub(1)).max(1) as f32;
            reader
                .samples::<i32>()
                .take(limit)
                .map(|s| s.map(|value| value as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn decode_with_symphonia(
    path: &Path,
    max_seconds: Option<f32>,
) -> Result<DecodedAudio, AudioError> {
    let decode_err = |message: String| AudioError::Decode {
        path: path.to_path_buf(),
        message,
    };
    let file = File::open(path).map_err(|source| AudioError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| decode_err(format!("probe failed: {err}")))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| decode_err("no default track".into()))?;
    let codec_params = &track.codec_params;
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| decode_err("missing sample rate".into()))?
        .max(1);
    let channels = codec_params
        .channels
        .ok_or_else(|| decode_err("missing channel count".into()))?
        .count()
        .max(1) as u16;
    let max_samples = sample_limit(max_seconds, sample_rate, channels);

    let mut decoder = symphonia::default::get_codecs()
        .make(codec_params, &DecoderOptions::default())
        .map_err(|err| decode_err(format!("no decoder: {err}")))?;

    let mut samples = Vec::new();
    loop {
        if max_samples.is_some_and(|limit| samples.len() >= limit) {
            break;
        }
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break,
            Err(err) => return Err(decode_err(format!("packet read failed: {err}"))),
        };
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(Error::DecodeError(_)) => continue,
            Err(err) => return Err(decode_err(format!("decode failed: {err}"))),
        };
        let spec = *audio_buf.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
    }
    if let Some(limit) = max_samples {
        samples.truncate(limit);
    }

    if samples.is_empty() {
        return Err(AudioError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
