use std::f32::consts::PI;
use std::path::Path;

pub const TEST_SAMPLE_RATE: u32 = 22_050;

pub fn write_test_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create wav parent dirs");
    }
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav writer");
    for &sample in samples {
        writer.write_sample(sample).expect("write wav sample");
    }
    writer.finalize().expect("finalize wav");
}

pub fn sine(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let frames = (sample_rate as f32 * seconds) as usize;
    (0..frames)
        .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
        .collect()
}

pub fn write_sine(path: &Path, freq: f32, seconds: f32) {
    write_test_wav(path, &sine(freq, seconds, TEST_SAMPLE_RATE), TEST_SAMPLE_RATE);
}
