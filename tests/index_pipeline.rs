mod support;

use std::path::Path;

use support::wav::{TEST_SAMPLE_RATE, sine, write_sine};

use samplefind::index::{index_dir_name, storage};
use samplefind::{
    BuildError, BuildOptions, ExtractionMethod, Extractor, IndexBuilder, NormalizationScheme,
    QueryInput, SimilarityEngine,
};
use tempfile::TempDir;

fn sine_corpus(freqs: &[f32]) -> TempDir {
    let dir = tempfile::tempdir().expect("create corpus dir");
    for freq in freqs {
        write_sine(&dir.path().join(format!("sine_{freq}.wav")), *freq, 0.5);
    }
    dir
}

fn builder(method: ExtractionMethod) -> IndexBuilder {
    IndexBuilder::new(
        Extractor::deterministic(method).expect("deterministic extractor"),
        BuildOptions::default(),
    )
}

fn engine_for(corpus: &Path, method: ExtractionMethod) -> SimilarityEngine {
    let builder = builder(method);
    let (index, _) = builder.build(corpus).expect("build index");
    SimilarityEngine::with_index(builder.extractor().clone(), index).expect("engine")
}

#[test]
fn matching_sine_ranks_first_with_zero_distance() {
    let corpus = sine_corpus(&[220.0, 440.0, 880.0]);
    let engine = engine_for(corpus.path(), ExtractionMethod::Descriptor);

    let query_dir = tempfile::tempdir().expect("create query dir");
    let clip = query_dir.path().join("query.wav");
    write_sine(&clip, 440.0, 0.5);

    let result = engine.query(QueryInput::Path(&clip), 3).expect("query");
    assert_eq!(result.len(), 3);
    assert_eq!(result.neighbors[0].id, "sine_440.wav");
    assert!(result.neighbors[0].distance < 1e-4);
    assert!(result.neighbors[1].distance > result.neighbors[0].distance);
}

#[test]
fn corrupt_file_is_counted_and_left_out() {
    let corpus = sine_corpus(&[220.0, 440.0, 880.0]);
    std::fs::write(corpus.path().join("broken.wav"), b"").expect("write empty file");
    let out = tempfile::tempdir().expect("create index root");
    let index_dir = out.path().join(index_dir_name(corpus.path(), ExtractionMethod::Descriptor));

    let (_, report) = builder(ExtractionMethod::Descriptor)
        .build_and_save(corpus.path(), &index_dir)
        .expect("build and save");
    assert_eq!(report.attempted, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].0, "broken.wav");

    let loaded = storage::load(&index_dir).expect("load index");
    assert_eq!(loaded.len(), 3);
    assert!(loaded.position("broken.wav").is_none());
}

#[test]
fn k_larger_than_corpus_returns_every_entry() {
    let corpus = sine_corpus(&[200.0, 300.0, 400.0, 500.0, 600.0]);
    let engine = engine_for(corpus.path(), ExtractionMethod::Descriptor);
    let samples = sine(350.0, 0.5, TEST_SAMPLE_RATE);
    let input = QueryInput::Waveform {
        samples: &samples,
        sample_rate: TEST_SAMPLE_RATE,
    };
    let result = engine.query(input, 10).expect("query");
    assert_eq!(result.len(), 5);
    assert!(
        result
            .neighbors
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance)
    );
}

#[test]
fn persisted_index_answers_like_the_built_one() {
    let corpus = sine_corpus(&[220.0, 440.0, 660.0, 880.0]);
    let out = tempfile::tempdir().expect("create index root");
    let index_dir = out.path().join("kit_enhanced");
    let builder = builder(ExtractionMethod::Enhanced);
    let (built, _) = builder
        .build_and_save(corpus.path(), &index_dir)
        .expect("build and save");

    let loaded = storage::load(&index_dir).expect("load index");
    assert_eq!(loaded.ids(), built.ids());
    assert_eq!(loaded.dimension(), 48);
    for (a, b) in loaded.vectors().iter().zip(built.vectors().iter()) {
        assert!((a - b).abs() < 1e-6);
    }

    let engine = SimilarityEngine::load(builder.extractor().clone(), &index_dir).expect("load engine");
    let samples = sine(440.0, 0.5, TEST_SAMPLE_RATE);
    let input = QueryInput::Waveform {
        samples: &samples,
        sample_rate: TEST_SAMPLE_RATE,
    };
    let first = engine.query(input, 4).expect("first query");
    let second = engine.query(input, 4).expect("second query");
    assert_eq!(first, second);
    assert_eq!(first.neighbors[0].id, "sine_440.wav");
}

#[test]
fn min_max_index_stays_in_unit_range_and_zscore_is_centered() {
    let corpus = sine_corpus(&[150.0, 300.0, 450.0, 900.0, 1800.0]);
    let (minmax, _) = builder(ExtractionMethod::Descriptor)
        .build(corpus.path())
        .expect("minmax build");
    assert!(minmax.vectors().iter().all(|v| (0.0..=1.0).contains(v)));

    let zscore_builder = IndexBuilder::new(
        Extractor::deterministic(ExtractionMethod::Descriptor).expect("extractor"),
        BuildOptions {
            normalization: NormalizationScheme::ZScore,
            ..BuildOptions::default()
        },
    );
    let (zscore, _) = zscore_builder.build(corpus.path()).expect("zscore build");
    assert_eq!(zscore.params().scheme(), NormalizationScheme::ZScore);
    for column in zscore.vectors().columns() {
        let mean = column.sum() / column.len() as f32;
        assert!(mean.abs() < 1e-4);
    }
}

#[test]
fn empty_corpus_has_no_usable_samples() {
    let corpus = tempfile::tempdir().expect("create corpus dir");
    std::fs::write(corpus.path().join("readme.txt"), b"no audio here").expect("write file");
    let err = builder(ExtractionMethod::Descriptor)
        .build(corpus.path())
        .expect_err("nothing to index");
    assert!(matches!(err, BuildError::NoUsableSamples { attempted: 0 }));
}

#[test]
fn missing_index_is_reported_not_rebuilt() {
    let out = tempfile::tempdir().expect("create index root");
    let extractor = Extractor::deterministic(ExtractionMethod::Descriptor).expect("extractor");
    let err = SimilarityEngine::load(extractor, &out.path().join("kit_descriptor"))
        .err()
        .expect("load must fail");
    assert!(matches!(
        err,
        samplefind::QueryError::Index(samplefind::IndexError::NotFound { .. })
    ));
    assert!(!out.path().join("kit_descriptor").exists());
}
