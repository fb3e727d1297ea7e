use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::time::Instant;

use ndarray::Array2;
use tracing::{Span, debug, info, info_span, warn};

use super::{Index, NormalizationParams, NormalizationScheme, index_dir_name, storage};
use crate::analysis::{ExtractionMethod, Extractor, FeatureVector};
use crate::audio;
use crate::config::AppSettings;
use crate::error::{BuildError, IndexError};
use crate::logging::FILE_TIMING_TARGET;

/// Environment override for the build worker count.
pub const WORKERS_ENV: &str = "SAMPLEFIND_WORKERS";

/// Tunables for one build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildOptions {
    pub normalization: NormalizationScheme,
    /// 0 picks a count from the environment or the machine.
    pub worker_count: usize,
    /// Decoded clips shorter than this are rejected.
    pub min_duration_seconds: f32,
    /// Decoded clips quieter than this RMS are rejected.
    pub min_rms: f32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            normalization: NormalizationScheme::MinMax,
            worker_count: 0,
            min_duration_seconds: 0.0,
            min_rms: 0.0,
        }
    }
}

impl BuildOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            normalization: settings.index.normalization,
            worker_count: settings.index.worker_count as usize,
            min_duration_seconds: settings.analysis.min_duration_seconds,
            min_rms: settings.analysis.min_rms,
        }
    }

    fn resolved_workers(&self, jobs: usize) -> usize {
        let requested = if self.worker_count > 0 {
            self.worker_count
        } else {
            workers_from_env().unwrap_or_else(default_worker_count)
        };
        requested.min(jobs).max(1)
    }
}

fn workers_from_env() -> Option<usize> {
    std::env::var(WORKERS_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|count| *count > 0)
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

/// Counts and per-file reasons from one build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildReport {
    pub method: ExtractionMethod,
    /// Supported files found in the corpus.
    pub attempted: usize,
    pub indexed: usize,
    /// Files that failed to decode or produced a non-finite vector.
    pub failed: usize,
    /// Files that decoded but fell below the validity thresholds.
    pub rejected: usize,
    pub failures: Vec<(String, String)>,
    pub rejections: Vec<(String, String)>,
}

impl BuildReport {
    fn new(method: ExtractionMethod, attempted: usize) -> Self {
        Self {
            method,
            attempted,
            indexed: 0,
            failed: 0,
            rejected: 0,
            failures: Vec::new(),
            rejections: Vec::new(),
        }
    }
}

enum Outcome {
    Indexed(FeatureVector),
    Failed(String),
    Rejected(String),
}

/// Walk `root` recursively and return supported audio files as
/// `(identifier, path)` sorted by identifier.
///
/// Identifiers are paths relative to `root` with `/` separators.
pub fn enumerate_audio_files(root: &Path) -> Result<Vec<(String, PathBuf)>, BuildError> {
    if !root.is_dir() {
        return Err(BuildError::InvalidCorpus {
            path: root.to_path_buf(),
            reason: "not a directory".into(),
        });
    }
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| BuildError::InvalidCorpus {
            path: dir.clone(),
            reason: err.to_string(),
        })?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry in {}: {err}", dir.display());
                    continue;
                }
            };
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if audio::is_supported_audio(&path) {
                files.push((identifier_for(root, &path), path));
            }
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn identifier_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds one index from a corpus directory with one extractor.
#[derive(Clone, Debug)]
pub struct IndexBuilder {
    extractor: Extractor,
    options: BuildOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl IndexBuilder {
    pub fn new(extractor: Extractor, options: BuildOptions) -> Self {
        Self {
            extractor,
            options,
            cancel: None,
        }
    }

    /// Abort the build with [`BuildError::Canceled`] once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn method(&self) -> ExtractionMethod {
        self.extractor.method()
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Extract, filter and normalize every supported file under `audio_dir`.
    ///
    /// Nothing is written to disk.
    pub fn build(&self, audio_dir: &Path) -> Result<(Index, BuildReport), BuildError> {
        let files = enumerate_audio_files(audio_dir)?;
        let method = self.extractor.method();
        let mut report = BuildReport::new(method, files.len());
        if files.is_empty() {
            return Err(BuildError::NoUsableSamples { attempted: 0 });
        }
        let workers = self.options.resolved_workers(files.len());
        let span = info_span!("build", %method, corpus = %audio_dir.display());
        let _entered = span.enter();
        info!(
            "Building {method} index over {} files in {} with {workers} workers",
            files.len(),
            audio_dir.display()
        );
        let started = Instant::now();
        let slots = self.run_workers(&files, workers);
        if self.is_canceled() {
            info!("Index build over {} canceled", audio_dir.display());
            return Err(BuildError::Canceled);
        }

        let dim = self.extractor.dimension();
        let mut ids = Vec::new();
        let mut values = Vec::new();
        for ((id, _), slot) in files.into_iter().zip(slots) {
            match slot {
                Some(Outcome::Indexed(vector)) => {
                    values.extend_from_slice(vector.as_slice());
                    ids.push(id);
                }
                Some(Outcome::Rejected(reason)) => {
                    debug!("Rejected {id}: {reason}");
                    report.rejections.push((id, reason));
                }
                Some(Outcome::Failed(reason)) => {
                    warn!("Skipping {id}: {reason}");
                    report.failures.push((id, reason));
                }
                None => report.failures.push((id, "not processed".into())),
            }
        }
        report.indexed = ids.len();
        report.failed = report.failures.len();
        report.rejected = report.rejections.len();
        if ids.is_empty() {
            return Err(BuildError::NoUsableSamples {
                attempted: report.attempted,
            });
        }

        let mut vectors = Array2::from_shape_vec((ids.len(), dim), values)
            .map_err(|err| IndexError::corrupt(audio_dir, err.to_string()))?;
        let params = NormalizationParams::fit(self.options.normalization, vectors.view())?;
        params.apply_rows(&mut vectors)?;
        let index = Index::new(method, params, ids, vectors)?.with_corpus_root(audio_dir);
        info!(
            "Built {method} index: {} indexed, {} failed, {} rejected of {} in {:.2?}",
            report.indexed,
            report.failed,
            report.rejected,
            report.attempted,
            started.elapsed()
        );
        Ok((index, report))
    }

    /// Build and publish the index at `index_dir`, replacing any previous one.
    pub fn build_and_save(
        &self,
        audio_dir: &Path,
        index_dir: &Path,
    ) -> Result<(Index, BuildReport), BuildError> {
        let (index, report) = self.build(audio_dir)?;
        if self.is_canceled() {
            return Err(BuildError::Canceled);
        }
        storage::save(&index, index_dir)?;
        info!("Saved {} index to {}", index.method(), index_dir.display());
        Ok((index, report))
    }

    /// Load the index at `index_dir`, building and saving it only if absent.
    ///
    /// The report is `None` when an existing index was reused.
    pub fn ensure_index(
        &self,
        audio_dir: &Path,
        index_dir: &Path,
    ) -> Result<(Index, Option<BuildReport>), BuildError> {
        match storage::load_for_method(index_dir, self.method()) {
            Ok(index) => {
                info!("Reusing {} index at {}", index.method(), index_dir.display());
                Ok((index, None))
            }
            Err(IndexError::NotFound { .. }) => {
                let (index, report) = self.build_and_save(audio_dir, index_dir)?;
                Ok((index, Some(report)))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Process every file on a scoped pool. Slot `i` holds the outcome for
    /// `files[i]` regardless of completion order.
    fn run_workers(&self, files: &[(String, PathBuf)], workers: usize) -> Vec<Option<Outcome>> {
        let mut slots: Vec<Option<Outcome>> = Vec::with_capacity(files.len());
        slots.resize_with(files.len(), || None);
        let next = AtomicUsize::new(0);
        let (tx, rx) = channel::<(usize, Outcome)>();
        let parent = Span::current();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let span = parent.clone();
                scope.spawn(move || {
                    let _entered = span.enter();
                    loop {
                        if self.is_canceled() {
                            break;
                        }
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some((id, path)) = files.get(idx) else {
                            break;
                        };
                        let started = Instant::now();
                        let outcome = self.process(path);
                        debug!(
                            target: FILE_TIMING_TARGET,
                            "Processed {id} in {:.2?}",
                            started.elapsed()
                        );
                        if tx.send((idx, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            for (idx, outcome) in rx {
                slots[idx] = Some(outcome);
            }
        });
        slots
    }

    fn process(&self, path: &Path) -> Outcome {
        let waveform = match audio::load_mono(path, self.extractor.max_seconds()) {
            Ok(waveform) => waveform,
            Err(err) => return Outcome::Failed(err.to_string()),
        };
        let duration = waveform.duration_seconds();
        if duration < self.options.min_duration_seconds {
            return Outcome::Rejected(format!(
                "duration {duration:.3}s below {:.3}s",
                self.options.min_duration_seconds
            ));
        }
        let rms = waveform.rms();
        if rms < self.options.min_rms {
            return Outcome::Rejected(format!("rms {rms:.5} below {:.5}", self.options.min_rms));
        }
        match self.extractor.extract_waveform(&waveform) {
            Ok(vector) if vector.len() != self.extractor.dimension() => Outcome::Failed(format!(
                "extractor returned {} dims, expected {}",
                vector.len(),
                self.extractor.dimension()
            )),
            Ok(vector) if !vector.is_finite() => Outcome::Failed("non-finite features".into()),
            Ok(vector) => Outcome::Indexed(vector),
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }
}

/// Build one index per extraction method over the same corpus.
///
/// Indexes are published under `index_root` as `<corpus>_<method>`. The
/// embedding method needs model weights; a missing model aborts the run.
pub fn build_all_methods(
    audio_dir: &Path,
    index_root: &Path,
    settings: &AppSettings,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Vec<BuildReport>, BuildError> {
    build_methods(audio_dir, index_root, settings, &ExtractionMethod::ALL, cancel)
}

/// Build and publish an index for each of `methods`, in order.
///
/// Every extractor is prepared before the first build, so an unavailable
/// model fails the run without publishing anything.
pub fn build_methods(
    audio_dir: &Path,
    index_root: &Path,
    settings: &AppSettings,
    methods: &[ExtractionMethod],
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Vec<BuildReport>, BuildError> {
    let options = BuildOptions::from_settings(settings);
    let extractors = methods
        .iter()
        .map(|method| Extractor::from_settings(*method, settings))
        .collect::<Result<Vec<_>, _>>()?;
    let mut reports = Vec::with_capacity(extractors.len());
    for extractor in extractors {
        let method = extractor.method();
        let mut builder = IndexBuilder::new(extractor, options.clone());
        if let Some(flag) = cancel.as_ref() {
            builder = builder.with_cancel_flag(Arc::clone(flag));
        }
        let index_dir = index_root.join(index_dir_name(audio_dir, method));
        let (_, report) = builder.build_and_save(audio_dir, &index_dir)?;
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use tempfile::tempdir;

    fn write_tone(path: &Path, freq: f32, seconds: f32, amplitude: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (16_000.0 * seconds) as usize;
        for i in 0..frames {
            let value = (2.0 * PI * freq * i as f32 / 16_000.0).sin() * amplitude;
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn descriptor_builder(options: BuildOptions) -> IndexBuilder {
        IndexBuilder::new(
            Extractor::deterministic(ExtractionMethod::Descriptor).unwrap(),
            options,
        )
    }

    #[test]
    fn enumeration_is_recursive_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("kicks")).unwrap();
        fs::write(dir.path().join("b.WAV"), b"").unwrap();
        fs::write(dir.path().join("a.flac"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::write(dir.path().join("kicks").join("k1.aif"), b"").unwrap();
        let ids: Vec<String> = enumerate_audio_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a.flac", "b.WAV", "kicks/k1.aif"]);
    }

    #[test]
    fn missing_corpus_is_invalid() {
        let dir = tempdir().unwrap();
        let err = enumerate_audio_files(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, BuildError::InvalidCorpus { .. }));
    }

    #[test]
    fn build_keeps_sorted_order_with_many_workers() {
        let dir = tempdir().unwrap();
        for (i, freq) in [300.0, 500.0, 700.0, 900.0, 1100.0, 1300.0].iter().enumerate() {
            write_tone(&dir.path().join(format!("tone_{i}.wav")), *freq, 0.1, 0.5);
        }
        let builder = descriptor_builder(BuildOptions {
            worker_count: 4,
            ..BuildOptions::default()
        });
        let (index, report) = builder.build(dir.path()).unwrap();
        let expected: Vec<String> = (0..6).map(|i| format!("tone_{i}.wav")).collect();
        assert_eq!(index.ids(), expected.as_slice());
        assert_eq!((report.attempted, report.indexed, report.failed), (6, 6, 0));
        assert!(index.vectors().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn quiet_and_short_clips_are_rejected_not_failed() {
        let dir = tempdir().unwrap();
        write_tone(&dir.path().join("loud.wav"), 440.0, 0.5, 0.5);
        write_tone(&dir.path().join("quiet.wav"), 440.0, 0.5, 0.001);
        write_tone(&dir.path().join("short.wav"), 440.0, 0.05, 0.5);
        let builder = descriptor_builder(BuildOptions {
            min_duration_seconds: 0.1,
            min_rms: 0.01,
            ..BuildOptions::default()
        });
        let (index, report) = builder.build(dir.path()).unwrap();
        assert_eq!(index.ids(), ["loud.wav".to_string()]);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn all_failures_mean_no_usable_samples() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.wav"), b"not audio").unwrap();
        let err = descriptor_builder(BuildOptions::default())
            .build(dir.path())
            .unwrap_err();
        assert!(matches!(err, BuildError::NoUsableSamples { attempted: 1 }));
    }

    #[test]
    fn raised_cancel_flag_publishes_nothing() {
        let dir = tempdir().unwrap();
        write_tone(&dir.path().join("a.wav"), 440.0, 0.1, 0.5);
        let out = tempdir().unwrap();
        let target = out.path().join("idx");
        let flag = Arc::new(AtomicBool::new(true));
        let builder = descriptor_builder(BuildOptions::default()).with_cancel_flag(flag);
        let err = builder.build_and_save(dir.path(), &target).unwrap_err();
        assert!(matches!(err, BuildError::Canceled));
        assert!(!target.exists());
    }

    #[test]
    fn ensure_index_reuses_an_existing_artifact() {
        let dir = tempdir().unwrap();
        write_tone(&dir.path().join("a.wav"), 440.0, 0.1, 0.5);
        let out = tempdir().unwrap();
        let target = out.path().join("idx");
        let builder = descriptor_builder(BuildOptions::default());
        let (_, first) = builder.ensure_index(dir.path(), &target).unwrap();
        assert!(first.is_some());
        write_tone(&dir.path().join("b.wav"), 880.0, 0.1, 0.5);
        let (index, second) = builder.ensure_index(dir.path(), &target).unwrap();
        assert!(second.is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn explicit_worker_count_is_capped_by_jobs() {
        let options = BuildOptions {
            worker_count: 8,
            ..BuildOptions::default()
        };
        assert_eq!(options.resolved_workers(3), 3);
        assert_eq!(options.resolved_workers(0), 1);
    }

    #[test]
    fn all_methods_without_model_weights_publish_nothing() {
        let corpus = tempdir().unwrap();
        write_tone(&corpus.path().join("a.wav"), 220.0, 0.5, 0.5);
        write_tone(&corpus.path().join("b.wav"), 440.0, 0.5, 0.5);
        let out = tempdir().unwrap();
        let mut settings = AppSettings::default();
        settings.embedding.model_path = Some(out.path().join("absent.mpk"));

        let err = build_all_methods(corpus.path(), out.path(), &settings, None).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Extractor(crate::error::ExtractError::Model(_))
        ));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn deterministic_methods_publish_one_index_each() {
        let corpus = tempdir().unwrap();
        for (name, freq) in [("a.wav", 220.0), ("b.wav", 440.0), ("c.wav", 880.0)] {
            write_tone(&corpus.path().join(name), freq, 0.5, 0.5);
        }
        let out = tempdir().unwrap();
        let methods = [ExtractionMethod::Descriptor, ExtractionMethod::Enhanced];

        let reports =
            build_methods(corpus.path(), out.path(), &AppSettings::default(), &methods, None)
                .unwrap();
        assert_eq!(reports.len(), 2);
        for (report, method) in reports.iter().zip(methods) {
            assert_eq!(report.method, method);
            assert_eq!(report.indexed, 3);
            let dir = out.path().join(index_dir_name(corpus.path(), method));
            let index = storage::load_for_method(&dir, method).unwrap();
            assert_eq!(index.dimension(), method.dimension());
            assert_eq!(index.ids(), ["a.wav", "b.wav", "c.wav"]);
        }
    }
}
