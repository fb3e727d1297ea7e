//! Build (or reuse) similarity indexes for a directory of audio samples.

use std::path::PathBuf;

use samplefind::config::{self, AppSettings};
use samplefind::index::{self, BuildReport, IndexBuilder, build_all_methods, build_methods};
use samplefind::{BuildOptions, ExtractionMethod, Extractor, NormalizationScheme};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

struct Options {
    corpus: PathBuf,
    methods: Vec<ExtractionMethod>,
    all: bool,
    rebuild: bool,
    timings: bool,
    index_root: Option<PathBuf>,
    config_path: Option<PathBuf>,
    workers: Option<u32>,
    normalization: Option<NormalizationScheme>,
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let mut settings = match options.config_path.as_deref() {
        Some(path) => config::load_from_path(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    if options.timings {
        settings.logging.file_timings = true;
    }
    if let Err(err) = samplefind::logging::init(&settings.logging) {
        eprintln!("Logging disabled: {err}");
    }
    apply_overrides(&mut settings, &options);

    let index_root = match settings.index.root.clone() {
        Some(root) => root,
        None => samplefind::app_dirs::indexes_dir().map_err(|err| err.to_string())?,
    };

    if options.rebuild {
        let reports = if options.all {
            build_all_methods(&options.corpus, &index_root, &settings, None)
        } else {
            build_methods(&options.corpus, &index_root, &settings, &options.methods, None)
        }
        .map_err(|err| err.to_string())?;
        for report in &reports {
            print_report(report);
        }
        return Ok(());
    }

    let build_options = BuildOptions::from_settings(&settings);
    for method in &options.methods {
        let extractor =
            Extractor::from_settings(*method, &settings).map_err(|err| err.to_string())?;
        let builder = IndexBuilder::new(extractor, build_options.clone());
        let index_dir = index_root.join(index::index_dir_name(&options.corpus, *method));
        let (index, report) = builder
            .ensure_index(&options.corpus, &index_dir)
            .map_err(|err| err.to_string())?;
        match report {
            Some(report) => print_report(&report),
            None => println!(
                "{method}: reused {} entries at {}",
                index.len(),
                index_dir.display()
            ),
        }
    }
    Ok(())
}

fn apply_overrides(settings: &mut AppSettings, options: &Options) {
    if let Some(root) = options.index_root.clone() {
        settings.index.root = Some(root);
    }
    if let Some(workers) = options.workers {
        settings.index.worker_count = workers;
    }
    if let Some(scheme) = options.normalization {
        settings.index.normalization = scheme;
    }
}

fn print_report(report: &BuildReport) {
    println!(
        "{}: {} indexed, {} failed, {} rejected of {} files",
        report.method, report.indexed, report.failed, report.rejected, report.attempted
    );
    for (id, reason) in &report.failures {
        println!("  failed   {id}: {reason}");
    }
    for (id, reason) in &report.rejections {
        println!("  rejected {id}: {reason}");
    }
}

fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(None);
    }
    let mut corpus = None;
    let mut methods = Vec::new();
    let mut all = false;
    let mut rebuild = false;
    let mut timings = false;
    let mut index_root = None;
    let mut config_path = None;
    let mut workers = None;
    let mut normalization = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--method" | "-m" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --method".to_string())?;
                methods.push(value.parse::<ExtractionMethod>()?);
            }
            "--all" => all = true,
            "--rebuild" => rebuild = true,
            "--timings" => timings = true,
            "--index-root" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --index-root".to_string())?;
                index_root = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --config".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            "--workers" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --workers".to_string())?;
                workers = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| format!("Invalid --workers value: {value}"))?,
                );
            }
            "--normalization" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --normalization".to_string())?;
                normalization = Some(value.parse::<NormalizationScheme>()?);
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown argument: {flag}")),
            _ => {
                if corpus.is_some() {
                    return Err(format!("Unexpected argument: {arg}"));
                }
                corpus = Some(PathBuf::from(arg));
            }
        }
    }
    let corpus = corpus.ok_or_else(|| "Missing corpus directory (see --help)".to_string())?;
    if all {
        methods = ExtractionMethod::ALL.to_vec();
    } else if methods.is_empty() {
        methods.push(ExtractionMethod::Descriptor);
    }
    Ok(Some(Options {
        corpus,
        methods,
        all,
        rebuild,
        timings,
        index_root,
        config_path,
        workers,
        normalization,
    }))
}

fn print_help() {
    println!("Usage: samplefind-index <corpus-dir> [options]");
    println!();
    println!("Options:");
    println!("  -m, --method <name>       descriptor, enhanced or embedding (repeatable, default descriptor)");
    println!("  --all                     Build one index per method");
    println!("  --rebuild                 Replace existing indexes instead of reusing them");
    println!("  --timings                 Log per-file extraction times");
    println!("  --index-root <dir>        Directory holding index folders");
    println!("  --config <path>           Settings file (defaults to the data dir config.toml)");
    println!("  --workers <n>             Extraction workers (0 = auto)");
    println!("  --normalization <scheme>  minmax or zscore");
}
