//! Query a corpus index with an audio clip and print the closest samples.

use std::path::PathBuf;

use samplefind::config;
use samplefind::{ExtractionMethod, IndexCatalog, QueryInput};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

struct Options {
    corpus: PathBuf,
    clip: PathBuf,
    k: usize,
    method: ExtractionMethod,
    coarse: Option<ExtractionMethod>,
    candidates: Option<usize>,
    index_root: Option<PathBuf>,
    config_path: Option<PathBuf>,
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
    if let Err(err) = samplefind::logging::init(&settings.logging) {
        eprintln!("Logging disabled: {err}");
    }
    if let Some(root) = options.index_root.clone() {
        settings.index.root = Some(root);
    }
    if let Some(candidates) = options.candidates {
        settings.index.hierarchical_candidates = candidates.max(1);
    }

    let mut catalog =
        IndexCatalog::for_corpus(&options.corpus, settings).map_err(|err| err.to_string())?;
    let input = QueryInput::Path(&options.clip);
    let result = match options.coarse {
        Some(coarse) => catalog.hierarchical_query(coarse, options.method, input, options.k),
        None => catalog.query(options.method, input, options.k),
    }
    .map_err(|err| err.to_string())?;

    if result.is_empty() {
        println!("No matches.");
    }
    for (rank, neighbor) in result.iter().enumerate() {
        println!("{:>3}. {:>10.4}  {}", rank + 1, neighbor.distance, neighbor.id);
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(None);
    }
    let mut positional = Vec::new();
    let mut k = 10usize;
    let mut method = ExtractionMethod::Descriptor;
    let mut coarse = None;
    let mut candidates = None;
    let mut index_root = None;
    let mut config_path = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-k" => {
                let value = it.next().ok_or_else(|| "Missing value for -k".to_string())?;
                k = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid -k value: {value}"))?;
            }
            "--method" | "-m" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --method".to_string())?;
                method = value.parse::<ExtractionMethod>()?;
            }
            "--hierarchical" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --hierarchical".to_string())?;
                coarse = Some(value.parse::<ExtractionMethod>()?);
            }
            "--candidates" => {
                let value = it
                    .next()
                    .ok_or_else(|| "Missing value for --candidates".to_string())?;
                candidates = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --candidates value: {value}"))?,
                );
            }
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
            flag if flag.starts_with('-') => return Err(format!("Unknown argument: {flag}")),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let [corpus, clip]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| "Expected <corpus-dir> <clip> (see --help)".to_string())?;
    Ok(Some(Options {
        corpus,
        clip,
        k,
        method,
        coarse,
        candidates,
        index_root,
        config_path,
    }))
}

fn print_help() {
    println!("Usage: samplefind-query <corpus-dir> <clip> [options]");
    println!();
    println!("Options:");
    println!("  -k <n>                    Number of results (default 10)");
    println!("  -m, --method <name>       Ranking method (default descriptor)");
    println!("  --hierarchical <name>     Narrow candidates with this method first");
    println!("  --candidates <n>          Stage-one candidate count for --hierarchical");
    println!("  --index-root <dir>        Directory holding index folders");
    println!("  --config <path>           Settings file (defaults to the data dir config.toml)");
}
