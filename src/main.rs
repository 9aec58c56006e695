// blueprint-ingest - diagnostic harness for the ingest engine
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use blueprint_ingest::{EngineConfig, IngestEngine, ParseResult, ProgressEvent, CONFIG_ENV_VAR};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ingest construction PDFs and report what was extracted")]
struct Args {
    /// PDF files, processed in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// TOML config file (defaults to $BLUEPRINT_INGEST_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pages per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Worker threads per batch
    #[arg(short, long)]
    workers: Option<usize>,

    /// Render page thumbnails
    #[arg(short, long)]
    thumbnails: bool,

    /// Collect annotation text
    #[arg(short, long)]
    annotations: bool,

    /// Write each result as <name>.json into this directory
    #[arg(long)]
    json_dir: Option<PathBuf>,

    /// Write thumbnails as PNG files into this directory (implies --thumbnails)
    #[arg(long)]
    thumbnail_dir: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Default)]
struct Summary {
    files: usize,
    failed: usize,
    pages: u64,
    pages_with_images: u64,
    pages_with_annotations: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let bar = if args.quiet { ProgressBar::hidden() } else { ProgressBar::new(100) };
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .context("invalid progress template")?
            .progress_chars("=>-"),
    );

    let config = load_config(&args, bar.clone())?;
    let collect_annotations = config.extract_annotations;
    let engine = IngestEngine::new(config).context("invalid engine configuration")?;

    for dir in [&args.json_dir, &args.thumbnail_dir].into_iter().flatten() {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let started = Instant::now();
    let mut summary = Summary::default();
    for file in &args.files {
        summary.files += 1;
        bar.reset();
        bar.set_prefix(file.display().to_string());
        bar.set_message("loading");

        match engine.ingest(file) {
            Ok(result) => {
                bar.finish_with_message(format!("{} pages in {} ms", result.total_pages, result.parse_time_ms));
                summary.pages += u64::from(result.total_pages);
                summary.pages_with_images += result.pages_with_images() as u64;
                summary.pages_with_annotations += result.pages_with_annotations() as u64;
                if let Err(e) = write_outputs(&args, file, &result) {
                    error!("error writing output for {}: {e:#}", file.display());
                }
            }
            Err(e) => {
                bar.abandon_with_message("failed");
                summary.failed += 1;
                error!("error parsing {}: {e}", file.display());
            }
        }
    }

    print_summary(&summary, started.elapsed().as_secs_f64(), collect_annotations);
    if summary.failed > 0 {
        bail!("{} of {} files failed", summary.failed, summary.files);
    }
    Ok(())
}

fn load_config(args: &Args, bar: ProgressBar) -> Result<EngineConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    let mut config = match path {
        Some(path) => {
            info!("using config {}", path.display());
            EngineConfig::from_toml_file(&path)?
        }
        None => EngineConfig::default(),
    };

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.generate_thumbnails |= args.thumbnails || args.thumbnail_dir.is_some();
    config.extract_annotations |= args.annotations;
    config.progress_sink = Some(Arc::new(move |event: &ProgressEvent| {
        bar.set_position(u64::from(event.percent));
        bar.set_message(event.message.clone());
    }));
    Ok(config)
}

fn write_outputs(args: &Args, file: &Path, result: &ParseResult) -> Result<()> {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    if let Some(dir) = &args.json_dir {
        let path = dir.join(format!("{stem}.json"));
        let json = serde_json::to_vec_pretty(result)?;
        fs::write(&path, json).with_context(|| format!("cannot write {}", path.display()))?;
        info!("wrote {}", path.display());
    }

    if let (Some(dir), Some(thumbnails)) = (&args.thumbnail_dir, &result.thumbnails) {
        for thumbnail in thumbnails {
            let path = dir.join(format!("{stem}-p{:04}.png", thumbnail.page_number));
            fs::write(&path, &thumbnail.png).with_context(|| format!("cannot write {}", path.display()))?;
        }
        info!("wrote {} thumbnails to {}", thumbnails.len(), dir.display());
    }
    Ok(())
}

fn print_summary(summary: &Summary, seconds: f64, annotations: bool) {
    let fraction = |n: u64| {
        if summary.pages == 0 {
            0.0
        } else {
            n as f64 / summary.pages as f64 * 100.0
        }
    };
    println!();
    println!("Files:            {} ({} failed)", summary.files, summary.failed);
    println!("Pages:            {}", summary.pages);
    println!("Elapsed:          {seconds:.2}s");
    if seconds > 0.0 {
        println!("Throughput:       {:.1} pages/sec", summary.pages as f64 / seconds);
    }
    println!("Pages w/ images:  {:.1}%", fraction(summary.pages_with_images));
    if annotations {
        println!("Pages w/ markup:  {:.1}%", fraction(summary.pages_with_annotations));
    }
}
