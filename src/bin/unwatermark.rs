use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use unwatermark::{
    BatchProcessor, ItemStatus, OutputFormat, OutputSpec, RunSummary, SourceFile,
    WatermarkEngine, DEFAULT_ASSET_DIR,
};

#[derive(Parser)]
#[command(
    name = "unwatermark",
    about = "Remove semi-transparent logo watermarks via reverse alpha blending",
    version,
    after_help = "Processes up to 10 PNG/JPEG/WebP images per batch, entirely offline.\n\
                  Reference captures bg_48.png and bg_96.png must exist in the assets directory."
)]
struct Cli {
    /// Input image files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Output format: png, jpeg or webp
    #[arg(short, long, default_value = "png")]
    format: OutputFormat,

    /// Output quality (0.0-1.0)
    #[arg(long, default_value = "1.0")]
    quality: f32,

    /// Re-run the batch at this quality after the first pass
    #[arg(long)]
    requality: Option<f32>,

    /// Write one ZIP archive instead of individual files
    #[arg(long)]
    zip: bool,

    /// Directory holding the reference captures
    #[arg(long, env = "UNWATERMARK_ASSETS", default_value = DEFAULT_ASSET_DIR)]
    assets: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "unwatermark=debug"
    } else if cli.quiet {
        "unwatermark=warn"
    } else {
        "unwatermark=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    for q in std::iter::once(cli.quality).chain(cli.requality) {
        if !(0.0..=1.0).contains(&q) {
            eprintln!("Error: Quality must be between 0.0 and 1.0");
            process::exit(1);
        }
    }

    let mut files = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        match SourceFile::from_path(path) {
            Ok(file) => files.push(file),
            Err(e) => {
                eprintln!("Error: Cannot read {}: {e}", path.display());
                process::exit(1);
            }
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal: Failed to start runtime: {e}");
            process::exit(1);
        }
    };

    let engine = Arc::new(WatermarkEngine::new(&cli.assets));
    let processor = BatchProcessor::new(engine);

    let mut summary = match runtime.block_on(processor.process(
        files,
        OutputSpec::new(cli.format, cli.quality),
    )) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    if let Some(quality) = cli.requality {
        if !cli.quiet {
            eprintln!("Reprocessing at quality {quality:.2}");
        }
        summary = match runtime.block_on(processor.run(OutputSpec::new(cli.format, quality))) {
            Ok(summary) => summary,
            Err(e) => {
                eprintln!("Fatal: {e}");
                process::exit(1);
            }
        };
    }

    if let Err(e) = save_outputs(&processor, &cli.output, cli.zip, cli.quiet) {
        eprintln!("Error: Failed to write output: {e}");
        process::exit(1);
    }

    print_summary(&processor, &summary, cli.quiet);

    if summary.failed > 0 {
        process::exit(1);
    }
}

fn save_outputs(
    processor: &BatchProcessor,
    dir: &Path,
    zip: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;

    if zip {
        match processor.archive() {
            Some(archive) => {
                let path = dir.join(&archive.name);
                std::fs::write(&path, archive.to_zip()?)?;
                if !quiet {
                    eprintln!(
                        "Wrote {} ({} images)",
                        path.display(),
                        archive.entries.len()
                    );
                }
            }
            None => eprintln!("Nothing to archive: no image was processed successfully"),
        }
        return Ok(());
    }

    for item in processor.items() {
        if let Some(download) = processor.output(item.index) {
            std::fs::write(dir.join(&download.filename), &download.bytes)?;
        }
    }
    Ok(())
}

fn print_summary(processor: &BatchProcessor, summary: &RunSummary, quiet: bool) {
    for item in processor.items() {
        match item.status {
            ItemStatus::Completed => {
                if !quiet {
                    let target = item.output_filename.unwrap_or_default();
                    eprintln!("[OK] {} -> {target}", item.name);
                }
            }
            ItemStatus::Error => {
                eprintln!(
                    "[FAIL] {}: {}",
                    item.name,
                    item.error.unwrap_or_default()
                );
            }
            status => eprintln!("[{}] {}", status.label(), item.name),
        }
    }

    if let Some(notice) = &summary.notice {
        if !quiet {
            eprintln!("Note: {notice}");
        }
    }

    if !quiet {
        eprintln!();
        eprint!("[Summary] Processed: {}", summary.completed);
        if summary.failed > 0 {
            eprint!(", Failed: {}", summary.failed);
        }
        eprintln!(" (Total: {})", summary.total);
    }
}
