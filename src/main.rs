mod artifacts;
mod capture;
mod compare;
mod config;
mod extract;

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::compare::diff::CompareOptions;
use crate::compare::CompareRequest;
use crate::config::HarvestConfig;

#[derive(Parser)]
#[command(name = "nara_harvest", about = "National Archives catalog record harvester")]
struct Cli {
    /// Settings file (default: nara_harvest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse the record and save catalog API responses and per-page results
    Capture,
    /// Download images and write transcriptions from saved API responses
    Extract,
    /// Capture, then extract
    Run,
    /// Compare saved transcriptions against OCR of the downloaded images
    Compare {
        /// Ignore case differences
        #[arg(short = 'i', long)]
        ignore_case: bool,
        /// Ignore leading and trailing punctuation on words
        #[arg(short = 'p', long)]
        ignore_punctuation: bool,
        /// Only compare items whose OCR output is already cached
        #[arg(long)]
        no_ocr: bool,
        /// Where to write the HTML reports (default: <output_dir>/comparisons)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = HarvestConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Capture => capture(&config).await,
        Commands::Extract => extract(&config).await,
        Commands::Run => {
            let t_capture = Instant::now();
            capture(&config).await?;
            println!("Captured in {}", format_duration(t_capture.elapsed()));

            let t_extract = Instant::now();
            extract(&config).await?;
            println!("Extracted in {}", format_duration(t_extract.elapsed()));
            Ok(())
        }
        Commands::Compare {
            ignore_case,
            ignore_punctuation,
            no_ocr,
            output_dir,
        } => {
            let request = CompareRequest {
                options: CompareOptions {
                    ignore_case,
                    ignore_punctuation,
                },
                no_ocr,
                output_dir,
            };
            let summary = compare::run_compare(&config, &request).await?;
            let s = &summary.overall;
            println!("\nCompared {} items", summary.items);
            println!("Overall accuracy: {:.1}%", s.accuracy());
            println!("Exact matches:    {}", s.equal);
            println!("Near misses:      {}", s.similar);
            println!("Replaced:         {}", s.replaced);
            println!("Missing in OCR:   {}", s.deleted);
            println!("Extra in OCR:     {}", s.inserted);
            println!("Summary report:   {}", summary.report_path.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn capture(config: &HarvestConfig) -> anyhow::Result<()> {
    println!("Capturing record {} ({})", config.record_id, config.catalog_url());
    let summary = capture::run_capture(config).await?;
    println!(
        "Captured {} API responses -> {}",
        summary.responses,
        config.api_responses_path().display()
    );
    println!(
        "Scraped {} pages ({} complete, {} failed) -> {}",
        summary.pages,
        summary.complete,
        summary.failed,
        config.scrape_results_path().display()
    );
    Ok(())
}

async fn extract(config: &HarvestConfig) -> anyhow::Result<()> {
    let summary = extract::run_extract(config).await?;
    if summary.objects == 0 {
        println!("No digital objects found. Run 'capture' first.");
        return Ok(());
    }
    println!(
        "{} objects, {} transcriptions found",
        summary.objects, summary.transcriptions_found
    );
    println!(
        "Images: {} downloaded, {} already present, {} failed",
        summary.images_downloaded, summary.images_skipped, summary.images_failed
    );
    println!("Transcriptions written: {}", summary.transcriptions_written);

    print_listing(&config.images_dir())?;
    print_listing(&config.transcriptions_dir())?;
    Ok(())
}

fn print_listing(dir: &Path) -> anyhow::Result<()> {
    println!("\n--- {} ---", dir.display());
    for (name, size) in extract::list_dir(dir)? {
        println!("  {:<40} {:>10}", name, format_size(size));
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
