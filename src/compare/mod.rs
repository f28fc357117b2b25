pub mod diff;
pub mod matcher;
pub mod ocr;
pub mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts;
use crate::config::HarvestConfig;
use diff::{CompareOptions, WordDiff, WordStats};
use ocr::MistralOcr;

static ITEM_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^item_\d+_[^/\\]+\.jpg$").unwrap());

pub struct CompareRequest {
    pub options: CompareOptions,
    pub no_ocr: bool,
    pub output_dir: Option<PathBuf>,
}

/// Source transcription and OCR text for one image.
struct ItemTexts {
    item_name: String,
    image_file: String,
    source: String,
    ocr: String,
}

struct ItemResult {
    item_name: String,
    image_file: String,
    comparison_file: String,
    diff: WordDiff,
}

#[derive(Serialize)]
struct ResultEntry<'a> {
    item_name: &'a str,
    stats: &'a WordStats,
    comparison_file: &'a str,
}

#[derive(Serialize)]
struct ResultsFile<'a> {
    options: &'a CompareOptions,
    results: Vec<ResultEntry<'a>>,
}

pub struct CompareSummary {
    pub items: usize,
    pub overall: WordStats,
    pub report_path: PathBuf,
}

/// `item_*.jpg` files in `dir`, sorted by name.
fn item_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| ITEM_IMAGE_RE.is_match(n))
        })
        .collect();
    images.sort();
    Ok(images)
}

async fn ocr_text(
    ocr: Option<&MistralOcr>,
    image: &Path,
    cache: &Path,
) -> Result<Option<String>> {
    if cache.exists() {
        info!("Using cached OCR output {}", cache.display());
        return Ok(Some(fs::read_to_string(cache)?.trim().to_string()));
    }
    let Some(ocr) = ocr else {
        info!("No cached OCR output for {}, skipping", image.display());
        return Ok(None);
    };
    let text = ocr.recognize(image).await?;
    fs::write(cache, &text).with_context(|| format!("Failed to write {}", cache.display()))?;
    Ok(Some(text.trim().to_string()))
}

async fn gather_texts(
    config: &HarvestConfig,
    ocr: Option<&MistralOcr>,
) -> Result<Vec<ItemTexts>> {
    let ocr_dir = config.ocr_output_dir();
    fs::create_dir_all(&ocr_dir)?;

    let images = item_images(&config.images_dir())?;
    println!("Found {} images to process", images.len());

    let mut items = Vec::new();
    for image in images {
        let Some(stem) = image.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let transcription = config.transcriptions_dir().join(format!("{}.txt", stem));
        if !transcription.exists() {
            warn!("No transcription found for {}", stem);
            continue;
        }
        let source = fs::read_to_string(&transcription)?.trim().to_string();

        let cache = ocr_dir.join(format!("{}_ocr.txt", stem));
        let ocr_text = match ocr_text(ocr, &image, &cache).await {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                warn!("Error running OCR on {}: {:#}", stem, e);
                continue;
            }
        };

        items.push(ItemTexts {
            image_file: image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            item_name: stem,
            source,
            ocr: ocr_text,
        });
    }
    Ok(items)
}

/// OCR comparison stage: diff each transcription against OCR of its image
/// and write per-item pages, a summary page and `results.json`.
pub async fn run_compare(config: &HarvestConfig, request: &CompareRequest) -> Result<CompareSummary> {
    println!("Comparison mode: {}", request.options.describe());

    let client = if request.no_ocr {
        None
    } else {
        Some(MistralOcr::from_env(&config.mistral_base_url, &config.ocr_model)?)
    };

    let output_dir = request
        .output_dir
        .clone()
        .unwrap_or_else(|| config.comparisons_dir());
    fs::create_dir_all(&output_dir)?;

    let texts = gather_texts(config, client.as_ref()).await?;

    let options = request.options;
    let results: Vec<ItemResult> = texts
        .into_par_iter()
        .map(|t| ItemResult {
            diff: diff::diff_words(&t.source, &t.ocr, &options),
            comparison_file: format!("{}_comparison.html", t.item_name),
            item_name: t.item_name,
            image_file: t.image_file,
        })
        .collect();

    let mut overall = WordStats::default();
    for r in &results {
        let s = &r.diff.stats;
        println!(
            "{}: accuracy {:.1}% ({}/{} words)",
            r.item_name,
            s.accuracy(),
            s.equal,
            s.total_words1
        );
        overall.add(s);
        let html = report::item_page(&r.item_name, &r.image_file, &r.diff, &options);
        let path = output_dir.join(&r.comparison_file);
        fs::write(&path, html).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let entries: Vec<report::ItemReport<'_>> = results
        .iter()
        .map(|r| report::ItemReport {
            item_name: &r.item_name,
            comparison_file: &r.comparison_file,
            stats: &r.diff.stats,
        })
        .collect();
    let generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let summary_html = report::summary_page(&entries, &options, &config.catalog_url(), &generated);
    let report_path = output_dir.join(report::SUMMARY_FILE);
    fs::write(&report_path, summary_html)?;

    let results_file = ResultsFile {
        options: &options,
        results: results
            .iter()
            .map(|r| ResultEntry {
                item_name: &r.item_name,
                stats: &r.diff.stats,
                comparison_file: &r.comparison_file,
            })
            .collect(),
    };
    artifacts::write_json(&output_dir.join("results.json"), &results_file)?;

    Ok(CompareSummary {
        items: results.len(),
        overall,
        report_path,
    })
}
