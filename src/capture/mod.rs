pub mod browser;
pub mod locator;
pub mod network;

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::config::{HarvestConfig, PageCountPolicy};
use browser::BrowserSession;
use locator::{HeuristicLocator, Locator, Navigator, PageDriver};
use network::{NetworkActivity, ResponseCapture};

/// How much of a page's work succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PageOutcome {
    Complete,
    Partial,
    Failed { error: String },
}

/// One entry of `scrape_results.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub page: u32,
    pub image_url: Option<String>,
    pub transcription: String,
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

impl PageResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PageOutcome::Failed { .. })
    }
}

/// Delays and bounds for the per-page loop.
#[derive(Debug, Clone, Copy)]
pub struct PageTiming {
    pub selector_timeout: Duration,
    pub per_click_delay: Duration,
}

impl PageTiming {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            selector_timeout: config.selector_timeout(),
            per_click_delay: config.per_click_delay(),
        }
    }
}

#[derive(Default)]
struct Findings {
    image_url: Option<String>,
    transcription: Option<String>,
}

#[derive(Debug)]
pub struct CaptureSummary {
    pub responses: usize,
    pub pages: usize,
    pub complete: usize,
    pub failed: usize,
}

/// Decide how many pages to walk given the thumbnail count seen on the page.
pub fn resolve_page_count(configured: u32, detected: u32, policy: PageCountPolicy) -> u32 {
    if detected != configured {
        info!(
            "Page shows {} thumbnails, configured page count is {}",
            detected, configured
        );
    }
    match policy {
        PageCountPolicy::Detected if detected > 0 => detected,
        _ => configured,
    }
}

async fn try_scrape_page(
    driver: &dyn PageDriver,
    locator: &dyn Locator,
    page: u32,
    timing: PageTiming,
    found: &mut Findings,
) -> Result<()> {
    locator
        .wait_for_controls(driver, timing.selector_timeout)
        .await?;

    match locator.click_page_control(driver, page).await? {
        Some(method) => debug!(?method, "Clicked control for page {}", page),
        None => debug!("No control found for page {}", page),
    }
    driver.pause(timing.per_click_delay).await;

    found.image_url = locator.locate_image_link(driver).await?;

    if locator.locate_transcription_tab(driver).await? {
        driver.pause(timing.per_click_delay).await;
        found.transcription = locator.locate_transcription_text(driver).await?;
    }
    Ok(())
}

/// Run every sub-step for one page. Errors are logged and folded into the
/// result; whatever was found before the error is kept.
pub async fn scrape_page(
    driver: &dyn PageDriver,
    locator: &dyn Locator,
    page: u32,
    timing: PageTiming,
) -> PageResult {
    let mut found = Findings::default();
    let outcome = match try_scrape_page(driver, locator, page, timing, &mut found).await {
        Ok(()) => {
            let has_text = found.transcription.as_deref().is_some_and(|t| !t.is_empty());
            if found.image_url.is_some() && has_text {
                PageOutcome::Complete
            } else {
                PageOutcome::Partial
            }
        }
        Err(e) => {
            warn!("Error processing page {}: {:#}", page, e);
            PageOutcome::Failed {
                error: format!("{:#}", e),
            }
        }
    };

    PageResult {
        page,
        image_url: found.image_url,
        transcription: found.transcription.unwrap_or_default(),
        outcome,
    }
}

/// Walk pages `1..=count`, producing exactly `count` results in order.
pub async fn scrape_pages(
    driver: &dyn PageDriver,
    locator: &dyn Locator,
    count: u32,
    timing: PageTiming,
) -> Vec<PageResult> {
    let pb = ProgressBar::new(count as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} page {pos}/{len}")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut results = Vec::with_capacity(count as usize);
    for page in 1..=count {
        let result = scrape_page(driver, locator, page, timing).await;
        info!(
            "Page {}: image={} transcription={} chars",
            page,
            result.image_url.as_deref().unwrap_or("-"),
            result.transcription.chars().count()
        );
        results.push(result);
        pb.inc(1);
    }
    pb.finish_and_clear();
    results
}

fn prepare_output_dirs(config: &HarvestConfig) -> Result<()> {
    for dir in [config.images_dir(), config.transcriptions_dir()] {
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

async fn capture_with(
    navigator: &dyn Navigator,
    driver: &dyn PageDriver,
    locator: &dyn Locator,
    capture: &ResponseCapture,
    config: &HarvestConfig,
) -> Result<CaptureSummary> {
    let url = config.catalog_url();
    info!("Navigating to {}", url);
    if let Err(e) = navigator.open(&url).await {
        // keep whatever the observer saw before giving up
        if let Err(write_err) =
            artifacts::write_json(&config.api_responses_path(), &capture.snapshot())
        {
            warn!("Failed to save captured responses: {:#}", write_err);
        }
        return Err(e);
    }
    info!("Page loaded, {} API responses captured so far", capture.len());

    let metadata = locator.page_metadata(driver).await.unwrap_or_else(|e| {
        debug!("Metadata read failed: {}", e);
        Default::default()
    });
    if let Some(link) = &metadata.download_url {
        info!("Download link: {}", link);
    }
    info!("Thumbnails visible: {}", metadata.thumbnail_count);

    let count = resolve_page_count(
        config.expected_page_count,
        metadata.thumbnail_count,
        config.page_count_policy,
    );
    let pages = scrape_pages(driver, locator, count, PageTiming::from_config(config)).await;

    let responses = capture.snapshot();
    artifacts::write_json(&config.api_responses_path(), &responses)?;
    artifacts::write_json(&config.scrape_results_path(), &pages)?;
    info!(
        "Wrote {} and {}",
        config.api_responses_path().display(),
        config.scrape_results_path().display()
    );

    Ok(CaptureSummary {
        responses: responses.len(),
        pages: pages.len(),
        complete: pages
            .iter()
            .filter(|p| p.outcome == PageOutcome::Complete)
            .count(),
        failed: pages.iter().filter(|p| p.is_failed()).count(),
    })
}

async fn capture_session(session: &BrowserSession, config: &HarvestConfig) -> Result<CaptureSummary> {
    let capture = ResponseCapture::new(&config.capture_patterns);
    let activity = NetworkActivity::default();

    let interceptor = network::allow_all_requests(session.page()).await?;
    let observer =
        network::observe_responses(session.page(), capture.clone(), activity.clone()).await?;

    let result = capture_with(
        &session.navigator(activity, config),
        &session.driver(),
        &HeuristicLocator::default(),
        &capture,
        config,
    )
    .await;

    observer.abort();
    interceptor.abort();
    result
}

/// Browser capture stage: render the catalog page, record its API traffic and
/// walk every page, then write both JSON artifacts.
pub async fn run_capture(config: &HarvestConfig) -> Result<CaptureSummary> {
    prepare_output_dirs(config)?;

    let session = BrowserSession::launch(config).await?;
    let result = capture_session(&session, config).await;
    session.close().await;
    result
}
