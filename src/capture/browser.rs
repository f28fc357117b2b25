use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::locator::{Navigator, PageDriver};
use super::network::NetworkActivity;
use crate::config::HarvestConfig;

/// A launched headless Chromium with the single tab the capture runs in.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(config: &HarvestConfig) -> Result<Self> {
        let viewport = Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            ..Default::default()
        };

        let browser_config = BrowserConfig::builder()
            .headless_mode(HeadlessMode::New)
            .no_sandbox()
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(viewport)
            .request_timeout(config.navigation_timeout())
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {}", e))?;

        info!("Launching headless browser");
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open a browser tab")?;

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn navigator(&self, activity: NetworkActivity, config: &HarvestConfig) -> CdpNavigator {
        CdpNavigator {
            page: self.page.clone(),
            activity,
            timeout: config.navigation_timeout(),
            idle_window: config.network_idle(),
            settle: config.settle_delay(),
        }
    }

    pub fn driver(&self) -> CdpDriver {
        CdpDriver {
            page: self.page.clone(),
        }
    }

    /// Shut the browser down. Failures are logged, never returned.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        self.handler.abort();
        info!("Browser closed");
    }
}

/// Navigates the tab, bounded by a timeout, then waits for a quiet network
/// and a fixed settle delay.
pub struct CdpNavigator {
    page: Page,
    activity: NetworkActivity,
    timeout: Duration,
    idle_window: Duration,
    settle: Duration,
}

#[async_trait]
impl Navigator for CdpNavigator {
    async fn open(&self, url: &str) -> Result<()> {
        tokio::time::timeout(self.timeout, async {
            self.page
                .goto(url)
                .await
                .with_context(|| format!("Navigation to {} failed", url))?;
            self.activity.wait_for_idle(self.idle_window).await;
            anyhow::Ok(())
        })
        .await
        .map_err(|_| anyhow!("Navigation to {} timed out after {:?}", url, self.timeout))??;

        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

pub struct CdpDriver {
    page: Page,
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
