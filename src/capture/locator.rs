use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const CONTROL_POLL: Duration = Duration::from_millis(100);

/// Primitive DOM access. The browser session implements this over CDP.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Evaluate a JS expression and return its value (`Null` for undefined).
    async fn evaluate(&self, script: &str) -> Result<Value>;

    async fn pause(&self, duration: Duration);
}

/// Page loading. The browser session implements this over CDP.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Load `url` and resolve once the page has settled.
    async fn open(&self, url: &str) -> Result<()>;
}

/// How the control for a page was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMethod {
    Label,
    Position,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub download_url: Option<String>,
    #[serde(default)]
    pub thumbnail_count: u32,
}

/// Heuristic element lookups used by the page loop.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Wait until at least one clickable control exists, failing after `timeout`.
    async fn wait_for_controls(&self, driver: &dyn PageDriver, timeout: Duration) -> Result<()>;

    /// Click the control for `page` (1-based). `None` when nothing matched.
    async fn click_page_control(
        &self,
        driver: &dyn PageDriver,
        page: u32,
    ) -> Result<Option<ClickMethod>>;

    async fn locate_image_link(&self, driver: &dyn PageDriver) -> Result<Option<String>>;

    /// Click a transcription tab if one exists; returns whether it was clicked.
    async fn locate_transcription_tab(&self, driver: &dyn PageDriver) -> Result<bool>;

    async fn locate_transcription_text(&self, driver: &dyn PageDriver) -> Result<Option<String>>;

    async fn page_metadata(&self, driver: &dyn PageDriver) -> Result<PageMetadata>;
}

/// Selector lists tuned for the catalog viewer. Every list is plain data so
/// another site can be targeted by building a different value.
#[derive(Debug, Clone)]
pub struct HeuristicLocator {
    pub clickable_selector: String,
    pub thumbnail_selectors: Vec<String>,
    pub image_url_markers: Vec<String>,
    pub transcription_keyword: String,
    pub transcription_selectors: Vec<String>,
    pub download_selector: String,
}

impl Default for HeuristicLocator {
    fn default() -> Self {
        Self {
            clickable_selector: "button, a, [role=\"button\"]".into(),
            thumbnail_selectors: vec![
                "[class*=\"thumbnail\"]".into(),
                "[class*=\"Thumbnail\"]".into(),
                "[data-testid*=\"thumbnail\"]".into(),
                ".slick-slide img".into(),
            ],
            image_url_markers: vec![
                "NARAprodstorage".into(),
                "s3.amazonaws.com".into(),
                "/lz/".into(),
                ".jpg".into(),
            ],
            transcription_keyword: "transcription".into(),
            transcription_selectors: vec![
                "[class*=\"transcription-text\"]".into(),
                "[class*=\"transcription\"] p".into(),
                "[data-testid*=\"transcription\"]".into(),
                "[class*=\"Transcription\"]".into(),
                "textarea".into(),
            ],
            download_selector: "a[href*=\"download\"], a[download]".into(),
        }
    }
}

/// JSON-encode a value for splicing into a script.
fn js<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".into())
}

fn optional_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

impl HeuristicLocator {
    pub fn controls_script(&self) -> String {
        format!(
            "document.querySelector({}) !== null",
            js(&self.clickable_selector)
        )
    }

    pub fn click_script(&self, page: u32) -> String {
        format!(
            r#"(function(index, clickable, thumbs) {{
    var want = String(index);
    var controls = Array.prototype.slice.call(document.querySelectorAll(clickable + ', [aria-label]'));
    for (var i = 0; i < controls.length; i++) {{
        var el = controls[i];
        var text = (el.textContent || '').trim();
        var label = (el.getAttribute('aria-label') || '').trim();
        if (text === want || label === want || / (\d+)$/.exec(label) && / (\d+)$/.exec(label)[1] === want) {{
            el.click();
            return 'label';
        }}
    }}
    for (var j = 0; j < thumbs.length; j++) {{
        var found = document.querySelectorAll(thumbs[j]);
        if (found.length >= index) {{
            found[index - 1].click();
            return 'position';
        }}
    }}
    return null;
}})({}, {}, {})"#,
            page,
            js(&self.clickable_selector),
            js(&self.thumbnail_selectors)
        )
    }

    pub fn image_link_script(&self) -> String {
        format!(
            r#"(function(markers) {{
    var nodes = document.querySelectorAll('a[href], img[src]');
    for (var i = 0; i < nodes.length; i++) {{
        var url = nodes[i].href || nodes[i].src || '';
        for (var m = 0; m < markers.length; m++) {{
            if (url.indexOf(markers[m]) !== -1) return url;
        }}
    }}
    return null;
}})({})"#,
            js(&self.image_url_markers)
        )
    }

    pub fn transcription_tab_script(&self) -> String {
        format!(
            r#"(function(keyword) {{
    var nodes = document.querySelectorAll('button, [role="tab"], a');
    for (var i = 0; i < nodes.length; i++) {{
        if ((nodes[i].textContent || '').toLowerCase().indexOf(keyword) !== -1) {{
            nodes[i].click();
            return true;
        }}
    }}
    return false;
}})({})"#,
            js(&self.transcription_keyword.to_lowercase())
        )
    }

    pub fn transcription_text_script(&self) -> String {
        format!(
            r#"(function(selectors) {{
    for (var i = 0; i < selectors.length; i++) {{
        var el = document.querySelector(selectors[i]);
        if (!el) continue;
        var text = el.tagName === 'TEXTAREA' ? el.value : (el.innerText || el.textContent || '');
        return text.trim();
    }}
    return null;
}})({})"#,
            js(&self.transcription_selectors)
        )
    }

    pub fn metadata_script(&self) -> String {
        format!(
            r#"(function(download, thumbs) {{
    var link = document.querySelector(download);
    var count = 0;
    for (var i = 0; i < thumbs.length && count === 0; i++) {{
        count = document.querySelectorAll(thumbs[i]).length;
    }}
    return JSON.stringify({{ downloadUrl: link ? link.href : null, thumbnailCount: count }});
}})({}, {})"#,
            js(&self.download_selector),
            js(&self.thumbnail_selectors)
        )
    }
}

#[async_trait]
impl Locator for HeuristicLocator {
    async fn wait_for_controls(&self, driver: &dyn PageDriver, timeout: Duration) -> Result<()> {
        let script = self.controls_script();
        let attempts = (timeout.as_millis() / CONTROL_POLL.as_millis()).max(1);
        for _ in 0..attempts {
            if driver.evaluate(&script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            driver.pause(CONTROL_POLL).await;
        }
        bail!("no clickable control appeared within {:?}", timeout)
    }

    async fn click_page_control(
        &self,
        driver: &dyn PageDriver,
        page: u32,
    ) -> Result<Option<ClickMethod>> {
        let method = match driver.evaluate(&self.click_script(page)).await? {
            Value::String(s) if s == "label" => Some(ClickMethod::Label),
            Value::String(s) if s == "position" => Some(ClickMethod::Position),
            _ => None,
        };
        Ok(method)
    }

    async fn locate_image_link(&self, driver: &dyn PageDriver) -> Result<Option<String>> {
        let value = driver.evaluate(&self.image_link_script()).await?;
        Ok(optional_text(value).filter(|u| !u.is_empty()))
    }

    async fn locate_transcription_tab(&self, driver: &dyn PageDriver) -> Result<bool> {
        let value = driver.evaluate(&self.transcription_tab_script()).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn locate_transcription_text(&self, driver: &dyn PageDriver) -> Result<Option<String>> {
        let value = driver.evaluate(&self.transcription_text_script()).await?;
        Ok(optional_text(value))
    }

    async fn page_metadata(&self, driver: &dyn PageDriver) -> Result<PageMetadata> {
        let value = driver.evaluate(&self.metadata_script()).await?;
        match value {
            Value::String(raw) => {
                serde_json::from_str(&raw).context("Unexpected page metadata shape")
            }
            _ => Ok(PageMetadata::default()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    type Responder = Box<dyn Fn(&str) -> Result<Value> + Send + Sync>;

    /// Driver that answers scripts with a closure and records every call.
    pub struct ScriptedDriver {
        respond: Responder,
        pub scripts: Mutex<Vec<String>>,
        pub pauses: Mutex<Vec<Duration>>,
    }

    impl ScriptedDriver {
        pub fn new(respond: impl Fn(&str) -> Result<Value> + Send + Sync + 'static) -> Self {
            Self {
                respond: Box::new(respond),
                scripts: Mutex::new(Vec::new()),
                pauses: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedDriver {
        async fn evaluate(&self, script: &str) -> Result<Value> {
            self.scripts.lock().unwrap().push(script.to_string());
            (self.respond)(script)
        }

        async fn pause(&self, duration: Duration) {
            self.pauses.lock().unwrap().push(duration);
        }
    }
}
