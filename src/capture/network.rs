use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::fetch;
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::artifacts::CapturedResponse;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// The capture sequence: responses of interest in arrival order.
#[derive(Clone)]
pub struct ResponseCapture {
    patterns: Arc<[String]>,
    captured: Arc<Mutex<Vec<CapturedResponse>>>,
}

impl ResponseCapture {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.into(),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| url.contains(p.as_str()))
    }

    /// Append `{url, data}` when the URL is of interest and `body` is JSON.
    /// Returns whether the response was kept.
    pub fn record(&self, url: &str, body: &str) -> bool {
        if !self.matches(url) {
            return false;
        }
        let Ok(data) = serde_json::from_str::<serde_json::Value>(body) else {
            return false;
        };
        let mut captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
        captured.push(CapturedResponse {
            url: url.to_string(),
            data,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.captured.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<CapturedResponse> {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct ActivityState {
    inflight: HashSet<String>,
    last_change: Instant,
}

/// In-flight request ids, used to detect a quiet network. Keyed by id so a
/// redirect chain, which reuses one id, counts once.
#[derive(Clone)]
pub struct NetworkActivity {
    state: Arc<Mutex<ActivityState>>,
}

impl Default for NetworkActivity {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(ActivityState {
                inflight: HashSet::new(),
                last_change: Instant::now(),
            })),
        }
    }
}

impl NetworkActivity {
    pub fn request_started(&self, id: &str) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.inflight.insert(id.to_string());
        s.last_change = Instant::now();
    }

    pub fn request_settled(&self, id: &str) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.inflight.remove(id);
        s.last_change = Instant::now();
    }

    pub fn is_idle(&self, window: Duration) -> bool {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.inflight.is_empty() && s.last_change.elapsed() >= window
    }

    /// Resolve once no request has been in flight for `window`.
    /// Callers bound this with their own timeout.
    pub async fn wait_for_idle(&self, window: Duration) {
        while !self.is_idle(window) {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

/// CDP may hand back bodies base64-encoded; returns `None` when the payload
/// cannot be turned into text.
pub fn decode_body(body: &str, base64_encoded: bool) -> Option<String> {
    if !base64_encoded {
        return Some(body.to_string());
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(body).ok()?;
    String::from_utf8(bytes).ok()
}

/// Intercept every outgoing request and let it through unchanged.
pub async fn allow_all_requests(page: &Page) -> Result<JoinHandle<()>> {
    let pattern = fetch::RequestPattern::builder()
        .url_pattern("*")
        .request_stage(fetch::RequestStage::Request)
        .build();
    page.execute(fetch::EnableParams::builder().patterns(vec![pattern]).build())
        .await?;

    let mut paused = page.event_listener::<fetch::EventRequestPaused>().await?;
    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(evt) = paused.next().await {
            let params = fetch::ContinueRequestParams::new(evt.request_id.clone());
            if let Err(e) = page.execute(params).await {
                debug!("Failed to continue {}: {}", evt.request.url, e);
            }
        }
    }))
}

/// Feed matching response bodies into `capture` and track request activity.
pub async fn observe_responses(
    page: &Page,
    capture: ResponseCapture,
    activity: NetworkActivity,
) -> Result<JoinHandle<()>> {
    page.execute(network::EnableParams::default()).await?;

    let mut sent = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut received = page.event_listener::<EventResponseReceived>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        // request id -> url, for responses whose body we want once loaded
        let mut pending: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                Some(evt) = sent.next() => activity.request_started(evt.request_id.as_ref()),
                Some(evt) = received.next() => {
                    if capture.matches(&evt.response.url) {
                        pending.insert(evt.request_id.as_ref().to_string(), evt.response.url.clone());
                    }
                }
                Some(evt) = finished.next() => {
                    activity.request_settled(evt.request_id.as_ref());
                    if let Some(url) = pending.remove(evt.request_id.as_ref()) {
                        read_body(&page, &capture, evt.request_id.clone(), &url).await;
                    }
                }
                Some(evt) = failed.next() => {
                    activity.request_settled(evt.request_id.as_ref());
                    pending.remove(evt.request_id.as_ref());
                }
                else => break,
            }
        }
    }))
}

async fn read_body(page: &Page, capture: &ResponseCapture, id: RequestId, url: &str) {
    match page.execute(GetResponseBodyParams::new(id)).await {
        Ok(resp) => {
            let kept = decode_body(&resp.body, resp.base64_encoded)
                .map(|body| capture.record(url, &body))
                .unwrap_or(false);
            debug!(kept, "Response {}", url);
        }
        Err(e) => warn!("Could not read body of {}: {}", url, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> ResponseCapture {
        ResponseCapture::new(&[
            "/records/".to_string(),
            "/transcription".to_string(),
            "/contributions".to_string(),
        ])
    }

    #[test]
    fn non_json_bodies_are_skipped_silently() {
        let c = capture();
        assert!(!c.record("https://x/proxy/records/search", "<html>nope</html>"));
        assert!(!c.record("https://x/proxy/contributions/1", ""));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn non_matching_urls_never_appear() {
        let c = capture();
        assert!(!c.record("https://x/static/app.json", "{\"a\":1}"));
        assert!(c.record("https://x/proxy/records/search?q=1", "{\"a\":1}"));
        let snap = c.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap[0].url.contains("/records/"));
    }

    #[test]
    fn arrival_order_is_preserved_without_dedup() {
        let c = capture();
        c.record("https://x/proxy/contributions/2", "[2]");
        c.record("https://x/proxy/records/1", "{\"n\":1}");
        c.record("https://x/proxy/contributions/2", "[2]");
        let urls: Vec<_> = c.snapshot().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://x/proxy/contributions/2",
                "https://x/proxy/records/1",
                "https://x/proxy/contributions/2",
            ]
        );
    }

    #[test]
    fn clones_share_one_sequence() {
        let c = capture();
        let observer = c.clone();
        observer.record("https://x/transcriptions/9", "{\"text\":\"hi\"}");
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn base64_bodies_are_decoded() {
        assert_eq!(decode_body("eyJhIjoxfQ==", true).as_deref(), Some("{\"a\":1}"));
        assert_eq!(decode_body("{}", false).as_deref(), Some("{}"));
        assert_eq!(decode_body("***", true), None);
    }

    #[test]
    fn activity_tracks_inflight_requests() {
        let a = NetworkActivity::default();
        assert!(a.is_idle(Duration::ZERO));
        a.request_started("1");
        a.request_started("2");
        assert!(!a.is_idle(Duration::ZERO));
        a.request_settled("1");
        assert!(!a.is_idle(Duration::ZERO));
        a.request_settled("2");
        assert!(a.is_idle(Duration::ZERO));
        assert!(!a.is_idle(Duration::from_secs(3600)));
    }

    #[test]
    fn settling_unknown_request_is_harmless() {
        let a = NetworkActivity::default();
        a.request_settled("42");
        assert!(a.is_idle(Duration::ZERO));
    }

    #[test]
    fn redirect_hops_count_as_one_request() {
        let a = NetworkActivity::default();
        // requestWillBeSent fires once per hop, loadingFinished once
        a.request_started("7.1");
        a.request_started("7.1");
        a.request_started("7.1");
        a.request_settled("7.1");
        assert!(a.is_idle(Duration::ZERO));
    }

    #[tokio::test]
    async fn wait_for_idle_returns_once_quiet() {
        let a = NetworkActivity::default();
        a.request_started("1");
        let waiter = a.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_idle(Duration::from_millis(10)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.request_settled("1");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("network never reported idle")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_idle_after_redirected_request() {
        let a = NetworkActivity::default();
        a.request_started("9");
        a.request_started("9");
        a.request_settled("9");
        tokio::time::timeout(Duration::from_secs(2), a.wait_for_idle(Duration::from_millis(10)))
            .await
            .expect("redirected request kept the network busy");
    }
}
