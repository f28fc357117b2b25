use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const API_KEY_VAR: &str = "MISTRAL_API_KEY";

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Mistral document OCR endpoint.
pub struct MistralOcr {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl MistralOcr {
    pub fn new(api_key: String, base_url: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Build a client from `MISTRAL_API_KEY`.
    pub fn from_env(base_url: &str, model: &str) -> Result<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .with_context(|| format!("{} environment variable not set (use --no-ocr to compare cached output only)", API_KEY_VAR))?;
        Self::new(api_key, base_url, model)
    }

    /// Run OCR on a JPEG and return the text of every page joined by newlines.
    pub async fn recognize(&self, image: &Path) -> Result<String> {
        info!("Running OCR on {}", image.display());
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("Failed to read {}", image.display()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        let body = json!({
            "model": self.model,
            "document": {
                "type": "image_url",
                "image_url": format!("data:image/jpeg;base64,{}", encoded),
            }
        });

        let resp = self
            .client
            .post(format!("{}/v1/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OCR request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("OCR API returned {}: {}", status, detail);
        }

        let parsed: OcrResponse = resp.json().await.context("Unexpected OCR response")?;
        let parts: Vec<String> = parsed
            .pages
            .into_iter()
            .filter_map(|p| {
                p.markdown
                    .filter(|m| !m.is_empty())
                    .or(p.text.filter(|t| !t.is_empty()))
            })
            .collect();
        Ok(parts.join("\n"))
    }
}
