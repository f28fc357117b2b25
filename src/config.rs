use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "nara_harvest";
const ENV_PREFIX: &str = "NARA";

/// `NARA_CAPTURE_PATTERNS=/records/,/iiif/` style overrides; list values are
/// comma separated.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("capture_patterns")
}

/// What to do when the catalog page shows a different number of thumbnails
/// than `expected_page_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageCountPolicy {
    /// Always iterate `expected_page_count` pages.
    Configured,
    /// Use the detected thumbnail count when it is non-zero.
    Detected,
}

/// How several "transcription" contributions for one object are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    First,
    Last,
    Concatenate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub record_id: String,
    pub catalog_base_url: String,
    pub expected_page_count: u32,
    pub navigation_timeout_ms: u64,
    pub network_idle_ms: u64,
    pub settle_delay_ms: u64,
    pub per_click_delay_ms: u64,
    pub selector_timeout_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub output_dir: PathBuf,
    pub capture_patterns: Vec<String>,
    pub page_count_policy: PageCountPolicy,
    pub duplicate_policy: DuplicatePolicy,
    pub download_timeout_secs: u64,
    pub accept_invalid_certs: bool,
    pub mistral_base_url: String,
    pub ocr_model: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            record_id: "54928953".into(),
            catalog_base_url: "https://catalog.archives.gov/id".into(),
            expected_page_count: 14,
            navigation_timeout_ms: 60_000,
            network_idle_ms: 500,
            settle_delay_ms: 5_000,
            per_click_delay_ms: 2_000,
            selector_timeout_ms: 5_000,
            viewport_width: 1920,
            viewport_height: 1080,
            output_dir: PathBuf::from("."),
            capture_patterns: vec![
                "/records/".into(),
                "/transcription".into(),
                "/contributions".into(),
            ],
            page_count_policy: PageCountPolicy::Configured,
            duplicate_policy: DuplicatePolicy::First,
            download_timeout_secs: 60,
            accept_invalid_certs: false,
            mistral_base_url: "https://api.mistral.ai".into(),
            ocr_model: "mistral-ocr-latest".into(),
        }
    }
}

impl HarvestConfig {
    /// Layer defaults, an optional TOML file and `NARA_*` environment variables.
    ///
    /// An explicit `path` must exist; otherwise `nara_harvest.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn catalog_url(&self) -> String {
        format!(
            "{}/{}",
            self.catalog_base_url.trim_end_matches('/'),
            self.record_id
        )
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn per_click_delay(&self) -> Duration {
        Duration::from_millis(self.per_click_delay_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn api_responses_path(&self) -> PathBuf {
        self.output_dir.join("api_responses.json")
    }

    pub fn scrape_results_path(&self) -> PathBuf {
        self.output_dir.join("scrape_results.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }

    pub fn transcriptions_dir(&self) -> PathBuf {
        self.output_dir.join("transcriptions")
    }

    pub fn ocr_output_dir(&self) -> PathBuf {
        self.output_dir.join("ocr_output")
    }

    pub fn comparisons_dir(&self) -> PathBuf {
        self.output_dir.join("comparisons")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_pension_file() {
        let c = HarvestConfig::default();
        assert_eq!(c.expected_page_count, 14);
        assert_eq!(c.catalog_url(), "https://catalog.archives.gov/id/54928953");
        assert_eq!(c.capture_patterns.len(), 3);
        assert_eq!(c.page_count_policy, PageCountPolicy::Configured);
        assert_eq!(c.duplicate_policy, DuplicatePolicy::First);
    }

    #[test]
    fn toml_file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(
            &path,
            "record_id = \"1234\"\nexpected_page_count = 3\nper_click_delay_ms = 10\nduplicate_policy = \"concatenate\"\n",
        )
        .unwrap();

        let c = HarvestConfig::load(Some(&path)).unwrap();
        assert_eq!(c.record_id, "1234");
        assert_eq!(c.expected_page_count, 3);
        assert_eq!(c.per_click_delay(), Duration::from_millis(10));
        assert_eq!(c.duplicate_policy, DuplicatePolicy::Concatenate);
        // untouched fields keep their defaults
        assert_eq!(c.navigation_timeout_ms, 60_000);
    }

    #[test]
    fn environment_overrides_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "record_id = \"1234\"\nexpected_page_count = 3\n").unwrap();

        let vars: config::Map<String, String> = [
            ("NARA_EXPECTED_PAGE_COUNT", "20"),
            ("NARA_CAPTURE_PATTERNS", "/records/,/iiif/"),
            ("NARA_PAGE_COUNT_POLICY", "detected"),
            ("NARA_ACCEPT_INVALID_CERTS", "true"),
            ("OTHER_EXPECTED_PAGE_COUNT", "99"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let c = HarvestConfig::load_with(Some(&path), environment().source(Some(vars))).unwrap();
        assert_eq!(c.record_id, "1234");
        assert_eq!(c.expected_page_count, 20);
        assert_eq!(c.capture_patterns, vec!["/records/", "/iiif/"]);
        assert_eq!(c.page_count_policy, PageCountPolicy::Detected);
        assert!(c.accept_invalid_certs);
    }

    #[test]
    fn numeric_record_id_from_environment_is_a_string() {
        let vars: config::Map<String, String> =
            [("NARA_RECORD_ID".to_string(), "777".to_string())].into_iter().collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();

        let c = HarvestConfig::load_with(Some(&path), environment().source(Some(vars))).unwrap();
        assert_eq!(c.record_id, "777");
        assert_eq!(c.catalog_url(), "https://catalog.archives.gov/id/777");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(HarvestConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn catalog_url_tolerates_trailing_slash() {
        let c = HarvestConfig {
            catalog_base_url: "http://localhost:8080/id/".into(),
            record_id: "42".into(),
            ..Default::default()
        };
        assert_eq!(c.catalog_url(), "http://localhost:8080/id/42");
    }

    #[test]
    fn output_paths_live_under_output_dir() {
        let c = HarvestConfig {
            output_dir: PathBuf::from("/tmp/run"),
            ..Default::default()
        };
        assert_eq!(c.api_responses_path(), PathBuf::from("/tmp/run/api_responses.json"));
        assert_eq!(c.images_dir(), PathBuf::from("/tmp/run/images"));
    }
}
