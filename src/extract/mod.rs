pub mod download;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{info, warn};

use crate::artifacts::{self, CapturedResponse};
use crate::config::{DuplicatePolicy, HarvestConfig};

const SEARCH_MARKER: &str = "records/search";
const CONTRIBUTIONS_MARKER: &str = "contributions";
const TRANSCRIPTION_TYPE: &str = "transcription";

/// A scanned page's backing asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitalObject {
    pub object_id: String,
    pub object_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExtractionSummary {
    pub objects: usize,
    pub transcriptions_found: usize,
    pub images_downloaded: usize,
    pub images_skipped: usize,
    pub images_failed: usize,
    pub transcriptions_written: usize,
}

/// Identifiers arrive as strings or numbers depending on the endpoint.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shared file stem of an image and its transcription.
pub fn item_name(index: usize, object_id: &str) -> String {
    format!("item_{:02}_{}", index, object_id)
}

/// Digital objects from the record search payloads. Within a response the
/// first hit carrying objects is used; a later search response replaces an
/// earlier one.
pub fn find_digital_objects(responses: &[CapturedResponse]) -> Vec<DigitalObject> {
    let mut objects = Vec::new();

    for response in responses.iter().filter(|r| r.url.contains(SEARCH_MARKER)) {
        let Some(hits) = response
            .data
            .pointer("/body/hits/hits")
            .and_then(Value::as_array)
        else {
            continue;
        };

        let first = hits.iter().find_map(|hit| {
            hit.pointer("/_source/record/digitalObjects")
                .and_then(Value::as_array)
                .filter(|objs| !objs.is_empty())
        });

        if let Some(objs) = first {
            objects = objs
                .iter()
                .map(|obj| DigitalObject {
                    object_id: obj.get("objectId").and_then(id_string).unwrap_or_default(),
                    object_url: obj
                        .get("objectUrl")
                        .and_then(Value::as_str)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string),
                })
                .collect();
        }
    }

    objects
}

/// Transcription text keyed by target object id. Only contributions whose
/// type is "transcription" and whose text is non-empty count.
pub fn collect_transcriptions(
    responses: &[CapturedResponse],
    policy: DuplicatePolicy,
) -> HashMap<String, String> {
    let mut transcriptions: HashMap<String, String> = HashMap::new();

    let items = responses
        .iter()
        .filter(|r| r.url.contains(CONTRIBUTIONS_MARKER))
        .filter_map(|r| r.data.as_array())
        .flatten();

    for item in items {
        if item.get("contributionType").and_then(Value::as_str) != Some(TRANSCRIPTION_TYPE) {
            continue;
        }
        let Some(id) = item.get("targetObjectId").and_then(id_string) else {
            continue;
        };
        let Some(text) = item
            .get("contribution")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        else {
            continue;
        };

        match policy {
            DuplicatePolicy::First => {
                transcriptions.entry(id).or_insert_with(|| text.to_string());
            }
            DuplicatePolicy::Last => {
                transcriptions.insert(id, text.to_string());
            }
            DuplicatePolicy::Concatenate => {
                transcriptions
                    .entry(id)
                    .and_modify(|existing| {
                        existing.push_str("\n\n");
                        existing.push_str(text);
                    })
                    .or_insert_with(|| text.to_string());
            }
        }
    }

    transcriptions
}

/// Extraction stage: read `api_responses.json`, download every image and
/// write every transcription under matching item names.
pub async fn run_extract(config: &HarvestConfig) -> Result<ExtractionSummary> {
    let images_dir = config.images_dir();
    let transcriptions_dir = config.transcriptions_dir();
    fs::create_dir_all(&images_dir)?;
    fs::create_dir_all(&transcriptions_dir)?;

    let responses = artifacts::read_captured(&config.api_responses_path())?;
    let objects = find_digital_objects(&responses);
    let transcriptions = collect_transcriptions(&responses, config.duplicate_policy);
    println!("Found {} digital objects", objects.len());
    println!("Found {} transcriptions", transcriptions.len());

    let client = download::build_client(
        std::time::Duration::from_secs(config.download_timeout_secs),
        config.accept_invalid_certs,
    )
    .context("Failed to build HTTP client")?;

    let mut summary = ExtractionSummary {
        objects: objects.len(),
        transcriptions_found: transcriptions.len(),
        ..Default::default()
    };

    let pb = ProgressBar::new(objects.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for (i, obj) in objects.iter().enumerate() {
        let name = item_name(i + 1, &obj.object_id);

        if let Some(url) = &obj.object_url {
            let dest = images_dir.join(format!("{}.jpg", name));
            if dest.exists() {
                info!("Image {} already exists: {}", i + 1, dest.display());
                summary.images_skipped += 1;
            } else {
                match download::download_file(&client, url, &dest).await {
                    Ok(bytes) => {
                        info!("Saved {} ({} bytes)", dest.display(), bytes);
                        summary.images_downloaded += 1;
                    }
                    Err(e) => {
                        warn!("Error downloading {}: {}", url, e);
                        summary.images_failed += 1;
                    }
                }
            }
        } else {
            info!("No image URL for object {}", obj.object_id);
        }

        match transcriptions.get(&obj.object_id) {
            Some(text) => {
                let dest = transcriptions_dir.join(format!("{}.txt", name));
                fs::write(&dest, text)
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
                info!("Saved {}: {}", dest.display(), preview(text, 100));
                summary.transcriptions_written += 1;
            }
            None => info!("No transcription found for object {}", obj.object_id),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(summary)
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

/// `(file name, size)` for each regular file in `dir`, sorted by name.
pub fn list_dir(dir: &Path) -> Result<Vec<(String, u64)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            entries.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn search_response(objects: Value) -> CapturedResponse {
        CapturedResponse {
            url: "https://catalog.archives.gov/proxy/records/search?naId_is=54928953".into(),
            data: json!({
                "body": {"hits": {"hits": [
                    {"_source": {"record": {"title": "no objects"}}},
                    {"_source": {"record": {"digitalObjects": objects}}}
                ]}}
            }),
        }
    }

    fn contributions(items: Value) -> CapturedResponse {
        CapturedResponse {
            url: "https://catalog.archives.gov/proxy/contributions/targetNaId/54928953".into(),
            data: items,
        }
    }

    #[test]
    fn digital_objects_come_from_search_hits() {
        let responses = vec![search_response(json!([
            {"objectId": "54928954", "objectUrl": "https://s3/1.jpg"},
            {"objectId": 54928955, "objectUrl": ""}
        ]))];
        let objs = find_digital_objects(&responses);
        assert_eq!(
            objs,
            vec![
                DigitalObject {
                    object_id: "54928954".into(),
                    object_url: Some("https://s3/1.jpg".into())
                },
                DigitalObject {
                    object_id: "54928955".into(),
                    object_url: None
                },
            ]
        );
    }

    #[test]
    fn later_search_response_wins() {
        let responses = vec![
            search_response(json!([{"objectId": "1", "objectUrl": "https://s3/a.jpg"}])),
            search_response(json!([{"objectId": "2", "objectUrl": "https://s3/b.jpg"}])),
            search_response(json!([])),
        ];
        let objs = find_digital_objects(&responses);
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].object_id, "2");
    }

    #[test]
    fn other_contribution_types_are_ignored() {
        let responses = vec![contributions(json!([
            {"targetObjectId": "10", "contributionType": "tag", "contribution": "pension"},
            {"targetObjectId": "10", "contributionType": "comment", "contribution": "nice"},
            {"targetObjectId": 11, "contributionType": "transcription", "contribution": "State of Virginia"},
            {"targetObjectId": "12", "contributionType": "transcription", "contribution": ""}
        ]))];
        let t = collect_transcriptions(&responses, DuplicatePolicy::First);
        assert_eq!(t.len(), 1);
        assert!(!t.contains_key("10"));
        assert!(!t.contains_key("12"));
        assert_eq!(t["11"], "State of Virginia");
    }

    #[test]
    fn duplicate_policies() {
        let responses = vec![contributions(json!([
            {"targetObjectId": "7", "contributionType": "transcription", "contribution": "first"},
            {"targetObjectId": "7", "contributionType": "transcription", "contribution": "second"}
        ]))];
        assert_eq!(collect_transcriptions(&responses, DuplicatePolicy::First)["7"], "first");
        assert_eq!(collect_transcriptions(&responses, DuplicatePolicy::Last)["7"], "second");
        assert_eq!(
            collect_transcriptions(&responses, DuplicatePolicy::Concatenate)["7"],
            "first\n\nsecond"
        );
    }

    #[test]
    fn contributions_must_be_arrays_on_contribution_urls() {
        let responses = vec![
            contributions(json!({"contributionType": "transcription"})),
            CapturedResponse {
                url: "https://catalog.archives.gov/proxy/records/1".into(),
                data: json!([{"targetObjectId": "1", "contributionType": "transcription", "contribution": "x"}]),
            },
        ];
        assert!(collect_transcriptions(&responses, DuplicatePolicy::First).is_empty());
    }

    #[test]
    fn item_names_are_zero_padded() {
        assert_eq!(item_name(1, "54928954"), "item_01_54928954");
        assert_eq!(item_name(14, "x"), "item_14_x");
        assert_eq!(item_name(120, "x"), "item_120_x");
    }

    #[tokio::test]
    async fn extraction_pairs_images_with_transcriptions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lz/one.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"JPEG-1".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lz/two.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let responses = vec![
            search_response(json!([
                {"objectId": "101", "objectUrl": format!("{}/lz/one.jpg", server.uri())},
                {"objectId": "102", "objectUrl": format!("{}/lz/two.jpg", server.uri())}
            ])),
            contributions(json!([
                {"targetObjectId": "101", "contributionType": "transcription", "contribution": "page one"},
                {"targetObjectId": "102", "contributionType": "tag", "contribution": "not text"}
            ])),
        ];
        artifacts::write_json(&config.api_responses_path(), &responses).unwrap();

        let summary = run_extract(&config).await.unwrap();

        assert_eq!(summary.objects, 2);
        assert_eq!(summary.images_downloaded, 1);
        assert_eq!(summary.images_failed, 1);
        assert_eq!(summary.transcriptions_written, 1);

        let image = config.images_dir().join("item_01_101.jpg");
        assert_eq!(fs::read(&image).unwrap(), b"JPEG-1");
        let text = config.transcriptions_dir().join("item_01_101.txt");
        assert_eq!(fs::read_to_string(&text).unwrap(), "page one");

        assert!(!config.images_dir().join("item_02_102.jpg").exists());
        assert!(!config.transcriptions_dir().join("item_02_102.txt").exists());
        assert_eq!(
            list_dir(&config.images_dir()).unwrap(),
            vec![("item_01_101.jpg".to_string(), 6)]
        );

        // a second run skips the image that is already on disk
        let again = run_extract(&config).await.unwrap();
        assert_eq!(again.images_skipped, 1);
        assert_eq!(again.images_downloaded, 0);
    }

    #[tokio::test]
    async fn missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(run_extract(&config).await.is_err());
    }
}
