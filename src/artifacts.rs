use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One intercepted network response whose body parsed as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub data: serde_json::Value,
}

/// Write `value` as pretty JSON, replacing any existing file.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("{} is not valid JSON", path.display()))
}

pub fn read_captured(path: &Path) -> Result<Vec<CapturedResponse>> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn captured_responses_survive_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_responses.json");
        let captured = vec![
            CapturedResponse {
                url: "https://catalog.archives.gov/proxy/records/search?naId=1".into(),
                data: json!({"body": {"hits": {"hits": []}}}),
            },
            CapturedResponse {
                url: "https://catalog.archives.gov/proxy/contributions/targetNaId/1".into(),
                data: json!([]),
            },
        ];

        write_json(&path, &captured).unwrap();
        assert_eq!(read_captured(&path).unwrap(), captured);
    }

    #[test]
    fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, "stale content that is much longer than the new one").unwrap();

        write_json(&path, &Vec::<CapturedResponse>::new()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "[]");
    }

    #[test]
    fn invalid_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_captured(&path).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
