use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("truncated download: expected {expected} bytes, got {written}")]
    Truncated { expected: u64, written: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_client(timeout: Duration, accept_invalid_certs: bool) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn stream_into(client: &Client, url: &str, part: &Path) -> Result<u64, DownloadError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let expected = resp.content_length();
    let mut file = tokio::fs::File::create(part).await?;
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = expected.filter(|&n| n != written) {
        return Err(DownloadError::Truncated { expected, written });
    }
    Ok(written)
}

/// Download `url` to `dest`, returning the byte count.
///
/// Bytes land in `<dest>.part` first and are renamed into place only after
/// the whole body arrived, so `dest` never holds a partial image.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<u64, DownloadError> {
    let part = part_path(dest);
    match stream_into(client, url, &part).await {
        Ok(written) => {
            tokio::fs::rename(&part, dest).await?;
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}
