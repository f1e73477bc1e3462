use std::pin::Pin;

use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::{Error, Result};

/// A remote image body, bounded to the configured download limit.
pub struct Download {
    pub body: Pin<Box<dyn AsyncRead + Send>>,
    pub content_type: String,
    /// Last path segment of the final (post-redirect) URL.
    pub file_name: String,
}

/// Checks that `raw` is an absolute http(s) URL and, when `allowed_hosts` is
/// not empty, that its host is listed.
pub fn validate_http_url(raw: &str, allowed_hosts: &[String]) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::bad_request("url must not be empty"));
    }
    let parsed =
        Url::parse(trimmed).map_err(|err| Error::bad_request(format!("invalid url: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::bad_request(format!(
                "only http and https urls are allowed, got {scheme}"
            )));
        }
    }
    if !allowed_hosts.is_empty() {
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if !allowed_hosts.iter().any(|allowed| *allowed == host) {
            return Err(Error::bad_request(format!("host '{host}' is not allowed")));
        }
    }
    Ok(parsed)
}

/// Issues the GET for `url` and hands back its body as a reader that stops
/// after `limit` bytes.
pub async fn open(client: &reqwest::Client, url: Url, limit: u64) -> Result<Download> {
    let response = client.get(url).send().await.map_err(|err| {
        tracing::warn!(error = %err, "image download failed");
        Error::service_unavailable(format!("image download failed: {err}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::service_unavailable(format!(
            "image download failed ({})",
            status.as_u16()
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .unwrap_or_default();
    let file_name = response
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_string();

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    let body = StreamReader::new(stream).take(limit);

    Ok(Download {
        body: Box::pin(body),
        content_type,
        file_name,
    })
}
