//! Remote metadata probe and response header parsing

use rget_types::{bare_filename, RemoteMetadata};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Send a HEAD request and collect what the server says about `url`.
///
/// Never fails: a network error or non-success status yields `None` and the
/// caller proceeds without metadata.
pub async fn probe(client: &Client, url: &str, timeout: Duration) -> Option<RemoteMetadata> {
    info!("Probing URL: {}", url);

    let response = match client.head(url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Probe failed for {}: {}", url, e);
            return None;
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!("Probe for {} returned HTTP {}", url, status.as_u16());
        return None;
    }

    let meta = metadata_from_headers(response.headers());
    debug!(
        "Probe result: size={:?} ranges={} filename={:?}",
        meta.total_size, meta.accepts_ranges, meta.suggested_filename
    );
    Some(meta)
}

pub fn metadata_from_headers(headers: &HeaderMap) -> RemoteMetadata {
    RemoteMetadata {
        total_size: content_length(headers).filter(|&len| len > 0),
        accepts_ranges: headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("bytes"))
            .unwrap_or(false),
        suggested_filename: headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition),
    }
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Extract a safe filename from a `Content-Disposition` value.
///
/// `filename*=UTF-8''...` wins over plain `filename=`. The result is
/// reduced to its last path component.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';') {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();

        match key.as_str() {
            "filename" => plain = Some(raw.trim_matches('"').to_string()),
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = raw.rsplit('\'').next().unwrap_or(raw).trim_matches('"');
                extended = urlencoding::decode(encoded).ok().map(|s| s.into_owned());
            }
            _ => {}
        }
    }

    extended
        .and_then(|name| bare_filename(&name))
        .or_else(|| plain.and_then(|name| bare_filename(&name)))
}

/// A parsed `Content-Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte of the body; `None` for the `bytes */N` form
    pub start: Option<u64>,
    pub end: Option<u64>,
    /// Full resource size; `None` when the server sent `*`
    pub total: Option<u64>,
}

/// Parse `bytes 400-999/1000`, `bytes */1000` or `bytes 0-99/*`
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;

    let total = match total.trim() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };

    let (start, end) = match range.trim() {
        "*" => (None, None),
        r => {
            let (s, e) = r.split_once('-')?;
            (Some(s.trim().parse().ok()?), Some(e.trim().parse().ok()?))
        }
    };

    Some(ContentRange { start, end, total })
}
