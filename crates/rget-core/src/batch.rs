//! URL lists and sequential batch runs

use crate::error::RgetError;
use crate::Fetcher;
use rget_types::{BatchFailure, BatchSummary, TransferRequest};
use std::path::Path;
use tracing::{error, info};

/// One URL per line; blank lines and `#` comments are skipped
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub async fn read_url_list(path: &Path) -> Result<Vec<String>, RgetError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        RgetError::InvalidInput(format!("cannot read URL list {}: {}", path.display(), e))
    })?;
    Ok(parse_url_list(&content))
}

/// `http(s)://` with a host, or a magnet link
pub fn looks_like_url(s: &str) -> bool {
    if s.starts_with("magnet:") {
        return true;
    }
    match url::Url::parse(s) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Magnet links and `.torrent` files, which this tool does not fetch
pub fn is_torrent(s: &str) -> bool {
    if s.starts_with("magnet:") {
        return true;
    }
    let path = url::Url::parse(s)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| s.to_string());
    path.to_ascii_lowercase().ends_with(".torrent")
}

impl Fetcher {
    /// Fetch `requests` one after another.
    ///
    /// A failed URL is recorded and the run moves on; cancellation and input
    /// errors stop the whole batch.
    pub async fn fetch_all(&self, requests: Vec<TransferRequest>) -> Result<BatchSummary, RgetError> {
        let mut summary = BatchSummary {
            total: requests.len(),
            ..BatchSummary::default()
        };

        for (index, request) in requests.iter().enumerate() {
            if summary.total > 1 {
                info!("[{}/{}] {}", index + 1, summary.total, request.url);
            }

            match self.fetch(request).await {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.reports.push(report);
                }
                Err(e) => match e.kind().failure_kind() {
                    Some(kind) => {
                        error!("Failed {}: {}", request.url, e);
                        summary.failures.push(BatchFailure {
                            url: request.url.clone(),
                            kind,
                            message: e.to_string(),
                        });
                    }
                    None => return Err(e),
                },
            }
        }

        Ok(summary)
    }
}
