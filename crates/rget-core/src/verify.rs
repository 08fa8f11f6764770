//! SHA-256 verification of finished files

use crate::error::RgetError;
use futures::StreamExt;
use rget_types::{FetchEvent, Phase, Sha256Digest};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Largest `<url>.sha256` body that is read
const SIDECAR_MAX_BYTES: usize = 64 * 1024;

/// Result of a successful verification call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match,
    /// Empty file; there is nothing meaningful to hash
    Skipped,
}

/// Hash `path` and compare it with `expected`.
///
/// On mismatch the file is deleted and `ChecksumMismatch` returned.
pub async fn verify_file(
    path: &Path,
    expected: &Sha256Digest,
    block_size: usize,
    events: &broadcast::Sender<FetchEvent>,
) -> Result<VerifyOutcome, RgetError> {
    let size = tokio::fs::metadata(path).await?.len();
    if size == 0 {
        warn!("{} is empty, skipping checksum verification", path.display());
        return Ok(VerifyOutcome::Skipped);
    }

    info!("Verifying SHA-256 of {}", path.display());
    let actual = hash_file(path, block_size, Some((events, size))).await?;

    if expected.matches(&actual) {
        info!("Checksum OK: {}", actual);
        return Ok(VerifyOutcome::Match);
    }

    error!(
        "Checksum mismatch for {}: expected {}, got {}",
        path.display(),
        expected,
        actual
    );
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to delete corrupt file {}: {}", path.display(), e);
    }

    Err(RgetError::ChecksumMismatch {
        path: path.to_path_buf(),
        expected: expected.to_string(),
        actual,
    })
}

async fn hash_file(
    path: &Path,
    block_size: usize,
    progress: Option<(&broadcast::Sender<FetchEvent>, u64)>,
) -> Result<String, RgetError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut done = 0u64;

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        done += n as u64;

        if let Some((events, total)) = progress {
            let _ = events.send(FetchEvent::Progress {
                phase: Phase::Hashing,
                done,
                total: Some(total),
            });
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Look for a published digest at `<url>.sha256`.
///
/// Any failure is logged and treated as "no digest".
pub async fn fetch_sidecar_digest(client: &Client, url: &str, timeout: Duration) -> Option<Sha256Digest> {
    let sidecar = format!("{}.sha256", url);
    debug!("Looking for checksum at {}", sidecar);

    let response = match client.get(&sidecar).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("No checksum sidecar ({}): {}", sidecar, e);
            return None;
        }
    };
    if !response.status().is_success() {
        debug!("No checksum sidecar ({}): HTTP {}", sidecar, response.status().as_u16());
        return None;
    }

    if response.content_length().is_some_and(|len| len > SIDECAR_MAX_BYTES as u64) {
        warn!("Ignoring oversized checksum file {}", sidecar);
        return None;
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) if body.len() + chunk.len() <= SIDECAR_MAX_BYTES => body.extend_from_slice(&chunk),
            Ok(_) => {
                warn!("Ignoring oversized checksum file {}", sidecar);
                return None;
            }
            Err(e) => {
                warn!("Failed to read checksum sidecar {}: {}", sidecar, e);
                return None;
            }
        }
    }
    let body = String::from_utf8_lossy(&body);

    match parse_sidecar(&body) {
        Some(digest) => {
            info!("Using published SHA-256 from {}", sidecar);
            Some(digest)
        }
        None => {
            warn!("Ignoring malformed checksum file {}", sidecar);
            None
        }
    }
}

/// First whitespace token of the first non-empty line, if it is a digest
pub fn parse_sidecar(body: &str) -> Option<Sha256Digest> {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split_whitespace().next())
        .and_then(Sha256Digest::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_hash_file_small_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        // Block size smaller than the file exercises the read loop
        assert_eq!(hash_file(&path, 3, None).await.unwrap(), HELLO_WORLD);
    }

    #[tokio::test]
    async fn test_verify_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        let (tx, mut rx) = broadcast::channel(64);

        let expected = Sha256Digest::parse(&HELLO_WORLD.to_uppercase()).unwrap();
        let outcome = verify_file(&path, &expected, 4, &tx).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Match);

        let mut last = 0;
        while let Ok(FetchEvent::Progress { phase: Phase::Hashing, done, .. }) = rx.try_recv() {
            last = done;
        }
        assert_eq!(last, 11);
    }

    #[tokio::test]
    async fn test_verify_mismatch_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        let (tx, _rx) = broadcast::channel(64);

        let wrong = Sha256Digest::parse(&"0".repeat(64)).unwrap();
        let err = verify_file(&path, &wrong, 1024, &tx).await.unwrap_err();
        assert!(matches!(err, RgetError::ChecksumMismatch { ref actual, .. } if actual == HELLO_WORLD));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_verify_skips_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        tokio::fs::write(&path, b"").await.unwrap();
        let (tx, _rx) = broadcast::channel(4);

        let wrong = Sha256Digest::parse(&"0".repeat(64)).unwrap();
        assert_eq!(verify_file(&path, &wrong, 1024, &tx).await.unwrap(), VerifyOutcome::Skipped);
        assert!(path.exists());
    }

    #[test]
    fn test_parse_sidecar() {
        let body = format!("\n\n{}  file.iso\nsomething else\n", HELLO_WORLD);
        assert_eq!(parse_sidecar(&body).unwrap().as_str(), HELLO_WORLD);
        assert!(parse_sidecar("not-a-digest file.iso").is_none());
        assert!(parse_sidecar("").is_none());
    }

    #[tokio::test]
    async fn test_fetch_sidecar_digest() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/file.iso.sha256");
            then.status(200).body(format!("{}  file.iso\n", HELLO_WORLD));
        });
        server.mock(|when, then| {
            when.method(GET).path("/other.iso.sha256");
            then.status(404);
        });

        let client = Client::new();
        let found = fetch_sidecar_digest(&client, &server.url("/file.iso"), Duration::from_secs(5)).await;
        assert_eq!(found.unwrap().as_str(), HELLO_WORLD);

        let missing = fetch_sidecar_digest(&client, &server.url("/other.iso"), Duration::from_secs(5)).await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_oversized_sidecar_is_ignored() {
        let server = MockServer::start();
        let mut huge = format!("{}  file.iso\n", HELLO_WORLD);
        huge.push_str(&"#".repeat(SIDECAR_MAX_BYTES));
        server.mock(|when, then| {
            when.method(GET).path("/file.iso.sha256");
            then.status(200).body(huge);
        });

        let found = fetch_sidecar_digest(&Client::new(), &server.url("/file.iso"), Duration::from_secs(5)).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_unsized_oversized_sidecar_stops_reading() {
        // No Content-Length: the body runs until the connection closes
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            socket.write_all(format!("{}  file.iso\n", HELLO_WORLD).as_bytes()).await.unwrap();
            let filler = vec![b'#'; 8 * 1024];
            for _ in 0..16 {
                if socket.write_all(&filler).await.is_err() {
                    return;
                }
            }
        });

        let url = format!("http://{}/file.iso", addr);
        let found = fetch_sidecar_digest(&Client::new(), &url, Duration::from_secs(5)).await;
        assert!(found.is_none());
    }
}
