//! Shared types for rget
//!
//! This crate contains the plain data structures passed between
//! the transfer engine and the command-line front end.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Settings Types
// ============================================================================

/// Resolved settings bundle.
///
/// Built once by the front end (defaults, then config file, then flags)
/// and handed to the engine, which never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub user_agent: String,
    /// Maximum number of attempts when opening a stream
    pub max_retries: u32,
    /// First retry delay in seconds; doubles after every retry
    pub base_backoff_secs: f64,
    /// Upper bound for a single retry delay in seconds
    pub max_backoff_secs: f64,
    /// Timeout for the probe and sidecar requests, also the connect timeout
    pub request_timeout_secs: u64,
    /// Timeout for opening the stream and for each chunk read
    pub stream_timeout_secs: u64,
    /// Write size of the transfer loop in bytes
    pub chunk_size: usize,
    /// Read size of the verifier in bytes
    pub hash_chunk_size: usize,
    /// Proxy URL applied to both HTTP and HTTPS
    pub proxy: Option<String>,
    pub verify_tls: bool,
    pub resume_default: bool,
    /// Bandwidth ceiling in bytes per second (0 = unlimited)
    pub bandwidth_limit: u64,
    /// Look for `<url>.sha256` when no digest was supplied
    pub fetch_remote_checksum: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: format!("rget/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 3,
            base_backoff_secs: 1.0,
            max_backoff_secs: 60.0,
            request_timeout_secs: 15,
            stream_timeout_secs: 30,
            chunk_size: 1 << 18,
            hash_chunk_size: 1 << 20,
            proxy: None,
            verify_tls: true,
            resume_default: true,
            bandwidth_limit: 0,
            fetch_remote_checksum: true,
        }
    }
}

fn backoff_duration(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(fallback)
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    /// Unrepresentable values (infinite, too large) fall back to one second
    pub fn base_backoff(&self) -> Duration {
        backoff_duration(self.base_backoff_secs, Duration::from_secs(1))
    }

    /// Unrepresentable values fall back to sixty seconds
    pub fn max_backoff(&self) -> Duration {
        backoff_duration(self.max_backoff_secs, Duration::from_secs(60))
    }

    /// Platform directory holding `rget/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rget")
            .join("config.toml")
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// A validated SHA-256 digest, stored as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parse a digest, accepting either case. Returns `None` unless the
    /// input is exactly 64 hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a hex string
    pub fn matches(&self, hex: &str) -> bool {
        self.0.eq_ignore_ascii_case(hex.trim())
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid SHA-256 digest: {}", value))
    }
}

impl From<Sha256Digest> for String {
    fn from(digest: Sha256Digest) -> Self {
        digest.0
    }
}

/// One resource to fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub url: String,
    /// Where to write; relative paths resolve against the working directory
    pub target: PathBuf,
    /// The user named `target` explicitly, so server filename hints are ignored
    pub explicit_path: bool,
    pub resume: bool,
    pub expected_digest: Option<Sha256Digest>,
}

impl TransferRequest {
    /// Request whose target is derived from the URL inside `dir`
    pub fn into_dir(url: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        let url = url.into();
        let target = dir.into().join(filename_from_url(&url));
        Self {
            url,
            target,
            explicit_path: false,
            resume: true,
            expected_digest: None,
        }
    }

    /// Request written to exactly `target`
    pub fn to_path(url: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            target: target.into(),
            explicit_path: true,
            resume: true,
            expected_digest: None,
        }
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_digest(mut self, digest: Option<Sha256Digest>) -> Self {
        self.expected_digest = digest;
        self
    }
}

/// Last non-empty path segment of `url`, percent-decoded, or `index.html`
pub fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
        })
        .and_then(|s| bare_filename(&s))
        .unwrap_or_else(|| "index.html".to_string())
}

/// Reduce a remote-supplied name to its final path component.
///
/// Both separators are treated as directory boundaries regardless of
/// platform. Returns `None` for names that end up empty, `.` or `..`.
pub fn bare_filename(name: &str) -> Option<String> {
    let name = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match name {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Transfer Types
// ============================================================================

/// What the preflight probe learned about the remote resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub total_size: Option<u64>,
    pub accepts_ranges: bool,
    pub suggested_filename: Option<String>,
}

/// How the target file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    Truncate,
    Append,
}

/// Where a transfer starts and what it aims for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePlan {
    pub offset: u64,
    pub mode: OpenMode,
    pub total_size: Option<u64>,
}

impl ResumePlan {
    pub fn fresh(total_size: Option<u64>) -> Self {
        Self {
            offset: 0,
            mode: OpenMode::Truncate,
            total_size,
        }
    }

    /// Value for the `Range` header, if this plan continues a partial file
    pub fn range_header(&self) -> Option<String> {
        match self.mode {
            OpenMode::Append if self.offset > 0 => Some(format!("bytes={}-", self.offset)),
            _ => None,
        }
    }
}

/// Result of resume planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResumeDecision {
    /// Local file already has the full remote size; nothing to transfer
    AlreadyComplete { size: u64 },
    Transfer(ResumePlan),
}

/// How a fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Downloaded,
    AlreadyComplete,
}

/// Summary of a finished fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    pub url: String,
    pub path: PathBuf,
    pub outcome: TransferOutcome,
    /// Bytes received in this session
    pub bytes_transferred: u64,
    /// Size of the file on disk afterwards
    pub file_size: u64,
    pub elapsed_ms: u64,
    /// `None` when no digest was available or the file was empty
    pub verified: Option<bool>,
}

impl TransferReport {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Session throughput in bytes per second
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return self.bytes_transferred;
        }
        (self.bytes_transferred as f64 / secs) as u64
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Stage of a fetch, as shown by the progress display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Probing,
    Connecting,
    Downloading,
    Hashing,
}

/// Events emitted by the engine to the front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FetchEvent {
    Phase {
        url: String,
        phase: Phase,
    },
    Progress {
        phase: Phase,
        done: u64,
        total: Option<u64>,
    },
    Retrying {
        attempt: u32,
        max_attempts: u32,
        wait_ms: u64,
        reason: String,
    },
    Finished {
        report: TransferReport,
    },
}

// ============================================================================
// Batch Types
// ============================================================================

/// Failure class of one URL in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transfer,
    Verification,
    Precondition,
}

/// A URL that failed without stopping the batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub url: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Result of running a list of requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub reports: Vec<TransferReport>,
    pub failures: Vec<BatchFailure>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
