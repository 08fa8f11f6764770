//! rget Core - Transfer Engine
//!
//! This crate fetches HTTP(S) resources to local files. It resumes partial
//! files, retries transient failures, caps bandwidth and verifies SHA-256
//! digests.

mod batch;
pub mod engine;
mod error;
pub mod plan;
pub mod probe;
pub mod space;
pub mod verify;

pub use batch::*;
pub use error::*;

use engine::{StreamOutcome, TransferEngine};
use rget_types::{
    FetchEvent, Phase, ResumeDecision, Settings, TransferOutcome, TransferReport, TransferRequest,
};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use verify::VerifyOutcome;

/// Runs fetches with one shared HTTP client and settings bundle
pub struct Fetcher {
    settings: Arc<Settings>,
    client: Client,
    /// Event broadcaster
    event_tx: broadcast::Sender<FetchEvent>,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Create a fetcher, building the HTTP client from `settings`
    pub fn new(settings: Settings) -> Result<Self, RgetError> {
        let mut builder = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.request_timeout())
            .danger_accept_invalid_certs(!settings.verify_tls);

        if let Some(proxy) = &settings.proxy {
            // The proxy URL may carry credentials, so it is not echoed
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|_| RgetError::InvalidInput("invalid proxy URL".to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;
        let (event_tx, _) = broadcast::channel(1000);

        Ok(Self {
            settings: Arc::new(settings),
            client,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to fetch events
    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the current and all later fetches
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by every suspension point of a fetch
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch one resource: probe, plan, transfer, verify.
    pub async fn fetch(&self, request: &TransferRequest) -> Result<TransferReport, RgetError> {
        let url = request.url.as_str();

        if is_torrent(url) {
            return Err(RgetError::UnsupportedSource(format!(
                "{} (torrents and magnet links are not supported)",
                url
            )));
        }
        let parsed = url::Url::parse(url).map_err(|_| RgetError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RgetError::InvalidUrl(url.to_string()));
        }
        if self.cancel.is_cancelled() {
            return Err(RgetError::Cancelled);
        }

        let started = Instant::now();
        let timeout = self.settings.request_timeout();

        let digest = match &request.expected_digest {
            Some(digest) => Some(digest.clone()),
            None if self.settings.fetch_remote_checksum => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(RgetError::Cancelled),
                    digest = verify::fetch_sidecar_digest(&self.client, url, timeout) => digest,
                }
            }
            None => None,
        };

        self.emit_phase(url, Phase::Probing);
        let meta = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RgetError::Cancelled),
            meta = probe::probe(&self.client, url, timeout) => meta,
        };

        let mut target = request.target.clone();
        let mut relocated = false;
        if !request.explicit_path {
            if let Some(name) = meta.as_ref().and_then(|m| m.suggested_filename.as_deref()) {
                let suggested = target.with_file_name(name);
                if suggested != target {
                    info!("Server suggested filename, saving as {}", suggested.display());
                    target = suggested;
                    relocated = true;
                }
            }
        }

        let local = plan::inspect_local(&target).await?;
        let decision = plan::plan(local, request.resume, meta.as_ref());
        debug!("Resume decision for {}: {:?}", target.display(), decision);

        let (path, outcome, bytes_transferred) = match decision {
            ResumeDecision::AlreadyComplete { size } => {
                info!("{} already complete ({} bytes)", target.display(), size);
                (target, TransferOutcome::AlreadyComplete, 0)
            }
            ResumeDecision::Transfer(plan) => {
                let engine = TransferEngine::new(
                    self.client.clone(),
                    self.settings.clone(),
                    self.event_tx.clone(),
                    self.cancel.clone(),
                );
                let may_relocate = !request.explicit_path && !relocated;
                let result = engine.run(url, &target, may_relocate, plan).await?;
                match result.outcome {
                    StreamOutcome::Completed { bytes } => {
                        (result.path, TransferOutcome::Downloaded, bytes)
                    }
                    StreamOutcome::AlreadyComplete => {
                        (result.path, TransferOutcome::AlreadyComplete, 0)
                    }
                }
            }
        };

        let file_size = tokio::fs::metadata(&path).await?.len();

        let verified = match &digest {
            Some(expected) => {
                self.emit_phase(url, Phase::Hashing);
                let outcome = verify::verify_file(
                    &path,
                    expected,
                    self.settings.hash_chunk_size,
                    &self.event_tx,
                )
                .await?;
                match outcome {
                    VerifyOutcome::Match => Some(true),
                    VerifyOutcome::Skipped => None,
                }
            }
            None => None,
        };

        let report = TransferReport {
            url: url.to_string(),
            path,
            outcome,
            bytes_transferred,
            file_size,
            elapsed_ms: started.elapsed().as_millis() as u64,
            verified,
        };

        info!(
            "Finished {} -> {} ({} bytes on disk)",
            report.url,
            report.path.display(),
            report.file_size
        );
        let _ = self.event_tx.send(FetchEvent::Finished {
            report: report.clone(),
        });

        Ok(report)
    }

    fn emit_phase(&self, url: &str, phase: Phase) {
        let _ = self.event_tx.send(FetchEvent::Phase {
            url: url.to_string(),
            phase,
        });
    }
}
