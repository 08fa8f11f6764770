//! Streaming transfer
//!
//! Opens the body stream (under the retry policy), checks that the reply
//! matches the plan, then writes the body to the target file in chunks.
//! Once bytes are flowing a failure is final for this call; the next run
//! resumes from whatever reached the disk.

use crate::engine::retry::{with_retry, RetryPolicy};
use crate::engine::throttle::Throttle;
use crate::error::RgetError;
use crate::probe::{content_length, parse_content_disposition, parse_content_range};
use crate::space;
use futures::StreamExt;
use rget_types::{FetchEvent, OpenMode, Phase, ResumePlan, Settings};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a stream call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Body written; `bytes` received in this session
    Completed { bytes: u64 },
    /// Server reported the range starts at the end of the resource
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResult {
    /// Final location of the file, after any server-suggested rename
    pub path: PathBuf,
    pub outcome: StreamOutcome,
}

/// Writes one remote body to disk
#[derive(Clone)]
pub struct TransferEngine {
    client: Client,
    settings: Arc<Settings>,
    events: broadcast::Sender<FetchEvent>,
    cancel: CancellationToken,
}

impl TransferEngine {
    pub fn new(
        client: Client,
        settings: Arc<Settings>,
        events: broadcast::Sender<FetchEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            settings,
            events,
            cancel,
        }
    }

    /// Fetch `url` into `target` according to `plan`.
    ///
    /// When `may_relocate` is set and the file is written from scratch, a
    /// `Content-Disposition` name on the response moves the target within
    /// its directory.
    pub async fn run(
        &self,
        url: &str,
        target: &Path,
        may_relocate: bool,
        plan: ResumePlan,
    ) -> Result<StreamResult, RgetError> {
        let _ = self.events.send(FetchEvent::Phase {
            url: url.to_string(),
            phase: Phase::Connecting,
        });

        let range = plan.range_header();
        if let Some(range) = &range {
            info!("Resuming {} from byte {}", target.display(), plan.offset);
            debug!("Range: {}", range);
        }

        let response = self.open_stream(url, range.as_deref()).await?;
        let status = response.status();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let body_len = content_length(response.headers());
        debug!(
            "Stream opened: HTTP {} content-length={:?} content-range={:?}",
            status.as_u16(),
            body_len,
            content_range
        );

        // A ranged body belongs to the file it was planned against
        let relocatable = may_relocate && plan.mode == OpenMode::Truncate;

        let mut plan = plan;
        if plan.mode == OpenMode::Append {
            match status {
                StatusCode::RANGE_NOT_SATISFIABLE => {
                    return match content_range.and_then(|r| r.total) {
                        Some(total) if total == plan.offset => {
                            info!("{} is already complete ({} bytes)", target.display(), total);
                            Ok(StreamResult {
                                path: target.to_path_buf(),
                                outcome: StreamOutcome::AlreadyComplete,
                            })
                        }
                        total => Err(RgetError::InvalidResponse(format!(
                            "range starting at byte {} not satisfiable (remote size {})",
                            plan.offset,
                            total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
                        ))),
                    };
                }
                StatusCode::PARTIAL_CONTENT => {
                    if let Some(start) = content_range.and_then(|r| r.start) {
                        if start != plan.offset {
                            return Err(RgetError::InvalidResponse(format!(
                                "requested bytes from {} but server sent from {}",
                                plan.offset, start
                            )));
                        }
                    }
                }
                _ => {
                    warn!(
                        "Server ignored the range request (HTTP {}), restarting {} from the beginning",
                        status.as_u16(),
                        target.display()
                    );
                    plan = ResumePlan::fresh(plan.total_size);
                }
            }
        }

        let total = plan
            .total_size
            .or_else(|| content_range.and_then(|r| r.total))
            .or_else(|| body_len.map(|len| len + plan.offset));

        let mut path = target.to_path_buf();
        if relocatable {
            let suggested = response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_disposition);
            if let Some(name) = suggested {
                path = target.with_file_name(&name);
                if path != target {
                    info!("Server suggested filename, saving as {}", path.display());
                }
            }
        }

        if let Some(total) = total {
            let required = match plan.mode {
                OpenMode::Truncate => total,
                OpenMode::Append => total.saturating_sub(plan.offset),
            };
            space::ensure_space(&path, required)?;
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        match plan.mode {
            OpenMode::Truncate => {
                options.write(true).truncate(true);
            }
            OpenMode::Append => {
                options.append(true);
            }
        }
        let mut file = options.open(&path).await?;

        let _ = self.events.send(FetchEvent::Phase {
            url: url.to_string(),
            phase: Phase::Downloading,
        });

        let started = Instant::now();
        match self.write_body(response, &mut file, &plan, total, body_len).await {
            Ok(bytes) => {
                let elapsed = started.elapsed().as_secs_f64();
                let speed = if elapsed > 0.0 { bytes as f64 / elapsed } else { bytes as f64 };
                info!(
                    "Saved {} ({} bytes in {:.1}s, {:.0} B/s)",
                    path.display(),
                    bytes,
                    elapsed,
                    speed
                );
                Ok(StreamResult {
                    path,
                    outcome: StreamOutcome::Completed { bytes },
                })
            }
            Err(RgetError::Cancelled) => {
                keep_partial(&mut file, &path).await;
                warn!("Cancelled; partial file kept at {}", path.display());
                Err(RgetError::Cancelled)
            }
            Err(e) => {
                match plan.mode {
                    OpenMode::Truncate => {
                        drop(file);
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => debug!("Removed incomplete file {}", path.display()),
                            Err(rm) => {
                                warn!("Failed to remove incomplete file {}: {}", path.display(), rm)
                            }
                        }
                    }
                    OpenMode::Append => {
                        keep_partial(&mut file, &path).await;
                        warn!("Transfer interrupted; partial file kept at {}", path.display())
                    }
                }
                Err(e)
            }
        }
    }

    /// Send the GET, retrying transient failures
    async fn open_stream(&self, url: &str, range: Option<&str>) -> Result<Response, RgetError> {
        let policy = RetryPolicy::from_settings(&self.settings);
        let timeout = self.settings.stream_timeout();

        with_retry(&policy, &self.cancel, &self.events, |attempt| {
            let mut request = self.client.get(url);
            if let Some(range) = range {
                request = request.header(RANGE, range);
            }
            async move {
                debug!("Opening stream for {} (attempt {})", url, attempt);
                let response = tokio::time::timeout(timeout, request.send())
                    .await
                    .map_err(|_| RgetError::Timeout(timeout))??;

                let status = response.status();
                if status.is_success()
                    || (range.is_some() && status == StatusCode::RANGE_NOT_SATISFIABLE)
                {
                    Ok(response)
                } else {
                    Err(RgetError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    })
                }
            }
        })
        .await
    }

    /// Copy the body into `file`, returning the bytes written this session
    async fn write_body(
        &self,
        response: Response,
        file: &mut File,
        plan: &ResumePlan,
        total: Option<u64>,
        body_len: Option<u64>,
    ) -> Result<u64, RgetError> {
        let chunk_size = self.settings.chunk_size.max(1);
        let timeout = self.settings.stream_timeout();
        let mut throttle = Throttle::new(self.settings.bandwidth_limit);
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RgetError::Cancelled),
                next = tokio::time::timeout(timeout, stream.next()) => {
                    next.map_err(|_| RgetError::Timeout(timeout))?
                }
            };

            let eof = match next {
                Some(chunk) => {
                    buffer.extend_from_slice(&chunk?);
                    false
                }
                None => true,
            };

            while buffer.len() >= chunk_size || (eof && !buffer.is_empty()) {
                let n = buffer.len().min(chunk_size);
                file.write_all(&buffer[..n]).await?;
                buffer.drain(..n);
                written += n as u64;

                let _ = self.events.send(FetchEvent::Progress {
                    phase: Phase::Downloading,
                    done: plan.offset + written,
                    total,
                });
                throttle.pace(n as u64, &self.cancel).await?;
            }

            if eof {
                break;
            }
        }

        if let Some(expected) = body_len {
            if written < expected {
                return Err(RgetError::InvalidResponse(format!(
                    "stream ended after {} of {} bytes",
                    written, expected
                )));
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Finish pending writes so the next run resumes from every written byte
async fn keep_partial(file: &mut File, path: &Path) {
    if let Err(e) = file.flush().await {
        warn!("Failed to flush partial file {}: {}", path.display(), e);
    }
}
