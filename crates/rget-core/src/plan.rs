//! Resume planning
//!
//! `plan` decides from the local file size and the probe result whether a
//! transfer starts over, continues a partial file, or is not needed at all.

use crate::error::RgetError;
use rget_types::{OpenMode, RemoteMetadata, ResumeDecision, ResumePlan};
use std::path::Path;
use tracing::debug;

pub fn plan(
    local_size: Option<u64>,
    resume: bool,
    meta: Option<&RemoteMetadata>,
) -> ResumeDecision {
    let total = meta.and_then(|m| m.total_size);

    let local = match local_size {
        Some(size) if resume && size > 0 => size,
        _ => return ResumeDecision::Transfer(ResumePlan::fresh(total)),
    };

    if let Some(total) = total {
        if local == total {
            return ResumeDecision::AlreadyComplete { size: local };
        }
        if local > total {
            debug!("Local file ({} bytes) larger than remote ({}), restarting", local, total);
            return ResumeDecision::Transfer(ResumePlan::fresh(Some(total)));
        }
    }

    // Range support is assumed even without an Accept-Ranges header; the
    // reply is checked before anything is appended.
    ResumeDecision::Transfer(ResumePlan {
        offset: local,
        mode: OpenMode::Append,
        total_size: total,
    })
}

/// Size of the file at `path`, `None` when there is none
pub async fn inspect_local(path: &Path) -> Result<Option<u64>, RgetError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(RgetError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} is a directory", path.display()),
        ))),
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
