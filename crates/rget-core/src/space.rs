//! Free-space check before a transfer writes anything

use crate::error::RgetError;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fail with `InsufficientSpace` if the volume holding `path` has less than
/// `required` bytes free.
pub fn ensure_space(path: &Path, required: u64) -> Result<(), RgetError> {
    let dir = nearest_existing_dir(path);
    check_space(path, required, fs2::available_space(&dir))
}

pub(crate) fn check_space(
    path: &Path,
    required: u64,
    available: io::Result<u64>,
) -> Result<(), RgetError> {
    match available {
        Ok(available) if available < required => Err(RgetError::InsufficientSpace {
            path: path.to_path_buf(),
            required,
            available,
        }),
        Ok(available) => {
            debug!("{} bytes required, {} available", required, available);
            Ok(())
        }
        Err(e) => {
            warn!("Could not check free space for {}: {}", path.display(), e);
            Ok(())
        }
    }
}

/// The target's parent, or its closest ancestor that exists yet
fn nearest_existing_dir(path: &Path) -> PathBuf {
    let mut dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return PathBuf::from("."),
    };
    loop {
        if dir.is_dir() {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => dir = parent,
            _ => return PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_volume_is_refused() {
        let err = check_space(Path::new("big.iso"), 10 << 20, Ok(1 << 20)).unwrap_err();
        assert!(matches!(
            err,
            RgetError::InsufficientSpace { required, available, .. }
                if required == 10 << 20 && available == 1 << 20
        ));
    }

    #[test]
    fn test_query_failure_proceeds() {
        let failed = Err(io::Error::new(io::ErrorKind::Other, "statvfs failed"));
        assert!(check_space(Path::new("f"), u64::MAX, failed).is_ok());
    }

    #[test]
    fn test_nearest_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c/file.bin");
        assert_eq!(nearest_existing_dir(&deep), dir.path());
        assert_eq!(nearest_existing_dir(Path::new("file.bin")), PathBuf::from("."));
    }

    #[test]
    fn test_ensure_space_small_request_passes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_space(&dir.path().join("f"), 1).is_ok());
    }
}
