//! On-disk cache layout
//!
//! Artifacts live at `<root>/<mbid[0]>/<mbid[1]>/<mbid>-<caa_id>.<ext>`. The
//! path is a pure function of the record, so two workers never target the same
//! file and the verifier can find every artifact from the index alone.
//!
//! Files reach their final path only through [`write_atomic`], which writes a
//! hidden `.part` sibling, syncs it and renames it into place.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, FetchError, Result};
use crate::types::{CaaId, Record};

/// Name of the file used to check that the cache root is writable
const WRITE_CHECK_FILE: &str = ".caa-mirror-write-check";

/// File extension for a MIME type
///
/// `image/jpeg` (and a missing type) map to `jpg`; anything else uses the
/// MIME subtype with parameters stripped.
pub fn extension(mime_type: Option<&str>) -> String {
    let Some(mime) = mime_type else {
        return "jpg".to_string();
    };
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((_, "jpeg")) | Some((_, "jpg")) => "jpg".to_string(),
        Some((_, subtype)) if !subtype.is_empty() => subtype.to_ascii_lowercase(),
        _ => "jpg".to_string(),
    }
}

/// Deterministic mapping from records to cache paths
#[derive(Clone, Debug)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final cache path of a record
    ///
    /// Fails for MBIDs that cannot form the two-level directory prefix or
    /// that would escape the cache root.
    pub fn path_for(&self, record: &Record) -> std::result::Result<PathBuf, FetchError> {
        let mbid = record.release_mbid.as_str();
        validate_mbid(record.id, mbid)?;

        let mut chars = mbid.chars();
        let (Some(first), Some(second)) = (chars.next(), chars.next()) else {
            return Err(invalid(record.id, "release MBID is shorter than two characters"));
        };

        Ok(self
            .root
            .join(first.to_string())
            .join(second.to_string())
            .join(format!(
                "{}-{}.{}",
                mbid,
                record.id,
                extension(record.mime_type.as_deref())
            )))
    }

    /// Create the cache root and check that it accepts writes
    ///
    /// Run before a download starts so an unusable cache is a configuration
    /// error rather than a stream of per-record disk failures.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::config(
                "cache_dir",
                format!(
                    "cannot create cache directory {}: {}",
                    self.root.display(),
                    e
                ),
            )
        })?;

        let check_file = self.root.join(WRITE_CHECK_FILE);
        tokio::fs::write(&check_file, b"ok").await.map_err(|e| {
            Error::config(
                "cache_dir",
                format!(
                    "cache directory {} is not writable: {}",
                    self.root.display(),
                    e
                ),
            )
        })?;
        let _ = tokio::fs::remove_file(&check_file).await;

        Ok(())
    }
}

fn validate_mbid(id: CaaId, mbid: &str) -> std::result::Result<(), FetchError> {
    if mbid.chars().count() < 2 {
        return Err(invalid(id, "release MBID is shorter than two characters"));
    }
    if !mbid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid(
            id,
            format!("release MBID '{}' contains unsupported characters", mbid),
        ));
    }
    Ok(())
}

fn invalid(id: CaaId, reason: impl Into<String>) -> FetchError {
    FetchError::InvalidRecord {
        id,
        reason: reason.into(),
    }
}

/// Temporary sibling used while `path` is being written
pub fn part_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

/// Write `bytes` to `path` so that `path` either does not exist or holds the
/// complete content
///
/// Parent directories are created as needed. On failure the temporary file
/// is removed and `path` is left untouched. Returns the number of bytes
/// written.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp = part_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }

    Ok(bytes.len() as u64)
}
