//! Path-addressed filesystem backend.
//!
//! Objects are stored at `<base>/<trace_id>/<span_id>[/event_<n>]/<attribute_key>`
//! and addressed as `promptvault://fs/<same relative path>`.
//!
//! Dedup is an existence check on the target path, not a content comparison.
//! Re-storing different content for the same attribute path keeps the first
//! object; retrieval with the newer reference then fails verification.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::path::is_valid_segment;
use crate::{AttributePath, Result, StorageBackend, VaultError};

pub const FS_URI_PREFIX: &str = "promptvault://fs/";

/// Disambiguates temp files written by the same thread.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct PathAddressedBackend {
    root: PathBuf,
}

impl PathAddressedBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| VaultError::BackendWrite {
            uri: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a `promptvault://fs/` URI back onto the filesystem.
    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let relative = uri
            .strip_prefix(FS_URI_PREFIX)
            .ok_or_else(|| VaultError::NotFound {
                uri: uri.to_string(),
            })?;

        let mut path = self.root.clone();
        for segment in relative.split('/') {
            if !is_valid_segment(segment) {
                return Err(VaultError::MalformedReference(format!(
                    "illegal path segment {:?} in {}",
                    segment, uri
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

impl StorageBackend for PathAddressedBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn object_uri(&self, path: &AttributePath, _checksum: &str) -> Result<String> {
        Ok(format!("{}{}", FS_URI_PREFIX, path.locator()?))
    }

    fn contains(&self, uri: &str) -> Result<bool> {
        Ok(self.resolve(uri)?.is_file())
    }

    fn put(&self, uri: &str, payload: &[u8]) -> Result<()> {
        let target = self.resolve(uri)?;
        write_object(&target, payload).map_err(|source| VaultError::BackendWrite {
            uri: uri.to_string(),
            source,
        })?;
        debug!(path = %target.display(), bytes = payload.len(), "wrote vault object");
        Ok(())
    }

    fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let target = self.resolve(uri)?;
        read_object(&target, uri)
    }
}

/// Write `payload` to `target` so that `target` is either absent or complete.
///
/// Every missing directory of the full object path is created first, then the
/// bytes go to a unique temp file that is renamed into place.
pub(crate) fn write_object(target: &Path, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = target
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "object path has no file name"))?;
    let temp_name = format!(
        "{}.{}.{:?}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id(),
        std::thread::current().id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = target.with_file_name(temp_name);

    if let Err(e) = write_temp(&temp_path, payload) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, target) {
        let _ = fs::remove_file(&temp_path);
        // Another writer got there first
        if target.is_file() {
            return Ok(());
        }
        return Err(e);
    }

    Ok(())
}

fn write_temp(temp_path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp_path)?;
    file.write_all(payload)?;
    file.sync_all()
}

pub(crate) fn read_object(path: &Path, uri: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => VaultError::NotFound {
            uri: uri.to_string(),
        },
        _ => VaultError::BackendRead {
            uri: uri.to_string(),
            source,
        },
    })
}
