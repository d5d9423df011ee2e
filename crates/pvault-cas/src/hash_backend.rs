//! Hash-addressed filesystem backend with UTC date partitions.
//!
//! ```text
//! <base>/<YYYY>/<MM>/<DD>/<sha256hex>.vault   <->   vault://<sha256hex>
//! ```
//!
//! The URI depends only on content, so identical payloads always converge on
//! the same reference. Dedup checks the current day's partition only; lookups
//! scan every partition, which is also how bare legacy `vault://` references
//! are resolved.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use crate::fs_backend::{read_object, write_object};
use crate::{AttributePath, Result, StorageBackend, VaultError};

pub const HASH_URI_PREFIX: &str = "vault://";

const OBJECT_EXT: &str = "vault";

#[derive(Debug, Clone)]
pub struct HashAddressedBackend {
    root: PathBuf,
}

impl HashAddressedBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| VaultError::BackendWrite {
            uri: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Partition directory for objects written at `at`.
    pub fn partition_dir(&self, at: DateTime<Utc>) -> PathBuf {
        self.root.join(at.format("%Y/%m/%d").to_string())
    }

    fn current_object_path(&self, hex: &str) -> PathBuf {
        self.partition_dir(Utc::now()).join(object_name(hex))
    }

    /// Locate an object in any partition, newest partition first.
    fn find_object(&self, hex: &str) -> Option<PathBuf> {
        let current = self.current_object_path(hex);
        if current.is_file() {
            return Some(current);
        }

        let name = object_name(hex);
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry.file_type().is_file() && entry.file_name().to_str() == Some(name.as_str())
            })
            .map(|entry| entry.into_path())
    }
}

impl StorageBackend for HashAddressedBackend {
    fn name(&self) -> &'static str {
        "filesystem-cas"
    }

    fn object_uri(&self, _path: &AttributePath, checksum: &str) -> Result<String> {
        Ok(format!("{}{}", HASH_URI_PREFIX, checksum))
    }

    fn contains(&self, uri: &str) -> Result<bool> {
        let hex = hex_from_uri(uri)?;
        Ok(self.current_object_path(&hex).is_file())
    }

    fn put(&self, uri: &str, payload: &[u8]) -> Result<()> {
        let hex = hex_from_uri(uri)?;
        let target = self.current_object_path(&hex);
        write_object(&target, payload).map_err(|source| VaultError::BackendWrite {
            uri: uri.to_string(),
            source,
        })?;
        debug!(path = %target.display(), bytes = payload.len(), "wrote vault object");
        Ok(())
    }

    fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let hex = hex_from_uri(uri)?;
        let path = self.find_object(&hex).ok_or_else(|| VaultError::NotFound {
            uri: uri.to_string(),
        })?;
        read_object(&path, uri)
    }
}

fn object_name(hex: &str) -> String {
    format!("{}.{}", hex, OBJECT_EXT)
}

/// Digest named by a `vault://` URI, normalized to the lowercase object name.
fn hex_from_uri(uri: &str) -> Result<String> {
    let hex = uri
        .strip_prefix(HASH_URI_PREFIX)
        .ok_or_else(|| VaultError::NotFound {
            uri: uri.to_string(),
        })?;

    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(VaultError::MalformedReference(format!(
            "expected a sha256 hex digest in {}",
            uri
        )));
    }
    Ok(hex.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reference, VaultStore};
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn path() -> AttributePath {
        AttributePath::span("t1", "s1", "gen_ai.prompt")
    }

    #[test]
    fn test_partition_layout() {
        let temp = TempDir::new().unwrap();
        let backend = HashAddressedBackend::new(temp.path()).unwrap();

        let at = Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap();
        assert_eq!(
            backend.partition_dir(at),
            temp.path().join("2024").join("05").join("07")
        );
    }

    #[test]
    fn test_same_content_same_uri() {
        let temp = TempDir::new().unwrap();
        let store = VaultStore::new(HashAddressedBackend::new(temp.path()).unwrap());

        let r1 = store.store(&path(), b"duplicate content").unwrap();
        let r2 = store
            .store(&AttributePath::span("t2", "s2", "gen_ai.completion"), b"duplicate content")
            .unwrap();

        assert_eq!(r1, r2);
        assert!(r1.uri.starts_with(HASH_URI_PREFIX));

        let objects = WalkDir::new(temp.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(objects, 1);
    }

    #[test]
    fn test_finds_object_in_older_partition() {
        let temp = TempDir::new().unwrap();
        let backend = HashAddressedBackend::new(temp.path()).unwrap();
        let store = VaultStore::new(backend.clone());

        let data = b"written last year";
        let hex = VaultStore::compute_checksum(data);
        let old = backend
            .partition_dir(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap())
            .join(format!("{}.vault", hex));
        fs::create_dir_all(old.parent().unwrap()).unwrap();
        fs::write(&old, data).unwrap();

        let legacy = Reference::legacy(format!("vault://{}", hex));
        assert_eq!(store.retrieve(&legacy).unwrap(), data);
    }

    #[test]
    fn test_uppercase_legacy_digest_resolves() {
        let temp = TempDir::new().unwrap();
        let store = VaultStore::new(HashAddressedBackend::new(temp.path()).unwrap());

        let reference = store.store(&path(), b"mixed case digest").unwrap();
        let digest = reference.uri.trim_start_matches(HASH_URI_PREFIX);
        let upper = Reference::legacy(format!("{}{}", HASH_URI_PREFIX, digest.to_ascii_uppercase()));
        assert_eq!(store.retrieve(&upper).unwrap(), b"mixed case digest");

        let verified = Reference {
            uri: upper.uri.clone(),
            checksum: reference.checksum.to_ascii_uppercase(),
            ..reference
        };
        assert_eq!(store.retrieve(&verified).unwrap(), b"mixed case digest");
        assert!(store.exists(&verified).unwrap());
    }

    #[test]
    fn test_bad_digest_is_malformed() {
        let temp = TempDir::new().unwrap();
        let backend = HashAddressedBackend::new(temp.path()).unwrap();

        assert!(matches!(
            backend.get("vault://not-a-digest"),
            Err(VaultError::MalformedReference(_))
        ));
        assert!(matches!(
            backend.get("promptvault://fs/t/s/k"),
            Err(VaultError::NotFound { .. })
        ));
    }
}
