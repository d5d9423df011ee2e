//! # pvault-cas
//!
//! Content-addressed vault store for payloads offloaded from telemetry records.
//!
//! Every payload is hashed with SHA-256 at store time. The hash travels inside
//! the returned [`Reference`] and is re-verified on every retrieval, so the
//! integrity guarantee does not depend on how a backend lays out its objects.
//!
//! ## Backends
//!
//! ```text
//! path-addressed (promptvault://fs/...)      hash-addressed (vault://<sha256>)
//! <base>/                                    <base>/
//! └── <trace_id>/                            └── 2024/
//!     └── <span_id>/                             └── 05/
//!         ├── gen_ai.prompt                          └── 17/
//!         └── event_0/                                   └── <sha256>.vault
//!             └── gen_ai.prompt
//! ```
//!
//! Both layouts sit behind [`StorageBackend`]. [`VaultStore`] holds the
//! backend-independent logic: hashing, dedup, reference construction and
//! checksum verification.

pub mod fs_backend;
pub mod hash_backend;
pub mod path;
pub mod reference;

pub use fs_backend::{PathAddressedBackend, FS_URI_PREFIX};
pub use hash_backend::{HashAddressedBackend, HASH_URI_PREFIX};
pub use path::AttributePath;
pub use reference::{Reference, UNKNOWN_SIZE};

use std::fmt;
use std::io;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur during vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("backend write failed for {uri}: {source}")]
    BackendWrite {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error("backend read failed for {uri}: {source}")]
    BackendRead {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error("vault object not found: {uri}")]
    NotFound { uri: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("malformed vault reference: {0}")]
    MalformedReference(String),

    #[error("invalid attribute path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Physical storage for vault objects.
///
/// A backend owns the mapping between an [`AttributePath`] and an opaque URI,
/// and between that URI and the stored bytes. It never verifies content;
/// [`VaultStore`] does.
///
/// `put` must not leave a partially written object visible at `uri`.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// URI under which a payload with `checksum` for `path` is stored.
    fn object_uri(&self, path: &AttributePath, checksum: &str) -> Result<String>;

    /// Cheap existence check used for dedup.
    fn contains(&self, uri: &str) -> Result<bool>;

    fn put(&self, uri: &str, payload: &[u8]) -> Result<()>;

    /// Read the full object. Missing objects are [`VaultError::NotFound`].
    fn get(&self, uri: &str) -> Result<Vec<u8>>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend-agnostic store/retrieve engine.
#[derive(Debug)]
pub struct VaultStore {
    backend: Box<dyn StorageBackend>,
}

impl VaultStore {
    pub fn new<B: StorageBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Lowercase hex SHA-256 of `data`.
    #[inline]
    pub fn compute_checksum(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Store `payload` for the attribute at `path`.
    ///
    /// If the backend already holds an object at the computed URI the write is
    /// skipped and a reference to the existing object is returned.
    #[instrument(skip(self, payload), fields(size = payload.len()), level = "debug")]
    pub fn store(&self, path: &AttributePath, payload: &[u8]) -> Result<Reference> {
        let checksum = Self::compute_checksum(payload);
        let uri = self.backend.object_uri(path, &checksum)?;

        if self.backend.contains(&uri)? {
            debug!(uri = %uri, "object already present, skipping write");
        } else {
            self.backend.put(&uri, payload)?;
        }

        Ok(Reference {
            uri,
            checksum,
            encrypted: false,
            size_bytes: payload.len() as i64,
        })
    }

    /// Fetch the bytes behind `reference`, verifying them against its checksum.
    ///
    /// Legacy references carry no checksum; their bytes are returned unverified.
    #[instrument(skip(self), fields(uri = %reference.uri), level = "debug")]
    pub fn retrieve(&self, reference: &Reference) -> Result<Vec<u8>> {
        let data = self.backend.get(&reference.uri)?;

        if reference.is_verifiable() {
            let actual = Self::compute_checksum(&data);
            if !actual.eq_ignore_ascii_case(&reference.checksum) {
                return Err(VaultError::ChecksumMismatch {
                    expected: reference.checksum.clone(),
                    actual,
                });
            }
        } else {
            debug!("legacy reference without checksum, verification skipped");
        }

        Ok(data)
    }

    /// Check whether the object behind `reference` exists.
    pub fn exists(&self, reference: &Reference) -> Result<bool> {
        self.backend.contains(&reference.uri)
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }
}
