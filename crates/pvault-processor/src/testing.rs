//! Test environment abstraction for isolated processor tests.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary vault base directory
//! - An in-memory downstream sink
//! - Processor construction from a real [`Config`]
//!
//! # Usage
//!
//! ```ignore
//! use pvault_processor::testing::{single_span_traces, TestEnvironment};
//!
//! let env = TestEnvironment::new()?;
//! let processor = env.processor(&["gen_ai.prompt"], 0, VaultMode::ReplaceWithRef)?;
//! processor.process_batch(single_span_traces(&[("gen_ai.prompt", "hi")]))?;
//! let batch = env.forwarded().expect("one batch");
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pvault_cas::{AttributePath, StorageBackend, VaultError, VaultStore};
use pvault_config::{Config, FilesystemLayout, VaultMode};
use tempfile::TempDir;

use crate::consumer::TracesSink;
use crate::model::{ResourceSpans, ScopeSpans, Span, SpanId, TraceId, Traces};
use crate::policy::VaultPolicy;
use crate::processor::VaultProcessor;

/// Atomic counter for unique span ids across tests
static SPAN_COUNTER: AtomicU32 = AtomicU32::new(1);

pub const TEST_TRACE_ID: TraceId = TraceId([
    0x0a, 0xf7, 0x65, 0x19, 0x16, 0xcd, 0x43, 0xdd, 0x84, 0x48, 0xeb, 0x21, 0x1c, 0x80, 0x31, 0x9c,
]);

/// Isolated vault directory plus a sink capturing everything forwarded downstream
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Vault base directory
    pub base_path: PathBuf,
    /// Downstream consumer for processors built by this environment
    pub sink: Arc<TracesSink>,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let base_path = temp_dir.path().join("vault");
        std::fs::create_dir_all(&base_path)?;

        Ok(Self {
            _temp_dir: temp_dir,
            base_path,
            sink: Arc::new(TracesSink::new()),
        })
    }

    /// Config pointing at this environment's base path.
    pub fn config(&self, keys: &[&str], size_threshold: usize, mode: VaultMode) -> Config {
        let mut cfg = Config::default();
        cfg.storage.filesystem.base_path = self.base_path.clone();
        cfg.vault.keys = keys.iter().map(|k| k.to_string()).collect();
        cfg.vault.size_threshold = size_threshold;
        cfg.vault.mode = mode;
        cfg
    }

    /// Path-addressed processor forwarding to `self.sink`.
    pub fn processor(
        &self,
        keys: &[&str],
        size_threshold: usize,
        mode: VaultMode,
    ) -> anyhow::Result<VaultProcessor> {
        let cfg = self.config(keys, size_threshold, mode);
        Ok(VaultProcessor::from_config(&cfg, self.sink.clone())?)
    }

    /// Hash-addressed processor forwarding to `self.sink`.
    pub fn hash_processor(
        &self,
        keys: &[&str],
        size_threshold: usize,
        mode: VaultMode,
    ) -> anyhow::Result<VaultProcessor> {
        let mut cfg = self.config(keys, size_threshold, mode);
        cfg.storage.filesystem.layout = FilesystemLayout::Hash;
        Ok(VaultProcessor::from_config(&cfg, self.sink.clone())?)
    }

    /// Processor whose every store fails.
    pub fn failing_processor(&self, keys: &[&str], mode: VaultMode) -> VaultProcessor {
        let policy = VaultPolicy::new(keys.iter().copied(), 0, mode);
        let store = VaultStore::new(FailingBackend);
        VaultProcessor::new(policy, Arc::new(store), self.sink.clone())
    }

    /// The forwarded batch, if exactly one was forwarded so far.
    pub fn forwarded(&self) -> Option<Traces> {
        let mut batches = self.sink.all_traces();
        if batches.len() != 1 {
            return None;
        }
        batches.pop()
    }

    /// Count regular files under the base path.
    pub fn stored_file_count(&self) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .map(|e| {
                            let path = e.path();
                            if path.is_dir() {
                                walk(&path)
                            } else {
                                1
                            }
                        })
                        .sum()
                })
                .unwrap_or(0)
        }
        walk(&self.base_path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

/// Backend that rejects every write with `PermissionDenied`.
#[derive(Debug, Default)]
pub struct FailingBackend;

impl StorageBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn object_uri(&self, path: &AttributePath, _checksum: &str) -> pvault_cas::Result<String> {
        Ok(format!("failing://{}", path.locator()?))
    }

    fn contains(&self, _uri: &str) -> pvault_cas::Result<bool> {
        Ok(false)
    }

    fn put(&self, uri: &str, _payload: &[u8]) -> pvault_cas::Result<()> {
        Err(VaultError::BackendWrite {
            uri: uri.to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only vault"),
        })
    }

    fn get(&self, uri: &str) -> pvault_cas::Result<Vec<u8>> {
        Err(VaultError::NotFound {
            uri: uri.to_string(),
        })
    }
}

/// Span under [`TEST_TRACE_ID`] with a fresh span id.
pub fn span(attrs: &[(&str, &str)]) -> Span {
    let n = SPAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut id = [0u8; 8];
    id[4..].copy_from_slice(&n.to_be_bytes());
    Span {
        trace_id: TEST_TRACE_ID,
        span_id: SpanId(id),
        name: "chat".to_string(),
        attributes: attrs.iter().copied().collect(),
        events: Vec::new(),
    }
}

/// One resource span per entry, each with a single scope.
pub fn traces_of(spans: Vec<Span>) -> Traces {
    Traces {
        resource_spans: spans
            .into_iter()
            .map(|s| ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    scope: "pvault.test".to_string(),
                    spans: vec![s],
                }],
                ..Default::default()
            })
            .collect(),
    }
}

pub fn single_span_traces(attrs: &[(&str, &str)]) -> Traces {
    traces_of(vec![span(attrs)])
}

/// First span of a batch.
pub fn first_span(traces: &Traces) -> Option<&Span> {
    traces.spans().next()
}
