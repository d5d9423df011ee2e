//! Build a processor from validated configuration.

use std::sync::Arc;

use pvault_cas::{HashAddressedBackend, PathAddressedBackend, VaultStore};
use pvault_config::{log_store_info, BackendKind, Config, FilesystemLayout, StorageConfig};

use crate::consumer::TracesConsumer;
use crate::policy::VaultPolicy;
use crate::processor::VaultProcessor;
use crate::ProcessorError;

/// Open the store named by `config`. The base directory is created if missing.
pub fn create_store(config: &StorageConfig) -> Result<VaultStore, ProcessorError> {
    match config.backend_kind()? {
        BackendKind::Filesystem => {
            let base = &config.filesystem.base_path;
            let store = match config.filesystem.layout {
                FilesystemLayout::Path => VaultStore::new(PathAddressedBackend::new(base)?),
                FilesystemLayout::Hash => VaultStore::new(HashAddressedBackend::new(base)?),
            };
            log_store_info!(
                "vault store opened",
                backend = store.backend_name(),
                base_path = tracing::field::display(base.display()),
            );
            Ok(store)
        }
    }
}

impl VaultProcessor {
    /// Validate `config`, open its store and wire the processor to `next`.
    pub fn from_config(
        config: &Config,
        next: Arc<dyn TracesConsumer>,
    ) -> Result<Self, ProcessorError> {
        config.validate()?;
        let store = create_store(&config.storage)?;
        let policy = VaultPolicy::from_config(&config.vault);
        Ok(VaultProcessor::new(policy, Arc::new(store), next))
    }
}
