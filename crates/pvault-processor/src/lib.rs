//! # pvault-processor
//!
//! Telemetry processor that moves large or sensitive span attributes into the
//! vault and rewrites each record to carry a verifiable reference instead.
//!
//! ```text
//! Traces ──► VaultProcessor ──► next TracesConsumer
//!                 │
//!                 └──► VaultStore (pvault-cas)
//! ```
//!
//! Build one with [`VaultProcessor::from_config`], or wire a
//! [`VaultPolicy`] and [`pvault_cas::VaultStore`] by hand with
//! [`VaultProcessor::new`].

pub mod consumer;
pub mod factory;
pub mod model;
pub mod policy;
mod processor;
pub mod testing;

pub use consumer::{JsonLinesExporter, TracesConsumer, TracesSink};
pub use factory::create_store;
pub use model::{
    AttributeValue, Attributes, ResourceSpans, ScopeSpans, Span, SpanEvent, SpanId, TraceId,
    Traces,
};
pub use policy::{vault_ref_key, VaultPolicy, VAULT_REF_SUFFIX};
pub use processor::{Capabilities, OffloadStats, VaultProcessor};

use pvault_cas::VaultError;
use pvault_config::ConfigError;
use thiserror::Error;

/// Errors raised while building a processor. Batch processing itself never
/// returns these.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open vault store: {0}")]
    Vault(#[from] VaultError),
}
