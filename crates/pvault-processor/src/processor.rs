//! The attribute offload pipeline.
//!
//! For every span, and then for every event of that span:
//!
//! 1. **Collect**: snapshot the eligible attributes (key, payload) without
//!    touching the attribute map.
//! 2. **Offload**: store each payload under its attribute path.
//! 3. **Rewrite**: apply the configured mode for each successful store.
//!
//! A failed store leaves its attribute exactly as found and is logged as a
//! warning. It never fails the span, the event, or the batch.

use std::ops::{Add, AddAssign};
use std::sync::Arc;

use pvault_cas::{AttributePath, Reference, VaultError, VaultStore};
use pvault_config::{log_processor_debug, log_processor_info, log_processor_warn, VaultMode};
use rayon::prelude::*;
use tracing::instrument;

use crate::consumer::TracesConsumer;
use crate::model::{AttributeValue, Attributes, Span, Traces};
use crate::policy::{vault_ref_key, VaultPolicy};

/// What the host pipeline needs to know about this processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub mutates_data: bool,
}

/// Per-span / per-batch offload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffloadStats {
    pub vaulted: usize,
    pub failed: usize,
}

impl Add for OffloadStats {
    type Output = OffloadStats;

    fn add(self, rhs: OffloadStats) -> OffloadStats {
        OffloadStats {
            vaulted: self.vaulted + rhs.vaulted,
            failed: self.failed + rhs.failed,
        }
    }
}

impl AddAssign for OffloadStats {
    fn add_assign(&mut self, rhs: OffloadStats) {
        *self = *self + rhs;
    }
}

/// An attribute selected for offload, copied out of the record before any rewrite.
struct PendingOffload {
    key: String,
    payload: Vec<u8>,
}

pub struct VaultProcessor {
    policy: VaultPolicy,
    store: Arc<VaultStore>,
    next: Arc<dyn TracesConsumer>,
}

impl VaultProcessor {
    pub fn new(policy: VaultPolicy, store: Arc<VaultStore>, next: Arc<dyn TracesConsumer>) -> Self {
        Self {
            policy,
            store,
            next,
        }
    }

    pub fn policy(&self) -> &VaultPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<VaultStore> {
        &self.store
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities { mutates_data: true }
    }

    pub fn start(&self) {
        log_processor_info!(
            "promptvault processor started",
            vault_keys = self.policy.key_count(),
            size_threshold = self.policy.size_threshold(),
            mode = self.policy.mode().as_str(),
            backend = self.store.backend_name(),
        );
    }

    pub fn shutdown(&self) -> Result<(), VaultError> {
        self.store.close()?;
        log_processor_info!("promptvault processor stopped");
        Ok(())
    }

    /// Vault every eligible attribute in `traces`, then forward the batch.
    ///
    /// Only an error from the downstream consumer is returned. Record count and
    /// ordering are unchanged.
    pub fn process_batch(&self, mut traces: Traces) -> anyhow::Result<()> {
        let stats = self.vault_traces(&mut traces);
        log_processor_debug!(
            "batch processed",
            spans = traces.span_count(),
            vaulted = stats.vaulted,
            failed = stats.failed,
        );
        self.next.consume_traces(traces)
    }

    /// Rewrite `traces` in place. Resource spans are independent and are
    /// processed in parallel.
    pub fn vault_traces(&self, traces: &mut Traces) -> OffloadStats {
        traces
            .resource_spans
            .par_iter_mut()
            .map(|rs| {
                let mut stats = OffloadStats::default();
                for span in rs.scope_spans.iter_mut().flat_map(|ss| ss.spans.iter_mut()) {
                    stats += self.vault_span(span);
                }
                stats
            })
            .reduce(OffloadStats::default, |a, b| a + b)
    }

    /// Vault the span's own attributes, then each event's attributes.
    #[instrument(skip(self, span), fields(span_id = %span.span_id), level = "trace")]
    pub fn vault_span(&self, span: &mut Span) -> OffloadStats {
        let trace_id = span.trace_id.to_string();
        let span_id = span.span_id.to_string();

        let mut stats = self.vault_attributes(&mut span.attributes, |key| {
            AttributePath::span(trace_id.as_str(), span_id.as_str(), key)
        });

        for (index, event) in span.events.iter_mut().enumerate() {
            stats += self.vault_attributes(&mut event.attributes, |key| {
                AttributePath::event(trace_id.as_str(), span_id.as_str(), index, key)
            });
        }

        stats
    }

    fn vault_attributes<F>(&self, attrs: &mut Attributes, path_for: F) -> OffloadStats
    where
        F: Fn(&str) -> AttributePath,
    {
        let mut stats = OffloadStats::default();

        for entry in self.collect(attrs) {
            let path = path_for(&entry.key);
            match self.store.store(&path, &entry.payload) {
                Ok(reference) => {
                    log_processor_debug!(
                        "vaulted attribute",
                        key = entry.key.as_str(),
                        uri = reference.uri.as_str(),
                        content_bytes = entry.payload.len(),
                    );
                    self.policy.apply(attrs, &entry.key, reference.encode());
                    stats.vaulted += 1;
                }
                Err(err) => {
                    log_processor_warn!(
                        "vault store failed, attribute left in place",
                        key = entry.key.as_str(),
                        trace_id = path.trace_id.as_str(),
                        span_id = path.span_id.as_str(),
                        event_index = tracing::field::debug(path.event_index),
                        error = tracing::field::display(&err),
                    );
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    /// Snapshot of the attributes to offload. Nothing in `attrs` changes here.
    fn collect(&self, attrs: &Attributes) -> Vec<PendingOffload> {
        attrs
            .iter()
            .filter(|(key, value)| self.policy.is_eligible(key, value))
            .filter(|(key, value)| !self.already_vaulted(attrs, key, value))
            .filter_map(|(key, value)| {
                value.payload().map(|payload| PendingOffload {
                    key: key.to_string(),
                    payload: payload.to_vec(),
                })
            })
            .collect()
    }

    /// Output of an earlier `replace_with_ref` pass: the value is a structured
    /// reference and its `.vault_ref` sibling holds the same reference.
    fn already_vaulted(&self, attrs: &Attributes, key: &str, value: &AttributeValue) -> bool {
        if self.policy.mode() != VaultMode::ReplaceWithRef {
            return false;
        }
        let Some(text) = value.as_str() else {
            return false;
        };
        text.trim_start().starts_with('{')
            && Reference::decode(text).is_ok()
            && attrs.get(&vault_ref_key(key)) == Some(value)
    }
}
