//! Which attributes are offloaded, and how the record is rewritten afterwards.

use std::collections::HashSet;

use pvault_config::{VaultConfig, VaultMode};

use crate::model::{AttributeValue, Attributes};

/// Suffix of the sibling attribute that always carries the encoded reference.
pub const VAULT_REF_SUFFIX: &str = ".vault_ref";

/// `<key>.vault_ref`
pub fn vault_ref_key(key: &str) -> String {
    format!("{}{}", key, VAULT_REF_SUFFIX)
}

/// Immutable offload policy, built once at startup.
#[derive(Debug, Clone)]
pub struct VaultPolicy {
    keys: HashSet<String>,
    size_threshold: usize,
    mode: VaultMode,
}

impl VaultPolicy {
    pub fn new<I, S>(keys: I, size_threshold: usize, mode: VaultMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            size_threshold,
            mode,
        }
    }

    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(config.keys.iter().cloned(), config.size_threshold, config.mode)
    }

    pub fn mode(&self) -> VaultMode {
        self.mode
    }

    pub fn size_threshold(&self) -> usize {
        self.size_threshold
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_vault_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Configured key, offloadable value type, and at least `size_threshold` bytes.
    pub fn is_eligible(&self, key: &str, value: &AttributeValue) -> bool {
        self.is_vault_key(key)
            && value
                .payload()
                .is_some_and(|payload| payload.len() >= self.size_threshold)
    }

    /// Rewrite `attrs` after `key` was stored under `encoded_ref`.
    pub fn apply(&self, attrs: &mut Attributes, key: &str, encoded_ref: String) {
        let ref_key = vault_ref_key(key);
        match self.mode {
            VaultMode::ReplaceWithRef => {
                attrs.insert(key, encoded_ref.clone());
                attrs.insert(ref_key, encoded_ref);
            }
            VaultMode::Remove => {
                attrs.remove(key);
                attrs.insert(ref_key, encoded_ref);
            }
            VaultMode::KeepAndRef => {
                attrs.insert(ref_key, encoded_ref);
            }
        }
    }
}
