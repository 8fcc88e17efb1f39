//! Grouped uniqueness registry.
//!
//! Tracks which keys have been claimed inside named groups (profile names,
//! cache keys, ...). A registry is an ordinary value owned by whoever needs
//! it; there is no process-wide instance.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("`{key}` is already registered in `{group}`")]
    Duplicate { group: String, key: String },
    #[error("registry keys must not be empty (group `{group}`)")]
    EmptyKey { group: String },
}

#[derive(Debug, Default, Clone)]
pub struct KeyRegistry {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` inside `group`, failing if it was claimed before.
    pub fn claim(&mut self, group: &str, key: &str) -> Result<(), RegistryError> {
        if key.trim().is_empty() {
            return Err(RegistryError::EmptyKey {
                group: group.to_string(),
            });
        }

        let keys = self.groups.entry(group.to_string()).or_default();
        if !keys.insert(key.to_string()) {
            return Err(RegistryError::Duplicate {
                group: group.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, group: &str, key: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Give `key` back; returns whether it was claimed.
    pub fn release(&mut self, group: &str, key: &str) -> bool {
        let Some(keys) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = keys.remove(key);
        if keys.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    /// Claimed keys of `group`, sorted.
    pub fn keys(&self, group: &str) -> Vec<&str> {
        self.groups
            .get(group)
            .map(|keys| keys.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
