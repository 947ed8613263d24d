//! Reconciliation primitives.
//!
//! This library provides the two comparisons the allocator performs every
//! time a new snapshot arrives:
//!
//! - **Diff**: which keys were added and which were removed between the
//!   current snapshot and the desired one.
//! - **Config hash**: a stable digest of a configuration document, used to
//!   decide whether downstream consumers need to hear about a change.
//!
//! # Invariants
//!
//! - Diffing is a pure function of its inputs
//! - Hashes are independent of map key order

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The document could not be turned into JSON for hashing.
    #[error("failed to serialize document for hashing: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The delta between a current and a desired keyed snapshot.
///
/// Keys present in both snapshots are never reported, whatever their values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes<K, V>
where
    K: Eq + Hash,
{
    additions: HashMap<K, V>,
    removals: HashMap<K, V>,
}

impl<K, V> Default for Changes<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            additions: HashMap::new(),
            removals: HashMap::new(),
        }
    }
}

impl<K, V> Changes<K, V>
where
    K: Eq + Hash,
{
    /// Entries present in the desired snapshot but not the current one.
    pub fn additions(&self) -> &HashMap<K, V> {
        &self.additions
    }

    /// Entries present in the current snapshot but not the desired one.
    pub fn removals(&self) -> &HashMap<K, V> {
        &self.removals
    }

    /// Returns true if nothing was added or removed.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Split into `(additions, removals)`.
    pub fn into_parts(self) -> (HashMap<K, V>, HashMap<K, V>) {
        (self.additions, self.removals)
    }
}

/// Compute the additions and removals that turn `current` into `desired`.
///
/// Values are taken from the side they were found on: additions carry the
/// desired value, removals carry the current one.
pub fn diff_maps<K, V>(current: &HashMap<K, V>, desired: &HashMap<K, V>) -> Changes<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    let additions = desired
        .iter()
        .filter(|(key, _)| !current.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let removals = current
        .iter()
        .filter(|(key, _)| !desired.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Changes {
        additions,
        removals,
    }
}

/// A configuration hash for deterministic comparison.
///
/// Used to detect when the merged scrape configuration has changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigHash(String);

impl ConfigHash {
    /// Compute a hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    /// Hash any serializable document.
    pub fn of<T: Serialize + ?Sized>(document: &T) -> Result<Self, ReconcileError> {
        let json = serde_json::to_value(document)?;
        Ok(Self::from_json(&json))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    // serde_json escapes exactly the characters JSON requires.
    serde_json::Value::String(s.to_owned()).to_string()
}
