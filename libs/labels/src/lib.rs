//! Label sets for discovered scrape targets.
//!
//! A [`Labels`] value is an ordered map from label name to label value.
//! Ordering makes iteration, serialization and [`Labels::fingerprint`]
//! deterministic, so two sets with the same pairs always hash the same.

mod macros;
pub mod names;

use std::collections::btree_map::{self, BTreeMap};
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

pub use names::is_valid_label_name;

/// Separator written after every name and value when fingerprinting.
const SEPARATOR: u8 = 0xff;

/// An ordered set of label name/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Sets `name` to `value`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    /// Removes `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter(self.0.iter())
    }

    /// Keeps only the labels for which `keep(name, value)` is true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.0.retain(|name, value| keep(name, value));
    }

    /// Returns a copy of `self` overlaid with `other`; `other` wins on conflicts.
    pub fn merge(&self, other: &Labels) -> Labels {
        let mut merged = self.clone();
        for (name, value) in other.iter() {
            merged.insert(name, value);
        }
        merged
    }

    /// Returns a copy without discovery meta labels (`__meta_*`).
    pub fn without_meta(&self) -> Labels {
        let mut stripped = self.clone();
        stripped.retain(|name, _| !name.starts_with(names::META_PREFIX));
        stripped
    }

    /// A stable 64-bit fingerprint of the full label set.
    ///
    /// Every name and value is followed by a `0xff` separator byte before
    /// being fed to xxHash64 (seed 0), so `{"a": "bc"}` and `{"ab": "c"}`
    /// never collide by construction.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        for (name, value) in &self.0 {
            hasher.write(name.as_bytes());
            hasher.write(&[SEPARATOR]);
            hasher.write(value.as_bytes());
            hasher.write(&[SEPARATOR]);
        }
        hasher.finish()
    }
}

/// Iterator over `(name, value)` pairs in name order.
pub struct Iter<'a>(btree_map::Iter<'a, String, String>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        f.write_str("}")
    }
}
