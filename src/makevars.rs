use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

/// Variables that accumulate across configuration layers instead of being
/// overwritten.
const INCREMENTAL_VARS: &[&str] = &[
    "USE",
    "USE_EXPAND",
    "USE_EXPAND_HIDDEN",
    "CONFIG_PROTECT",
    "CONFIG_PROTECT_MASK",
    "IUSE_IMPLICIT",
    "USE_EXPAND_IMPLICIT",
    "USE_EXPAND_UNPREFIXED",
    "ENV_UNSET",
];

const INCREMENTAL_PREFIX: &str = "USE_EXPAND_VALUES_";

/// Whether assignments to `name` are appended to earlier values on merge.
pub fn is_incremental(name: &str) -> bool {
    INCREMENTAL_VARS.contains(&name) || name.starts_with(INCREMENTAL_PREFIX)
}

/// Collapse an incremental value: `-*` clears everything seen so far, `-x`
/// removes `x`. The surviving tokens are sorted.
///
/// # Examples
///
/// ```
/// use portage_depgraph::makevars::finalize_incremental;
///
/// assert_eq!(finalize_incremental("a b -a c -* d e -e"), "d");
/// assert_eq!(finalize_incremental("zlib ssl -ipv6"), "ssl zlib");
/// ```
pub fn finalize_incremental(value: &str) -> String {
    let mut tokens = BTreeSet::new();
    for token in value.split_whitespace() {
        if token == "-*" {
            tokens.clear();
        } else if let Some(removed) = token.strip_prefix('-') {
            tokens.remove(removed);
        } else {
            tokens.insert(token);
        }
    }
    tokens.into_iter().collect::<Vec<_>>().join(" ")
}

/// A table of shell variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(BTreeMap<String, String>);

impl Vars {
    pub fn new() -> Vars {
        Vars::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The value of `name`, or the empty string when unset (shell semantics).
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

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

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Whitespace separated words of `name`.
    pub fn list(&self, name: &str) -> Vec<&str> {
        self.value(name).split_whitespace().collect()
    }

    /// Apply `other` on top of `self`: incremental variables are appended,
    /// all others are replaced.
    pub fn merge(&mut self, other: &Vars) {
        for (name, value) in other.iter() {
            match self.0.get_mut(name) {
                Some(current) if is_incremental(name) => {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(value);
                }
                _ => {
                    self.0.insert(name.clone(), value.clone());
                }
            }
        }
    }

    /// A copy without the incremental variables.
    pub fn without_incremental(&self) -> Vars {
        self.iter()
            .filter(|(name, _)| !is_incremental(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Merge `layers` in order and finalize every incremental variable.
    pub fn finalize<'a>(layers: impl IntoIterator<Item = &'a Vars>) -> Vars {
        let mut merged = Vars::new();
        for layer in layers {
            merged.merge(layer);
        }
        for (name, value) in merged.0.iter_mut() {
            if is_incremental(name) {
                *value = finalize_incremental(value);
            }
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Vars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Vars(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Vars {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a> IntoIterator for &'a Vars {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
