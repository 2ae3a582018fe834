//! Explicit memo table for effectful build stages
//!
//! Remote schema fetches and trigger view creation cannot run inside salsa
//! queries: they are async and have side effects. Their results are kept
//! here instead, keyed by a name, and reused when the stored input is equal
//! to the current one and every dependency declared through a [`Tracker`]
//! still has the token it had when the result was computed.

use metacache_core::RemoteSchemaName;
use std::collections::BTreeMap;
use std::fmt;

use crate::invalidation::InvalidationKeys;

/// Something a memoised computation can declare a dependency on
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dependency {
    /// Core catalog metadata
    Metadata,

    /// One remote schema's invalidation token
    RemoteSchema(RemoteSchemaName),
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::RemoteSchema(name) => write!(f, "remote schema {}", name),
        }
    }
}

/// Records the dependencies a computation declares while it runs
#[derive(Debug)]
pub struct Tracker<'k> {
    keys: &'k InvalidationKeys,
    observed: BTreeMap<Dependency, u64>,
}

impl<'k> Tracker<'k> {
    pub fn new(keys: &'k InvalidationKeys) -> Self {
        Self {
            keys,
            observed: BTreeMap::new(),
        }
    }

    /// Declare a dependency and return its current token
    pub fn depend_on(&mut self, dependency: Dependency) -> u64 {
        let token = self.keys.current(&dependency);
        self.observed.insert(dependency, token);
        token
    }
}

#[derive(Debug, Clone)]
struct Entry<I, O> {
    input: I,
    tokens: BTreeMap<Dependency, u64>,
    output: O,
}

/// Memoised outputs keyed by `K`, valid for an input `I`
#[derive(Debug, Clone)]
pub struct Memo<K, I, O> {
    entries: BTreeMap<K, Entry<I, O>>,
    hits: usize,
    misses: usize,
}

impl<K, I, O> Default for Memo<K, I, O> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<K: Ord + Clone, I: PartialEq, O: Clone> Memo<K, I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached output, if the input is unchanged and no dependency was bumped
    pub fn lookup(&mut self, key: &K, input: &I, keys: &InvalidationKeys) -> Option<O> {
        let valid = self.entries.get(key).filter(|entry| {
            entry.input == *input
                && entry
                    .tokens
                    .iter()
                    .all(|(dependency, token)| keys.current(dependency) == *token)
        });
        match valid {
            Some(entry) => {
                self.hits += 1;
                Some(entry.output.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store an output with the dependencies its computation declared
    pub fn insert(&mut self, key: K, input: I, tracker: Tracker<'_>, output: O) {
        self.entries.insert(
            key,
            Entry {
                input,
                tokens: tracker.observed,
                output,
            },
        );
    }

    /// Drop entries whose key is no longer live
    pub fn retain(&mut self, mut live: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| live(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since the memo was created
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::{CacheInvalidations, TokenEpoch};

    fn remote(name: &str) -> Dependency {
        Dependency::RemoteSchema(RemoteSchemaName::new(name))
    }

    #[test]
    fn unchanged_input_and_tokens_hit() {
        let keys = InvalidationKeys::default();
        let mut memo: Memo<String, String, usize> = Memo::new();

        let mut tracker = Tracker::new(&keys);
        tracker.depend_on(remote("countries"));
        memo.insert("countries".to_string(), "http://a".to_string(), tracker, 7);

        assert_eq!(memo.lookup(&"countries".to_string(), &"http://a".to_string(), &keys), Some(7));
        assert_eq!(memo.lookup(&"countries".to_string(), &"http://b".to_string(), &keys), None);
        assert_eq!(memo.stats(), (1, 1));
    }

    #[test]
    fn bumping_a_declared_token_misses() {
        let mut epoch = TokenEpoch::default();
        let mut keys = InvalidationKeys::default();
        let mut memo: Memo<&str, (), u8> = Memo::new();

        let mut tracker = Tracker::new(&keys);
        tracker.depend_on(remote("countries"));
        memo.insert("countries", (), tracker, 1);
        memo.insert("weather", (), Tracker::new(&keys), 2);

        keys.invalidate(&CacheInvalidations::remote_schema("countries"), &mut epoch);
        assert_eq!(memo.lookup(&"countries", &(), &keys), None);

        // nothing declared, nothing to invalidate
        keys.invalidate(&CacheInvalidations::metadata(), &mut epoch);
        assert_eq!(memo.lookup(&"weather", &(), &keys), Some(2));
    }

    #[test]
    fn retain_prunes_dead_keys() {
        let keys = InvalidationKeys::default();
        let mut memo: Memo<&str, (), ()> = Memo::new();
        memo.insert("a", (), Tracker::new(&keys), ());
        memo.insert("b", (), Tracker::new(&keys), ());

        memo.retain(|key| *key == "b");
        assert_eq!(memo.len(), 1);
    }
}
