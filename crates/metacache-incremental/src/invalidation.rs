//! Invalidation keys
//!
//! A token for "core catalog metadata changed" plus one token per remote
//! schema. Memoised results record the tokens they were computed against and
//! are reused only while those tokens are unchanged.
//!
//! Bumped tokens come from a [`TokenEpoch`] shared by every cache value built
//! on the same engine, so a bump never reuses a token some other rebuild
//! already stamped into a memo table.

use metacache_core::RemoteSchemaName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::memo::Dependency;

/// Current invalidation tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationKeys {
    pub metadata: u64,
    pub remote_schemas: BTreeMap<RemoteSchemaName, u64>,
}

/// Monotonic source of invalidation tokens
///
/// Zero is the token of anything never bumped; `next` starts at one.
#[derive(Debug, Default)]
pub struct TokenEpoch {
    last: u64,
}

impl TokenEpoch {
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Invalidations requested for a rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidations {
    /// Rebuild everything derived from core catalog metadata
    pub metadata: bool,

    /// Refetch these remote schemas
    pub remote_schemas: BTreeSet<RemoteSchemaName>,
}

/// Invalidations that took effect during a rebuild
///
/// Remote schema names that no longer exist after the build are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedInvalidations {
    pub metadata: bool,
    pub remote_schemas: BTreeSet<RemoteSchemaName>,
}

impl CacheInvalidations {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn metadata() -> Self {
        Self {
            metadata: true,
            ..Self::default()
        }
    }

    pub fn remote_schema(name: impl Into<RemoteSchemaName>) -> Self {
        Self {
            metadata: false,
            remote_schemas: [name.into()].into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.metadata && self.remote_schemas.is_empty()
    }
}

impl InvalidationKeys {
    /// Token a dependency currently has; unseen remote schemas start at zero
    pub fn current(&self, dependency: &Dependency) -> u64 {
        match dependency {
            Dependency::Metadata => self.metadata,
            Dependency::RemoteSchema(name) => self.remote_schemas.get(name).copied().unwrap_or(0),
        }
    }

    /// Give every requested token a fresh value from `epoch`
    pub fn invalidate(&mut self, request: &CacheInvalidations, epoch: &mut TokenEpoch) {
        if request.metadata {
            self.metadata = epoch.next();
        }
        for name in &request.remote_schemas {
            self.remote_schemas.insert(name.clone(), epoch.next());
        }
    }

    /// Forget tokens of remote schemas that no longer exist
    pub fn prune_remote_schemas(&mut self, live: &BTreeSet<RemoteSchemaName>) {
        self.remote_schemas.retain(|name, _| live.contains(name));
    }
}

impl AppliedInvalidations {
    pub(crate) fn from_request(
        request: &CacheInvalidations,
        live: &BTreeSet<RemoteSchemaName>,
    ) -> Self {
        Self {
            metadata: request.metadata,
            remote_schemas: request.remote_schemas.intersection(live).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidating_bumps_only_requested_tokens() {
        let mut epoch = TokenEpoch::default();
        let mut keys = InvalidationKeys::default();
        keys.invalidate(&CacheInvalidations::remote_schema("countries"), &mut epoch);

        assert_eq!(keys.current(&Dependency::Metadata), 0);
        assert_eq!(keys.current(&Dependency::RemoteSchema("countries".into())), 1);
        assert_eq!(keys.current(&Dependency::RemoteSchema("weather".into())), 0);

        keys.invalidate(&CacheInvalidations::metadata(), &mut epoch);
        assert_eq!(keys.metadata, 2);
        assert_eq!(keys.current(&Dependency::RemoteSchema("countries".into())), 1);
    }

    #[test]
    fn sibling_bumps_never_share_a_token() {
        let mut epoch = TokenEpoch::default();
        let base = InvalidationKeys::default();
        let request = CacheInvalidations::remote_schema("countries");

        let mut first = base.clone();
        first.invalidate(&request, &mut epoch);
        let mut second = base.clone();
        second.invalidate(&request, &mut epoch);

        let countries = Dependency::RemoteSchema("countries".into());
        assert_ne!(first.current(&countries), second.current(&countries));
        assert_ne!(second.current(&countries), base.current(&countries));
    }

    #[test]
    fn pruning_drops_vanished_remote_schemas() {
        let mut epoch = TokenEpoch::default();
        let mut keys = InvalidationKeys::default();
        keys.invalidate(&CacheInvalidations::remote_schema("countries"), &mut epoch);
        keys.invalidate(&CacheInvalidations::remote_schema("weather"), &mut epoch);

        let live: BTreeSet<RemoteSchemaName> = ["weather".into()].into_iter().collect();
        keys.prune_remote_schemas(&live);
        assert_eq!(
            keys.remote_schemas.keys().map(|n| n.as_str()).collect::<Vec<_>>(),
            vec!["weather"]
        );

    }

    #[test]
    fn applied_invalidations_skip_unknown_names() {
        let mut request = CacheInvalidations::metadata();
        request.remote_schemas.insert("countries".into());
        request.remote_schemas.insert("ghost".into());
        let live: BTreeSet<RemoteSchemaName> = ["countries".into()].into_iter().collect();

        let applied = AppliedInvalidations::from_request(&request, &live);
        assert!(applied.metadata);
        assert_eq!(applied.remote_schemas, live);
    }
}
