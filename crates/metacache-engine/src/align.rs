//! Keyed combinators shared by the collection stages
//!
//! [`align`] merge-joins two keyed collections into [`These`], which is how
//! every kind of extra metadata is matched against the table map. [`keyed`]
//! runs a computation independently per key, and [`partition_unique`] splits
//! grouped definitions into single definitions and duplicate groups.

use std::collections::BTreeMap;

/// Result of aligning two maps on their keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum These<A, B> {
    /// Key only present on the left
    This(A),
    /// Key only present on the right
    That(B),
    /// Key present on both sides
    These(A, B),
}

/// Merge-join two maps by key
pub fn align<K: Ord, A, B>(
    left: BTreeMap<K, A>,
    right: BTreeMap<K, B>,
) -> BTreeMap<K, These<A, B>> {
    let mut right = right;
    let mut aligned: BTreeMap<K, These<A, B>> = left
        .into_iter()
        .map(|(key, a)| {
            let value = match right.remove(&key) {
                Some(b) => These::These(a, b),
                None => These::This(a),
            };
            (key, value)
        })
        .collect();
    aligned.extend(right.into_iter().map(|(key, b)| (key, These::That(b))));
    aligned
}

/// Group items by a key, keeping their relative order within each group
pub fn group_by<K: Ord, V>(
    items: impl IntoIterator<Item = V>,
    key: impl Fn(&V) -> K,
) -> BTreeMap<K, Vec<V>> {
    let mut groups: BTreeMap<K, Vec<V>> = BTreeMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

/// Run `f` once per key and collect the keys that produced a value.
///
/// `f` reports its own failures (typically onto a `Collected` side channel)
/// and returns `None`; a failed key never affects the others.
pub fn keyed<K: Ord, I, O>(
    inputs: impl IntoIterator<Item = (K, I)>,
    mut f: impl FnMut(&K, I) -> Option<O>,
) -> BTreeMap<K, O> {
    inputs
        .into_iter()
        .filter_map(|(key, input)| f(&key, input).map(|output| (key, output)))
        .collect()
}

/// Split groups into keys with exactly one definition and keys with several
pub fn partition_unique<K: Ord, V>(
    groups: BTreeMap<K, Vec<V>>,
) -> (BTreeMap<K, V>, BTreeMap<K, Vec<V>>) {
    let mut unique = BTreeMap::new();
    let mut duplicates = BTreeMap::new();
    for (key, mut group) in groups {
        if group.len() == 1 {
            if let Some(only) = group.pop() {
                unique.insert(key, only);
            }
        } else {
            duplicates.insert(key, group);
        }
    }
    (unique, duplicates)
}
