//! Dependency graph over schema objects
//!
//! Edges point from an object to the objects it requires to exist. Impact
//! analysis walks the edges backwards: the dependents of `X` are every object
//! with an edge into something `X` induces (see [`SchemaObjId::induces`]).

use crate::metadata::SchemaObjId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Serialized form of one graph entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub object: SchemaObjId,
    pub dependencies: BTreeSet<SchemaObjId>,
}

/// Mapping from a schema object to the schema objects it depends on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DependencyEntry>", into = "Vec<DependencyEntry>")]
pub struct DependencyGraph {
    dependencies: BTreeMap<SchemaObjId, BTreeSet<SchemaObjId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `object` depends on every id in `targets`
    pub fn add_dependencies(
        &mut self,
        object: SchemaObjId,
        targets: impl IntoIterator<Item = SchemaObjId>,
    ) {
        self.dependencies.entry(object).or_default().extend(targets);
    }

    /// Forget an object's outgoing edges
    pub fn remove_object(&mut self, object: &SchemaObjId) -> bool {
        self.dependencies.remove(object).is_some()
    }

    /// Immediate dependencies of an object
    pub fn dependencies_of(&self, object: &SchemaObjId) -> Option<&BTreeSet<SchemaObjId>> {
        self.dependencies.get(object)
    }

    /// Objects with at least one dependency edge
    pub fn objects(&self) -> impl Iterator<Item = &SchemaObjId> {
        self.dependencies.keys()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Objects that directly depend on `target` (or on anything it induces)
    pub fn direct_dependents(&self, target: &SchemaObjId) -> Vec<&SchemaObjId> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.iter().any(|dep| target.induces(dep)))
            .map(|(object, _)| object)
            .collect()
    }

    /// All objects that transitively depend on `target`, excluding `target`
    pub fn dependents(&self, target: &SchemaObjId) -> BTreeSet<SchemaObjId> {
        self.dependents_of_all(std::iter::once(target))
    }

    /// Transitive closure of dependents of every root, excluding the roots
    pub fn dependents_of_all<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a SchemaObjId>,
    ) -> BTreeSet<SchemaObjId> {
        let roots: Vec<&SchemaObjId> = roots.into_iter().collect();
        let mut visited: BTreeSet<SchemaObjId> = BTreeSet::new();
        let mut queue: VecDeque<SchemaObjId> = VecDeque::new();

        for root in &roots {
            for dependent in self.direct_dependents(root) {
                queue.push_back(dependent.clone());
            }
        }

        // BFS over reverse edges
        while let Some(current) = queue.pop_front() {
            if visited.contains(&current) {
                continue;
            }
            for dependent in self.direct_dependents(&current) {
                if !visited.contains(dependent) {
                    queue.push_back(dependent.clone());
                }
            }
            visited.insert(current);
        }

        for root in roots {
            visited.remove(root);
        }
        visited
    }
}

impl From<Vec<DependencyEntry>> for DependencyGraph {
    fn from(entries: Vec<DependencyEntry>) -> Self {
        let mut graph = DependencyGraph::new();
        for entry in entries {
            graph.add_dependencies(entry.object, entry.dependencies);
        }
        graph
    }
}

impl From<DependencyGraph> for Vec<DependencyEntry> {
    fn from(graph: DependencyGraph) -> Self {
        graph
            .dependencies
            .into_iter()
            .map(|(object, dependencies)| DependencyEntry { object, dependencies })
            .collect()
    }
}
