//! The binding-to-dependency graph.
//!
//! Edges are stored in both directions so a flush can walk from changed
//! definitions to affected bindings, and cleanup can walk from a dying
//! binding to its rows. A binding's edges are cleared and rebuilt on every
//! run, which keeps conditional reads accurate.

use rustc_hash::{FxHashMap, FxHashSet};

use super::registry::DefId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BindingId(pub u32);

#[derive(Default)]
pub struct DepGraph {
    binding_deps: FxHashMap<BindingId, FxHashSet<DefId>>,
    dep_bindings: FxHashMap<DefId, FxHashSet<BindingId>>,
}

impl DepGraph {
    pub fn record(&mut self, binding: BindingId, dep: DefId) {
        self.binding_deps.entry(binding).or_default().insert(dep);
        self.dep_bindings.entry(dep).or_default().insert(binding);
    }

    /// Drop every edge of a binding (before a rerun or on removal).
    pub fn clear_binding(&mut self, binding: BindingId) {
        if let Some(deps) = self.binding_deps.remove(&binding) {
            for dep in deps {
                if let Some(bindings) = self.dep_bindings.get_mut(&dep) {
                    bindings.remove(&binding);
                }
            }
        }
    }

    pub fn remove_def(&mut self, dep: DefId) {
        if let Some(bindings) = self.dep_bindings.remove(&dep) {
            for binding in bindings {
                if let Some(deps) = self.binding_deps.get_mut(&binding) {
                    deps.remove(&dep);
                }
            }
        }
    }

    /// Union of bindings attached to any of the given definitions, in
    /// creation (document) order.
    pub fn bindings_of(&self, deps: &[DefId]) -> Vec<BindingId> {
        let mut set = FxHashSet::default();
        for dep in deps {
            if let Some(bindings) = self.dep_bindings.get(dep) {
                set.extend(bindings.iter().copied());
            }
        }
        let mut bindings: Vec<BindingId> = set.into_iter().collect();
        bindings.sort();
        bindings
    }

    pub fn deps_of(&self, binding: BindingId) -> Vec<DefId> {
        self.binding_deps
            .get(&binding)
            .map(|deps| {
                let mut deps: Vec<DefId> = deps.iter().copied().collect();
                deps.sort();
                deps
            })
            .unwrap_or_default()
    }

    /// Both directions agree on every edge.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.binding_deps.iter().all(|(binding, deps)| {
            deps.iter().all(|dep| {
                self.dep_bindings
                    .get(dep)
                    .is_some_and(|bindings| bindings.contains(binding))
            })
        }) && self.dep_bindings.iter().all(|(dep, bindings)| {
            bindings.iter().all(|binding| {
                self.binding_deps
                    .get(binding)
                    .is_some_and(|deps| deps.contains(dep))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_bidirectional() {
        let mut graph = DepGraph::default();
        graph.record(BindingId(1), DefId(10));
        graph.record(BindingId(1), DefId(11));
        graph.record(BindingId(2), DefId(10));

        assert_eq!(graph.bindings_of(&[DefId(10)]), vec![BindingId(1), BindingId(2)]);
        assert_eq!(graph.deps_of(BindingId(1)), vec![DefId(10), DefId(11)]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn clear_binding_rebuild() {
        let mut graph = DepGraph::default();
        graph.record(BindingId(1), DefId(10));
        graph.clear_binding(BindingId(1));
        assert!(graph.bindings_of(&[DefId(10)]).is_empty());

        // Conditional read now depends on something else
        graph.record(BindingId(1), DefId(11));
        assert_eq!(graph.bindings_of(&[DefId(11)]), vec![BindingId(1)]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn union_is_deduplicated_and_ordered() {
        let mut graph = DepGraph::default();
        graph.record(BindingId(3), DefId(1));
        graph.record(BindingId(3), DefId(2));
        graph.record(BindingId(1), DefId(2));
        assert_eq!(
            graph.bindings_of(&[DefId(1), DefId(2)]),
            vec![BindingId(1), BindingId(3)]
        );
    }
}
