//! Name resolution through lexical document scope.
//!
//! `@name` means "the nearest enclosing definition called name". The walk
//! starts at the referencing element and climbs to the root; a scoped
//! definition inside a list item therefore shadows a global of the same
//! name. The global tables are only a fallback, and a global hit counts
//! only when the referencing element actually sits inside the definition's
//! element, which keeps sibling trees from leaking into each other.

use crate::dom::NodeId;

use super::registry::DefId;
use super::Engine;

pub fn resolve(engine: &Engine, element: NodeId, name: &str) -> Option<DefId> {
    for node in engine.doc.ancestors_inclusive(element) {
        if let Some(def_id) = engine.registry.def_at(node) {
            if engine
                .registry
                .get(def_id)
                .map(|def| def.name() == name)
                .unwrap_or(false)
            {
                return Some(def_id);
            }
        }
    }

    let def_id = engine
        .registry
        .global_state(name)
        .or_else(|| engine.registry.global_source(name))?;
    let def_element = engine.registry.get(def_id)?.element();
    if engine.doc.contains(def_element, element) {
        Some(def_id)
    } else {
        None
    }
}
