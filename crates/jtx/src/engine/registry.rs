//! Definition records and the name registry.
//!
//! Global definitions live in per-kind name tables; scoped definitions
//! (created inside list item instances) are only discoverable through their
//! element, which is how the ancestor walk finds them.

use rustc_hash::FxHashMap;

use crate::dom::NodeId;

use super::source::SourceDef;
use super::state::StateDef;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct DefId(pub u32);

#[derive(Debug)]
pub enum Definition {
    State(StateDef),
    Source(SourceDef),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::State(state) => &state.name,
            Definition::Source(source) => &source.name,
        }
    }

    pub fn element(&self) -> NodeId {
        match self {
            Definition::State(state) => state.element,
            Definition::Source(source) => source.element,
        }
    }

    pub fn is_scoped(&self) -> bool {
        match self {
            Definition::State(state) => state.scoped,
            Definition::Source(source) => source.scoped,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    defs: Vec<Option<Definition>>,
    state_names: FxHashMap<String, DefId>,
    source_names: FxHashMap<String, DefId>,
    by_element: FxHashMap<NodeId, DefId>,
}

impl Registry {
    fn push(&mut self, def: Definition) -> DefId {
        let id = DefId(self.defs.len() as u32);
        self.by_element.insert(def.element(), id);
        self.defs.push(Some(def));
        id
    }

    /// Register a global definition. When the name is already taken in its
    /// kind the definition is handed back so the caller can keep it as an
    /// element-scoped shadow (descendants still resolve it lexically, but
    /// it never owns the global name).
    pub fn insert_global(&mut self, def: Definition) -> Result<DefId, Definition> {
        let name = def.name().to_string();
        let table = match def {
            Definition::State(_) => &mut self.state_names,
            Definition::Source(_) => &mut self.source_names,
        };
        if table.contains_key(&name) {
            return Err(def);
        }
        let is_state = matches!(def, Definition::State(_));
        let id = self.push(def);
        if is_state {
            self.state_names.insert(name, id);
        } else {
            self.source_names.insert(name, id);
        }
        Ok(id)
    }

    /// Register a scoped definition: discoverable by element only.
    pub fn insert_scoped(&mut self, def: Definition) -> DefId {
        self.push(def)
    }

    pub fn get(&self, id: DefId) -> Option<&Definition> {
        self.defs.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: DefId) -> Option<&mut Definition> {
        self.defs.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn state(&self, id: DefId) -> Option<&StateDef> {
        match self.get(id)? {
            Definition::State(state) => Some(state),
            _ => None,
        }
    }

    pub fn state_mut(&mut self, id: DefId) -> Option<&mut StateDef> {
        match self.get_mut(id)? {
            Definition::State(state) => Some(state),
            _ => None,
        }
    }

    pub fn source(&self, id: DefId) -> Option<&SourceDef> {
        match self.get(id)? {
            Definition::Source(source) => Some(source),
            _ => None,
        }
    }

    pub fn source_mut(&mut self, id: DefId) -> Option<&mut SourceDef> {
        match self.get_mut(id)? {
            Definition::Source(source) => Some(source),
            _ => None,
        }
    }

    pub fn def_at(&self, element: NodeId) -> Option<DefId> {
        self.by_element.get(&element).copied()
    }

    pub fn global_state(&self, name: &str) -> Option<DefId> {
        self.state_names.get(name).copied()
    }

    pub fn global_source(&self, name: &str) -> Option<DefId> {
        self.source_names.get(name).copied()
    }

    pub fn ids(&self) -> Vec<DefId> {
        (0..self.defs.len() as u32)
            .map(DefId)
            .filter(|id| self.get(*id).is_some())
            .collect()
    }

    /// Remove a definition. Global name entries are only deleted when they
    /// still point at this definition (a later re-registration under the
    /// same name must survive).
    pub fn remove(&mut self, id: DefId) -> Option<Definition> {
        let def = self.defs.get_mut(id.0 as usize)?.take()?;
        self.by_element.remove(&def.element());
        if !def.is_scoped() {
            let table = match def {
                Definition::State(_) => &mut self.state_names,
                Definition::Source(_) => &mut self.source_names,
            };
            if table.get(def.name()) == Some(&id) {
                table.remove(def.name());
            }
        }
        Some(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn state(name: &str, element: NodeId, scoped: bool) -> Definition {
        Definition::State(StateDef {
            name: name.to_string(),
            element,
            value: BTreeMap::new(),
            persisted: Vec::new(),
            url_keys: Vec::new(),
            pending: Default::default(),
            aliases: Default::default(),
            scoped,
        })
    }

    fn node(index: u32) -> NodeId {
        NodeId {
            index,
            generation: 0,
        }
    }

    #[test]
    fn duplicate_global_names_are_rejected() {
        let mut registry = Registry::default();
        assert!(registry.insert_global(state("ui", node(1), false)).is_ok());
        assert!(registry.insert_global(state("ui", node(2), false)).is_err());
    }

    #[test]
    fn scoped_definitions_share_names() {
        let mut registry = Registry::default();
        let global = registry.insert_global(state("ui", node(1), false)).unwrap();
        let scoped = registry.insert_scoped(state("ui", node(2), true));
        assert_ne!(global, scoped);
        assert_eq!(registry.global_state("ui"), Some(global));
        assert_eq!(registry.def_at(node(2)), Some(scoped));
    }

    #[test]
    fn remove_only_clears_current_holder() {
        let mut registry = Registry::default();
        let first = registry.insert_global(state("ui", node(1), false)).unwrap();
        registry.remove(first);
        // Name is free again
        let second = registry.insert_global(state("ui", node(2), false)).unwrap();
        // Removing the stale id must not clobber the new holder
        registry.remove(first);
        assert_eq!(registry.global_state("ui"), Some(second));
    }

    #[test]
    fn rejected_duplicate_is_handed_back() {
        let mut registry = Registry::default();
        registry.insert_global(state("ui", node(1), false)).unwrap();
        let returned = registry.insert_global(state("ui", node(2), false)).unwrap_err();
        assert_eq!(returned.name(), "ui");
        // The caller keeps it as an element-scoped shadow
        let id = registry.insert_scoped(returned);
        assert_eq!(registry.def_at(node(2)), Some(id));
        assert_eq!(registry.global_state("ui"), Some(DefId(0)));
    }
}
