//! In-memory document tree.
//!
//! Nodes live in a generational-index arena: freed slots are reused with a
//! bumped generation so stale `NodeId`s are detected instead of aliasing a
//! new node. The engine distinguishes *detaching* a subtree (unlink, keep
//! alive — used by `jtx-if` and blueprint handling) from *removing* it
//! (free the slots and report every dropped node so reactive resources can
//! be released).

use indexmap::IndexMap;

pub mod html;

/// Generational index into the node arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    /// Insertion-ordered so serialization is stable.
    pub attrs: IndexMap<String, String>,
}

#[derive(Debug)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

pub struct Document {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    root: NodeId,
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::with_capacity(64),
            free_list: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        };
        doc.root = doc.alloc(NodeData::Document);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            parent: None,
            children: Vec::new(),
            data,
        };
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn free(&mut self, id: NodeId) {
        if self.is_valid(id) {
            let slot = &mut self.slots[id.index as usize];
            slot.node = None;
            slot.generation += 1;
            self.free_list.push(id.index);
        }
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        (id.index as usize) < self.slots.len()
            && self.slots[id.index as usize].generation == id.generation
            && self.slots[id.index as usize].node.is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if self.is_valid(id) {
            self.slots[id.index as usize].node.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.is_valid(id) {
            self.slots[id.index as usize].node.as_mut()
        } else {
            None
        }
    }

    // ── Construction ──────────────────────────────────────────────────

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attrs: IndexMap::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Comment(text.to_string()))
    }

    // ── Tree mutation ─────────────────────────────────────────────────

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Insert `child` into `parent` before `before` (append when `None` or
    /// when `before` is not a child of `parent`).
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        self.detach(child);
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        let position = before.and_then(|b| {
            self.get(parent)
                .and_then(|node| node.children.iter().position(|&c| c == b))
        });
        if let Some(node) = self.get_mut(parent) {
            match position {
                Some(at) => node.children.insert(at, child),
                None => node.children.push(child),
            }
        }
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        let first = self.get(parent).and_then(|node| node.children.first().copied());
        self.insert_before(parent, child, first);
    }

    /// Unlink a subtree from its parent without freeing it.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.get(id).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.retain(|&child| child != id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = None;
        }
    }

    /// Remove a subtree and free its slots. Returns every freed node id,
    /// subtree root included, so the caller can run cleanup hooks.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.is_valid(id) {
            return Vec::new();
        }
        self.detach(id);
        let removed = self.collect_subtree(id);
        for &node in &removed {
            self.free(node);
        }
        removed
    }

    /// Pre-order listing of a subtree.
    pub fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.is_valid(current) {
                continue;
            }
            nodes.push(current);
            if let Some(node) = self.get(current) {
                for &child in node.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        nodes
    }

    /// Deep-clone a subtree; the clone is detached.
    pub fn clone_subtree(&mut self, id: NodeId) -> Option<NodeId> {
        let data = self.get(id)?.data.clone();
        let children: Vec<NodeId> = self.get(id)?.children.clone();
        let clone = self.alloc(data);
        for child in children {
            if let Some(child_clone) = self.clone_subtree(child) {
                self.append_child(clone, child_clone);
            }
        }
        Some(clone)
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).map(|node| node.children.clone()).unwrap_or_default()
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = &self.get(parent)?.children;
        let at = siblings.iter().position(|&c| c == id)?;
        siblings.get(at + 1).copied()
    }

    /// Ancestors from the node itself up to the document root.
    pub fn ancestors_inclusive(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if !self.is_valid(node) {
                break;
            }
            chain.push(node);
            current = self.parent(node);
        }
        chain
    }

    /// Is `descendant` inside `ancestor` (inclusive)?
    pub fn contains(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        self.ancestors_inclusive(descendant)
            .iter()
            .any(|&node| node == ancestor)
    }

    /// Is the node still reachable from the document root?
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.ancestors_inclusive(id)
            .last()
            .map(|&top| top == self.root)
            .unwrap_or(false)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.get(id)?.data {
            NodeData::Element(element) => Some(element.tag.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.get(id).map(|n| &n.data), Some(NodeData::Element(_)))
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.get(id)?.data {
            NodeData::Element(element) => element.attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(NodeData::Element(element)) = self.get_mut(id).map(|n| &mut n.data) {
            element.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(NodeData::Element(element)) = self.get_mut(id).map(|n| &mut n.data) {
            element.attrs.shift_remove(name);
        }
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn attrs(&self, id: NodeId) -> Vec<(String, String)> {
        match self.get(id).map(|n| &n.data) {
            Some(NodeData::Element(element)) => element
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        for node in self.collect_subtree(id) {
            if let Some(NodeData::Text(chunk)) = self.get(node).map(|n| &n.data) {
                text.push_str(chunk);
            }
        }
        text
    }

    /// Replace all children with a single text node. Returns the removed
    /// node ids so the engine can clean up bindings living inside.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Vec<NodeId> {
        let removed = self.remove_children(id);
        let text_node = self.create_text(text);
        self.append_child(id, text_node);
        removed
    }

    pub fn remove_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = self.children(id);
        let mut removed = Vec::new();
        for child in children {
            removed.extend(self.remove_subtree(child));
        }
        removed
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .into_iter()
            .filter(|&child| self.is_element(child))
            .collect()
    }

    pub fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
        self.element_children(id).into_iter().next()
    }

    /// First element with the given `id` attribute, in document order.
    pub fn element_by_id(&self, id_attr: &str) -> Option<NodeId> {
        self.collect_subtree(self.root)
            .into_iter()
            .find(|&node| self.attr(node, "id") == Some(id_attr))
    }

    /// Every element with the given tag, in document order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.collect_subtree(self.root)
            .into_iter()
            .filter(|&node| self.tag(node) == Some(tag))
            .collect()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
