//! Arena DOM shared by the render engine and the hydration controller
//!
//! Nodes live in a flat `Vec` and reference each other by index, so a
//! template skeleton can be cloned per request in one allocation and the
//! client can hold stable handles (`NodeId`) across async steps.
//! Content removed by `clear_children` stays addressable until the owner
//! calls [`Document::reclaim`]; after that its ids may be handed out again.

use super::escape::{escape_attr, escape_text, unescape};

/// Index of a node inside its [`Document`]
pub type NodeId = usize;

/// Elements that never have children
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is kept verbatim
pub(crate) const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

pub(crate) fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    /// Decoded attribute values in source order; valueless attributes hold ""
    pub attrs: Vec<(String, String)>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element(Element),
    /// Text as markup: already escaped, emitted verbatim
    Text(String),
    Comment(String),
    Doctype(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Bumped each time the slot is reclaimed
    generation: u32,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    /// Roots of subtrees removed by `clear_children`, not yet reclaimed
    garbage: Vec<NodeId>,
    free: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document holding only the root node
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                generation: 0,
            }],
            garbage: Vec::new(),
            free: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        0
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|el| el.attr(name))
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    /// Set (or replace) an attribute; no-op on non-elements
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(el) = self.element_mut(id) {
            match el.attrs.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value,
                None => el.attrs.push((name.to_string(), value)),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        let el = self.element_mut(id)?;
        let pos = el.attrs.iter().position(|(k, _)| k == name)?;
        Some(el.attrs.remove(pos).1)
    }

    /// Whether the class attribute contains `class`
    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.has_class(id, class) {
            return;
        }
        let classes = match self.attr(id, "class") {
            Some(c) if !c.trim().is_empty() => format!("{} {}", c.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr(id, "class", classes);
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        let Some(current) = self.attr(id, "class") else {
            return;
        };
        let kept: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
        if kept.is_empty() {
            self.remove_attr(id, "class");
        } else {
            let kept = kept.join(" ");
            self.set_attr(id, "class", kept);
        }
    }

    // ═══════════════════════════════════════════
    // TREE MUTATION
    // ═══════════════════════════════════════════

    /// Create a detached node
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                let slot = &mut self.nodes[id];
                slot.kind = kind;
                slot.parent = None;
                slot.children.clear();
                id
            }
            None => {
                self.nodes.push(Node {
                    kind,
                    parent: None,
                    children: Vec::new(),
                    generation: 0,
                });
                self.nodes.len() - 1
            }
        }
    }

    /// Create a node and append it to `parent`
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.create(kind);
        self.append_child(parent, id);
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Insert `child` into `parent` right before `reference` (append if absent)
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        let pos = reference
            .and_then(|r| self.nodes[parent].children.iter().position(|c| *c == r))
            .unwrap_or(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(pos, child);
    }

    /// Unlink a node from its parent
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|c| *c != id);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id].children);
        for child in children {
            self.nodes[child].parent = None;
            self.garbage.push(child);
        }
    }

    /// Free every subtree removed by `clear_children` that was not re-attached
    ///
    /// Handles into those subtrees become invalid: later nodes reuse their ids.
    /// Returns the number of freed nodes.
    pub fn reclaim(&mut self) -> usize {
        let mut freed = 0;
        for root in std::mem::take(&mut self.garbage) {
            if self.nodes[root].parent.is_some() {
                continue;
            }
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                let node = &mut self.nodes[id];
                node.kind = NodeKind::Text(String::new());
                node.parent = None;
                node.generation = node.generation.wrapping_add(1);
                stack.append(&mut node.children);
                self.free.push(id);
                freed += 1;
            }
        }
        freed
    }

    /// Current generation of `id`; a handle is stale once this changes
    pub fn generation(&self, id: NodeId) -> u32 {
        self.nodes[id].generation
    }

    /// Whether the handle (`id`, `generation`) still names a connected node
    pub fn is_live(&self, id: NodeId, generation: u32) -> bool {
        self.nodes[id].generation == generation && self.is_connected(id)
    }

    /// Slots held by the arena, reachable or not
    pub fn arena_len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Nodes reachable from the root, the root included
    pub fn live_len(&self) -> usize {
        1 + self.descendants(self.root()).len()
    }

    /// Replace content by a single escaped text node
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        self.clear_children(id);
        if !text.is_empty() {
            self.append(id, NodeKind::Text(escape_text(text)));
        }
    }

    /// Copy the top-level nodes of `fragment` under `parent`, before `reference`
    ///
    /// Returns the ids of the copied top-level nodes in this document.
    pub fn graft(
        &mut self,
        parent: NodeId,
        fragment: &Document,
        reference: Option<NodeId>,
    ) -> Vec<NodeId> {
        let mut top = Vec::new();
        for &child in fragment.children(fragment.root()) {
            let copied = self.copy_subtree(fragment, child);
            self.insert_before(parent, copied, reference);
            top.push(copied);
        }
        top
    }

    fn copy_subtree(&mut self, from: &Document, id: NodeId) -> NodeId {
        let copied = self.create(from.kind(id).clone());
        for &child in from.children(id) {
            let c = self.copy_subtree(from, child);
            self.append_child(copied, c);
        }
        copied
    }

    /// Replace the children of `id` by parsed `markup`
    pub fn set_inner_html(&mut self, id: NodeId, markup: &str) -> Result<(), super::ParseError> {
        let fragment = Document::parse(markup)?;
        self.clear_children(id);
        self.graft(id, &fragment, None);
        Ok(())
    }

    // ═══════════════════════════════════════════
    // TRAVERSAL
    // ═══════════════════════════════════════════

    /// All descendants of `id` in document order (excluding `id`)
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    /// Descendant elements of `id` matching `pred`, in document order
    pub fn select<F>(&self, id: NodeId, pred: F) -> Vec<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.element(*n).map(&pred).unwrap_or(false))
            .collect()
    }

    pub fn find_first<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.descendants(id)
            .into_iter()
            .find(|n| self.element(*n).map(&pred).unwrap_or(false))
    }

    /// Nearest ancestor of `id` (excluding `id`) matching `pred`
    pub fn closest_ancestor<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        let mut cur = self.nodes[id].parent;
        while let Some(node) = cur {
            if self.element(node).map(&pred).unwrap_or(false) {
                return Some(node);
            }
            cur = self.nodes[node].parent;
        }
        None
    }

    /// Whether `id` is still reachable from the root
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == self.root() {
                return true;
            }
            match self.nodes[cur].parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// Decoded text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let NodeKind::Text(t) = &self.nodes[node].kind {
                out.push_str(&unescape(t));
            }
        }
        out
    }

    // ═══════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════

    /// Serialize the whole document
    pub fn to_html(&self) -> String {
        self.inner_html(self.root())
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in &self.nodes[id].children {
            self.write_node(child, &mut out);
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Document => {
                for &child in &self.nodes[id].children {
                    self.write_node(child, out);
                }
            }
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
            NodeKind::Doctype(d) => {
                out.push_str("<!");
                out.push_str(d);
                out.push('>');
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.name);
                for (k, v) in &el.attrs {
                    out.push(' ');
                    out.push_str(k);
                    if !v.is_empty() {
                        out.push_str("=\"");
                        out.push_str(&escape_attr(v));
                        out.push('"');
                    }
                }
                out.push('>');
                if is_void(&el.name) {
                    return;
                }
                for &child in &self.nodes[id].children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&el.name);
                out.push('>');
            }
        }
    }
}
