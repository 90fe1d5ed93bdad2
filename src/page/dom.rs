use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

// ============================================================================
// Node Handles
// ============================================================================

/// Stable handle to a node. Handles are never reused, so a handle held
/// after the node left the tree still names that same (detached) node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layout participation of an element (`style.display`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Display {
    #[default]
    Default,
    /// Removed from layout entirely.
    None,
}

#[derive(Debug, Clone)]
enum NodeData {
    Root,
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        display: Display,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One structural change: children added to or removed from `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

// ============================================================================
// Document
// ============================================================================

/// Arena-backed document tree standing in for the host page.
///
/// Structural changes under the root (child-list changes only, as with a
/// `childList` observer) are reported to every receiver handed out by
/// [`Document::observe`]. Attribute and display changes are silent.
/// Operations on unknown handles are ignored.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    observers: Vec<mpsc::UnboundedSender<MutationRecord>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Root,
                parent: None,
                children: Vec::new(),
            }],
            observers: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes ever created, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Subscribe to structural mutations.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<MutationRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Number of subscribers whose receiver is still alive.
    pub fn observer_count(&self) -> usize {
        self.observers.iter().filter(|tx| !tx.is_closed()).count()
    }

    fn notify(&mut self, record: MutationRecord) {
        if !self.is_connected(record.target) {
            return;
        }
        self.observers.retain(|tx| tx.send(record.clone()).is_ok());
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            display: Display::Default,
        })
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    /// Move `child` to the end of `parent`'s children.
    ///
    /// Returns false (and changes nothing) if either handle is unknown,
    /// `parent` is a text node, or the move would create a cycle.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let parent_ok = self
            .node(parent)
            .is_some_and(|n| !matches!(n.data, NodeData::Text(_)));
        if !parent_ok || child == self.root() || self.node(child).is_none() {
            return false;
        }
        if self.contains(child, parent) {
            return false;
        }

        self.detach(child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        self.notify(MutationRecord {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        true
    }

    /// Detach `node` (and its subtree) from the tree.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.node(node).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|&c| c != node);
        }
        if let Some(n) = self.node_mut(node) {
            n.parent = None;
        }
        self.notify(MutationRecord {
            target: parent,
            added: Vec::new(),
            removed: vec![node],
        });
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.node(node)
            .is_some_and(|n| matches!(n.data, NodeData::Element { .. }))
    }

    pub fn first_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .find(|&c| self.is_element(c))
    }

    /// Inclusive: a node contains itself.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Whether the node is reachable from the root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root(), node)
    }

    /// Descendants of `node` in document order, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Nearest inclusive ancestor matching `pred`.
    pub fn closest(&self, node: NodeId, pred: impl Fn(&Self, NodeId) -> bool) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if pred(self, id) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    /// Descendant elements of `node` carrying `class`, in document order.
    pub fn elements_with_class(&self, node: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(node)
            .into_iter()
            .filter(|&id| self.has_class(id, class))
            .collect()
    }

    /// First descendant element of `node` carrying `class`.
    pub fn first_with_class(&self, node: NodeId, class: &str) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.has_class(id, class) {
                return Some(id);
            }
            stack.extend(self.children(id).iter().rev().copied());
        }
        None
    }

    // ========================================================================
    // Element Data
    // ========================================================================

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.data {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.node(node)?.data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    fn attrs_mut(&mut self, node: NodeId) -> Option<&mut BTreeMap<String, String>> {
        match &mut self.node_mut(node)?.data {
            NodeData::Element { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(attrs) = self.attrs_mut(node) {
            if attrs.get(name).map(String::as_str) != Some(value) {
                attrs.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let Some(attrs) = self.attrs_mut(node) {
            attrs.remove(name);
        }
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|list| list.split_whitespace().any(|c| c == class))
    }

    /// Add or remove one class, leaving the others in place.
    pub fn set_class(&mut self, node: NodeId, class: &str, present: bool) {
        if self.has_class(node, class) == present {
            return;
        }
        let current = self.attr(node, "class").unwrap_or_default();
        let mut classes: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
        if present {
            classes.push(class);
        }
        let joined = classes.join(" ");
        self.set_attr(node, "class", &joined);
    }

    /// The `hidden` boolean attribute.
    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.has_attr(node, "hidden")
    }

    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) {
        if hidden {
            self.set_attr(node, "hidden", "");
        } else {
            self.remove_attr(node, "hidden");
        }
    }

    pub fn display(&self, node: NodeId) -> Display {
        match self.node(node).map(|n| &n.data) {
            Some(NodeData::Element { display, .. }) => *display,
            _ => Display::Default,
        }
    }

    pub fn set_display(&mut self, node: NodeId, value: Display) {
        if let Some(Node {
            data: NodeData::Element { display, .. },
            ..
        }) = self.node_mut(node)
        {
            *display = value;
        }
    }

    // ========================================================================
    // Text
    // ========================================================================

    /// Concatenated text of the node and its descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        if let Some(NodeData::Text(text)) = self.node(node).map(|n| &n.data) {
            out.push_str(text);
        }
        for id in self.descendants(node) {
            if let Some(NodeData::Text(text)) = self.node(id).map(|n| &n.data) {
                out.push_str(text);
            }
        }
        out
    }

    /// Replace the children of `node` with a single text node.
    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if !self.is_element(node) {
            return;
        }
        let old: Vec<NodeId> = self.children(node).to_vec();
        for child in old {
            self.detach(child);
        }
        let text_node = self.create_text(text);
        self.append_child(node, text_node);
    }
}

// ============================================================================
// Shared Handle
// ============================================================================

/// Document shared between the scan loop, the watcher and action handlers.
///
/// The lock is only ever held for synchronous work, never across an await.
#[derive(Debug, Clone, Default)]
pub struct SharedDocument(Arc<Mutex<Document>>);

impl SharedDocument {
    pub fn new(document: Document) -> Self {
        Self(Arc::new(Mutex::new(document)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Document> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
