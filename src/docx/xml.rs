//! Arena-backed XML tree for one package part.
//!
//! Nodes live in a flat `Vec` and refer to each other by [`NodeId`]; a
//! block snapshot keeps ids, never references, so extraction and
//! replacement have a clean ownership boundary. Parsing keeps everything
//! that is not an element or text (declaration, comments, processing
//! instructions, CDATA) as opaque events so a part round-trips.

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::DocumentError;

/// Index of a node inside its [`XmlTree`]. Only meaningful for the tree
/// that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub enum NodeData {
    Root,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        /// Written as `<x/>` when it still has no children.
        self_closing: bool,
    },
    Text(String),
    Other(Event<'static>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Node>,
}

impl Default for XmlTree {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Parse a part. `part` only labels errors.
    pub fn parse(xml: &str, part: &str) -> Result<Self, DocumentError> {
        let mut tree = XmlTree::new();
        let mut stack = vec![tree.root()];

        let mut reader = Reader::from_str(xml);
        // Whitespace inside w:t is content.
        reader.trim_text(false);

        loop {
            let parent = *stack.last().unwrap_or(&tree.root());
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let (name, attrs) = element_parts(&e, part)?;
                    let id = tree.push(parent, NodeData::Element {
                        name,
                        attrs,
                        self_closing: false,
                    });
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    let (name, attrs) = element_parts(&e, part)?;
                    tree.push(parent, NodeData::Element {
                        name,
                        attrs,
                        self_closing: true,
                    });
                }
                Ok(Event::End(_)) => {
                    if stack.len() <= 1 {
                        return Err(DocumentError::malformed(part, "unbalanced end tag"));
                    }
                    stack.pop();
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| DocumentError::malformed(part, err))?
                        .into_owned();
                    tree.push(parent, NodeData::Text(text));
                }
                Ok(Event::Eof) => break,
                Ok(other) => {
                    tree.push(parent, NodeData::Other(other.into_owned()));
                }
                Err(e) => {
                    return Err(DocumentError::malformed(
                        part,
                        format!("at byte {}: {e}", reader.buffer_position()),
                    ));
                }
            }
        }

        if stack.len() != 1 {
            return Err(DocumentError::malformed(part, "unclosed element at end of input"));
        }
        if tree.document_element().is_none() {
            return Err(DocumentError::malformed(part, "no root element"));
        }
        Ok(tree)
    }

    /// Serialize the whole tree back to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, quick_xml::Error> {
        let mut writer = Writer::new(Vec::new());
        for &child in &self.nodes[0].children {
            self.write_node(&mut writer, child)?;
        }
        Ok(writer.into_inner())
    }

    /// Serialize a single subtree. Used to compare runs before and after an
    /// edit.
    pub fn node_to_string(&self, id: NodeId) -> Result<String, quick_xml::Error> {
        let mut writer = Writer::new(Vec::new());
        self.write_node(&mut writer, id)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> Result<(), quick_xml::Error> {
        let node = &self.nodes[id.0];
        match &node.data {
            NodeData::Root => {
                for &child in &node.children {
                    self.write_node(writer, child)?;
                }
            }
            NodeData::Element {
                name,
                attrs,
                self_closing,
            } => {
                let mut start = BytesStart::new(name.as_str());
                for (key, value) in attrs {
                    start.push_attribute((key.as_str(), value.as_str()));
                }
                if node.children.is_empty() && *self_closing {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    writer.write_event(Event::Start(start))?;
                    for &child in &node.children {
                        self.write_node(writer, child)?;
                    }
                    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
                }
            }
            NodeData::Text(text) => {
                writer.write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))?;
            }
            NodeData::Other(event) => {
                writer.write_event(event)?;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The single top-level element (`w:document`, `w:hdr`, ...).
    pub fn document_element(&self) -> Option<NodeId> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&c| matches!(self.nodes[c.0].data, NodeData::Element { .. }))
    }

    /// Whether `id` is a node of this tree that is still reachable from
    /// the root. Detached nodes stay in the arena but are not contained.
    pub fn contains(&self, id: NodeId) -> bool {
        if id.0 >= self.nodes.len() {
            return false;
        }
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current == self.root()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Element name, `None` for non-elements.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId, name: &str) -> bool {
        self.name(id) == Some(name)
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            match attrs.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((key.to_string(), value.to_string())),
            }
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// First direct child element called `name`.
    pub fn child_element(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.is_element(c, name))
    }

    /// Direct child elements called `name`, in order.
    pub fn child_elements<'a>(&'a self, id: NodeId, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&c| self.is_element(c, name))
    }

    /// Pre-order descendants of `id` (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Nearest ancestor (excluding `id`) called `name`.
    pub fn ancestor(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if self.is_element(node, name) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Concatenated text of the direct text children of `id`.
    pub fn own_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            if let NodeData::Text(text) = &self.nodes[child.0].data {
                out.push_str(text);
            }
        }
        out
    }

    /// Replace the direct text children of `id` with a single text node.
    /// An empty string leaves the element without text children.
    pub fn set_own_text(&mut self, id: NodeId, text: &str) {
        let text_children: Vec<NodeId> = self
            .children(id)
            .iter()
            .copied()
            .filter(|&c| matches!(self.nodes[c.0].data, NodeData::Text(_)))
            .collect();

        let mut kept = None;
        for child in text_children {
            if kept.is_none() && !text.is_empty() {
                self.nodes[child.0].data = NodeData::Text(text.to_string());
                kept = Some(child);
            } else {
                self.detach(child);
            }
        }
        if kept.is_none() && !text.is_empty() {
            self.push(id, NodeData::Text(text.to_string()));
        }
        if let NodeData::Element { self_closing, .. } = &mut self.nodes[id.0].data {
            *self_closing = false;
        }
    }

    /// Create a detached element.
    pub fn new_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.alloc(NodeData::Element {
            name: name.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            self_closing: true,
        })
    }

    /// Append a new child element to `parent`.
    pub fn append_element(&mut self, parent: NodeId, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.new_element(name, attrs);
        self.append(parent, id);
        id
    }

    /// Attach a detached node as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Attach a detached node as child number `index` of `parent`.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Insert `node` as the next sibling of `anchor`. Returns false when the
    /// anchor has no parent.
    pub fn insert_after(&mut self, anchor: NodeId, node: NodeId) -> bool {
        let Some(parent) = self.parent(anchor) else {
            return false;
        };
        self.detach(node);
        let position = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == anchor)
            .map(|p| p + 1)
            .unwrap_or(self.nodes[parent.0].children.len());
        self.insert_child(parent, position, node);
        true
    }

    /// Unlink a node from its parent. The node stays in the arena and can
    /// be re-attached.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Deep copy of a subtree, returned detached.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let data = self.nodes[id.0].data.clone();
        let copy = self.alloc(data);
        let children = self.nodes[id.0].children.clone();
        for child in children {
            let child_copy = self.deep_clone(child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    fn push(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = self.alloc(data);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
        id
    }
}

fn element_parts(
    e: &BytesStart<'_>,
    part: &str,
) -> Result<(String, Vec<(String, String)>), DocumentError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DocumentError::malformed(part, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| DocumentError::malformed(part, err))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok((name, attrs))
}
