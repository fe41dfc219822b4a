//! Lossless arena XML tree.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Detached
//! nodes stay in the arena, so a handle taken before an edit never dangles;
//! it just stops being reachable from the document root.
//!
//! Serialization reproduces the parsed text byte for byte with two
//! exceptions that apply to every document alike: end tags are written as
//! `</name>` and doctype content is trimmed. Start tags keep their original
//! spelling until one of their attributes is edited, at which point the tag is
//! written canonically (`name="value"`, double quotes).

use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlError {
    pub position: u64,
    pub message: String,
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.position)
    }
}

impl std::error::Error for XmlError {}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    /// Original text between `<` and `>` (or `/>`); `None` once edited.
    raw_start: Option<String>,
    self_closing: bool,
}

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Element(Element),
    /// Escaped character data, kept as written.
    Text(String),
    /// Comments, declarations, CDATA and friends, delimiters included.
    Markup(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Node>,
}

impl XmlTree {
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut tree = XmlTree {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
        };
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut open = vec![tree.document()];
        loop {
            let position = reader.buffer_position() as u64;
            let error = |message: String| XmlError { position, message };
            let parent = *open.last().ok_or_else(|| error("unbalanced tree".into()))?;

            let event = reader
                .read_event()
                .map_err(|e| error(e.to_string()))?;
            match event {
                Event::Start(start) => {
                    let element = element_from(&start, false).map_err(error)?;
                    let id = tree.push(parent, NodeData::Element(element));
                    open.push(id);
                }
                Event::Empty(start) => {
                    let element = element_from(&start, true).map_err(error)?;
                    tree.push(parent, NodeData::Element(element));
                }
                Event::End(_) => {
                    if open.len() < 2 {
                        return Err(error("unexpected closing tag".into()));
                    }
                    open.pop();
                }
                Event::Text(content) => {
                    let raw = utf8(&content).map_err(error)?;
                    tree.push(parent, NodeData::Text(raw.to_string()));
                }
                Event::CData(content) => {
                    let raw = utf8(&content).map_err(error)?;
                    tree.push(parent, NodeData::Markup(format!("<![CDATA[{}]]>", raw)));
                }
                Event::Comment(content) => {
                    let raw = utf8(&content).map_err(error)?;
                    tree.push(parent, NodeData::Markup(format!("<!--{}-->", raw)));
                }
                Event::Decl(decl) => {
                    let raw = utf8(&decl).map_err(error)?;
                    tree.push(parent, NodeData::Markup(format!("<?{}?>", raw)));
                }
                Event::PI(pi) => {
                    let raw = utf8(&pi).map_err(error)?;
                    tree.push(parent, NodeData::Markup(format!("<?{}?>", raw)));
                }
                Event::DocType(content) => {
                    let raw = utf8(&content).map_err(error)?;
                    tree.push(parent, NodeData::Markup(format!("<!DOCTYPE {}>", raw.trim())));
                }
                Event::Eof => break,
            }
        }

        if open.len() != 1 {
            return Err(XmlError {
                position: text.len() as u64,
                message: format!("{} element(s) left unclosed", open.len() - 1),
            });
        }
        Ok(tree)
    }

    pub fn document(&self) -> NodeId {
        NodeId(0)
    }

    /// The single top-level element, if any.
    pub fn root_element(&self) -> Option<NodeId> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&id| self.is_element(id))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].data, NodeData::Element(_))
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Child elements, in order.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |&child| self.is_element(child))
    }

    /// First child element called `name`.
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.child_elements(id)
            .find(|&child| self.name(child) == Some(name))
    }

    /// Follow a `/`-separated chain of child element names.
    pub fn child_path(&self, id: NodeId, path: &str) -> Option<NodeId> {
        path.split('/')
            .try_fold(id, |current, name| self.child(current, name))
    }

    /// All element descendants of `id` (excluding `id`), depth-first in
    /// declaration order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id.0].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if self.is_element(next) {
                out.push(next);
                stack.extend(self.nodes[next.0].children.iter().rev().copied());
            }
        }
        out
    }

    /// First descendant element called `name`.
    pub fn find_descendant(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|&node| self.name(node) == Some(name))
    }

    /// Whether `id` is still reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.document() {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Number of element ancestors.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            if self.is_element(parent) {
                depth += 1;
            }
            current = self.nodes[parent.0].parent;
        }
        depth
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.element(id).and_then(|e| {
            e.attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        })
    }

    /// Set an attribute, appending it when absent. Returns whether anything
    /// changed; an unchanged value keeps the original tag spelling.
    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) -> bool {
        let Some(element) = self.element_mut(id) else {
            return false;
        };
        match element.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) if existing == value => return false,
            Some((_, existing)) => *existing = value.to_string(),
            None => element
                .attributes
                .push((key.to_string(), value.to_string())),
        }
        element.raw_start = None;
        true
    }

    /// Drop an attribute. Returns whether it was present.
    pub fn remove_attr(&mut self, id: NodeId, key: &str) -> bool {
        let Some(element) = self.element_mut(id) else {
            return false;
        };
        let before = element.attributes.len();
        element.attributes.retain(|(k, _)| k != key);
        if element.attributes.len() == before {
            return false;
        }
        element.raw_start = None;
        true
    }

    /// Shorthand for the `Value` attribute of child `name`, the way Live
    /// stores scalars (`<Name Value="..."/>`).
    pub fn child_value(&self, id: NodeId, name: &str) -> Option<&str> {
        self.child(id, name).and_then(|child| self.attr(child, "Value"))
    }

    pub fn rename(&mut self, id: NodeId, name: &str) {
        if let Some(element) = self.element_mut(id) {
            if element.name != name {
                element.name = name.to_string();
                element.raw_start = None;
            }
        }
    }

    /// Unescaped text content of the direct text children.
    pub fn text(&self, id: NodeId) -> Option<String> {
        let mut raw = String::new();
        for &child in &self.nodes[id.0].children {
            if let NodeData::Text(text) = &self.nodes[child.0].data {
                raw.push_str(text);
            }
        }
        if raw.is_empty() {
            return None;
        }
        Some(unescape(&raw).map(|s| s.into_owned()).unwrap_or(raw))
    }

    /// Remove every child of `id`.
    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    /// Detach `id` from its parent, together with the indentation text that
    /// precedes it.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        let siblings = &mut self.nodes[parent.0].children;
        let Some(position) = siblings.iter().position(|&c| c == id) else {
            return;
        };
        siblings.remove(position);
        if position > 0 {
            let before = siblings[position - 1];
            if matches!(&self.nodes[before.0].data, NodeData::Text(t) if t.trim().is_empty()) {
                self.nodes[parent.0].children.remove(position - 1);
                self.nodes[before.0].parent = None;
            }
        }
        self.nodes[id.0].parent = None;
    }

    /// Append a new element under `parent`, indented one tab deeper than the
    /// parent and placed before the parent's closing indentation.
    pub fn append_element(
        &mut self,
        parent: NodeId,
        name: &str,
        attributes: &[(&str, &str)],
    ) -> NodeId {
        let depth = if self.is_element(parent) {
            self.depth(parent) + 1
        } else {
            0
        };
        let element = Element {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            raw_start: None,
            self_closing: true,
        };
        let id = self.alloc(NodeData::Element(element));
        let indent = self.alloc(NodeData::Text(format!("\n{}", "\t".repeat(depth))));

        if let Some(parent_element) = self.element_mut(parent) {
            if parent_element.self_closing {
                parent_element.self_closing = false;
                parent_element.raw_start = None;
            }
        }

        let has_closing_indent = self.nodes[parent.0].children.last().is_some_and(|&last| {
            matches!(&self.nodes[last.0].data, NodeData::Text(t) if t.trim().is_empty())
        });
        if has_closing_indent {
            let at = self.nodes[parent.0].children.len() - 1;
            self.nodes[parent.0].children.insert(at, indent);
            self.nodes[parent.0].children.insert(at + 1, id);
        } else {
            let closing = self.alloc(NodeData::Text(format!(
                "\n{}",
                "\t".repeat(depth.saturating_sub(1))
            )));
            self.nodes[parent.0].children.extend([indent, id, closing]);
            self.nodes[closing.0].parent = Some(parent);
        }
        self.nodes[indent.0].parent = Some(parent);
        self.nodes[id.0].parent = Some(parent);
        id
    }

    /// Replace the text content of `id` with `text` (escaped on write).
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        self.clear_children(id);
        if let Some(element) = self.element_mut(id) {
            if element.self_closing {
                element.self_closing = false;
                element.raw_start = None;
            }
        }
        let node = self.alloc(NodeData::Text(escape(text).into_owned()));
        self.nodes[node.0].parent = Some(id);
        self.nodes[id.0].children.push(node);
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_node(self.document(), &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        match &node.data {
            NodeData::Document => {
                for &child in &node.children {
                    self.write_node(child, out);
                }
            }
            NodeData::Text(text) | NodeData::Markup(text) => out.push_str(text),
            NodeData::Element(element) => {
                out.push('<');
                match &element.raw_start {
                    Some(raw) => out.push_str(raw),
                    None => {
                        out.push_str(&element.name);
                        for (key, value) in &element.attributes {
                            out.push(' ');
                            out.push_str(key);
                            out.push_str("=\"");
                            out.push_str(&escape(value.as_str()));
                            out.push('"');
                        }
                    }
                }
                if element.self_closing && node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    fn push(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = self.alloc(data);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
        id
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(bytes).map_err(|e| e.to_string())
}

fn element_from(start: &BytesStart<'_>, self_closing: bool) -> Result<Element, String> {
    let name = utf8(start.name().as_ref())?.to_string();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value().map_err(|e| e.to_string())?;
        attributes.push((key, value.into_owned()));
    }
    Ok(Element {
        name,
        attributes,
        raw_start: Some(utf8(start)?.to_string()),
        self_closing,
    })
}
