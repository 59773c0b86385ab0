//! Owned, mutable document tree.
//!
//! Markup is parsed once with `scraper` (html5ever) and copied into a flat
//! arena of [`Node`]s addressed by [`NodeId`]. CSS selectors are evaluated
//! against the parsed tree at load time; afterwards nodes are only ever
//! addressed by id. The compiler sanitizes this tree and the in-process
//! isolated context mutates it, and both serialize it back to markup.

use std::collections::HashMap;

use scraper::{Html, Selector};

/// Index of a node in its [`Document`] arena.
pub type NodeId = usize;

/// Result of evaluating one selector: the matched nodes in document order, or
/// the parse error text for an invalid selector.
pub type QueryResult = Result<Vec<NodeId>, String>;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Elements whose text children are written verbatim, in the HTML namespace only.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "noscript", "plaintext",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// SVG or MathML content. Its text is always escaped on output.
    pub foreign: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            foreign: false,
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(pos).1)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_ascii_whitespace().any(|t| t == class))
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let joined = match self.attr("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr("class", joined);
    }

    pub fn remove_class(&mut self, class: &str) {
        let Some(existing) = self.attr("class") else {
            return;
        };
        let kept: Vec<&str> = existing
            .split_ascii_whitespace()
            .filter(|t| *t != class)
            .collect();
        if kept.is_empty() {
            self.remove_attr("class");
        } else {
            let joined = kept.join(" ");
            self.set_attr("class", joined);
        }
    }

    /// Value of one inline style declaration (`style="color: red"`).
    pub fn style_property(&self, css_name: &str) -> Option<String> {
        let style = self.attr("style")?;
        parse_declarations(style)
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(css_name))
            .map(|(_, v)| v)
    }

    /// Assign one inline style declaration, replacing any existing value for
    /// the same property. An empty value removes the declaration.
    pub fn set_style_property(&mut self, css_name: &str, value: &str) {
        let mut decls = self.attr("style").map(parse_declarations).unwrap_or_default();
        let value = value.trim();
        match decls.iter().position(|(k, _)| k.eq_ignore_ascii_case(css_name)) {
            Some(pos) if value.is_empty() => {
                decls.remove(pos);
            }
            Some(pos) => decls[pos].1 = value.to_string(),
            None if value.is_empty() => {}
            None => decls.push((css_name.to_ascii_lowercase(), value.to_string())),
        }
        if decls.is_empty() {
            self.remove_attr("style");
        } else {
            self.set_attr("style", format_declarations(&decls));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Doctype(String),
    Comment(String),
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn as_element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }
}

/// Arena-backed document. Node `0` is always the document root. Detached
/// nodes stay in the arena but are unreachable from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// Parse a full document. Fragments get the html/head/body shell html5ever
    /// always synthesizes.
    pub fn parse(html: &str) -> Self {
        Self::parse_querying(html, &[]).0
    }

    /// Parse a document and evaluate `selectors` against it before the parse
    /// tree is dropped. Results are returned in the order of `selectors`.
    pub fn parse_querying(html: &str, selectors: &[&str]) -> (Self, Vec<QueryResult>) {
        let parsed = Html::parse_document(html);
        let mut nodes: Vec<Node> = Vec::new();
        let mut index = HashMap::new();

        // descendants() is pre-order, so every parent is indexed before its children.
        for node in parsed.tree.root().descendants() {
            let kind = match node.value() {
                scraper::Node::Element(el) => NodeKind::Element(Element {
                    name: el.name().to_string(),
                    attrs: el
                        .attrs()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    foreign: &*el.name.ns != HTML_NAMESPACE,
                }),
                scraper::Node::Text(text) => NodeKind::Text(String::from(&**text)),
                scraper::Node::Comment(comment) => NodeKind::Comment(String::from(&**comment)),
                scraper::Node::Doctype(doctype) => NodeKind::Doctype(doctype.name().to_string()),
                scraper::Node::Document | scraper::Node::Fragment => NodeKind::Document,
                _ => continue,
            };
            let id = nodes.len();
            let parent = node.parent().and_then(|p| index.get(&p.id()).copied());
            index.insert(node.id(), id);
            let mut entry = Node::new(kind);
            entry.parent = parent;
            nodes.push(entry);
            if let Some(p) = parent {
                nodes[p].children.push(id);
            }
        }

        if nodes.is_empty() {
            nodes.push(Node::new(NodeKind::Document));
        }

        let results = selectors
            .iter()
            .map(|raw| -> QueryResult {
                let selector = Selector::parse(raw).map_err(|e| format!("{:?}", e))?;
                Ok(parsed
                    .select(&selector)
                    .filter_map(|el| index.get(&el.id()).copied())
                    .collect())
            })
            .collect();

        (Document { nodes }, results)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(id).and_then(Node::as_element)
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Element(el)) => Some(el),
            _ => None,
        }
    }

    /// Whether `id` is reachable from the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == Self::ROOT {
                return true;
            }
            match self.nodes.get(current).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Connected descendants of `id` in document order (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(id)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.nodes.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Connected elements with tag `name`, in document order.
    pub fn elements_named(&self, name: &str) -> Vec<NodeId> {
        self.descendants(Self::ROOT)
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(|el| el.name == name))
            .collect()
    }

    pub fn first_element_named(&self, name: &str) -> Option<NodeId> {
        self.elements_named(name).into_iter().next()
    }

    /// First connected element whose `attr` equals `value`.
    pub fn find_by_attr(&self, attr: &str, value: &str) -> Option<NodeId> {
        self.descendants(Self::ROOT)
            .into_iter()
            .find(|id| self.element(*id).and_then(|el| el.attr(attr)) == Some(value))
    }

    /// Concatenated text of all descendant text nodes, like DOM `textContent`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|d| match &self.nodes[d].kind {
                NodeKind::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children of `id` with a single text node (none for an
    /// empty string), like assigning DOM `textContent`.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let old = std::mem::take(&mut node.children);
        for child in old {
            self.nodes[child].parent = None;
        }
        if !text.is_empty() {
            self.append_child(id, NodeKind::Text(text.to_string()));
        }
    }

    pub fn append_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let len = self.nodes.get(parent).map_or(0, |n| n.children.len());
        self.insert_child(parent, len, kind)
    }

    pub fn insert_child(&mut self, parent: NodeId, position: usize, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new(kind);
        node.parent = Some(parent);
        self.nodes.push(node);
        if let Some(p) = self.nodes.get_mut(parent) {
            let position = position.min(p.children.len());
            p.children.insert(position, id);
        }
        id
    }

    /// Append an element holding a single text child (used for `<style>`/`<script>`).
    pub fn append_element_with_text(&mut self, parent: NodeId, element: Element, text: &str) -> NodeId {
        let id = self.append_child(parent, NodeKind::Element(element));
        if !text.is_empty() {
            self.append_child(id, NodeKind::Text(text.to_string()));
        }
        id
    }

    /// Detach `id` (and its subtree) from its parent.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) else {
            return;
        };
        self.nodes[parent].children.retain(|c| *c != id);
        self.nodes[id].parent = None;
    }

    /// Serialize the connected tree back to HTML.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for child in &self.nodes[Self::ROOT].children {
            self.write_node(*child, false, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, raw_text: bool, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Document => {
                for child in &self.nodes[id].children {
                    self.write_node(*child, false, out);
                }
            }
            NodeKind::Doctype(name) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(if name.is_empty() { "html" } else { name });
                out.push('>');
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.name);
                for (k, v) in &el.attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(v));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.name.as_str()) {
                    return;
                }
                let raw = !el.foreign && RAW_TEXT_ELEMENTS.contains(&el.name.as_str());
                for child in &self.nodes[id].children {
                    self.write_node(*child, raw, out);
                }
                out.push_str("</");
                out.push_str(&el.name);
                out.push('>');
            }
        }
    }
}

/// Whether `selector` parses as a CSS selector list.
pub fn is_valid_selector(selector: &str) -> bool {
    Selector::parse(selector).is_ok()
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;")
}

/// Split an inline style attribute into `(property, value)` pairs.
pub fn parse_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            let k = k.trim();
            let v = v.trim();
            if k.is_empty() {
                None
            } else {
                Some((k.to_ascii_lowercase(), v.to_string()))
            }
        })
        .collect()
}

pub fn format_declarations(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(k, v)| format!("{}: {};", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
