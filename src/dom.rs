//! A small mutable document tree for one chapter.
//!
//! scraper parses the chapter markup; the body is then copied into this
//! arena so later passes can split text nodes, wrap ranges and unwrap
//! highlight spans. Node ids stay valid for the life of the document;
//! detached nodes simply stop being reachable from the root.

use crate::error::DomError;
use crate::stylesheet::SCOPE_CLASS;
use html_escape::{encode_double_quoted_attribute, encode_text};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::trace;

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const DROPPED_ELEMENTS: [&str; 3] = ["script", "noscript", "iframe"];

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("head title").unwrap());
static STYLE_SOURCES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("style, link[rel~=stylesheet]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ChapterDocument {
    nodes: Vec<Node>,
    root: NodeId,
}

impl ChapterDocument {
    /// An empty document whose root is the render container.
    pub fn new() -> Self {
        let mut document = ChapterDocument {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        document.root =
            document.create_element("div", vec![("class".to_string(), SCOPE_CLASS.to_string())]);
        document
    }

    pub fn root(&self) -> NodeId {
        self.root
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

    pub fn create_element(&mut self, name: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push(NodeData::Element {
            name: name.to_ascii_lowercase(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { name, .. } => Some(name),
            NodeData::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Text(text) => Some(text),
            NodeData::Element { .. } => None,
        }
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            match attrs.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(key)) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((key.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, key: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            attrs.retain(|(name, _)| !name.eq_ignore_ascii_case(key));
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Whether the node is still reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = id;
        loop {
            if cursor == self.root {
                return true;
            }
            match self.nodes[cursor.0].parent {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert `node` as the next sibling of `anchor`.
    pub fn insert_after(&mut self, anchor: NodeId, node: NodeId) {
        let Some(parent) = self.nodes[anchor.0].parent else {
            return;
        };
        self.detach(node);
        let siblings = &mut self.nodes[parent.0].children;
        let position = siblings
            .iter()
            .position(|child| *child == anchor)
            .map(|pos| pos + 1)
            .unwrap_or(siblings.len());
        siblings.insert(position, node);
        self.nodes[node.0].parent = Some(parent);
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    /// Descendants of `id` in document order, `id` excluded.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    pub fn elements_by_tag(&self, within: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(within)
            .into_iter()
            .filter(|id| {
                self.tag_name(*id)
                    .is_some_and(|name| name.eq_ignore_ascii_case(tag))
            })
            .collect()
    }

    /// Text nodes under `within` with some non-whitespace content.
    pub fn text_nodes(&self, within: NodeId) -> Vec<NodeId> {
        self.descendants(within)
            .into_iter()
            .filter(|id| self.text(*id).is_some_and(|text| !text.trim().is_empty()))
            .collect()
    }

    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_string();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|node| self.text(node))
            .collect()
    }

    /// Nearest inclusive ancestor matching `predicate`.
    pub fn closest(&self, id: NodeId, predicate: impl Fn(&Self, NodeId) -> bool) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            if predicate(self, node) {
                return Some(node);
            }
            cursor = self.nodes[node.0].parent;
        }
        None
    }

    /// Wrap bytes `start..end` of a text node in a new element.
    ///
    /// The original node keeps the text before the range; the wrapper and
    /// any trailing text become its following siblings. Offsets into the
    /// original node before `start` therefore stay valid.
    pub fn surround_text(
        &mut self,
        id: NodeId,
        start: usize,
        end: usize,
        wrapper: &str,
        attrs: Vec<(String, String)>,
    ) -> Result<NodeId, DomError> {
        let text = self.text(id).ok_or(DomError::NotText(id.0))?;
        if !self.is_attached(id) {
            return Err(DomError::Detached(id.0));
        }
        if start > end || end > text.len() {
            return Err(DomError::OutOfBounds {
                start,
                end,
                len: text.len(),
            });
        }
        if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            return Err(DomError::NotCharBoundary { start, end });
        }

        let middle = text[start..end].to_string();
        let after = text[end..].to_string();
        let before = text[..start].to_string();
        self.nodes[id.0].data = NodeData::Text(before);

        let wrapper = self.create_element(wrapper, attrs);
        let inner = self.create_text(&middle);
        self.append_child(wrapper, inner);
        self.insert_after(id, wrapper);
        if !after.is_empty() {
            let tail = self.create_text(&after);
            self.insert_after(wrapper, tail);
        }
        Ok(wrapper)
    }

    /// Replace an element by its children.
    pub fn unwrap(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        let Some(position) = self.nodes[parent.0]
            .children
            .iter()
            .position(|child| *child == id)
        else {
            return;
        };
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in &children {
            self.nodes[child.0].parent = Some(parent);
        }
        let siblings = &mut self.nodes[parent.0].children;
        siblings.remove(position);
        for (offset, child) in children.into_iter().enumerate() {
            siblings.insert(position + offset, child);
        }
        self.nodes[id.0].parent = None;
    }

    /// Merge adjacent text siblings and drop empty text nodes.
    pub fn normalize(&mut self, id: NodeId) {
        let children = self.nodes[id.0].children.clone();
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            if let NodeData::Text(text) = &self.nodes[child.0].data {
                if text.is_empty() {
                    self.nodes[child.0].parent = None;
                    continue;
                }
                if let Some(previous) = kept.last().copied() {
                    if let NodeData::Text(_) = self.nodes[previous.0].data {
                        let text = text.clone();
                        if let NodeData::Text(merged) = &mut self.nodes[previous.0].data {
                            merged.push_str(&text);
                        }
                        self.nodes[child.0].parent = None;
                        continue;
                    }
                }
            } else {
                self.normalize(child);
            }
            kept.push(child);
        }
        self.nodes[id.0].children = kept;
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(*child, &mut out, &|_: &str, _: &str, value: &str| value.to_string());
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        self.outer_html_with(id, &|_: &str, _: &str, value: &str| value.to_string())
    }

    /// Serialize with a hook that may rewrite attribute values.
    pub fn outer_html_with(&self, id: NodeId, rewrite: &dyn Fn(&str, &str, &str) -> String) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out, rewrite);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String, rewrite: &dyn Fn(&str, &str, &str) -> String) {
        match &self.nodes[id.0].data {
            NodeData::Text(text) => {
                let raw = self
                    .parent(id)
                    .and_then(|parent| self.tag_name(parent))
                    .is_some_and(|name| name == "style");
                if raw {
                    out.push_str(text);
                } else {
                    out.push_str(&encode_text(text));
                }
            }
            NodeData::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attrs {
                    let value = rewrite(name, key, value);
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&encode_double_quoted_attribute(&value));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    return;
                }
                for child in &self.nodes[id.0].children {
                    self.write_node(*child, out, rewrite);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
    }
}

impl Default for ChapterDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a chapter's CSS comes from, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    Inline(String),
    Linked(String),
}

/// A chapter body copied out of the parsed markup, plus its style sources.
#[derive(Debug, Clone)]
pub struct ParsedChapter {
    pub document: ChapterDocument,
    pub styles: Vec<StyleSource>,
    pub title: Option<String>,
}

impl ParsedChapter {
    /// `None` when the markup has no body with renderable content.
    pub fn parse(markup: &str) -> Option<ParsedChapter> {
        if markup.trim().is_empty() {
            return None;
        }
        let html = Html::parse_document(markup);
        let body = html.select(&BODY).next()?;

        let styles = html
            .select(&STYLE_SOURCES)
            .filter_map(|element| match element.value().name() {
                "style" => {
                    let css: String = element.text().collect();
                    (!css.trim().is_empty()).then_some(StyleSource::Inline(css))
                }
                _ => element
                    .value()
                    .attr("href")
                    .map(|href| StyleSource::Linked(href.trim().to_string())),
            })
            .collect();

        let title = html
            .select(&TITLE)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|title| !title.is_empty());

        let mut document = ChapterDocument::new();
        let root = document.root();
        if let Some(body_class) = body.value().attr("class") {
            document.set_attr(root, "class", &format!("{SCOPE_CLASS} {body_class}"));
        }
        for key in ["dir", "lang"] {
            if let Some(value) = body.value().attr(key) {
                document.set_attr(root, key, value);
            }
        }
        import_children(&mut document, root, body);

        let has_content = document.descendants(root).into_iter().any(|id| match document.data(id) {
            NodeData::Element { .. } => true,
            NodeData::Text(text) => !text.trim().is_empty(),
        });
        if !has_content {
            trace!("Chapter body has no renderable content");
            return None;
        }

        Some(ParsedChapter {
            document,
            styles,
            title,
        })
    }
}

fn import_children(document: &mut ChapterDocument, parent: NodeId, element: ElementRef<'_>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let node = document.create_text(text);
            document.append_child(parent, node);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        // <style> bodies are collected separately and scoped before injection.
        if name == "style" || DROPPED_ELEMENTS.contains(&name) {
            continue;
        }
        let attrs = child
            .value()
            .attrs()
            .filter(|(key, value)| is_safe_attr(key, value))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let node = document.create_element(name, attrs);
        document.append_child(parent, node);
        import_children(document, node, child);
    }
}

fn is_safe_attr(key: &str, value: &str) -> bool {
    if key.len() > 2 && key.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("on")) {
        return false;
    }
    !value
        .trim_start()
        .get(..11)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
}
