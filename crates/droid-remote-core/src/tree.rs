//! UI-automation snapshot model.
//!
//! A [`UiTree`] is parsed once from a `uiautomator dump` and never mutated.
//! Nodes live in a flat arena in document order, which makes "all descendants"
//! a contiguous index range and keeps parent/sibling navigation cheap.
//! Classifiers borrow [`UiNode`] handles and only ever read.
//!
//! Cloning a tree is cheap (the arena is shared), so error values can carry the
//! offending snapshot for diagnostics.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use crate::geometry::Bounds;

/// Trailer printed by `uiautomator dump /dev/tty` after the XML document.
/// The misspelling is the tool's own.
const DUMP_TRAILER: &str = "UI hierchary dumped to:";

/// Tag of every view element in a dump.
pub const NODE_TAG: &str = "node";

/// Errors raised while reading a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("UI dump is empty")]
    Empty,

    #[error("malformed UI dump at byte {position}: {message}")]
    Malformed { position: usize, message: String },

    #[error("<{tag}> has no usable bounds ({value:?})")]
    InvalidBounds { tag: String, value: Option<String> },
}

#[derive(Debug, Clone)]
struct RawNode {
    tag: String,
    attributes: Vec<(String, String)>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// One past the index of the last descendant.
    end: usize,
}

/// An immutable, parsed UI hierarchy.
#[derive(Debug, Clone)]
pub struct UiTree {
    nodes: Arc<Vec<RawNode>>,
}

impl UiTree {
    /// Parse the raw output of `uiautomator dump /dev/tty`.
    ///
    /// Everything from the trailing "dumped to" notice onwards is ignored.
    pub fn parse_dump(output: &str) -> Result<Self, SnapshotError> {
        let xml = match output.rfind(DUMP_TRAILER) {
            Some(end) => &output[..end],
            None => output,
        };
        Self::parse(xml)
    }

    /// Parse a complete XML document.
    pub fn parse(xml: &str) -> Result<Self, SnapshotError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut nodes: Vec<RawNode> = Vec::new();
        let mut open: Vec<usize> = Vec::new();

        loop {
            let malformed = |position: usize, message: String| SnapshotError::Malformed {
                position,
                message,
            };
            match reader.read_event() {
                Ok(Event::Start(ref start)) => {
                    let index = push_node(&mut nodes, start, open.last().copied())
                        .map_err(|m| malformed(reader.buffer_position(), m))?;
                    open.push(index);
                }
                Ok(Event::Empty(ref start)) => {
                    let index = push_node(&mut nodes, start, open.last().copied())
                        .map_err(|m| malformed(reader.buffer_position(), m))?;
                    nodes[index].end = index + 1;
                }
                Ok(Event::End(_)) => {
                    if let Some(index) = open.pop() {
                        nodes[index].end = nodes.len();
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(malformed(reader.buffer_position(), e.to_string())),
            }
        }

        if !open.is_empty() {
            return Err(SnapshotError::Malformed {
                position: xml.len(),
                message: format!("{} unclosed element(s)", open.len()),
            });
        }
        if nodes.is_empty() {
            return Err(SnapshotError::Empty);
        }

        Ok(Self {
            nodes: Arc::new(nodes),
        })
    }

    /// The document element (`<hierarchy>` in a real dump).
    pub fn root(&self) -> UiNode<'_> {
        UiNode {
            tree: self,
            index: 0,
        }
    }

    /// Every `node` element in document order, excluding the root.
    pub fn nodes(&self) -> impl Iterator<Item = UiNode<'_>> + '_ {
        self.root().descendants()
    }

    /// Nodes with a non-empty `text` attribute, in document order.
    pub fn text_nodes(&self) -> impl Iterator<Item = UiNode<'_>> + '_ {
        self.root().text_descendants()
    }

    /// Nodes whose `text` attribute equals `text` exactly.
    pub fn nodes_with_text<'a>(&'a self, text: &'a str) -> impl Iterator<Item = UiNode<'a>> + 'a {
        self.nodes().filter(move |node| node.attr("text") == Some(text))
    }

    /// The first `node` directly under the document element.
    pub fn top_level_node(&self) -> Option<UiNode<'_>> {
        self.root().children().next()
    }

    /// Number of elements, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pretty-printed XML, for operators diagnosing an unrecognized screen.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_node(&mut out, self.root(), 0);
        out
    }
}

fn push_node(
    nodes: &mut Vec<RawNode>,
    start: &BytesStart<'_>,
    parent: Option<usize>,
) -> Result<usize, String> {
    if parent.is_none() && !nodes.is_empty() {
        return Err("multiple root elements".to_string());
    }

    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }

    let index = nodes.len();
    nodes.push(RawNode {
        tag,
        attributes,
        parent,
        children: Vec::new(),
        end: index + 1,
    });
    if let Some(parent) = parent {
        nodes[parent].children.push(index);
    }
    Ok(index)
}

fn write_node(out: &mut String, node: UiNode<'_>, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{}<{}", indent, node.tag());
    for (key, value) in node.attributes() {
        let _ = write!(out, " {}=\"{}\"", key, quick_xml::escape::escape(value));
    }
    if node.children().next().is_none() {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");
    for child in node.children() {
        write_node(out, child, depth + 1);
    }
    let _ = writeln!(out, "{}</{}>", indent, node.tag());
}

fn bounds_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("bounds pattern is valid")
    })
}

/// A borrowed handle to one element of a [`UiTree`].
#[derive(Debug, Clone, Copy)]
pub struct UiNode<'a> {
    tree: &'a UiTree,
    index: usize,
}

impl PartialEq for UiNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.index == other.index
    }
}

impl Eq for UiNode<'_> {}

impl<'a> UiNode<'a> {
    fn raw(&self) -> &'a RawNode {
        &self.tree.nodes[self.index]
    }

    fn at(&self, index: usize) -> UiNode<'a> {
        UiNode {
            tree: self.tree,
            index,
        }
    }

    pub fn tag(&self) -> &'a str {
        &self.raw().tag
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.raw()
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.raw()
            .attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// The `text` attribute, or `""` when absent.
    pub fn text(&self) -> &'a str {
        self.attr("text").unwrap_or("")
    }

    pub fn has_text(&self) -> bool {
        !self.text().is_empty()
    }

    pub fn resource_id(&self) -> Option<&'a str> {
        self.attr("resource-id")
    }

    pub fn class(&self) -> Option<&'a str> {
        self.attr("class")
    }

    pub fn package(&self) -> Option<&'a str> {
        self.attr("package")
    }

    pub fn bounds(&self) -> Result<Bounds, SnapshotError> {
        let raw = self.attr("bounds");
        let invalid = || SnapshotError::InvalidBounds {
            tag: self.tag().to_string(),
            value: raw.map(str::to_string),
        };
        let captures = raw
            .and_then(|value| bounds_pattern().captures(value.trim()))
            .ok_or_else(invalid)?;
        let mut coords = [0i32; 4];
        for (slot, coord) in coords.iter_mut().enumerate() {
            *coord = captures[slot + 1].parse().map_err(|_| invalid())?;
        }
        Ok(Bounds::from_corners(
            coords[0], coords[1], coords[2], coords[3],
        ))
    }

    pub fn parent(&self) -> Option<UiNode<'a>> {
        self.raw().parent.map(|index| self.at(index))
    }

    pub fn children(&self) -> impl Iterator<Item = UiNode<'a>> + 'a {
        let tree = self.tree;
        self.raw()
            .children
            .iter()
            .map(move |&index| UiNode { tree, index })
    }

    /// The element directly after this one under the same parent.
    pub fn next_sibling(&self) -> Option<UiNode<'a>> {
        let parent = self.parent()?;
        let siblings = &parent.raw().children;
        let position = siblings.iter().position(|&index| index == self.index)?;
        siblings.get(position + 1).map(|&index| self.at(index))
    }

    /// All `node` elements below this one (not including itself), in document order.
    pub fn descendants(&self) -> impl Iterator<Item = UiNode<'a>> + 'a {
        let tree = self.tree;
        (self.index + 1..self.raw().end)
            .map(move |index| UiNode { tree, index })
            .filter(|node| node.tag() == NODE_TAG)
    }

    /// Descendants with a non-empty `text` attribute.
    pub fn text_descendants(&self) -> impl Iterator<Item = UiNode<'a>> + 'a {
        self.descendants().filter(|node| node.has_text())
    }

    /// Texts of [`UiNode::text_descendants`], owned.
    pub fn collect_texts(&self) -> Vec<String> {
        self.text_descendants()
            .map(|node| node.text().to_string())
            .collect()
    }
}
