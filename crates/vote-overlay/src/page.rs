//! Read-only model of the host page the overlay decorates.
//!
//! The page is described as a JSON element tree ([`PageSnapshot`]) and
//! flattened into an arena in document order, so every subtree occupies a
//! contiguous id range.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("invalid page snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bounding box in page coordinates (viewport offset plus scroll).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }
}

/// Serialized form of one element and its subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    /// `<img src=..>` laid out at `rect`.
    pub fn image(src: impl Into<String>, rect: Rect) -> Self {
        Self::new("img").attr("src", src).rect(rect)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    pub root: ElementSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

#[derive(Debug, Clone)]
pub struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    rect: Option<Rect>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    subtree_end: usize,
}

impl Element {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    /// Text directly owned by this element, not its descendants.
    pub fn own_text(&self) -> &str {
        &self.text
    }

    pub fn rect(&self) -> Option<Rect> {
        self.rect
    }

    /// Image source for `<img>` elements with a non-empty `src`.
    pub fn image_src(&self) -> Option<&str> {
        if self.tag != "img" {
            return None;
        }
        self.attr("src").map(str::trim).filter(|src| !src.is_empty())
    }

    pub fn is_heading(&self) -> bool {
        matches!(self.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
            || self.attr("role") == Some("heading")
    }
}

#[derive(Debug, Clone)]
pub struct PageDocument {
    url: Option<String>,
    elements: Vec<Element>,
}

impl Default for PageDocument {
    fn default() -> Self {
        Self::from_spec(None, ElementSpec::new("body"))
    }
}

impl PageDocument {
    pub fn from_spec(url: Option<String>, root: ElementSpec) -> Self {
        let mut elements = Vec::new();
        flatten(root, None, &mut elements);
        Self { url, elements }
    }

    pub fn from_snapshot(snapshot: PageSnapshot) -> Self {
        Self::from_spec(snapshot.url, snapshot.root)
    }

    pub fn from_json(raw: &str) -> Result<Self, PageError> {
        let snapshot: PageSnapshot = serde_json::from_str(raw)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0)
    }

    /// All elements in document order.
    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Element)> {
        self.elements
            .iter()
            .enumerate()
            .map(|(idx, el)| (ElementId(idx), el))
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.element(id).and_then(|el| el.parent)
    }

    pub fn ancestors(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    pub fn next_sibling(&self, id: ElementId) -> Option<ElementId> {
        let parent = self.element(self.parent(id)?)?;
        let position = parent.children.iter().position(|child| *child == id)?;
        parent.children.get(position + 1).copied()
    }

    /// Descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        let end = self.element(id).map(|el| el.subtree_end).unwrap_or(id.0);
        (id.0 + 1..end).map(ElementId)
    }

    /// Own text of `id` and its descendants joined with spaces.
    pub fn text_content(&self, id: ElementId) -> String {
        std::iter::once(id)
            .chain(self.descendants(id))
            .filter_map(|el| self.element(el))
            .map(|el| el.own_text().trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Images with a source inside `id`'s subtree, `id` included.
    pub fn images_within(&self, id: ElementId) -> Vec<ElementId> {
        std::iter::once(id)
            .chain(self.descendants(id))
            .filter(|el| {
                self.element(*el)
                    .and_then(Element::image_src)
                    .is_some()
            })
            .collect()
    }

    pub fn images(&self) -> Vec<ElementId> {
        self.images_within(self.root())
    }
}

fn flatten(spec: ElementSpec, parent: Option<ElementId>, out: &mut Vec<Element>) -> ElementId {
    let id = ElementId(out.len());
    out.push(Element {
        tag: spec.tag.to_ascii_lowercase(),
        attrs: spec.attrs,
        text: spec.text,
        rect: spec.rect,
        parent,
        children: Vec::new(),
        subtree_end: id.0 + 1,
    });
    let mut children = Vec::with_capacity(spec.children.len());
    for child in spec.children {
        children.push(flatten(child, Some(id), out));
    }
    let end = out.len();
    let element = &mut out[id.0];
    element.children = children;
    element.subtree_end = end;
    id
}

/// Supplies the current page each overlay tick.
pub trait PageSource: Send + Sync {
    fn snapshot(&self) -> PageDocument;
}

/// Page held in memory and swapped wholesale, e.g. when a new snapshot file
/// is loaded.
#[derive(Debug, Default)]
pub struct StaticPage {
    document: RwLock<PageDocument>,
}

impl StaticPage {
    pub fn new(document: PageDocument) -> Self {
        Self {
            document: RwLock::new(document),
        }
    }

    pub fn replace(&self, document: PageDocument) {
        *self.document.write() = document;
    }
}

impl PageSource for StaticPage {
    fn snapshot(&self) -> PageDocument {
        self.document.read().clone()
    }
}
