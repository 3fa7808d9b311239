use std::collections::HashMap;

use futures_util::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dom::hash::{self, HashCell, HashedDomElement};
use crate::error::{BrowserError, Result};

/// Index of a node within one snapshot's arena.
///
/// Only meaningful against the `DomTree` that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// Corner/center geometry captured for an indexed element at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateSet {
    pub top_left: Coordinates,
    pub bottom_right: Coordinates,
    pub center: Coordinates,
    pub width: f64,
    pub height: f64,
}

/// Scroll offsets and viewport size at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ViewportInfo {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub width: f64,
    pub height: f64,
}

/// One node of a snapshot: element or raw text.
#[derive(Debug)]
pub enum DomNode {
    Element(ElementData),
    Text(TextData),
}

#[derive(Debug)]
pub struct ElementData {
    /// `None` only for the synthetic root.
    pub tag_name: Option<String>,
    /// XPath relative to the nearest shadow or frame root.
    pub xpath: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<NodeId>,
    pub is_visible: bool,
    pub is_interactive: bool,
    /// Element sits in the browsing context's top layer (open dialog,
    /// popover) or wins the hit test at its own center.
    pub is_top_element: bool,
    pub is_shadow_host: bool,
    /// Present only on actionable elements; unique within one snapshot.
    pub highlight_index: Option<usize>,
    pub viewport_coordinates: Option<CoordinateSet>,
    pub page_coordinates: Option<CoordinateSet>,
    pub viewport_info: Option<ViewportInfo>,
    /// Back-reference; ownership flows strictly child-ward.
    pub parent: Option<NodeId>,
    pub(crate) hash_cell: HashCell,
}

#[derive(Debug)]
pub struct TextData {
    pub text: String,
    pub is_visible: bool,
    pub parent: Option<NodeId>,
}

impl ElementData {
    /// Tag name for display and error context.
    pub fn tag(&self) -> &str {
        self.tag_name.as_deref().unwrap_or("#root")
    }

    pub fn get_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_attribute("id")
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag_name
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Center of the element in viewport coordinates, if captured.
    pub fn viewport_center(&self) -> Option<Coordinates> {
        self.viewport_coordinates.as_ref().map(|c| c.center)
    }

    /// Center of the element in page coordinates, if captured.
    pub fn page_center(&self) -> Option<Coordinates> {
        self.page_coordinates.as_ref().map(|c| c.center)
    }
}

/// Arena-backed snapshot tree.
///
/// Children are held as index lists and parents as optional indices, so
/// upward walks (iframe discovery, branch paths) work without reference
/// cycles.
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<DomNode>,
    root: NodeId,
}

impl DomTree {
    pub(crate) fn from_parts(nodes: Vec<DomNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    /// A tree holding only a synthetic empty root.
    pub fn empty() -> Self {
        let root = DomNode::Element(ElementData {
            tag_name: None,
            xpath: String::new(),
            attributes: HashMap::new(),
            children: Vec::new(),
            is_visible: false,
            is_interactive: false,
            is_top_element: false,
            is_shadow_host: false,
            highlight_index: None,
            viewport_coordinates: None,
            page_coordinates: None,
            viewport_info: None,
            parent: None,
            hash_cell: HashCell::new(),
        });
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(id.0)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.nodes.get(id.0) {
            Some(DomNode::Element(data)) => Some(data),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        match self.nodes.get(id.0)? {
            DomNode::Element(data) => data.parent,
            DomNode::Text(data) => data.parent,
        }
    }

    /// Ancestor chain of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            chain.push(ancestor);
            current = self.parent(ancestor);
        }
        chain
    }

    /// `<iframe>` ancestors of `id` in document order (outermost first).
    pub fn iframe_ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut frames: Vec<NodeId> = self
            .ancestors(id)
            .into_iter()
            .filter(|&a| self.element(a).is_some_and(|e| e.is_tag("iframe")))
            .collect();
        frames.reverse();
        frames
    }

    /// Tag-name path from the root down to `id`, used for identity hashing.
    /// The synthetic root has no tag and contributes nothing.
    pub fn branch_path(&self, id: NodeId) -> Vec<String> {
        self.ancestors(id)
            .into_iter()
            .rev()
            .chain(std::iter::once(id))
            .filter_map(|n| self.element(n))
            .filter_map(|e| e.tag_name.clone())
            .collect()
    }

    pub fn iter_elements(&self) -> impl Iterator<Item = (NodeId, &ElementData)> {
        self.nodes.iter().enumerate().filter_map(|(i, n)| match n {
            DomNode::Element(data) => Some((NodeId(i), data)),
            DomNode::Text(_) => None,
        })
    }

    /// Concatenated visible text of `id`'s descendants, stopping at nested
    /// indexed elements (their text belongs to them).
    pub fn visible_text(&self, id: NodeId) -> String {
        let mut out: Vec<String> = Vec::new();
        self.collect_text(id, id, &mut out);
        out.join(" ")
    }

    fn collect_text(&self, origin: NodeId, id: NodeId, out: &mut Vec<String>) {
        match self.nodes.get(id.0) {
            Some(DomNode::Text(text)) => {
                if text.is_visible {
                    let trimmed = text.text.trim();
                    if !trimmed.is_empty() {
                        out.push(trimmed.to_string());
                    }
                }
            }
            Some(DomNode::Element(element)) => {
                if id != origin && element.highlight_index.is_some() {
                    return;
                }
                for &child in &element.children {
                    self.collect_text(origin, child, out);
                }
            }
            None => {}
        }
    }

    /// Lazily compute (and cache) the navigation-stable identity of `id`.
    pub async fn hashed_element(&self, id: NodeId) -> Result<HashedDomElement> {
        let element = self
            .element(id)
            .ok_or_else(|| BrowserError::ElementNotFound(format!("no element node {id:?}")))?;
        let branch_path = self.branch_path(id);
        let attributes = element.attributes.clone();
        let xpath = element.xpath.clone();
        element
            .hash_cell
            .get_or_compute(element.tag(), move || {
                async move { Ok(hash::compute_identity(&branch_path, &attributes, &xpath)) }
                    .boxed()
            })
            .await
    }

    /// Reset the cached identity of `id`, if any.
    pub fn invalidate_hash(&self, id: NodeId) {
        if let Some(element) = self.element(id) {
            element.hash_cell.invalidate();
        }
    }
}

/// Map from highlight index to the node of the same snapshot generation.
///
/// Rebuilt wholesale with every snapshot; never patched in place.
#[derive(Debug, Default)]
pub struct SelectorMap {
    map: IndexMap<usize, NodeId>,
}

impl SelectorMap {
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, index: usize, id: NodeId) -> bool {
        self.map.insert(index, id).is_none()
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.map.get(&index).copied()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.map.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.map.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.map.iter().map(|(&i, &n)| (i, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, parent: Option<NodeId>) -> ElementData {
        ElementData {
            tag_name: Some(tag.to_string()),
            xpath: format!("/{tag}"),
            attributes: HashMap::new(),
            children: Vec::new(),
            is_visible: true,
            is_interactive: false,
            is_top_element: false,
            is_shadow_host: false,
            highlight_index: None,
            viewport_coordinates: None,
            page_coordinates: None,
            viewport_info: None,
            parent,
            hash_cell: HashCell::new(),
        }
    }

    /// body > div > iframe > form > button, plus a text node in the div.
    fn build_tree() -> (DomTree, NodeId) {
        let mut nodes = Vec::new();

        let mut body = element("body", None);
        let mut div = element("div", Some(NodeId(0)));
        let mut iframe = element("iframe", Some(NodeId(1)));
        let mut form = element("form", Some(NodeId(2)));
        let mut button = element("button", Some(NodeId(3)));
        button.highlight_index = Some(0);
        button.is_interactive = true;

        body.children = vec![NodeId(1)];
        div.children = vec![NodeId(2), NodeId(5)];
        iframe.children = vec![NodeId(3)];
        form.children = vec![NodeId(4)];

        nodes.push(DomNode::Element(body));
        nodes.push(DomNode::Element(div));
        nodes.push(DomNode::Element(iframe));
        nodes.push(DomNode::Element(form));
        nodes.push(DomNode::Element(button));
        nodes.push(DomNode::Text(TextData {
            text: "  hello  ".to_string(),
            is_visible: true,
            parent: Some(NodeId(1)),
        }));

        (DomTree::from_parts(nodes, NodeId(0)), NodeId(4))
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let (tree, button) = build_tree();
        let chain = tree.ancestors(button);
        let tags: Vec<&str> = chain
            .iter()
            .map(|&id| tree.element(id).unwrap().tag())
            .collect();
        assert_eq!(tags, vec!["form", "iframe", "div", "body"]);
    }

    #[test]
    fn iframe_ancestors_outermost_first() {
        let (tree, button) = build_tree();
        let frames = tree.iframe_ancestors(button);
        assert_eq!(frames.len(), 1);
        assert!(tree.element(frames[0]).unwrap().is_tag("iframe"));
    }

    #[test]
    fn branch_path_runs_root_to_leaf() {
        let (tree, button) = build_tree();
        assert_eq!(
            tree.branch_path(button),
            vec!["body", "div", "iframe", "form", "button"]
        );
    }

    #[test]
    fn visible_text_trims_and_joins() {
        let (tree, _) = build_tree();
        assert_eq!(tree.visible_text(NodeId(1)), "hello");
    }

    #[test]
    fn empty_tree_has_synthetic_root() {
        let tree = DomTree::empty();
        assert!(tree.is_empty());
        let root = tree.element(tree.root()).unwrap();
        assert!(root.tag_name.is_none());
        assert_eq!(root.tag(), "#root");
    }

    #[tokio::test]
    async fn hashed_element_is_cached() {
        let (tree, button) = build_tree();
        let first = tree.hashed_element(button).await.unwrap();
        let second = tree.hashed_element(button).await.unwrap();
        assert_eq!(first, second);
        assert!(
            tree.element(button)
                .unwrap()
                .hash_cell
                .cached()
                .is_some()
        );

        tree.invalidate_hash(button);
        assert!(tree.element(button).unwrap().hash_cell.cached().is_none());
    }

    #[test]
    fn selector_map_preserves_insertion_order() {
        let mut map = SelectorMap::new();
        assert!(map.insert(0, NodeId(4)));
        assert!(map.insert(1, NodeId(7)));
        assert!(map.insert(2, NodeId(9)));
        // A duplicate index is a builder bug, reported by `insert`.
        assert!(!map.insert(1, NodeId(11)));

        let indices: Vec<usize> = map.indices().collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(map.get(2), Some(NodeId(9)));
        assert!(!map.contains(5));
    }
}
